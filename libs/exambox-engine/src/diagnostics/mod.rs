/// Text Diagnostic Parsers
///
/// Pure functions over captured compiler/interpreter output, one module per
/// runtime profile. Nothing here touches Docker or decides the final verdict;
/// the classifier picks which parser to run and what the findings mean.
///
/// Every pattern is compiled once on first use.

pub mod compiled;
pub mod interpreted;

use regex::Regex;
use std::sync::OnceLock;

/// Compile a constant pattern into its cell on first use
pub(crate) fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("diagnostic pattern must compile"))
}

/// Parse a captured line/column number; positions are 1-based
pub(crate) fn position(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().map(|n| n.max(1))
}
