/// Compiled-profile (dotnet/MSBuild) output parsing
///
/// Build output is matched against an ordered list of [`Rule`]s, most
/// specific first. The first rule that matches any line of the text is the
/// only rule used for that text, so a structured error line is never shadowed
/// by the looser fallbacks also matching it.

use super::{cached, position};
use exambox_common::types::{dedupe_by_code, Diagnostic, RuntimeError, Severity};
use regex::{Captures, Regex};
use std::sync::OnceLock;

pub const BUILD_FAILED_MARKER: &str = "Build FAILED";
pub const BUILD_SUCCEEDED_MARKER: &str = "Build succeeded.";

/// Source file the runner image compiles
pub const PRIMARY_SOURCE: &str = "Program.cs";

/// Code given to diagnostics matched by the last-resort rule
pub const UNKNOWN_CODE: &str = "CS0000";

/// One extraction rule: a line pattern and how to turn its captures into a
/// diagnostic.
pub struct Rule {
    pub name: &'static str,
    pattern: fn() -> &'static Regex,
    build: fn(&Captures<'_>) -> Option<Diagnostic>,
}

impl Rule {
    pub fn extract(&self, line: &str) -> Option<Diagnostic> {
        let caps = (self.pattern)().captures(line)?;
        (self.build)(&caps)
    }
}

fn structured_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(
        &RE,
        r"^\s*(?P<file>[^\s(][^(]*?)\((?P<line>\d+),(?P<col>\d+)\):\s*(?P<severity>error|warning)\s+(?P<code>[A-Z]+\d+):\s*(?P<message>.*?)\s*(?:\[[^\]]*\])?\s*$",
    )
}

fn coded_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(
        &RE,
        r"\berror\s+(?P<code>[A-Z]+\d+):\s*(?P<message>.*?)\s*(?:\[[^\]]*\])?\s*$",
    )
}

fn generic_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"\b(?P<severity>error|warning):\s*(?P<message>.+?)\s*$")
}

fn error_count_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"(?P<count>\d+)\s+Error\(s\)")
}

fn unhandled_exception_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(
        &RE,
        r"^\s*Unhandled exception\.\s+(?P<type>[^\s:]+):\s*(?P<message>.*?)\s*$",
    )
}

fn stack_frame_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"\bat\s+.+\s+in\s+.+:line\s+(?P<line>\d+)")
}

fn build_structured(caps: &Captures<'_>) -> Option<Diagnostic> {
    Some(Diagnostic {
        file: caps["file"].trim().to_string(),
        line: position(&caps["line"])?,
        column: position(&caps["col"])?,
        severity: Severity::from_str(&caps["severity"])?,
        code: caps["code"].to_string(),
        message: caps["message"].trim().to_string(),
    })
}

fn build_coded(caps: &Captures<'_>) -> Option<Diagnostic> {
    Some(Diagnostic::error(
        PRIMARY_SOURCE,
        1,
        1,
        &caps["code"],
        &caps["message"],
    ))
}

fn build_generic(caps: &Captures<'_>) -> Option<Diagnostic> {
    let mut diagnostic = Diagnostic::error(PRIMARY_SOURCE, 1, 1, UNKNOWN_CODE, &caps["message"]);
    diagnostic.severity = Severity::from_str(&caps["severity"])?;
    Some(diagnostic)
}

/// Rules in priority order
pub static RULES: [Rule; 3] = [
    Rule {
        name: "structured",
        pattern: structured_pattern,
        build: build_structured,
    },
    Rule {
        name: "coded",
        pattern: coded_pattern,
        build: build_coded,
    },
    Rule {
        name: "generic",
        pattern: generic_pattern,
        build: build_generic,
    },
];

/// Extract diagnostics from build output, unique by code (first wins)
pub fn parse_diagnostics(text: &str) -> Vec<Diagnostic> {
    for rule in &RULES {
        let found: Vec<Diagnostic> = text.lines().filter_map(|line| rule.extract(line)).collect();
        if !found.is_empty() {
            tracing::debug!(rule = rule.name, matches = found.len(), "Build diagnostics matched");
            return dedupe_by_code(found);
        }
    }
    Vec::new()
}

/// Error total from the MSBuild summary line (`2 Error(s)`), if present
pub fn parse_error_count(text: &str) -> Option<usize> {
    error_count_pattern()
        .captures(text)
        .and_then(|caps| caps["count"].parse().ok())
}

/// Program output printed after a successful build. MSBuild summary lines
/// (warning/error totals, elapsed time) are dropped.
pub fn program_output(stdout: &str) -> Option<String> {
    let lines: Vec<&str> = stdout.lines().collect();
    let marker = lines
        .iter()
        .position(|line| line.contains(BUILD_SUCCEEDED_MARKER))?;

    let kept: Vec<&str> = lines[marker + 1..]
        .iter()
        .copied()
        .filter(|line| {
            !line.contains("Warning(s)") && !line.contains("Error(s)") && !line.contains("Time Elapsed")
        })
        .collect();

    Some(kept.join("\n").trim().to_string())
}

/// Unhandled exception reported by a program that built and then crashed.
/// The line comes from the first stack frame after the exception line that
/// carries source information; it stays 1 when there is none.
pub fn parse_runtime_error(text: &str) -> Option<RuntimeError> {
    let lines: Vec<&str> = text.lines().collect();

    let (index, caps) = lines
        .iter()
        .enumerate()
        .find_map(|(idx, line)| unhandled_exception_pattern().captures(line).map(|caps| (idx, caps)))?;

    let line = lines[index + 1..]
        .iter()
        .find_map(|frame| stack_frame_pattern().captures(frame))
        .and_then(|frame| position(&frame["line"]))
        .unwrap_or(1);

    Some(RuntimeError {
        error_type: caps["type"].to_string(),
        message: caps["message"].to_string(),
        line,
    })
}
