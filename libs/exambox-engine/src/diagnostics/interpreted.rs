/// Interpreted-profile (Python) stderr parsing
///
/// Two independent passes over the same text:
/// - [`parse_syntax_errors`] walks the lines once, pairing each
///   `File "...", line N` location with the error line that follows it and
///   picking up the caret column in between.
/// - [`parse_runtime_error`] reads a traceback: the exception line after the
///   final frame block is the one reported (chained exceptions print the
///   final cause last) and the first frame in the entry file gives the line.

use super::{cached, position};
use exambox_common::types::{dedupe_by_code, Diagnostic, RuntimeError};
use regex::Regex;
use std::sync::OnceLock;

/// Filename the runner image gives the submitted script
pub const ENTRY_FILE: &str = "main.py";

pub const TRACEBACK_MARKER: &str = "Traceback";

/// Exception classes Python raises while compiling a script
pub const SYNTAX_CLASSES: [&str; 3] = ["SyntaxError", "IndentationError", "TabError"];

const FALLBACK_SYNTAX_MESSAGE: &str = "Syntax error";

fn location_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r#"File "(?P<file>.+?)", line (?P<line>\d+)"#)
}

fn error_line_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(
        &RE,
        r"^(?P<class>SyntaxError|IndentationError|TabError|\w+Error):\s*(?P<message>.+?)\s*$",
    )
}

fn caret_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^\s*\^")
}

fn exception_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(
        &RE,
        r"^(?P<class>[A-Za-z_][\w.]*)(?::\s*(?P<message>.*?))?\s*$",
    )
}

pub fn is_syntax_class(class: &str) -> bool {
    SYNTAX_CLASSES.contains(&class)
}

fn is_traceback(text: &str) -> bool {
    text.lines().any(|line| line.starts_with(TRACEBACK_MARKER))
}

/// Whether a frame's path names `entry_file` itself, not just ends with it
fn is_entry_frame(path: &str, entry_file: &str) -> bool {
    path.rsplit(|c: char| c == '/' || c == '\\').next() == Some(entry_file)
}

/// Compile-time errors reported by the interpreter, unique by error class.
///
/// A location line opens a pending diagnostic; the next error line closes
/// it. Error lines with nothing pending become standalone diagnostics
/// against `entry_file`. A location left pending at the end of the text is
/// still reported with a generic message, unless the text is a traceback:
/// there a dangling location is just a call frame.
pub fn parse_syntax_errors(text: &str, entry_file: &str) -> Vec<Diagnostic> {
    let mut found = Vec::new();
    let mut pending: Option<Diagnostic> = None;

    for raw in text.lines() {
        let line = raw.trim();

        if let Some(caps) = location_pattern().captures(line) {
            let Some(line_no) = position(&caps["line"]) else {
                continue;
            };
            pending = Some(Diagnostic::error(
                &caps["file"],
                line_no,
                1,
                SYNTAX_CLASSES[0],
                "",
            ));
            continue;
        }

        if let Some(caps) = error_line_pattern().captures(line) {
            let class = &caps["class"];
            let message = caps["message"].trim();
            match pending.take() {
                Some(mut diagnostic) => {
                    diagnostic.code = class.to_string();
                    diagnostic.message = message.to_string();
                    found.push(diagnostic);
                }
                None => found.push(Diagnostic::error(entry_file, 1, 1, class, message)),
            }
            continue;
        }

        if let Some(diagnostic) = pending.as_mut() {
            if caret_pattern().is_match(raw) {
                let offset = raw.chars().take_while(|c| *c != '^').count();
                diagnostic.column = offset as u32 + 1;
            }
        }
    }

    if let Some(mut diagnostic) = pending.filter(|_| !is_traceback(text)) {
        if diagnostic.message.is_empty() {
            diagnostic.message = FALLBACK_SYNTAX_MESSAGE.to_string();
            found.push(diagnostic);
        }
    }

    dedupe_by_code(found)
}

/// Exception reported by a traceback, or `None` when the text has no
/// traceback or no exception line.
///
/// The exception line is the first unindented line after the last frame;
/// indented source and caret lines in between are skipped.
pub fn parse_runtime_error(text: &str, entry_file: &str) -> Option<RuntimeError> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines
        .iter()
        .position(|line| line.starts_with(TRACEBACK_MARKER))?;

    let after_frames = lines[start..]
        .iter()
        .rposition(|line| location_pattern().is_match(line))
        .map_or(start + 1, |last| start + last + 1);

    let exception = lines[after_frames..]
        .iter()
        .find(|line| !line.trim().is_empty() && !line.starts_with(char::is_whitespace))?;
    let caps = exception_pattern().captures(exception)?;
    let error_type = caps["class"].to_string();
    let message = caps
        .name("message")
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    let line = lines[start..]
        .iter()
        .filter_map(|frame| location_pattern().captures(frame))
        .find(|caps| is_entry_frame(&caps["file"], entry_file))
        .and_then(|caps| position(&caps["line"]))
        .unwrap_or(1);

    Some(RuntimeError {
        error_type,
        message,
        line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_with_caret() {
        let stderr = "File \"main.py\", line 5\n    def f(\n       ^\nSyntaxError: unexpected EOF";
        let diagnostics = parse_syntax_errors(stderr, ENTRY_FILE);

        assert_eq!(diagnostics.len(), 1);
        let d = &diagnostics[0];
        assert_eq!(d.file, "main.py");
        assert_eq!(d.line, 5);
        assert_eq!(d.column, 8);
        assert_eq!(d.code, "SyntaxError");
        assert_eq!(d.message, "unexpected EOF");
    }

    #[test]
    fn test_caret_column_uses_first_marker() {
        let stderr = "  File \"/app/main.py\", line 2\n    print(\"héllo\" +)\n                   ^^\nSyntaxError: invalid syntax\n";
        let d = &parse_syntax_errors(stderr, ENTRY_FILE)[0];
        assert_eq!(d.file, "/app/main.py");
        assert_eq!(d.column, 20);
    }

    #[test]
    fn test_indentation_error() {
        let stderr = "  File \"main.py\", line 3\n    return x\nIndentationError: unexpected indent\n";
        let d = &parse_syntax_errors(stderr, ENTRY_FILE)[0];
        assert_eq!(d.code, "IndentationError");
        assert_eq!(d.line, 3);
        assert_eq!(d.column, 1);
    }

    #[test]
    fn test_standalone_error_line_uses_entry_file() {
        let diagnostics = parse_syntax_errors("NameError: name 'x' is not defined", ENTRY_FILE);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].file, ENTRY_FILE);
        assert_eq!(diagnostics[0].line, 1);
        assert_eq!(diagnostics[0].code, "NameError");
    }

    #[test]
    fn test_dangling_location_gets_fallback_message() {
        let diagnostics = parse_syntax_errors("  File \"main.py\", line 9\n    x = (\n", ENTRY_FILE);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].line, 9);
        assert_eq!(diagnostics[0].message, "Syntax error");
    }

    #[test]
    fn test_caret_without_location_is_ignored() {
        assert!(parse_syntax_errors("    ^\nnot an error", ENTRY_FILE).is_empty());
        assert!(parse_syntax_errors("", ENTRY_FILE).is_empty());
    }

    #[test]
    fn test_runtime_error_reports_last_exception() {
        let stderr = "\
Traceback (most recent call last):
  File \"/app/main.py\", line 4, in lookup
    return table[key]
KeyError: 'missing'

During handling of the above exception, another exception occurred:

Traceback (most recent call last):
  File \"/app/main.py\", line 9, in <module>
    main()
  File \"/app/main.py\", line 7, in main
    raise ValueError(\"bad input\")
ValueError: bad input
";
        let err = parse_runtime_error(stderr, ENTRY_FILE).unwrap();
        assert_eq!(err.error_type, "ValueError");
        assert_eq!(err.message, "bad input");
        assert_eq!(err.line, 4);
    }

    #[test]
    fn test_runtime_error_line_from_entry_frame() {
        let stderr = "\
Traceback (most recent call last):
  File \"/usr/lib/python3.12/json/__init__.py\", line 346, in loads
  File \"/app/main.py\", line 12, in <module>
    print(10 / 0)
ZeroDivisionError: division by zero
";
        let err = parse_runtime_error(stderr, ENTRY_FILE).unwrap();
        assert_eq!(err.error_type, "ZeroDivisionError");
        assert_eq!(err.line, 12);
    }

    #[test]
    fn test_runtime_error_bare_exception_class() {
        let stderr = "Traceback (most recent call last):\n  File \"main.py\", line 1, in <module>\n    raise StopIteration\nStopIteration\n";
        let err = parse_runtime_error(stderr, ENTRY_FILE).unwrap();
        assert_eq!(err.error_type, "StopIteration");
        assert_eq!(err.message, "");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_runtime_error_user_defined_exception() {
        let stderr = "\
Traceback (most recent call last):
  File \"/app/main.py\", line 4, in <module>
    raise InsufficientFunds(\"balance too low\")
InsufficientFunds: balance too low
";
        let err = parse_runtime_error(stderr, ENTRY_FILE).unwrap();
        assert_eq!(err.error_type, "InsufficientFunds");
        assert_eq!(err.message, "balance too low");
        assert_eq!(err.line, 4);
    }

    #[test]
    fn test_runtime_error_multiline_message_keeps_first_line() {
        let stderr = "Traceback (most recent call last):\n  File \"main.py\", line 2, in <module>\n    raise ValueError(\"a\\nb\")\nValueError: a\nb\n";
        let err = parse_runtime_error(stderr, ENTRY_FILE).unwrap();
        assert_eq!(err.error_type, "ValueError");
        assert_eq!(err.message, "a");
    }

    #[test]
    fn test_runtime_error_line_ignores_similarly_named_files() {
        let stderr = "\
Traceback (most recent call last):
  File \"/app/domain.py\", line 30, in charge
  File \"/app/main.py\", line 6, in <module>
    charge()
RuntimeError: boom
";
        assert_eq!(parse_runtime_error(stderr, ENTRY_FILE).unwrap().line, 6);
        assert!(is_entry_frame("/app/main.py", ENTRY_FILE));
        assert!(is_entry_frame("main.py", ENTRY_FILE));
        assert!(!is_entry_frame("/app/domain.py", ENTRY_FILE));
    }

    #[test]
    fn test_dangling_frame_in_traceback_is_not_a_syntax_error() {
        let stderr = "Traceback (most recent call last):\n  File \"/app/main.py\", line 4, in <module>\n    run()\n";
        assert!(parse_syntax_errors(stderr, ENTRY_FILE).is_empty());
    }

    #[test]
    fn test_runtime_error_requires_traceback() {
        assert!(parse_runtime_error("ValueError: bad input", ENTRY_FILE).is_none());
        assert!(parse_runtime_error("Traceback (most recent call last):\n  garbage", ENTRY_FILE).is_none());
    }

    #[test]
    fn test_syntax_class_membership() {
        assert!(is_syntax_class("TabError"));
        assert!(!is_syntax_class("ValueError"));
    }
}
