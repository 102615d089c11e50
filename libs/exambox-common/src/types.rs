use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

/// Code given to the synthetic diagnostic that carries unparseable stderr
pub const UNKNOWN_FAILURE_CODE: &str = "UNKNOWN";

/// Fixed runtime profiles. Each one maps to a prebuilt runner image and its
/// own set of output parsing rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[serde(alias = "csharp", alias = "dotnet")]
    CompiledManaged,
    #[serde(alias = "python", alias = "py")]
    InterpretedScript,
}

impl Profile {
    pub const ALL: [Profile; 2] = [Profile::CompiledManaged, Profile::InterpretedScript];

    /// Filename the runner image gives the submitted source
    pub fn entry_file(&self) -> &'static str {
        match self {
            Profile::CompiledManaged => "Program.cs",
            Profile::InterpretedScript => "main.py",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::CompiledManaged => "compiled_managed",
            Profile::InterpretedScript => "interpreted_script",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "compiled_managed" | "csharp" | "dotnet" => Some(Profile::CompiledManaged),
            "interpreted_script" | "python" | "py" => Some(Profile::InterpretedScript),
            _ => None,
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Profile::CompiledManaged
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single submission to run. Consumed by one call to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub profile: Profile,
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>, profile: Profile) -> Self {
        Self {
            source_code: source_code.into(),
            profile,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.source_code.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Severity::Error),
            "warning" => Some(Severity::Warning),
            _ => None,
        }
    }
}

/// One structured compile or syntax error record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    pub fn error(
        file: impl Into<String>,
        line: u32,
        column: u32,
        code: impl Into<String>,
        message: &str,
    ) -> Self {
        Self {
            file: file.into(),
            line: line.max(1),
            column: column.max(1),
            severity: Severity::Error,
            code: code.into(),
            message: message.trim().to_string(),
        }
    }
}

/// Drop every diagnostic whose code was already seen, keeping textual order.
pub fn dedupe_by_code(diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut seen = HashSet::new();
    diagnostics
        .into_iter()
        .filter(|d| seen.insert(d.code.clone()))
        .collect()
}

/// Exception reported by a program that built but crashed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub line: u32,
}

/// Terminal verdict of one execution. Exactly one variant per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    ValidationError { message: String },
    BuildFailed { diagnostics: Vec<Diagnostic>, error_count: usize },
    RuntimeError(RuntimeError),
    Success { output: String },
    Timeout { elapsed_ms: u64 },
    UnknownFailure { diagnostic: Diagnostic },
    LaunchFailure { reason: String },
    Overloaded { reason: String },
}

impl ExecutionResult {
    /// Build failure with diagnostics made unique by code. `error_count`
    /// falls back to the number of kept diagnostics.
    pub fn build_failed(diagnostics: Vec<Diagnostic>, error_count: Option<usize>) -> Self {
        let diagnostics = dedupe_by_code(diagnostics);
        let error_count = error_count.unwrap_or(diagnostics.len());
        ExecutionResult::BuildFailed {
            diagnostics,
            error_count,
        }
    }

    /// Wrap raw text no parser recognised so it still reaches the caller
    pub fn unknown_failure(raw: &str, file: &str) -> Self {
        ExecutionResult::UnknownFailure {
            diagnostic: Diagnostic::error(file, 1, 1, UNKNOWN_FAILURE_CODE, raw),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    /// Stable label for logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            ExecutionResult::ValidationError { .. } => "validation_error",
            ExecutionResult::BuildFailed { .. } => "build_failed",
            ExecutionResult::RuntimeError(_) => "runtime_error",
            ExecutionResult::Success { .. } => "success",
            ExecutionResult::Timeout { .. } => "timeout",
            ExecutionResult::UnknownFailure { .. } => "unknown_failure",
            ExecutionResult::LaunchFailure { .. } => "launch_failure",
            ExecutionResult::Overloaded { .. } => "overloaded",
        }
    }
}

// Response bodies consumed by the exam frontend. The field names and the
// constant statusCode are part of that contract.
#[derive(Serialize)]
#[serde(untagged)]
enum WireResult<'a> {
    Error {
        success: bool,
        error: WireError<'a>,
    },
    Diagnostics {
        success: bool,
        errors: &'a [Diagnostic],
        #[serde(rename = "errorCount")]
        error_count: usize,
        #[serde(rename = "statusCode")]
        status_code: u16,
    },
    Output {
        success: bool,
        output: &'a str,
    },
}

#[derive(Serialize)]
struct WireError<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
}

const DIAGNOSTICS_STATUS_CODE: u16 = 201;

impl Serialize for ExecutionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let timeout_message;
        let wire = match self {
            ExecutionResult::ValidationError { message } => WireResult::Error {
                success: false,
                error: WireError {
                    kind: "ValidationError",
                    message,
                    line: None,
                },
            },
            ExecutionResult::BuildFailed {
                diagnostics,
                error_count,
            } => WireResult::Diagnostics {
                success: false,
                errors: diagnostics,
                error_count: *error_count,
                status_code: DIAGNOSTICS_STATUS_CODE,
            },
            ExecutionResult::UnknownFailure { diagnostic } => WireResult::Diagnostics {
                success: false,
                errors: std::slice::from_ref(diagnostic),
                error_count: 1,
                status_code: DIAGNOSTICS_STATUS_CODE,
            },
            ExecutionResult::RuntimeError(err) => WireResult::Error {
                success: false,
                error: WireError {
                    kind: &err.error_type,
                    message: &err.message,
                    line: Some(err.line),
                },
            },
            ExecutionResult::Success { output } => WireResult::Output {
                success: true,
                output,
            },
            ExecutionResult::Timeout { elapsed_ms } => {
                timeout_message = format!("Execution timed out after {}ms", elapsed_ms);
                WireResult::Error {
                    success: false,
                    error: WireError {
                        kind: "Timeout",
                        message: &timeout_message,
                        line: None,
                    },
                }
            }
            ExecutionResult::LaunchFailure { reason } => WireResult::Error {
                success: false,
                error: WireError {
                    kind: "LaunchFailure",
                    message: reason,
                    line: None,
                },
            },
            ExecutionResult::Overloaded { reason } => WireResult::Error {
                success: false,
                error: WireError {
                    kind: "Overloaded",
                    message: reason,
                    line: None,
                },
            },
        };
        wire.serialize(serializer)
    }
}
