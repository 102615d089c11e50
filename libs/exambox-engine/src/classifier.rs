/// Output Classifier
///
/// Decides which terminal verdict a sandbox run represents and runs the
/// matching profile parser. Pure: (profile, captured output) -> result.
///
/// **Precedence (both profiles):**
/// 1. Timeout wins over any partial output
/// 2. Profile-specific markers and parsers
/// 3. Fatal signals (OOM kill, segfault) with nothing parseable
/// 4. Unrecognised stderr becomes a single synthetic diagnostic
/// 5. Otherwise success with the program's stdout

use crate::diagnostics::{compiled, interpreted};
use crate::engine::SandboxOutput;
use exambox_common::types::{ExecutionResult, Profile, RuntimeError};

/// Exit status of a container killed by the OOM killer (128 + SIGKILL)
const EXIT_OOM_KILLED: i64 = 137;
/// Exit status after SIGSEGV (128 + 11)
const EXIT_SEGFAULT: i64 = 139;

pub fn classify(profile: Profile, output: &SandboxOutput) -> ExecutionResult {
    if output.timed_out {
        return ExecutionResult::Timeout {
            elapsed_ms: output.elapsed_ms,
        };
    }

    match profile {
        Profile::CompiledManaged => classify_compiled(output),
        Profile::InterpretedScript => classify_interpreted(output),
    }
}

fn classify_compiled(output: &SandboxOutput) -> ExecutionResult {
    let entry = Profile::CompiledManaged.entry_file();

    if output.stdout.contains(compiled::BUILD_FAILED_MARKER) {
        let diagnostics = compiled::parse_diagnostics(&output.stdout);
        if diagnostics.is_empty() {
            return ExecutionResult::unknown_failure(output.stdout.trim(), entry);
        }
        return ExecutionResult::build_failed(
            diagnostics,
            compiled::parse_error_count(&output.stdout),
        );
    }

    if let Some(program_output) = compiled::program_output(&output.stdout) {
        // Built fine; the program may still have crashed
        if let Some(err) = compiled::parse_runtime_error(&output.stderr) {
            return ExecutionResult::RuntimeError(err);
        }
        if let Some(killed) = signal_failure(output) {
            return killed;
        }
        return ExecutionResult::Success {
            output: program_output,
        };
    }

    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        // An unhandled-exception line is unambiguous; check it before the
        // loose build rules get a chance to match its message.
        if let Some(err) = compiled::parse_runtime_error(stderr) {
            return ExecutionResult::RuntimeError(err);
        }
        let diagnostics = compiled::parse_diagnostics(stderr);
        if !diagnostics.is_empty() {
            return ExecutionResult::build_failed(diagnostics, compiled::parse_error_count(stderr));
        }
        if let Some(killed) = signal_failure(output) {
            return killed;
        }
        return ExecutionResult::unknown_failure(stderr, entry);
    }

    signal_failure(output).unwrap_or_else(|| ExecutionResult::Success {
        output: output.stdout.trim().to_string(),
    })
}

fn classify_interpreted(output: &SandboxOutput) -> ExecutionResult {
    let entry = Profile::InterpretedScript.entry_file();
    let stderr = output.stderr.trim();

    if !stderr.is_empty() {
        // A traceback ending in a non-syntax exception is a crash, even
        // though its exception line also fits the syntax rules.
        let crash = interpreted::parse_runtime_error(stderr, entry);
        if let Some(err) = crash
            .as_ref()
            .filter(|err| !interpreted::is_syntax_class(&err.error_type))
        {
            return ExecutionResult::RuntimeError(err.clone());
        }

        let diagnostics = interpreted::parse_syntax_errors(stderr, entry);
        if !diagnostics.is_empty() {
            return ExecutionResult::build_failed(diagnostics, None);
        }

        if let Some(err) = crash {
            return ExecutionResult::RuntimeError(err);
        }
        if let Some(killed) = signal_failure(output) {
            return killed;
        }
        return ExecutionResult::unknown_failure(stderr, entry);
    }

    signal_failure(output).unwrap_or_else(|| ExecutionResult::Success {
        output: output.stdout.trim().to_string(),
    })
}

/// Runtime error for containers ended by a fatal signal
fn signal_failure(output: &SandboxOutput) -> Option<ExecutionResult> {
    let (error_type, message) = match output.exit_code? {
        EXIT_OOM_KILLED => ("OutOfMemory", "Process killed: memory limit exceeded"),
        EXIT_SEGFAULT => ("SegmentationFault", "Process killed: segmentation fault"),
        _ => return None,
    };
    Some(ExecutionResult::RuntimeError(RuntimeError {
        error_type: error_type.to_string(),
        message: message.to_string(),
        line: 1,
    }))
}
