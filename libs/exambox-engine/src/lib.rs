//! Sandboxed execution of student submissions.
//!
//! [`executor::Executor`] is the entry point: it validates a request, waits
//! for a sandbox slot, runs the code through an [`engine::ExecutionEngine`]
//! and turns the captured output into an `ExecutionResult` with
//! [`classifier::classify`].

pub mod classifier;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod executor;

#[cfg(test)]
mod engine_tests;

pub use engine::{DockerEngine, ExecutionEngine, SandboxOutput};
pub use executor::Executor;
