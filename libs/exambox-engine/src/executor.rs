/// Execution Dispatcher - Public Entry Point
///
/// **Responsibility:**
/// Turn one `ExecutionRequest` into one `ExecutionResult`, always.
///
/// **Flow:**
/// 1. Validate the request (blank or oversized source never reaches a sandbox)
/// 2. Wait for a sandbox slot, or reject when the wait queue is full
/// 3. Run the code through the engine
/// 4. Classify the captured output
///
/// Engine errors and panics are converted into `LaunchFailure`; nothing
/// escapes to the caller.

use crate::classifier::classify;
use crate::engine::ExecutionEngine;
use exambox_common::config::Config;
use exambox_common::types::{ExecutionRequest, ExecutionResult};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{error, info, instrument, warn};

/// Largest accepted submission. The source is passed to the sandbox as one
/// environment value, which the kernel caps at 128 KiB.
pub const MAX_SOURCE_CODE_BYTES: usize = 64 * 1024;

/// Caps how many sandboxes run at once and how many requests may wait
struct AdmissionGate {
    slots: Semaphore,
    waiting: AtomicUsize,
    max_queued: usize,
}

/// Counts a request as waiting for as long as it is held
struct WaitTicket<'a>(&'a AtomicUsize);

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdmissionGate {
    fn new(max_concurrent: usize, max_queued: usize) -> Self {
        Self {
            slots: Semaphore::new(max_concurrent.max(1)),
            waiting: AtomicUsize::new(0),
            max_queued,
        }
    }

    /// A running slot, or `None` when both the slots and the queue are full
    async fn admit(&self) -> Option<SemaphorePermit<'_>> {
        if let Ok(permit) = self.slots.try_acquire() {
            return Some(permit);
        }

        let already_waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _ticket = WaitTicket(&self.waiting);
        if already_waiting >= self.max_queued {
            return None;
        }

        self.slots.acquire().await.ok()
    }
}

pub struct Executor<E> {
    engine: E,
    gate: AdmissionGate,
}

impl<E: ExecutionEngine> Executor<E> {
    pub fn new(engine: E, config: &Config) -> Self {
        Self::with_limits(engine, config.max_concurrent, config.max_queued)
    }

    pub fn with_limits(engine: E, max_concurrent: usize, max_queued: usize) -> Self {
        Self {
            engine,
            gate: AdmissionGate::new(max_concurrent, max_queued),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Free sandbox slots right now
    pub fn available_slots(&self) -> usize {
        self.gate.slots.available_permits()
    }

    /// Requests currently waiting for a slot
    pub fn queued(&self) -> usize {
        self.gate.waiting.load(Ordering::SeqCst)
    }

    /// Run a submission and return its verdict
    #[instrument(
        skip_all,
        fields(
            request_id = %uuid::Uuid::new_v4(),
            profile = %request.profile,
            source_size = request.source_code.len()
        )
    )]
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let start = Instant::now();

        if let Some(rejection) = validate(&request) {
            info!(outcome = rejection.outcome(), "Request rejected before launch");
            return rejection;
        }

        let Some(_slot) = self.gate.admit().await else {
            warn!(queued = self.queued(), "Sandbox capacity exhausted, rejecting request");
            return ExecutionResult::Overloaded {
                reason: "All sandboxes are busy, try again shortly".to_string(),
            };
        };

        let result = match AssertUnwindSafe(self.run_and_classify(&request))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let reason = format!("Execution aborted: {}", panic_message(panic.as_ref()));
                error!(reason = %reason, "Execution panicked");
                ExecutionResult::LaunchFailure { reason }
            }
        };

        info!(
            outcome = result.outcome(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Execution completed"
        );
        result
    }

    async fn run_and_classify(&self, request: &ExecutionRequest) -> ExecutionResult {
        match self.engine.run(request).await {
            Ok(output) => {
                if output.truncated {
                    warn!("Classifying truncated output");
                }
                classify(request.profile, &output)
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(error = %reason, "Sandbox launch failed");
                ExecutionResult::LaunchFailure { reason }
            }
        }
    }
}

fn validate(request: &ExecutionRequest) -> Option<ExecutionResult> {
    let message = if request.is_blank() {
        "No code provided".to_string()
    } else if request.source_code.len() > MAX_SOURCE_CODE_BYTES {
        format!(
            "Source code exceeds maximum size of {} bytes",
            MAX_SOURCE_CODE_BYTES
        )
    } else if request.source_code.contains('\0') {
        "Source code contains NUL bytes".to_string()
    } else {
        return None;
    };
    Some(ExecutionResult::ValidationError { message })
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
