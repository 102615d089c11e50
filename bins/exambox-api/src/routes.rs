use axum::{
    routing::{get, post},
    Router,
};
use exambox_engine::ExecutionEngine;
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes<E: ExecutionEngine + 'static>() -> Router<Arc<AppState<E>>> {
    Router::new()
        .route("/api/code/execute", post(handlers::execute_code::<E>))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}
