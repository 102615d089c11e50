// Prometheus metrics for the execution endpoint

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exambox_executions_total",
        "Executions by profile and outcome",
        &["profile", "outcome"]
    )
    .unwrap();

    pub static ref EXECUTION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "exambox_execution_duration_seconds",
        "Wall-clock time per execution request",
        &["profile"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]
    )
    .unwrap();
}

pub fn record_execution(profile: &str, outcome: &str, seconds: f64) {
    EXECUTIONS_TOTAL.with_label_values(&[profile, outcome]).inc();
    EXECUTION_DURATION_SECONDS
        .with_label_values(&[profile])
        .observe(seconds);
}

/// Render every registered metric in the text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_execution_is_rendered() {
        record_execution("interpreted_script", "success", 0.42);
        let text = render();
        assert!(text.contains("exambox_executions_total"));
        assert!(text.contains("outcome=\"success\""));
        assert!(text.contains("exambox_execution_duration_seconds_bucket"));
    }
}
