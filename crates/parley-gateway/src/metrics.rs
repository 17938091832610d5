//! Prometheus metrics for the Parley gateway

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use tracing::warn;

lazy_static! {
    // ============================================================================
    // Completion Metrics
    // ============================================================================

    /// Completions by mode (`stream` / `blocking`) and outcome
    pub static ref COMPLETIONS_TOTAL: CounterVec = register_counter_vec!(
        "parley_completions_total",
        "Completions by mode and outcome",
        &["mode", "outcome"]
    )
    .unwrap();

    /// Tokens accounted per completion
    pub static ref COMPLETION_TOKENS_TOTAL: CounterVec = register_counter_vec!(
        "parley_completion_tokens_total",
        "Total tokens accounted across completions",
        &["mode"]
    )
    .unwrap();

    pub static ref COMPLETION_LATENCY: HistogramVec = register_histogram_vec!(
        "parley_completion_latency_seconds",
        "Completion latency in seconds",
        &["mode"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 480.0]
    )
    .unwrap();

    // ============================================================================
    // Stream Metrics
    // ============================================================================

    /// Events written to SSE clients by event name
    pub static ref EVENTS_FORWARDED: CounterVec = register_counter_vec!(
        "parley_events_forwarded_total",
        "Events forwarded to streaming clients",
        &["event"]
    )
    .unwrap();

    // ============================================================================
    // System Metrics
    // ============================================================================

    pub static ref BUILD_INFO: GaugeVec =
        register_gauge_vec!("parley_build_info", "Build information", &["version", "commit"]).unwrap();
}

pub fn init_metrics() {
    BUILD_INFO
        .with_label_values(&[
            env!("CARGO_PKG_VERSION"),
            option_env!("GIT_COMMIT_SHA").unwrap_or("unknown"),
        ])
        .set(1.0);
}

/// Record one finished completion.
pub fn observe_completion(mode: &str, outcome: &str, tokens: usize, elapsed_secs: f64) {
    COMPLETIONS_TOTAL.with_label_values(&[mode, outcome]).inc();
    COMPLETION_LATENCY
        .with_label_values(&[mode])
        .observe(elapsed_secs);
    if tokens > 0 {
        #[allow(clippy::cast_precision_loss)]
        COMPLETION_TOKENS_TOTAL
            .with_label_values(&[mode])
            .inc_by(tokens as f64);
    }
}

/// Export metrics in Prometheus text format
pub fn export() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %err, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_can_be_exported() {
        init_metrics();
        observe_completion("blocking", "ok", 12, 0.2);
        EVENTS_FORWARDED.with_label_values(&["answer"]).inc();

        let exported = export();
        assert!(exported.contains("parley_completions_total"));
        assert!(exported.contains("parley_completion_tokens_total"));
        assert!(exported.contains("parley_events_forwarded_total"));
        assert!(exported.contains("parley_build_info"));
    }
}
