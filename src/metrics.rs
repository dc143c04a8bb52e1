//! Prometheus metrics for the judging engine

use std::sync::{LazyLock, Once};

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Wall time of whole judging passes
pub static JUDGE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        "codejudge_judge_duration_seconds",
        "Time spent judging submissions",
    )
    .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);

    HistogramVec::new(opts, &["language"]).expect("Failed to create histogram")
});

/// Peak memory of single test case runs
pub static TEST_MEMORY: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new("codejudge_test_memory_kb", "Peak memory of test case runs")
        .buckets(vec![
            1024.0,        // 1 MB
            16.0 * 1024.0, // 16 MB
            64.0 * 1024.0,
            128.0 * 1024.0,
            256.0 * 1024.0,
            512.0 * 1024.0,
        ]);

    HistogramVec::new(opts, &["language"]).expect("Failed to create histogram")
});

/// Responses by status
pub static VERDICT_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let opts = Opts::new("codejudge_verdict_total", "Total verdicts by status");
    IntCounterVec::new(opts, &["status"]).expect("Failed to create counter")
});

/// Infrastructure faults (spawn failures, scratch I/O)
pub static SANDBOX_FAULTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("codejudge_sandbox_faults_total", "Sandbox infrastructure faults")
        .expect("Failed to create counter")
});

/// Passes cancelled by the caller
pub static CANCELLED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("codejudge_cancelled_total", "Judging passes cancelled")
        .expect("Failed to create counter")
});

/// Judging passes in flight
pub static ACTIVE_JUDGINGS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("codejudge_active_judgings", "Judging passes in flight")
        .expect("Failed to create gauge")
});

static INIT: Once = Once::new();

/// Register all metrics with [`REGISTRY`]. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(JUDGE_DURATION.clone()),
            Box::new(TEST_MEMORY.clone()),
            Box::new(VERDICT_TOTAL.clone()),
            Box::new(SANDBOX_FAULTS.clone()),
            Box::new(CANCELLED_TOTAL.clone()),
            Box::new(ACTIVE_JUDGINGS.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!(error = %e, "Failed to register metric");
            }
        }
    });
}

/// Record the outcome of one judging pass
pub fn record_verdict(language: &str, status: &str, duration_secs: f64) {
    VERDICT_TOTAL.with_label_values(&[status]).inc();
    JUDGE_DURATION
        .with_label_values(&[language])
        .observe(duration_secs);
}

/// Record the peak memory of one test case
pub fn record_test_memory(language: &str, memory_kb: u64) {
    TEST_MEMORY
        .with_label_values(&[language])
        .observe(memory_kb as f64);
}

/// Decrements [`ACTIVE_JUDGINGS`] when dropped, including on cancellation
pub struct ActiveGuard;

impl ActiveGuard {
    pub fn new() -> Self {
        ACTIVE_JUDGINGS.inc();
        Self
    }
}

impl Default for ActiveGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE_JUDGINGS.dec();
    }
}

/// HTTP server for the Prometheus metrics endpoint
pub struct MetricsServer;

impl MetricsServer {
    /// Run the metrics server
    pub async fn run(port: u16) -> anyhow::Result<()> {
        use axum::{routing::get, Router};
        use std::net::SocketAddr;

        init_metrics();

        let app = Router::new()
            .route("/metrics", get(Self::metrics_handler))
            .route("/health", get(|| async { "OK" }));

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        tracing::info!("Metrics server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    async fn metrics_handler() -> String {
        gather_text()
    }
}

/// Text exposition of every registered metric
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_exposed_after_init() {
        init_metrics();
        init_metrics();
        record_verdict("python", "Accepted", 0.2);
        {
            let _guard = ActiveGuard::new();
        }

        let text = gather_text();
        assert!(text.contains("codejudge_verdict_total"));
        assert!(text.contains("codejudge_judge_duration_seconds"));
    }
}
