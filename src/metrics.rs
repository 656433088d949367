//! Observability metrics for layer dumps
//!
//! ## Architecture
//!
//! - Uses the `metrics` crate facade; without an installed recorder every
//!   macro is a no-op, so library users pay nothing
//! - The binary installs a Prometheus exporter only when asked to
//!   (`--metrics-addr`)

use ::metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

static METRICS_ADDR: OnceCell<SocketAddr> = OnceCell::new();

/// Metrics initialization errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed (address in use, recorder already set)
    #[error("failed to install Prometheus exporter on {addr}: {message}")]
    InstallFailed {
        /// Requested listen address
        addr: SocketAddr,
        /// Underlying error
        message: String,
    },
}

/// Install the Prometheus exporter listening on `addr`
///
/// Must run inside a tokio runtime. Idempotent: later calls are ignored.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if let Some(existing) = METRICS_ADDR.get() {
        debug!(addr = %existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::InstallFailed {
            addr,
            message: e.to_string(),
        })?;

    describe_counter!(
        "features_written_total",
        Unit::Count,
        "Features appended to chunk files"
    );
    describe_counter!(
        "chunks_committed_total",
        Unit::Count,
        "Chunks recorded as complete in the resume registry"
    );
    describe_counter!(
        "chunks_cleaned_total",
        Unit::Count,
        "Unregistered chunk files deleted before resuming"
    );
    describe_counter!(
        "dump_retries_total",
        Unit::Count,
        "Streaming attempts abandoned after a transient error"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff slept before retrying a dump"
    );
    describe_counter!(
        "dumps_completed_total",
        Unit::Count,
        "Dumps that reached the end of their layer"
    );
    describe_counter!(
        "dumps_failed_total",
        Unit::Count,
        "Dumps stopped by a fatal error"
    );

    let _ = METRICS_ADDR.set(addr);
    info!(addr = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Whether a Prometheus exporter has been installed
pub fn is_initialized() -> bool {
    METRICS_ADDR.get().is_some()
}

/// Record retry backoff duration
pub fn record_retry_backoff(layer: &str, duration: Duration, attempt: u32) {
    counter!("dump_retries_total", "layer" => layer.to_string()).increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        layer,
        attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Per-dump metrics handle
pub struct DumpMetrics {
    layer: String,
    start_time: Instant,
}

impl DumpMetrics {
    /// Start tracking a dump of `layer`
    pub fn start(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            start_time: Instant::now(),
        }
    }

    /// One feature appended to a chunk
    pub fn record_feature(&self) {
        counter!("features_written_total", "layer" => self.layer.clone()).increment(1);
    }

    /// One chunk committed to the registry
    pub fn record_chunk_committed(&self) {
        counter!("chunks_committed_total", "layer" => self.layer.clone()).increment(1);
    }

    /// Stale chunks removed by cleanup
    pub fn record_chunks_cleaned(&self, count: u64) {
        if count > 0 {
            counter!("chunks_cleaned_total", "layer" => self.layer.clone()).increment(count);
        }
    }

    /// Record successful dump completion
    pub fn record_success(&self, features: u64) {
        counter!("dumps_completed_total", "layer" => self.layer.clone()).increment(1);

        info!(
            layer = %self.layer,
            features,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Dump completed successfully"
        );
    }

    /// Record a dump stopped by a fatal error
    pub fn record_failure(&self, error: &str) {
        counter!("dumps_failed_total", "layer" => self.layer.clone()).increment(1);

        error!(
            layer = %self.layer,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Dump failed"
        );
    }
}
