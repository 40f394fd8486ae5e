/*!
Observability infrastructure for snapshot operations.

This module provides:
- Structured logging setup (human-readable or JSON) through `tracing-subscriber`
- Prometheus metrics for saves, loads, sizes and buffer growth (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::{Duration, Instant};
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, SnapshotError};

/// Operation label for slot file saves
pub const OP_SLOT_SAVE: &str = "slot_save";
/// Operation label for slot file loads
pub const OP_SLOT_LOAD: &str = "slot_load";
/// Operation label for streaming pipeline saves
pub const OP_STREAM_SAVE: &str = "stream_save";
/// Operation label for streaming pipeline loads
pub const OP_STREAM_LOAD: &str = "stream_load";

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<SnapshotMetrics> = OnceLock::new();

/// Metrics collection for snapshot operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct SnapshotMetrics {
    /// Operations started, labelled by operation
    pub operations_total: IntCounterVec,
    /// Operations that ended in an error, labelled by operation
    pub errors_total: IntCounterVec,
    pub latency_seconds: HistogramVec,

    pub state_size_bytes: Histogram,
    pub compressed_size_bytes: Histogram,

    /// Times the streaming output buffer had to grow mid-save
    pub buffer_growths_total: IntCounter,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> SnapshotError {
    SnapshotError::validation(format!("Failed to set up metric {name}: {e}"))
}

#[cfg(feature = "metrics")]
impl SnapshotMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations_total = IntCounterVec::new(
            Opts::new("savestate_operations_total", "Snapshot operations started"),
            &["operation"],
        )
        .map_err(|e| metric_error("savestate_operations_total", e))?;

        let errors_total = IntCounterVec::new(
            Opts::new("savestate_errors_total", "Snapshot operations that failed"),
            &["operation"],
        )
        .map_err(|e| metric_error("savestate_errors_total", e))?;

        let latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "savestate_latency_seconds",
                "Duration of snapshot operations in seconds",
            ),
            &["operation"],
        )
        .map_err(|e| metric_error("savestate_latency_seconds", e))?;

        let state_size_bytes = Histogram::with_opts(
            HistogramOpts::new("savestate_state_size_bytes", "Serialized state size in bytes")
                .buckets(prometheus::exponential_buckets(1024.0, 4.0, 12).map_err(|e| {
                    metric_error("savestate_state_size_bytes", e)
                })?),
        )
        .map_err(|e| metric_error("savestate_state_size_bytes", e))?;

        let compressed_size_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "savestate_compressed_size_bytes",
                "Compressed state size in bytes",
            )
            .buckets(
                prometheus::exponential_buckets(1024.0, 4.0, 12)
                    .map_err(|e| metric_error("savestate_compressed_size_bytes", e))?,
            ),
        )
        .map_err(|e| metric_error("savestate_compressed_size_bytes", e))?;

        let buffer_growths_total = IntCounter::new(
            "savestate_buffer_growths_total",
            "Streaming output buffer growths",
        )
        .map_err(|e| metric_error("savestate_buffer_growths_total", e))?;

        registry
            .register(Box::new(operations_total.clone()))
            .map_err(|e| metric_error("savestate_operations_total", e))?;
        registry
            .register(Box::new(errors_total.clone()))
            .map_err(|e| metric_error("savestate_errors_total", e))?;
        registry
            .register(Box::new(latency_seconds.clone()))
            .map_err(|e| metric_error("savestate_latency_seconds", e))?;
        registry
            .register(Box::new(state_size_bytes.clone()))
            .map_err(|e| metric_error("savestate_state_size_bytes", e))?;
        registry
            .register(Box::new(compressed_size_bytes.clone()))
            .map_err(|e| metric_error("savestate_compressed_size_bytes", e))?;
        registry
            .register(Box::new(buffer_growths_total.clone()))
            .map_err(|e| metric_error("savestate_buffer_growths_total", e))?;

        Ok(Self {
            operations_total,
            errors_total,
            latency_seconds,
            state_size_bytes,
            compressed_size_bytes,
            buffer_growths_total,
            registry,
        })
    }

    /// Get or initialize global metrics instance
    pub fn global() -> &'static SnapshotMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize snapshot metrics"))
    }

    pub fn record_operation(&self, operation: &str) {
        self.operations_total.with_label_values(&[operation]).inc();
    }

    pub fn record_error(&self, operation: &str) {
        self.errors_total.with_label_values(&[operation]).inc();
    }

    pub fn record_latency(&self, operation: &str, duration: Duration) {
        self.latency_seconds
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Record the raw and compressed size of one saved state
    pub fn record_sizes(&self, state_bytes: usize, compressed_bytes: usize) {
        self.state_size_bytes.observe(state_bytes as f64);
        self.compressed_size_bytes.observe(compressed_bytes as f64);
    }

    pub fn record_buffer_growths(&self, growths: usize) {
        self.buffer_growths_total.inc_by(growths as u64);
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| SnapshotError::validation(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            SnapshotError::validation(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Metrics timer helper for measuring operation durations
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
    operation: &'static str,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    /// Start a new timer, counting the operation as started
    pub fn start(operation: &'static str) -> Self {
        SnapshotMetrics::global().record_operation(operation);

        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Complete the timer, recording success latency
    pub fn finish(self) {
        SnapshotMetrics::global().record_latency(self.operation, self.start.elapsed());
    }

    /// Complete the timer with an error, recording both latency and error
    pub fn finish_with_error(self) {
        let metrics = SnapshotMetrics::global();
        metrics.record_latency(self.operation, self.start.elapsed());
        metrics.record_error(self.operation);
    }

    /// Complete the timer according to an operation's outcome
    pub fn finish_with<T>(self, result: &Result<T>) {
        match result {
            Ok(_) => self.finish(),
            Err(_) => self.finish_with_error(),
        }
    }
}

/// Initialize the global logging subscriber
///
/// The filter comes from `RUST_LOG` when set and otherwise defaults to
/// `savestate=info`, or `savestate=debug` when `verbose` is set.
///
/// # Arguments
/// * `json` - Emit one JSON object per event instead of human-readable lines
/// * `verbose` - Default to debug level for savestate targets
///
/// # Returns
/// Result indicating success or failure of initialization
pub fn init_observability(json: bool, verbose: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    SnapshotMetrics::global();

    let default_directives = if verbose {
        "savestate=debug,savestate_core=debug"
    } else {
        "savestate=info,savestate_core=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives))
        .map_err(|e| SnapshotError::validation(format!("Invalid log filter: {e}")))?;

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false)
            .with_writer(std::io::stderr);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        SnapshotError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("Snapshot observability initialized");
    Ok(())
}
