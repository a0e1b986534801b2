//! Telemetry metric name constants and logging setup.
//!
//! Consumers install their own `metrics` recorder (e.g. prometheus,
//! statsd); without a recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `model`: upstream model id
//! - `status`: outcome: "ok" or "error"
//! - `source`: where a completion came from: "cache", "coalesced", "upstream"

/// Total upstream HTTP calls made by the transport.
///
/// Labels: `model`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "muninn_requests_total";

/// Upstream HTTP call duration in seconds.
///
/// Labels: `model`.
pub const REQUEST_DURATION_SECONDS: &str = "muninn_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `model`.
pub const RETRIES_TOTAL: &str = "muninn_retries_total";

/// Total completions returned to callers.
///
/// Labels: `source` ("cache" | "coalesced" | "upstream").
pub const COMPLETIONS_TOTAL: &str = "muninn_completions_total";

/// Total response cache hits.
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Total response cache misses.
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// Total entries removed by the periodic cache sweep.
pub const CACHE_SWEPT_TOTAL: &str = "muninn_cache_swept_total";

/// Install a `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` wins over `default_level` when set. Calling this twice is
/// harmless; the second install is ignored.
#[cfg(feature = "cli")]
pub fn init_logging(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_lowercase()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
