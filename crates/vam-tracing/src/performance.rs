//! Performance instrumentation: timed spans and transfer bandwidth events.
//!
//! ```rust
//! use vam_tracing::performance::{record_transfer, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("vm_start", Some(100));
//! // ... work ...
//! drop(span); // reports only if it took at least 100µs
//!
//! record_transfer("write_in1", 4096, 250);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

static ENABLED: AtomicBool = AtomicBool::new(true);

// u64::MAX means "no global threshold".
static GLOBAL_THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Apply process-wide performance settings.
///
/// Called by [`crate::init_global_tracing`]; spans created afterwards honour
/// the new settings.
pub fn configure(enabled: bool, threshold_us: Option<u64>) {
    ENABLED.store(enabled, Ordering::Relaxed);
    GLOBAL_THRESHOLD_US.store(threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Whether performance spans currently report.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

fn global_threshold() -> Option<u64> {
    match GLOBAL_THRESHOLD_US.load(Ordering::Relaxed) {
        u64::MAX => None,
        threshold => Some(threshold),
    }
}

/// RAII guard that times a region and reports it when dropped.
///
/// A span reports only when performance tracing is enabled and the elapsed
/// time reaches its threshold. An explicit threshold takes precedence over
/// the global one.
pub struct PerformanceSpan {
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Time a region under a fresh debug-level `perf` span.
    pub fn new(span_name: impl Into<String>, threshold_us: Option<u64>) -> Self {
        let span_name = span_name.into();
        Self::with_span(tracing::debug_span!("perf", name = %span_name), threshold_us)
    }

    /// Time a region under a caller-built span, e.g. one carrying extra
    /// fields. Used by [`perf_span!`](crate::perf_span).
    pub fn with_span(span: tracing::Span, threshold_us: Option<u64>) -> Self {
        Self {
            threshold_us: threshold_us.or_else(global_threshold),
            start_time: Instant::now(),
            span,
        }
    }

    /// Elapsed time since creation.
    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if !is_enabled() {
            return;
        }

        let elapsed_us = self.elapsed_us();
        if self.threshold_us.map_or(true, |t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Record one stream transfer with its bandwidth.
///
/// `direction` names the stream role, e.g. `write_in1`, `read_out`,
/// `image`.
pub fn record_transfer(direction: &str, bytes: usize, duration_us: u64) {
    if !is_enabled() {
        return;
    }

    let bandwidth_mbps = if duration_us > 0 {
        (bytes as f64 / duration_us as f64) * 1_000_000.0 / (1024.0 * 1024.0)
    } else {
        0.0
    };

    tracing::debug!(
        event = "transfer",
        direction = direction,
        bytes = bytes,
        duration_us = duration_us,
        bandwidth_mbps = bandwidth_mbps,
        "stream_transfer"
    );
}

/// Record how long a batch of nodes took end to end.
pub fn record_batch(operation: &str, nodes: usize, duration_us: u64) {
    if !is_enabled() {
        return;
    }

    tracing::debug!(
        event = "batch",
        operation = operation,
        nodes = nodes,
        duration_us = duration_us,
        duration_ms = duration_us as f64 / 1000.0,
        "batch_complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_span_measures_elapsed_time() {
        let span = PerformanceSpan::new("sleepy", None);
        thread::sleep(Duration::from_millis(2));
        assert!(span.elapsed_us() >= 2_000);
    }

    #[test]
    fn test_macro_span_uses_global_threshold() {
        let span = crate::perf_span!("load_function", slot = 3);
        assert_eq!(span.threshold_us, global_threshold());
    }

    #[test]
    fn test_explicit_threshold_wins_over_global() {
        let span = PerformanceSpan::new("thresholded", Some(42));
        assert_eq!(span.threshold_us, Some(42));
    }

    #[test]
    fn test_events_do_not_panic_with_zero_duration() {
        record_transfer("read_out", 16, 0);
        record_batch("start", 3, 0);
    }
}
