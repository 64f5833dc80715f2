//! Convenience macros for performance tracing.

/// Create a [`crate::performance::PerformanceSpan`] with optional fields.
///
/// ```rust
/// use vam_tracing::perf_span;
///
/// {
///     let _span = perf_span!("vm_start", nodes = 4);
///     // ... operation code ...
/// } // reports the duration here
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::new($name, None)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        $crate::performance::PerformanceSpan::with_span(
            $crate::tracing::debug_span!("perf", name = $name, $($field = $value),+),
            None,
        )
    }};
}

/// Emit a debug-level performance event with the given metrics.
///
/// ```rust
/// use vam_tracing::perf_event;
///
/// perf_event!("reconfigured", slot = 3, image_bytes = 4096);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        $crate::tracing::debug!(
            event = $name,
            $($field = $value),+
        );
    };
}
