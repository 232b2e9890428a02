pub mod logging;
pub mod metrics;

use std::time::{Duration, Instant};

/// Lightweight perf sampling, separate from the `metrics` counters registry: this is
/// for ad hoc hot-path timing (render ticks, handshake steps), gated behind an env
/// var so it costs nothing when not requested.
fn env_truthy(var: &str) -> bool {
    std::env::var(var)
        .map(|v| v != "0" && !v.is_empty())
        .unwrap_or(false)
}

static PERF_ENABLED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();

pub fn perf_enabled() -> bool {
    *PERF_ENABLED.get_or_init(|| env_truthy("ASCIICHAT_PERF"))
}

pub struct PerfGuard {
    label: &'static str,
    start: Instant,
}

impl PerfGuard {
    pub fn new(label: &'static str) -> Option<Self> {
        if !perf_enabled() {
            return None;
        }
        Some(Self {
            label,
            start: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if elapsed > Duration::from_millis(1) {
            tracing::trace!(label = self.label, micros = elapsed.as_micros(), "perf sample");
        }
    }
}
