use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Process-wide counters named directly in the spec's data model (§3) and render
/// scheduler (§4.6): admissions, evictions, dropped video/audio, rekeys, handshake
/// failures by kind. Tests assert against these directly rather than scraping logs.
pub struct Metrics {
    pub registry: Registry,
    pub admissions: IntCounter,
    pub evictions: IntCounter,
    pub dropped_video_frames: IntCounter,
    pub dropped_audio_chunks: IntCounter,
    pub rekeys_completed: IntCounter,
    pub handshake_failures: IntCounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let admissions =
            IntCounter::new("asciichat_admissions_total", "clients admitted into the registry")
                .expect("valid metric");
        let evictions =
            IntCounter::new("asciichat_evictions_total", "clients evicted from the registry")
                .expect("valid metric");
        let dropped_video_frames = IntCounter::new(
            "asciichat_dropped_video_frames_total",
            "video frames dropped because the render scheduler could not keep up",
        )
        .expect("valid metric");
        let dropped_audio_chunks = IntCounter::new(
            "asciichat_dropped_audio_chunks_total",
            "audio chunks dropped because the jitter FIFO was full",
        )
        .expect("valid metric");
        let rekeys_completed =
            IntCounter::new("asciichat_rekeys_completed_total", "session key rotations completed")
                .expect("valid metric");
        let handshake_failures = IntCounterVec::new(
            Opts::new("asciichat_handshake_failures_total", "handshake failures by kind"),
            &["kind"],
        )
        .expect("valid metric");

        registry.register(Box::new(admissions.clone())).ok();
        registry.register(Box::new(evictions.clone())).ok();
        registry.register(Box::new(dropped_video_frames.clone())).ok();
        registry.register(Box::new(dropped_audio_chunks.clone())).ok();
        registry.register(Box::new(rekeys_completed.clone())).ok();
        registry.register(Box::new(handshake_failures.clone())).ok();

        Self {
            registry,
            admissions,
            evictions,
            dropped_video_frames,
            dropped_audio_chunks,
            rekeys_completed,
            handshake_failures,
        }
    }
}

static METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

pub fn global() -> &'static Metrics {
    &METRICS
}

/// Logs a one-line summary of the counters above; intended to be called on a slow
/// periodic timer by the shared worker pool, not per-request.
pub fn log_summary() {
    let m = global();
    tracing::info!(
        admissions = m.admissions.get(),
        evictions = m.evictions.get(),
        dropped_video_frames = m.dropped_video_frames.get(),
        dropped_audio_chunks = m.dropped_audio_chunks.get(),
        rekeys_completed = m.rekeys_completed.get(),
        "metrics summary"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let m = global();
        let before = m.dropped_video_frames.get();
        m.dropped_video_frames.inc();
        assert_eq!(m.dropped_video_frames.get(), before + 1);
    }
}
