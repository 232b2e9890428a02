//! The per-participant render scheduler (SPEC_FULL.md §4.6): one cooperative task
//! per active participant, driving the compositor, ASCII renderer, and audio mixer
//! on a clamped cadence that never accumulates lateness.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::audio_mixer::AudioMixer;
use super::compositor;
use crate::codec::new_codec;
use crate::protocol::PacketType;
use crate::render::{self, Palette, PRESET_BLOCKS, PRESET_STANDARD};
use crate::session::{Capabilities, PaletteType, Session, SessionRegistry};
use crate::telemetry::metrics;

const MIN_PERIOD: Duration = Duration::from_millis(1000 / 144);
const MAX_PERIOD: Duration = Duration::from_millis(1000 / 5);
const CELL_PIXEL_WIDTH: u32 = 8;
const CELL_PIXEL_HEIGHT: u32 = 16;

/// A single frame budget's worth of time to spend on one participant's transport
/// send before treating it as backpressure and dropping the frame rather than
/// queuing it (SPEC_FULL.md §4.6: "only one frame is ever in flight per
/// participant at a time").
const SEND_BUDGET: Duration = Duration::from_millis(50);

fn cadence_for(desired_fps: u8) -> Duration {
    let period = Duration::from_secs_f64(1.0 / desired_fps.max(1) as f64);
    period.clamp(MIN_PERIOD, MAX_PERIOD)
}

/// Builds this participant's palette from its own negotiated capabilities
/// (SPEC_FULL.md §3, §4.8: palette choice is a per-participant preference, not a
/// server-wide setting). Falls back to the standard preset if a custom palette
/// string turns out to be empty or otherwise invalid.
fn resolve_palette(caps: &Capabilities) -> Palette {
    let text = match caps.palette_type {
        PaletteType::Custom if !caps.palette_custom.is_empty() => caps.palette_custom.as_str(),
        PaletteType::Preset(1) => PRESET_BLOCKS,
        _ => PRESET_STANDARD,
    };
    Palette::new(text).unwrap_or_else(|_| Palette::new(PRESET_STANDARD).expect("the standard preset is never empty"))
}

/// Runs until the session closes. Spawned once per admitted participant; owns its
/// own `AudioMixer` (and therefore its own Opus encoder instance) for the session's
/// lifetime.
pub async fn run(session: Arc<Session>, registry: Arc<SessionRegistry>) {
    let caps = match session.capabilities() {
        Some(caps) => caps,
        None => return,
    };
    let palette = resolve_palette(&caps);
    let period = cadence_for(caps.clamped_fps());
    let canvas_width = caps.width as u32 * CELL_PIXEL_WIDTH;
    let canvas_height = caps.height as u32 * CELL_PIXEL_HEIGHT;
    let mut mixer = AudioMixer::new(new_codec());

    let mut next_tick = Instant::now();
    loop {
        if session.is_closed() {
            return;
        }
        tokio::time::sleep_until(next_tick).await;

        let remotes: Vec<_> = registry.snapshot_active().into_iter().filter(|other| other.client_id != session.client_id).collect();

        let tiles: Vec<_> = remotes.iter().map(|remote| remote.mailbox.current_frame()).collect();
        let canvas = compositor::compose(canvas_width, canvas_height, &tiles, caps.stretch);
        let frame_bytes = render::render(&canvas, &caps, &palette);
        let ascii_payload = build_ascii_payload(frame_bytes, caps.width as u32, caps.height as u32);

        let audio_chunks: Vec<Vec<f32>> = remotes.iter().flat_map(|remote| remote.mailbox.drain_audio()).map(|chunk| chunk.samples).collect();
        let audio_batch = mixer.mix_and_encode(&audio_chunks);

        let send_result = tokio::time::timeout(SEND_BUDGET, async {
            session
                .transport
                .send(PacketType::AsciiFrame, session.client_id.0, 0, ascii_payload.encode())
                .await?;
            if let Some(batch) = audio_batch {
                session.transport.send(PacketType::AudioOpusBatch, session.client_id.0, 0, batch.encode()).await?;
            }
            Ok::<(), crate::transport::TransportError>(())
        })
        .await;

        match send_result {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return, // transport is closed; the receive loop will evict this session.
            Err(_) => metrics::global().dropped_video_frames.inc(), // backpressure: drop this frame, never queue.
        }

        next_tick += period;
        let now = Instant::now();
        if now > next_tick {
            let periods_late = ((now - next_tick).as_secs_f64() / period.as_secs_f64()).ceil() as u32 + 1;
            next_tick += period * periods_late;
        }
    }
}

fn build_ascii_payload(glyph_bytes: Vec<u8>, width: u32, height: u32) -> crate::protocol::AsciiFramePayload {
    use crate::protocol::messages::FLAG_COMPRESSED;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let original_size = glyph_bytes.len() as u32;
    let checksum = crc32fast::hash(&glyph_bytes);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    let _ = encoder.write_all(&glyph_bytes);
    let compressed = encoder.finish().unwrap_or_default();

    if !compressed.is_empty() && compressed.len() < glyph_bytes.len() {
        crate::protocol::AsciiFramePayload {
            width,
            height,
            checksum,
            flags: FLAG_COMPRESSED,
            bytes: compressed,
            original_size,
        }
    } else {
        crate::protocol::AsciiFramePayload {
            width,
            height,
            checksum,
            flags: 0,
            bytes: glyph_bytes,
            original_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_is_clamped_into_the_legal_range() {
        assert_eq!(cadence_for(255), MIN_PERIOD);
        assert_eq!(cadence_for(1), MAX_PERIOD);
        assert_eq!(cadence_for(30), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn ascii_payload_prefers_compression_when_it_shrinks_the_frame() {
        let repetitive = vec![b' '; 4096];
        let payload = build_ascii_payload(repetitive.clone(), 80, 24);
        assert_ne!(payload.flags, 0);
        assert!(payload.bytes.len() < repetitive.len());
        assert_eq!(payload.decoded_text().unwrap(), repetitive);
    }

    #[test]
    fn ascii_payload_stores_incompressible_bytes_raw() {
        let tiny = vec![b'#'];
        let payload = build_ascii_payload(tiny.clone(), 80, 24);
        assert_eq!(payload.flags, 0);
        assert_eq!(payload.bytes, tiny);
    }

    fn caps_with_palette(palette_type: u32, palette_custom: &str) -> Capabilities {
        Capabilities::from_payload(&crate::protocol::ClientCapabilitiesPayload {
            capabilities: 0,
            color_level: 0,
            color_count: 0,
            render_mode: 0,
            width: 80,
            height: 24,
            palette_type,
            utf8_support: 1,
            desired_fps: 30,
            term_type: String::new(),
            colorterm: String::new(),
            palette_custom: palette_custom.to_string(),
            wants_padding: false,
            detection_reliable: true,
        })
    }

    #[test]
    fn default_capabilities_resolve_to_the_standard_preset() {
        let caps = caps_with_palette(0, "");
        let palette = resolve_palette(&caps);
        assert_eq!(palette.glyph_for(0, true), " ");
        assert_eq!(palette.glyph_for(255, true), "M");
    }

    #[test]
    fn preset_id_one_resolves_to_the_blocks_preset() {
        let caps = caps_with_palette(1, "");
        let palette = resolve_palette(&caps);
        assert_eq!(palette.glyph_for(255, true), "\u{2588}");
    }

    #[test]
    fn a_custom_palette_string_is_honored() {
        let caps = caps_with_palette(2, "#@");
        let palette = resolve_palette(&caps);
        assert_eq!(palette.len(), 2);
    }

    #[test]
    fn an_empty_custom_palette_falls_back_to_the_standard_preset() {
        let caps = caps_with_palette(2, "");
        let palette = resolve_palette(&caps);
        assert_eq!(palette.glyph_for(255, true), "M");
    }
}
