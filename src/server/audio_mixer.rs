//! Per-participant audio mixer (SPEC_FULL.md §4.7): sum every other participant's
//! drained audio, soft-clip, and hand the result to a stateful `OpusCodec`. Silence
//! suppression uses separate open/close thresholds so the gate doesn't chatter.

use crate::codec::OpusCodec;
use crate::media::SAMPLES_PER_CHUNK;
use crate::protocol::AudioOpusBatchPayload;

const GATE_OPEN_RMS: f32 = 0.01;
const GATE_CLOSE_RMS: f32 = 0.004;
/// Consecutive below-threshold frames required before the gate closes
/// (SPEC_FULL.md §4.7), so a single quiet frame mid-sentence doesn't clip audio.
const GATE_CLOSE_HANGOVER_FRAMES: u32 = 3;

/// Soft-clips with a knee at ±0.95: samples inside the knee pass through linearly,
/// samples beyond it compress toward ±1.0 via `tanh` (SPEC_FULL.md §4.7 step 3).
fn soft_clip(sample: f32) -> f32 {
    const KNEE: f32 = 0.95;
    let magnitude = sample.abs();
    if magnitude <= KNEE {
        return sample;
    }
    let sign = sample.signum();
    let excess = magnitude - KNEE;
    sign * (KNEE + (1.0 - KNEE) * excess.tanh())
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Stateful per-participant mixer: owns the noise-gate hysteresis state and the
/// participant's Opus encoder instance (SPEC_FULL.md §4.7: "encoder is stateful per
/// participant").
pub struct AudioMixer {
    codec: Box<dyn OpusCodec>,
    gate_open: bool,
    quiet_frames: u32,
}

impl AudioMixer {
    pub fn new(codec: Box<dyn OpusCodec>) -> Self {
        Self { codec, gate_open: false, quiet_frames: 0 }
    }

    /// Sums `chunks` (already excluding the target participant) into one mixed
    /// buffer, soft-clips it, and encodes it if the noise gate is open. Returns
    /// `None` when the gate is closed (SPEC_FULL.md §4.7: "skip the packet
    /// entirely").
    pub fn mix_and_encode(&mut self, chunks: &[Vec<f32>]) -> Option<AudioOpusBatchPayload> {
        let mut mixed = vec![0f32; SAMPLES_PER_CHUNK];
        for chunk in chunks {
            for (accum, &sample) in mixed.iter_mut().zip(chunk.iter()) {
                *accum += sample;
            }
        }
        for sample in mixed.iter_mut() {
            *sample = soft_clip(*sample);
        }

        let level = rms(&mixed);
        if self.gate_open {
            if level < GATE_CLOSE_RMS {
                self.quiet_frames += 1;
                if self.quiet_frames >= GATE_CLOSE_HANGOVER_FRAMES {
                    self.gate_open = false;
                    self.quiet_frames = 0;
                }
            } else {
                self.quiet_frames = 0;
            }
        } else if level >= GATE_OPEN_RMS {
            self.gate_open = true;
            self.quiet_frames = 0;
        }
        if !self.gate_open {
            return None;
        }

        let encoded = self.codec.encode(&mixed).ok()?;
        Some(AudioOpusBatchPayload {
            sample_rate: crate::media::SAMPLE_RATE,
            frame_duration_ms: 20,
            frame_sizes: vec![encoded.len() as u16],
            opus_bytes: encoded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::new_codec;

    #[test]
    fn silence_is_gated_and_produces_no_packet() {
        let mut mixer = AudioMixer::new(new_codec());
        let silence = vec![0f32; SAMPLES_PER_CHUNK];
        assert!(mixer.mix_and_encode(&[silence]).is_none());
    }

    #[test]
    fn a_loud_tone_opens_the_gate_and_produces_a_packet() {
        let mut mixer = AudioMixer::new(new_codec());
        let tone: Vec<f32> = (0..SAMPLES_PER_CHUNK).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let batch = mixer.mix_and_encode(&[tone]).expect("gate should open for a loud signal");
        assert_eq!(batch.sample_rate, 48_000);
        assert_eq!(batch.frame_sizes.len(), 1);
    }

    #[test]
    fn soft_clip_keeps_values_within_unit_range() {
        assert!(soft_clip(2.0) <= 1.0);
        assert!(soft_clip(-2.0) >= -1.0);
        assert_eq!(soft_clip(0.1), 0.1);
    }

    #[test]
    fn gate_hysteresis_keeps_the_gate_open_through_a_brief_dip() {
        let mut mixer = AudioMixer::new(new_codec());
        let loud: Vec<f32> = (0..SAMPLES_PER_CHUNK).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let quiet_but_above_close: Vec<f32> = vec![0.006; SAMPLES_PER_CHUNK];
        assert!(mixer.mix_and_encode(&[loud]).is_some());
        // Below the open threshold but above the close threshold: gate stays open.
        assert!(mixer.mix_and_encode(&[quiet_but_above_close]).is_some());
    }

    #[test]
    fn gate_needs_several_consecutive_quiet_frames_before_it_closes() {
        let mut mixer = AudioMixer::new(new_codec());
        let loud: Vec<f32> = (0..SAMPLES_PER_CHUNK).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let silence = vec![0f32; SAMPLES_PER_CHUNK];

        assert!(mixer.mix_and_encode(&[loud]).is_some());
        for _ in 0..(GATE_CLOSE_HANGOVER_FRAMES - 1) {
            assert!(
                mixer.mix_and_encode(&[silence.clone()]).is_some(),
                "gate must stay open until the hangover count is reached"
            );
        }
        assert!(
            mixer.mix_and_encode(&[silence.clone()]).is_none(),
            "gate closes once the hangover count of consecutive quiet frames is reached"
        );
    }
}
