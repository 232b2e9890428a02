//! The audio-playback boundary (SPEC_FULL.md §1: "local audio playback via a
//! PortAudio-style output stream" is an out-of-scope external collaborator). As with
//! `capture::VideoSource`, this module owns only the trait seam and a dependency-light
//! default so the client runs end to end without a real audio backend linked in.

/// Accepts decoded PCM and hands it to whatever output device is behind it.
/// Implementations may block; the caller always drives this from a dedicated thread,
/// never from the async receive loop.
pub trait AudioSink: Send {
    fn play(&mut self, samples: &[f32]);
}

/// Discards every sample. Keeps `--no-audio` and headless test runs free of a real
/// PortAudio/CoreAudio/ALSA binding.
#[derive(Default)]
pub struct NullSink {
    samples_played: u64,
}

impl AudioSink for NullSink {
    fn play(&mut self, samples: &[f32]) {
        self.samples_played += samples.len() as u64;
    }
}

impl NullSink {
    pub fn samples_played(&self) -> u64 {
        self.samples_played
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sink_counts_samples_without_storing_them() {
        let mut sink = NullSink::default();
        sink.play(&[0.0, 0.1, 0.2]);
        sink.play(&[0.3]);
        assert_eq!(sink.samples_played(), 4);
    }
}
