//! The `OpusCodec` trait and its two implementations (SPEC_FULL.md §4.7,
//! REDESIGN FLAGS): a real libopus binding via `audiopus` behind the `opus-codec`
//! feature, and a deterministic pass-through codec that ships by default so the
//! mixer and its tests run without a system libopus installed.

use thiserror::Error;

use crate::media::SAMPLES_PER_CHUNK;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("opus encode failed: {0}")]
    Encode(String),
    #[error("opus decode failed: {0}")]
    Decode(String),
}

/// 20ms-frame mono Opus encode/decode, stateful per participant (SPEC_FULL.md §4.7).
/// Implementations are not required to be thread-safe; the mixer owns one instance
/// per participant and never shares it.
pub trait OpusCodec: Send {
    fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>, CodecError>;
    fn decode(&mut self, packet: &[u8]) -> Result<Vec<f32>, CodecError>;
}

/// Builds the codec selected at compile time: a real libopus encoder when
/// `opus-codec` is enabled, the pass-through codec otherwise.
pub fn new_codec() -> Box<dyn OpusCodec> {
    #[cfg(feature = "opus-codec")]
    {
        Box::new(RealOpusCodec::new())
    }
    #[cfg(not(feature = "opus-codec"))]
    {
        Box::new(PassthroughCodec::default())
    }
}

/// Encodes each f32 sample as a big-endian i16 and decodes the inverse; carries no
/// real compression but is bit-deterministic, which is what the mixer's tests and
/// any build without a system libopus need.
#[derive(Default)]
pub struct PassthroughCodec;

impl OpusCodec for PassthroughCodec {
    fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(pcm.len() * 2);
        for &sample in pcm {
            let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            out.extend_from_slice(&quantized.to_be_bytes());
        }
        Ok(out)
    }

    fn decode(&mut self, packet: &[u8]) -> Result<Vec<f32>, CodecError> {
        if packet.len() % 2 != 0 {
            return Err(CodecError::Decode("odd-length passthrough packet".to_string()));
        }
        Ok(packet
            .chunks_exact(2)
            .map(|chunk| i16::from_be_bytes([chunk[0], chunk[1]]) as f32 / i16::MAX as f32)
            .collect())
    }
}

#[cfg(feature = "opus-codec")]
pub struct RealOpusCodec {
    encoder: audiopus::coder::Encoder,
    decoder: audiopus::coder::Decoder,
}

#[cfg(feature = "opus-codec")]
impl RealOpusCodec {
    pub fn new() -> Self {
        use audiopus::coder::{Decoder, Encoder};
        use audiopus::{Application, Channels, SampleRate};
        let encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip).expect("opus encoder init");
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Mono).expect("opus decoder init");
        Self { encoder, decoder }
    }
}

#[cfg(feature = "opus-codec")]
impl OpusCodec for RealOpusCodec {
    fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>, CodecError> {
        let mut out = vec![0u8; 4096];
        let len = self.encoder.encode_float(pcm, &mut out).map_err(|e| CodecError::Encode(e.to_string()))?;
        out.truncate(len);
        Ok(out)
    }

    fn decode(&mut self, packet: &[u8]) -> Result<Vec<f32>, CodecError> {
        let mut out = vec![0f32; SAMPLES_PER_CHUNK];
        let len = self
            .decoder
            .decode_float(Some(packet), &mut out, false)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        out.truncate(len);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_round_trips_within_quantization_error() {
        let mut codec = PassthroughCodec::default();
        let pcm: Vec<f32> = (0..SAMPLES_PER_CHUNK).map(|i| ((i as f32) / SAMPLES_PER_CHUNK as f32) * 2.0 - 1.0).collect();
        let encoded = codec.encode(&pcm).unwrap();
        assert_eq!(encoded.len(), pcm.len() * 2);
        let decoded = codec.decode(&encoded).unwrap();
        for (original, round_tripped) in pcm.iter().zip(decoded.iter()) {
            assert!((original - round_tripped).abs() < 0.001);
        }
    }

    #[test]
    fn decode_rejects_odd_length_packets() {
        let mut codec = PassthroughCodec::default();
        assert!(codec.decode(&[0u8; 3]).is_err());
    }
}
