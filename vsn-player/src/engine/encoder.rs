//! Frame encoders
//!
//! Turn one 20 ms block of processed PCM into the bytes handed to the
//! transport.

/// Encodes processed PCM frames
pub trait FrameEncoder: Send + Sync {
    /// Encode interleaved stereo samples, appending to `out`
    fn encode(&self, pcm: &[f32], out: &mut Vec<u8>);

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Signed 16-bit little-endian PCM
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmS16Encoder;

impl FrameEncoder for PcmS16Encoder {
    fn encode(&self, pcm: &[f32], out: &mut Vec<u8>) {
        out.reserve(pcm.len() * 2);
        for &sample in pcm {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn name(&self) -> &'static str {
        "pcm_s16le"
    }
}
