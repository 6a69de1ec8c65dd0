//! PCM16 audio frames and their text-safe wire form.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Sample rate of every frame exchanged with the remote endpoint.
pub const SAMPLE_RATE: u32 = 24_000;

/// An immutable block of mono little-endian PCM16 samples at [`SAMPLE_RATE`].
///
/// Cloning is cheap: the samples are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    pub fn silence(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.samples.len() as u64 * 1_000_000 / u64::from(SAMPLE_RATE))
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Raw little-endian bytes, two per sample.
    pub fn to_le_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.samples.len() * 2);
        for &s in self.samples.iter() {
            buf.put_i16_le(s);
        }
        buf.freeze()
    }

    /// Rebuild a frame from little-endian bytes. The length must be even.
    pub fn from_le_bytes(mut bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() % 2 != 0 {
            return Err(ProtocolError::BadAudio(format!(
                "odd PCM16 byte length {}",
                bytes.len()
            )));
        }
        let mut samples = Vec::with_capacity(bytes.len() / 2);
        while bytes.has_remaining() {
            samples.push(bytes.get_i16_le());
        }
        Ok(Self::new(samples))
    }
}

/// Number of samples in one frame of `duration_ms` at [`SAMPLE_RATE`].
pub fn samples_per_frame(duration_ms: u32) -> usize {
    (u64::from(SAMPLE_RATE) * u64::from(duration_ms) / 1000) as usize
}

/// Base64 encoding of one [`AudioFrame`], as carried in protocol envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireChunk(String);

impl WireChunk {
    pub fn encode(frame: &AudioFrame) -> Self {
        Self(STANDARD.encode(frame.to_le_bytes()))
    }

    pub fn decode(&self) -> Result<AudioFrame, ProtocolError> {
        let bytes = STANDARD
            .decode(self.0.as_bytes())
            .map_err(|e| ProtocolError::BadAudio(e.to_string()))?;
        AudioFrame::from_le_bytes(&bytes)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for WireChunk {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_is_lossless() {
        let samples: Vec<i16> = vec![i16::MIN, -1, 0, 1, 12345, i16::MAX, -32000, 7];
        let frame = AudioFrame::new(samples.clone());
        let chunk = WireChunk::encode(&frame);
        let back = chunk.decode().unwrap();
        assert_eq!(back.samples(), samples.as_slice());
    }

    #[test]
    fn bytes_are_little_endian() {
        let frame = AudioFrame::new(vec![0x0102, -2]);
        assert_eq!(frame.to_le_bytes().as_ref(), &[0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn odd_length_payload_is_rejected() {
        let chunk = WireChunk::from(STANDARD.encode([1u8, 2, 3]));
        assert!(matches!(chunk.decode(), Err(ProtocolError::BadAudio(_))));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let chunk = WireChunk::from("not base64 !!".to_string());
        assert!(matches!(chunk.decode(), Err(ProtocolError::BadAudio(_))));
    }

    #[test]
    fn twenty_ms_frame_geometry() {
        assert_eq!(samples_per_frame(20), 480);
        let frame = AudioFrame::silence(samples_per_frame(20));
        assert_eq!(frame.duration(), Duration::from_millis(20));
        assert!(frame.is_silent());
    }

    #[test]
    fn long_durations_do_not_wrap() {
        // 24000 * 200_000 is past u32::MAX
        assert_eq!(samples_per_frame(200_000), 4_800_000);
        assert_eq!(samples_per_frame(u32::MAX), 103_079_215_080);
    }
}
