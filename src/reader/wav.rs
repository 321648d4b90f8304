//! Synthesized PCM → playable WAV clips.
//!
//! The speech endpoint returns raw 16-bit little-endian mono PCM encoded as
//! base64. We decode it and put a RIFF/WAVE header in front so any player
//! can handle it.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

/// Sample rate of the synthesized speech (Gemini TTS emits 24kHz mono).
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

pub fn decode_audio_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(payload.trim())
}

/// Wrap raw PCM bytes (mono, 16-bit LE) in a WAV container.
///
/// A trailing odd byte cannot form a sample and is dropped.
pub fn wrap_pcm(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    if pcm.len() % 2 != 0 {
        debug!("Dropping trailing odd PCM byte ({} bytes)", pcm.len());
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len()));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for pair in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}

/// A playable audio resource. Owned by the playback cache until teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    wav: Vec<u8>,
}

impl AudioClip {
    pub fn from_pcm(pcm: &[u8], sample_rate: u32) -> Result<Self, hound::Error> {
        Ok(Self {
            wav: wrap_pcm(pcm, sample_rate)?,
        })
    }

    /// Wrap bytes that are already a complete resource.
    pub fn from_bytes(wav: Vec<u8>) -> Self {
        Self { wav }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.wav
    }

    pub fn len(&self) -> usize {
        self.wav.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wav.is_empty()
    }

    /// Decode to normalized `f32` samples. Returns `(channels, sample_rate, samples)`.
    pub fn samples(&self) -> Result<(u16, u32, Vec<f32>), hound::Error> {
        let reader = hound::WavReader::new(Cursor::new(self.wav.as_slice()))?;
        let spec = reader.spec();
        let samples = reader
            .into_samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32768.0))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((spec.channels, spec.sample_rate, samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_of(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_header_describes_mono_16bit() {
        let pcm = pcm_of(&[0, 1000, -1000, i16::MAX, i16::MIN]);
        let wav = wrap_pcm(&pcm, DEFAULT_SAMPLE_RATE).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let reader = hound::WavReader::new(Cursor::new(wav.as_slice())).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 24000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        assert_eq!(reader.len(), 5);
    }

    #[test]
    fn test_samples_survive_wrapping() {
        let original = [0i16, 12, -12, 30000, -30000];
        let clip = AudioClip::from_pcm(&pcm_of(&original), 16000).unwrap();
        let (channels, rate, samples) = clip.samples().unwrap();

        assert_eq!(channels, 1);
        assert_eq!(rate, 16000);
        let restored: Vec<i16> = samples.iter().map(|s| (s * 32768.0) as i16).collect();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_odd_trailing_byte_dropped() {
        let mut pcm = pcm_of(&[5, 6]);
        pcm.push(0x7f);
        let clip = AudioClip::from_pcm(&pcm, DEFAULT_SAMPLE_RATE).unwrap();
        assert_eq!(clip.samples().unwrap().2.len(), 2);
    }

    #[test]
    fn test_decode_payload() {
        let pcm = pcm_of(&[1, 2, 3]);
        let encoded = STANDARD.encode(&pcm);
        assert_eq!(decode_audio_payload(&format!("{encoded}\n")).unwrap(), pcm);
        assert!(decode_audio_payload("not base64!!").is_err());
    }

    #[test]
    fn test_empty_pcm_still_playable() {
        let clip = AudioClip::from_pcm(&[], DEFAULT_SAMPLE_RATE).unwrap();
        assert!(!clip.is_empty());
        assert!(clip.samples().unwrap().2.is_empty());
    }
}
