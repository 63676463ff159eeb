//! Raw PCM to WAV container transcoding.
//!
//! Speech backends hand back headerless little-endian PCM. Players need a
//! RIFF/WAVE header in front of it; nothing else about the samples changes.

/// Size of the canonical RIFF/WAVE header written by [`encode_wav`].
pub const WAV_HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;
const FMT_CHUNK_LEN: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// What Gemini speech synthesis emits: 24 kHz, mono, signed 16-bit.
    pub const GEMINI_TTS: PcmFormat = PcmFormat {
        sample_rate: 24_000,
        channels: 1,
        bits_per_sample: 16,
    };

    /// Bytes per sample frame. Saturates at `u16::MAX` for formats the
    /// container cannot describe.
    pub fn block_align(&self) -> u16 {
        let bits = u32::from(self.channels) * u32::from(self.bits_per_sample);
        u16::try_from(bits / 8).unwrap_or(u16::MAX)
    }

    /// Bytes per second, saturating at `u32::MAX`.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(u32::from(self.block_align()))
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::GEMINI_TTS
    }
}

/// Wraps `pcm` in a WAV container using [`PcmFormat::GEMINI_TTS`].
pub fn pcm_to_wav(pcm: &[u8]) -> Vec<u8> {
    encode_wav(pcm, PcmFormat::GEMINI_TTS)
}

/// Prepends a 44-byte RIFF/WAVE header describing `format` to `pcm`.
///
/// The payload is copied verbatim. Sizes are 32-bit in the container, so a
/// payload past 4 GiB saturates the length fields.
pub fn encode_wav(pcm: &[u8], format: PcmFormat) -> Vec<u8> {
    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX);
    let riff_len = data_len.saturating_add(36);

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&riff_len.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    wav.extend_from_slice(&PCM_FORMAT_TAG.to_le_bytes());
    wav.extend_from_slice(&format.channels.to_le_bytes());
    wav.extend_from_slice(&format.sample_rate.to_le_bytes());
    wav.extend_from_slice(&format.byte_rate().to_le_bytes());
    wav.extend_from_slice(&format.block_align().to_le_bytes());
    wav.extend_from_slice(&format.bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());

    wav.extend_from_slice(pcm);
    wav
}
