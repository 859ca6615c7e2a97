//! Sound bank file checks
//!
//! The speaker plays 16-bit mono PCM at 11025 Hz wrapped in a WAV header.
//! Conversion happens upstream; here we only verify the header and size
//! before an upload.

use std::path::Path;

use thiserror::Error;

use bdk_transport::protocol::limits;

pub const TARGET_SAMPLE_RATE: u32 = 11_025;
pub const TARGET_CHANNELS: u16 = 1;
pub const TARGET_BITS_PER_SAMPLE: u16 = 16;

const PCM_FORMAT: u16 = 1;

#[derive(Debug, Error)]
pub enum SoundFileError {
    #[error("failed to read sound file: {0}")]
    Io(#[from] std::io::Error),
    #[error("sound file is empty")]
    Empty,
    #[error("sound file is {0} bytes, the device holds at most {max}", max = limits::SOUND_MAX_BYTES)]
    TooLarge(usize),
    #[error("not a WAV file: {0}")]
    NotWav(&'static str),
    #[error("unsupported format {0}; convert to {rate} Hz mono 16-bit PCM", rate = TARGET_SAMPLE_RATE)]
    UnsupportedFormat(WavFormat),
}

/// Format fields from the `fmt ` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl std::fmt::Display for WavFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit (format {})",
            self.sample_rate, self.channels, self.bits_per_sample, self.audio_format
        )
    }
}

impl WavFormat {
    pub fn is_device_native(&self) -> bool {
        self.audio_format == PCM_FORMAT
            && self.channels == TARGET_CHANNELS
            && self.sample_rate == TARGET_SAMPLE_RATE
            && self.bits_per_sample == TARGET_BITS_PER_SAMPLE
    }
}

/// A sound file ready for upload
#[derive(Debug, Clone)]
pub struct SoundFile {
    pub data: Vec<u8>,
    pub format: WavFormat,
    /// Length of the sample data in bytes
    pub data_len: usize,
}

impl SoundFile {
    pub fn load(path: &Path) -> Result<Self, SoundFileError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// Check size and header; the bytes are uploaded unchanged
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, SoundFileError> {
        if data.is_empty() {
            return Err(SoundFileError::Empty);
        }
        if data.len() > limits::SOUND_MAX_BYTES {
            return Err(SoundFileError::TooLarge(data.len()));
        }
        let (format, data_len) = parse_wav(&data)?;
        if !format.is_device_native() {
            return Err(SoundFileError::UnsupportedFormat(format));
        }
        Ok(Self {
            data,
            format,
            data_len,
        })
    }

    /// Playback length
    pub fn duration_secs(&self) -> f32 {
        let bytes_per_sec = self.format.sample_rate
            * u32::from(self.format.channels)
            * u32::from(self.format.bits_per_sample / 8);
        self.data_len as f32 / bytes_per_sec.max(1) as f32
    }
}

fn u16_at(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u32_at(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Walk the RIFF chunks for `fmt ` and `data`
fn parse_wav(data: &[u8]) -> Result<(WavFormat, usize), SoundFileError> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
        return Err(SoundFileError::NotWav("missing RIFF/WAVE header"));
    }

    let mut format = None;
    let mut pos = 12;
    while pos + 8 <= data.len() {
        let id = &data[pos..pos + 4];
        let Some(len) = u32_at(data, pos + 4) else {
            break;
        };
        let len = len as usize;
        let body = pos + 8;
        match id {
            b"fmt " => {
                let parsed = (|| {
                    Some(WavFormat {
                        audio_format: u16_at(data, body)?,
                        channels: u16_at(data, body + 2)?,
                        sample_rate: u32_at(data, body + 4)?,
                        bits_per_sample: u16_at(data, body + 14)?,
                    })
                })();
                format = Some(parsed.ok_or(SoundFileError::NotWav("truncated fmt chunk"))?);
            }
            b"data" => {
                let format = format.ok_or(SoundFileError::NotWav("data before fmt chunk"))?;
                let available = data.len() - body;
                return Ok((format, len.min(available)));
            }
            _ => {}
        }
        // chunks are word aligned
        pos = body + len + (len & 1);
    }
    Err(SoundFileError::NotWav("no data chunk"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal WAV with the given format and sample bytes
    fn wav(sample_rate: u32, channels: u16, bits: u16, samples: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + samples.len() as u32).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&PCM_FORMAT.to_le_bytes());
        out.extend_from_slice(&channels.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        let block = channels * bits / 8;
        out.extend_from_slice(&(sample_rate * u32::from(block)).to_le_bytes());
        out.extend_from_slice(&block.to_le_bytes());
        out.extend_from_slice(&bits.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(samples.len() as u32).to_le_bytes());
        out.extend_from_slice(samples);
        out
    }

    #[test]
    fn test_native_wav_accepted() {
        let file = SoundFile::from_bytes(wav(11_025, 1, 16, &[0u8; 22_050])).unwrap();
        assert_eq!(file.data_len, 22_050);
        assert!((file.duration_secs() - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_other_formats_rejected() {
        let err = SoundFile::from_bytes(wav(44_100, 2, 16, &[0u8; 64])).unwrap_err();
        assert!(matches!(err, SoundFileError::UnsupportedFormat(f) if f.sample_rate == 44_100));
        assert!(matches!(
            SoundFile::from_bytes(b"ID3 not a wav".to_vec()),
            Err(SoundFileError::NotWav(_))
        ));
    }

    #[test]
    fn test_size_limits() {
        assert!(matches!(
            SoundFile::from_bytes(Vec::new()),
            Err(SoundFileError::Empty)
        ));
        let big = wav(11_025, 1, 16, &vec![0u8; limits::SOUND_MAX_BYTES]);
        assert!(matches!(
            SoundFile::from_bytes(big),
            Err(SoundFileError::TooLarge(_))
        ));
    }

    #[test]
    fn test_skips_unknown_chunks() {
        let mut data = wav(11_025, 1, 16, &[1, 2, 3, 4]);
        // Insert an odd-length LIST chunk between fmt and data
        let mut list = b"LIST".to_vec();
        list.extend_from_slice(&3u32.to_le_bytes());
        list.extend_from_slice(&[9, 9, 9, 0]);
        data.splice(36..36, list);
        let file = SoundFile::from_bytes(data).unwrap();
        assert_eq!(file.data_len, 4);
    }
}
