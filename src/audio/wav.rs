//! WAV helpers: header inspection, PCM decoding and encoding via `hound`.

use crate::error::{LiveError, Result};
use bytes::Bytes;
use serde::Serialize;
use std::io::Cursor;

/// PCM layout of a WAV payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Bytes per interleaved frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits_per_sample).div_ceil(8)
    }

    pub fn byte_rate(&self) -> u64 {
        u64::from(self.sample_rate) * self.frame_bytes() as u64
    }
}

/// Location of the PCM data inside a WAV buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavLayout {
    pub format: AudioFormat,
    /// Offset of the first PCM byte (header length).
    pub data_offset: usize,
    /// PCM byte count, clamped to what the buffer actually holds.
    pub data_len: usize,
}

/// Inspect a buffer for a RIFF/WAVE header. Returns `None` for anything else.
pub fn inspect(bytes: &[u8]) -> Option<WavLayout> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    let format = AudioFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
    };

    // hound validates the header but does not expose the data offset, so
    // walk the RIFF chunk list to find it.
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let body = pos + 8;
        if id == b"data" {
            let data_len = size.min(bytes.len().saturating_sub(body));
            return Some(WavLayout {
                format,
                data_offset: body,
                data_len,
            });
        }
        // Chunks are padded to even sizes.
        pos = body.checked_add(size)?.checked_add(size % 2)?;
    }
    None
}

/// Decode a WAV buffer to mono `f32` samples in `[-1, 1]`.
///
/// # Errors
///
/// Returns `LiveError::Quality` if the buffer is not decodable WAV.
pub fn decode_mono_f32(bytes: &[u8]) -> Result<(Vec<f32>, AudioFormat)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| LiveError::Quality(format!("not a WAV payload: {e}")))?;
    let spec = reader.spec();
    let format = AudioFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
    };

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| LiveError::Quality(format!("corrupt WAV samples: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| LiveError::Quality(format!("corrupt WAV samples: {e}")))?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };
    Ok((mono, format))
}

/// Convert raw little-endian PCM (no header) to mono `f32`.
pub fn pcm_to_mono_f32(pcm: &[u8], format: &AudioFormat) -> Vec<f32> {
    let channels = usize::from(format.channels.max(1));
    let samples: Vec<f32> = match format.bits_per_sample {
        16 => pcm
            .chunks_exact(2)
            .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0)
            .collect(),
        8 => pcm.iter().map(|b| (f32::from(*b) - 128.0) / 128.0).collect(),
        32 => pcm
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        _ => Vec::new(),
    };
    if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }
}

/// Encode mono `f32` samples as a 16-bit PCM WAV buffer.
///
/// # Errors
///
/// Returns `LiveError::Tts` if encoding fails.
pub fn encode_mono_i16(samples: &[f32], sample_rate: u32) -> Result<Bytes> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| LiveError::Tts(format!("cannot start WAV: {e}")))?;
        for s in samples {
            let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer
                .write_sample(v)
                .map_err(|e| LiveError::Tts(format!("cannot write WAV sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| LiveError::Tts(format!("cannot finalize WAV: {e}")))?;
    }
    Ok(Bytes::from(cursor.into_inner()))
}
