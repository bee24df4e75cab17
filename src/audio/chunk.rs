//! Split synthesized audio into fixed-duration playback chunks.

use super::wav::{self, AudioFormat};
use bytes::Bytes;
use std::time::Duration;

/// One slice of a playback task's audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub task_priority: u32,
    pub task_sequence: u64,
    /// Position within the task, from zero.
    pub index: usize,
    /// Chunk bytes; the first chunk of a WAV task also carries the header.
    pub data: Bytes,
    /// Header bytes at the start of `data`.
    pub header_len: usize,
    pub duration: Duration,
    /// PCM layout when the source was WAV.
    pub format: Option<AudioFormat>,
}

impl AudioChunk {
    /// Audio payload without any header.
    pub fn pcm(&self) -> &[u8] {
        &self.data[self.header_len.min(self.data.len())..]
    }
}

/// Cut `audio` into chunks of roughly `chunk_ms`.
///
/// WAV input is cut on frame boundaries and the header rides on the first
/// chunk. Anything else is treated as raw audio at `fallback_byte_rate`.
/// Empty audio yields no chunks.
pub fn chunk_audio(
    audio: Bytes,
    task_priority: u32,
    task_sequence: u64,
    chunk_ms: u32,
    fallback_byte_rate: u32,
) -> Vec<AudioChunk> {
    let chunk_ms = u64::from(chunk_ms.max(1));
    let (format, header_len, pcm_len, byte_rate, frame) = match wav::inspect(&audio) {
        Some(layout) if layout.format.byte_rate() > 0 => (
            Some(layout.format),
            layout.data_offset,
            layout.data_len,
            layout.format.byte_rate(),
            layout.format.frame_bytes().max(1),
        ),
        _ => (
            None,
            0,
            audio.len(),
            u64::from(fallback_byte_rate.max(1)),
            1,
        ),
    };
    if pcm_len == 0 {
        return Vec::new();
    }

    let raw_size = (byte_rate * chunk_ms / 1000) as usize;
    let chunk_size = (raw_size / frame * frame).max(frame);

    let mut chunks = Vec::with_capacity(pcm_len.div_ceil(chunk_size));
    let mut start = 0usize;
    while start < pcm_len {
        let end = (start + chunk_size).min(pcm_len);
        let index = chunks.len();
        let (data, chunk_header) = if index == 0 {
            (audio.slice(0..header_len + end), header_len)
        } else {
            (audio.slice(header_len + start..header_len + end), 0)
        };
        let micros = (end - start) as u64 * 1_000_000 / byte_rate;
        chunks.push(AudioChunk {
            task_priority,
            task_sequence,
            index,
            data,
            header_len: chunk_header,
            duration: Duration::from_micros(micros),
            format,
        });
        start = end;
    }
    chunks
}
