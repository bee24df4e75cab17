//! Audio playback to system speakers via cpal.

use super::chunk::AudioChunk;
use super::device::AudioOutputDevice;
use super::wav;
use crate::error::{LiveError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// How often the playing thread checks whether the stream drained.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Time allowed past a chunk's duration before the stream counts as stalled.
const DRAIN_SLACK: Duration = Duration::from_millis(500);

/// Chunk player for a named or default cpal output device.
pub struct CpalDevice {
    device: cpal::Device,
    name: String,
}

impl CpalDevice {
    /// Open `name`, or the default output device when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if no matching output device is available.
    pub fn new(name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = name {
            host.output_devices()
                .map_err(|e| LiveError::Device(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| LiveError::Device(format!("output device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| LiveError::Device("no default output device".into()))?
        };

        let name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {name}");
        Ok(Self { device, name })
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| LiveError::Device(format!("cannot enumerate devices: {e}")))?;
        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

impl AudioOutputDevice for CpalDevice {
    fn play_chunk(&mut self, chunk: &AudioChunk) -> Result<()> {
        let format = chunk
            .format
            .ok_or_else(|| LiveError::Device("cannot play audio without a PCM layout".into()))?;
        let samples = wav::pcm_to_mono_f32(chunk.pcm(), &format);
        if samples.is_empty() {
            return Ok(());
        }

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let buffer = Arc::new(Mutex::new(PlaybackBuffer {
            samples,
            position: 0,
            finished: false,
            error: None,
        }));
        let buffer_clone = Arc::clone(&buffer);
        let error_buffer = Arc::clone(&buffer);

        let stream = self
            .device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = match buffer_clone.lock() {
                        Ok(b) => b,
                        Err(_) => return,
                    };
                    for sample in data.iter_mut() {
                        if buf.position < buf.samples.len() {
                            *sample = buf.samples[buf.position];
                            buf.position += 1;
                        } else {
                            *sample = 0.0;
                            buf.finished = true;
                        }
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                    if let Ok(mut buf) = error_buffer.lock() {
                        buf.error = Some(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| LiveError::Device(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| LiveError::Device(format!("failed to start output stream: {e}")))?;

        // Block until the chunk drains; preemption is evaluated between chunks.
        let drained = wait_until_drained(&buffer, Instant::now() + chunk.duration + DRAIN_SLACK);
        drop(stream);
        drained
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
    /// Set by the stream's error callback.
    error: Option<String>,
}

fn wait_until_drained(buffer: &Mutex<PlaybackBuffer>, deadline: Instant) -> Result<()> {
    loop {
        std::thread::sleep(POLL_INTERVAL);
        let buf = buffer
            .lock()
            .map_err(|e| LiveError::Device(format!("playback buffer lock poisoned: {e}")))?;
        if buf.finished {
            return Ok(());
        }
        if let Some(err) = &buf.error {
            return Err(LiveError::Device(format!("output stream failed: {err}")));
        }
        if Instant::now() >= deadline {
            return Err(LiveError::Device(format!(
                "output stream stalled after {} of {} samples",
                buf.position,
                buf.samples.len()
            )));
        }
    }
}
