//! Audio input capture
//!
//! Opens an input device via CPAL and streams time-domain samples into a
//! fixed-size shared window that the animation tick snapshots on demand.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info};

/// Capture sample rate. Speech loudness does not need more.
pub const SAMPLE_RATE: u32 = 16_000;

/// Size of the shared sample window (128 ms at 16 kHz). This is the window
/// the loudness estimate is computed over every tick.
pub const WINDOW_SAMPLES: usize = 2048;

/// Why the input device could not be acquired or started.
///
/// All variants are terminal for the pipeline: there is no retry path.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no default input device found")]
    NoDevice,
    #[error("input device not found: {0}")]
    DeviceNotFound(String),
    #[error("no suitable input configuration found")]
    NoConfig,
    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),
    #[error("failed to query input configurations: {0}")]
    Configs(#[from] cpal::SupportedStreamConfigsError),
    #[error("failed to open input stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("failed to start input stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

/// Fixed-size ring of the most recent samples, refreshed in place by the
/// capture callback and snapshotted once per animation tick.
///
/// The capture thread is the only writer and the tick function the only
/// reader, so a plain mutex is enough.
#[derive(Clone)]
pub struct SampleWindow {
    inner: Arc<Mutex<WindowInner>>,
}

struct WindowInner {
    samples: Vec<f32>,
    pos: usize,
}

impl SampleWindow {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(WindowInner {
                samples: vec![0.0; WINDOW_SAMPLES],
                pos: 0,
            })),
        }
    }

    /// Append samples, overwriting the oldest. Called from the audio thread.
    pub fn push(&self, data: &[f32]) {
        if let Ok(mut inner) = self.inner.lock() {
            for &sample in data {
                let pos = inner.pos;
                inner.samples[pos] = sample;
                inner.pos = (pos + 1) % WINDOW_SAMPLES;
            }
        }
    }

    /// Copy the window into `out` in chronological order, oldest first.
    pub fn snapshot(&self, out: &mut [f32]) {
        debug_assert_eq!(out.len(), WINDOW_SAMPLES);
        if let Ok(inner) = self.inner.lock() {
            let tail = WINDOW_SAMPLES - inner.pos;
            out[..tail].copy_from_slice(&inner.samples[inner.pos..]);
            out[tail..].copy_from_slice(&inner.samples[..inner.pos]);
        }
    }
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// A resolved input device ready to stream into a [`SampleWindow`].
pub struct AudioInput {
    device: Device,
    config: StreamConfig,
}

/// Information about an available audio input device.
#[derive(Debug, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub supported_sample_rates: Vec<u32>,
    pub supported_formats: Vec<String>,
}

impl AudioInput {
    /// Open the default (or named) input device at a speech-friendly rate.
    pub fn open(device_name: Option<&str>) -> Result<Self, CaptureError> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };

        let config = Self::closest_config(&device, SAMPLE_RATE)?;

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            rate = config.sample_rate.0,
            channels = config.channels,
            "selected input device"
        );

        Ok(Self { device, config })
    }

    /// Find the supported configuration closest to the target sample rate.
    fn closest_config(
        device: &Device,
        target_sample_rate: u32,
    ) -> Result<StreamConfig, CaptureError> {
        let supported_configs = device.supported_input_configs()?;

        let mut best_config = None;
        let mut best_diff = u32::MAX;

        for config in supported_configs {
            let diff = config.max_sample_rate().0.abs_diff(target_sample_rate);
            if diff < best_diff {
                best_diff = diff;
                best_config = Some(config);
            }
        }

        let config = best_config.ok_or(CaptureError::NoConfig)?;
        let rate = target_sample_rate.clamp(config.min_sample_rate().0, config.max_sample_rate().0);
        Ok(config.with_sample_rate(cpal::SampleRate(rate)).into())
    }

    /// Start capturing into the shared window.
    ///
    /// The returned stream is the scoped device acquisition: it must be kept
    /// alive while listening, and dropping it releases the device.
    pub fn start(&self, window: SampleWindow) -> Result<Stream, CaptureError> {
        let channels = self.config.channels as usize;

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if channels > 1 {
                    // Down-mix interleaved frames to mono by averaging.
                    let mono: Vec<f32> = data
                        .chunks_exact(channels)
                        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                        .collect();
                    window.push(&mono);
                } else {
                    window.push(data);
                }
            },
            |err| {
                error!("input stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        info!("audio capture started");

        Ok(stream)
    }
}

/// Acquires the capture handle the pipeline holds while running.
///
/// The microphone implementation opens a real device; tests substitute a
/// source of their own so acquisition is observable without hardware.
pub trait CaptureSource {
    /// Keeps the capture alive; dropping it releases the device.
    type Handle;

    fn acquire(&mut self, window: SampleWindow) -> Result<Self::Handle, CaptureError>;
}

/// The real microphone, resolved fresh on each acquisition.
pub struct Microphone {
    device_name: Option<String>,
}

impl Microphone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl CaptureSource for Microphone {
    type Handle = Stream;

    fn acquire(&mut self, window: SampleWindow) -> Result<Stream, CaptureError> {
        let input = AudioInput::open(self.device_name.as_deref())?;
        input.start(window)
    }
}

/// List all available audio input devices.
pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, CaptureError> {
    let host = cpal::default_host();
    let devices = host.input_devices()?;
    let default_device = host.default_input_device();

    let mut device_infos = Vec::new();

    for device in devices {
        let name = device.name().unwrap_or("Unknown Device".to_string());
        let is_default = default_device
            .as_ref()
            .map(|d| d.name().unwrap_or_default() == name)
            .unwrap_or(false);

        let supported_sample_rates = device
            .supported_input_configs()?
            .map(|c| c.max_sample_rate().0)
            .collect();

        let supported_formats = device
            .supported_input_configs()?
            .map(|c| format!("{:?}", c.sample_format()))
            .collect();

        device_infos.push(AudioDeviceInfo {
            name,
            is_default,
            supported_sample_rates,
            supported_formats,
        });
    }

    Ok(device_infos)
}
