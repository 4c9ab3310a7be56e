//! Microphone capture wiring.
//!
//! A [`CaptureSession`] owns one cpal input stream. The stream callback is
//! the audio thread: it runs the whole capture pipeline and writes completed
//! blocks into the shared channel handle it was given at start. Stopping the
//! session drops the stream, which releases the callback's channel handle.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use log::{info, warn};

use quietmic_core::channel::AudioChannel;
use quietmic_core::constants::DENOISE_FRAME;
use quietmic_core::levels::LevelsUpdate;
use quietmic_core::CapturePipeline;

/// Device name understood everywhere as "whatever the OS considers default".
pub const DEFAULT_DEVICE: &str = "default";

/// A running capture stream feeding the denoise pipeline.
pub struct CaptureSession {
    _stream: cpal::Stream,
    /// Blocks the pipeline could not deliver to the channel.
    pub dropped_blocks: Arc<AtomicU64>,
}

impl CaptureSession {
    /// Opens `device_name` and starts capturing.
    ///
    /// `channel` is `None` in the no-channel state: the pipeline still runs
    /// and publishes levels, but every block is dropped at the sink.
    pub fn start(
        device_name: &str,
        channel: Option<Arc<AudioChannel>>,
        levels_tx: Option<Sender<LevelsUpdate>>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let device = if device_name == DEFAULT_DEVICE {
            host.default_input_device()
                .context("no default input device")?
        } else {
            host.input_devices()?
                .find(|d| d.name().ok().as_deref() == Some(device_name))
                .context("input device not found")?
        };
        info!(
            "capturing from input device: {}",
            device.name().unwrap_or_default()
        );

        let supported = device
            .default_input_config()
            .context("no default input config")?;
        let sample_rate = supported.sample_rate().0 as f64;
        let capture_channels = supported.channels();
        info!("capture format: {capture_channels} ch @ {sample_rate} Hz");

        let mut pipeline = CapturePipeline::new(capture_channels);
        pipeline.levels_tx = levels_tx;
        let dropped_blocks = Arc::clone(&pipeline.dropped_blocks);

        let config: cpal::StreamConfig = supported.into();
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    pipeline.process(data, sample_rate, |block| match &channel {
                        Some(ch) => ch.write_frames(block, DENOISE_FRAME),
                        None => false,
                    });
                },
                |err| warn!("capture stream error: {err}"),
                None,
            )
            .context("failed to build input stream")?;

        stream.play().context("failed to start input stream")?;

        Ok(Self {
            _stream: stream,
            dropped_blocks,
        })
    }
}

/// Names of the currently attached input devices.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    Ok(host
        .input_devices()?
        .filter_map(|d| d.name().ok())
        .collect())
}
