//! Producer lifecycle: wires user intent (enabled, selected device) to the
//! capture session and the shared channel.
//!
//! Transition ordering is load-bearing: the channel is attached before
//! capture starts (so the callback gets its handle) and capture is stopped
//! before the channel detaches (so nothing writes through a dead mapping).
//! All of this runs on a normal-priority thread; only the capture callback
//! itself is real-time.

use anyhow::Result;
use crossbeam_channel::Sender;
use log::warn;

use quietmic_core::constants::CHANNEL_NAME;
use quietmic_core::levels::LevelsUpdate;
use quietmic_core::ChannelWriter;

use crate::capture::{self, CaptureSession, DEFAULT_DEVICE};

pub struct Supervisor {
    enabled: bool,
    device: String,
    writer: ChannelWriter,
    session: Option<CaptureSession>,
    levels_tx: Sender<LevelsUpdate>,
}

impl Supervisor {
    pub fn new(levels_tx: Sender<LevelsUpdate>) -> Self {
        Self {
            enabled: false,
            device: DEFAULT_DEVICE.to_owned(),
            writer: ChannelWriter::new(),
            session: None,
            levels_tx,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Enables or disables noise suppression.
    ///
    /// Enable: attach channel, start capture, declare the producer live.
    /// A failed attach is not fatal: capture and level metering run in the
    /// no-channel state and attach is retried on the next enable. Disable:
    /// stop capture, declare inactive, detach.
    pub fn set_enabled(&mut self, enable: bool) -> Result<()> {
        if enable == self.enabled {
            return Ok(());
        }

        if enable {
            // Degrades to metering-only on failure; already logged.
            let _ = self.writer.attach(CHANNEL_NAME);

            match CaptureSession::start(
                &self.device,
                self.writer.handle(),
                Some(self.levels_tx.clone()),
            ) {
                Ok(session) => {
                    self.session = Some(session);
                    self.writer.set_active(true);
                    self.enabled = true;
                    Ok(())
                }
                Err(e) => {
                    self.writer.detach();
                    Err(e)
                }
            }
        } else {
            // Dropping the session stops the stream and releases the
            // callback's channel handle.
            self.session = None;
            self.writer.set_active(false);
            self.writer.detach();
            self.enabled = false;
            Ok(())
        }
    }

    /// Switches the capture device, restarting the session if one is live.
    /// The channel stays attached across the restart; the new session gets a
    /// fresh pipeline (and so fresh denoiser state).
    pub fn set_device(&mut self, name: &str) -> Result<()> {
        if self.device == name {
            return Ok(());
        }
        self.device = name.to_owned();

        if self.enabled {
            self.session = None;
            match CaptureSession::start(
                &self.device,
                self.writer.handle(),
                Some(self.levels_tx.clone()),
            ) {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    // Leave a clean disabled state rather than a half-open
                    // session claiming to be live.
                    self.writer.set_active(false);
                    self.writer.detach();
                    self.enabled = false;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Refreshes the device list. An active session is left alone unless the
    /// selected device disappeared, in which case capture falls back to the
    /// default device.
    pub fn refresh_devices(&mut self) -> Result<Vec<String>> {
        let devices = capture::list_input_devices()?;
        if self.enabled && self.device != DEFAULT_DEVICE && !devices.iter().any(|d| d == &self.device)
        {
            warn!("input device '{}' disappeared, falling back to default", self.device);
            self.set_device(DEFAULT_DEVICE)?;
        }
        Ok(devices)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let _ = self.set_enabled(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disabled_on_default_device() {
        let (tx, _rx) = crossbeam_channel::bounded(4);
        let supervisor = Supervisor::new(tx);
        assert!(!supervisor.is_enabled());
        assert_eq!(supervisor.device(), DEFAULT_DEVICE);
    }

    #[test]
    fn disabling_while_disabled_is_a_no_op() {
        let (tx, _rx) = crossbeam_channel::bounded(4);
        let mut supervisor = Supervisor::new(tx);
        supervisor.set_enabled(false).unwrap();
        assert!(!supervisor.is_enabled());
    }

    #[test]
    fn device_change_while_disabled_only_records_the_name() {
        let (tx, _rx) = crossbeam_channel::bounded(4);
        let mut supervisor = Supervisor::new(tx);
        supervisor.set_device("Some Microphone").unwrap();
        assert_eq!(supervisor.device(), "Some Microphone");
        assert!(!supervisor.is_enabled());
    }
}
