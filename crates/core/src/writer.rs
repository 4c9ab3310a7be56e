//! Producer-side handle on the shared channel.
//!
//! The supervisor owns a [`ChannelWriter`]; the capture callback holds a
//! cloned [`AudioChannel`] handle for the duration of a session. Attach and
//! detach are not real-time safe (they issue syscalls) and are only ever
//! called from the supervisor, with capture stopped across detach.

use std::sync::Arc;

use log::{info, warn};

use crate::channel::{AudioChannel, ChannelError};

/// Thin producer API over the channel: attach, detach, write, liveness.
///
/// While detached, including after a failed attach, [`write_frames`]
/// returns `false` and everything else is a no-op, so capture and level
/// metering keep working without a virtual microphone.
///
/// [`write_frames`]: ChannelWriter::write_frames
#[derive(Default)]
pub struct ChannelWriter {
    channel: Option<Arc<AudioChannel>>,
}

impl ChannelWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or reopens) the named region and maps it.
    ///
    /// Idempotent while attached. On failure the writer stays detached; the
    /// caller retries on the next enable transition, not per frame.
    pub fn attach(&mut self, name: &str) -> Result<(), ChannelError> {
        if self.channel.is_some() {
            return Ok(());
        }
        match AudioChannel::create_or_open(name) {
            Ok(channel) => {
                info!("audio channel attached at {name}");
                self.channel = Some(Arc::new(channel));
                Ok(())
            }
            Err(e) => {
                warn!("audio channel attach failed: {e}");
                Err(e)
            }
        }
    }

    /// Deactivates and releases the channel.
    ///
    /// The name is unlinked when the last handle drops; a capture session
    /// holding a clone releases its handle when the stream stops, which the
    /// supervisor guarantees happens before detach.
    pub fn detach(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.set_active(false);
            info!("audio channel detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.channel.is_some()
    }

    /// Handle for the capture callback. `None` in the no-channel state.
    pub fn handle(&self) -> Option<Arc<AudioChannel>> {
        self.channel.clone()
    }

    /// Publishes producer liveness; no-op while detached.
    pub fn set_active(&self, active: bool) {
        if let Some(channel) = &self.channel {
            channel.set_active(active);
        }
    }

    /// Writes `frames` interleaved stereo frames; `false` when detached or
    /// when the ring is full (the block is dropped, never blocked on).
    pub fn write_frames(&self, samples: &[f32], frames: usize) -> bool {
        match &self.channel {
            Some(channel) => channel.write_frames(samples, frames),
            None => false,
        }
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        self.detach();
    }
}
