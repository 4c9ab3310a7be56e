//! Shared constants for the QuietMic audio transport.
//!
//! Both the app and the driver are built against these; the channel layout
//! in [`crate::channel`] bakes them into the cross-process contract, so any
//! change here is a breaking protocol change and needs a new channel name.

/// Sample rate of the virtual microphone stream (48kHz).
pub const SAMPLE_RATE: u32 = 48000;

/// Channel count of the virtual microphone stream (stereo).
pub const CHANNELS: usize = 2;

/// Ring capacity in frames (~85ms at 48kHz).
pub const RING_FRAMES: usize = 4096;

/// Frame size required by the denoiser (10ms at 48kHz = 480 samples).
pub const DENOISE_FRAME: usize = 480;

/// Rendezvous name of the shared audio channel in the POSIX shm namespace.
pub const CHANNEL_NAME: &str = "/micnoisegate_audio";
