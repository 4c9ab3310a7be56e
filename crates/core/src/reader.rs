//! Consumer-side handle on the shared channel.
//!
//! The driver may be loaded long before any producer runs, so the reader
//! connects lazily: each callback either serves ring data or silence, and a
//! missing channel is a normal condition, not an error. Once mapped, the
//! mapping is kept for the life of the reader; if the producer unlinks the
//! name and a new producer maps a fresh region, this reader keeps serving
//! its (now orphaned) region, per standard POSIX shm semantics.

use log::{debug, warn};

use crate::channel::{AudioChannel, ChannelError};
use crate::constants::CHANNELS;

// After this many consecutive failed opens, further attempts are spaced out
// so a driver-side real-time thread is not paying one shm_open per callback
// while no producer is installed.
const RETRY_THRESHOLD: u32 = 64;
const RETRY_INTERVAL: u32 = 64;

/// Lazily connecting reader serving the plug-in's per-callback request.
pub struct ChannelReader {
    name: String,
    channel: Option<AudioChannel>,
    failures: u32,
    cooldown: u32,
    warned_invalid: bool,
}

impl ChannelReader {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            channel: None,
            failures: 0,
            cooldown: 0,
            warned_invalid: false,
        }
    }

    /// True once a channel mapping is held.
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Fills `out` with `frames` interleaved stereo frames.
    ///
    /// Returns `true` only when live ring data was copied. Every other case
    /// (no channel yet, producer inactive, underrun, overrun recovery) fills
    /// `out` with silence and returns `false`. Silence is always a valid
    /// result for the host audio daemon.
    pub fn read(&mut self, out: &mut [f32], frames: usize) -> bool {
        let samples = frames * CHANNELS;
        assert!(out.len() >= samples);

        if self.channel.is_none() && !self.try_connect() {
            out[..samples].fill(0.0);
            return false;
        }
        let channel = self.channel.as_ref().expect("connected above");

        // Refuse to drain stale ring contents while no producer is live.
        if !channel.is_active() || channel.available_to_read() < frames {
            out[..samples].fill(0.0);
            return false;
        }

        // An overrun shows up as an oversized available count and passes the
        // check above; read_frames recovers by fast-forwarding to the tail.
        channel.read_frames(out, frames)
    }

    fn try_connect(&mut self) -> bool {
        if self.cooldown > 0 {
            self.cooldown -= 1;
            return false;
        }

        match AudioChannel::open_existing(&self.name) {
            Ok(channel) => {
                debug!("audio channel connected at {}", self.name);
                self.channel = Some(channel);
                self.failures = 0;
                self.warned_invalid = false;
                true
            }
            Err(ChannelError::NotFound) => {
                self.note_failure();
                false
            }
            Err(e) => {
                // The rejected mapping is already dropped; a later attempt
                // maps afresh and may find a well-formed region.
                if !self.warned_invalid {
                    warn!("audio channel rejected: {e}");
                    self.warned_invalid = true;
                }
                self.note_failure();
                false
            }
        }
    }

    fn note_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= RETRY_THRESHOLD {
            self.cooldown = RETRY_INTERVAL;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DENOISE_FRAME;
    use crate::test_util::test_name;

    fn pattern(frames: usize) -> Vec<f32> {
        (0..frames * CHANNELS).map(|i| i as f32 / 1000.0).collect()
    }

    #[test]
    fn serves_silence_until_producer_appears() {
        let name = test_name("reader_lazy");
        let mut reader = ChannelReader::new(&name);

        let mut out = vec![1.0f32; DENOISE_FRAME * CHANNELS];
        assert!(!reader.read(&mut out, DENOISE_FRAME));
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(!reader.is_connected());

        let producer = AudioChannel::create_or_open(&name).unwrap();
        producer.set_active(true);
        let input = pattern(DENOISE_FRAME);
        assert!(producer.write_frames(&input, DENOISE_FRAME));

        assert!(reader.read(&mut out, DENOISE_FRAME));
        assert_eq!(input, out);
        assert!(reader.is_connected());
    }

    #[test]
    fn inactive_producer_reads_as_silence() {
        let name = test_name("reader_inactive");
        let producer = AudioChannel::create_or_open(&name).unwrap();
        producer.set_active(true);
        assert!(producer.write_frames(&pattern(2 * DENOISE_FRAME), 2 * DENOISE_FRAME));
        producer.set_active(false);

        let mut reader = ChannelReader::new(&name);
        let mut out = vec![1.0f32; DENOISE_FRAME * CHANNELS];
        assert!(!reader.read(&mut out, DENOISE_FRAME));
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(producer.read_index(), 0);
    }

    #[test]
    fn underrun_reads_as_silence_without_advancing() {
        let name = test_name("reader_underrun");
        let producer = AudioChannel::create_or_open(&name).unwrap();
        producer.set_active(true);
        assert!(producer.write_frames(&pattern(100), 100));

        let mut reader = ChannelReader::new(&name);
        let mut out = vec![1.0f32; DENOISE_FRAME * CHANNELS];
        assert!(!reader.read(&mut out, DENOISE_FRAME));
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(producer.read_index(), 0);
    }

    #[test]
    fn overrun_recovers_with_one_silent_block() {
        let name = test_name("reader_overrun");
        let producer = AudioChannel::create_or_open(&name).unwrap();
        producer.set_active(true);
        producer.force_indices(5000, 0);

        let mut reader = ChannelReader::new(&name);
        let mut out = vec![1.0f32; DENOISE_FRAME * CHANNELS];
        assert!(!reader.read(&mut out, DENOISE_FRAME));
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(producer.read_index(), 4999);
    }

    #[test]
    fn repeated_failures_throttle_reconnect_attempts() {
        let name = test_name("reader_throttle");
        let mut reader = ChannelReader::new(&name);
        let mut out = vec![0.0f32; CHANNELS];

        for _ in 0..RETRY_THRESHOLD {
            assert!(!reader.read(&mut out, 1));
        }
        assert_eq!(reader.cooldown, RETRY_INTERVAL);

        // A producer appearing during the cooldown is picked up once the
        // cooldown expires, not immediately.
        let producer = AudioChannel::create_or_open(&name).unwrap();
        producer.set_active(true);
        assert!(producer.write_frames(&pattern(1), 1));

        let mut calls = 0;
        while !reader.read(&mut out, 1) {
            calls += 1;
            assert!(calls <= RETRY_INTERVAL + 1, "reconnect never happened");
        }
        assert!(reader.is_connected());
    }

    #[test]
    fn invalid_header_is_retried_with_a_fresh_mapping() {
        let name = test_name("reader_invalid");
        let producer = AudioChannel::create_or_open(&name).unwrap();
        producer.corrupt_sample_rate();
        producer.set_active(true);
        assert!(producer.write_frames(&pattern(1), 1));

        let mut reader = ChannelReader::new(&name);
        let mut out = vec![1.0f32; CHANNELS];
        assert!(!reader.read(&mut out, 1));
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(!reader.is_connected());
    }
}
