//! Per-channel denoiser state.
//!
//! Wraps the RNNoise frame transform behind the fixed contract the pipeline
//! relies on: 480-sample blocks in capture order, same-length output. The
//! model operates in the 16-bit PCM float domain, so samples are scaled from
//! `[-1, 1]` on the way in and back on the way out.

use nnnoiseless::DenoiseState;

use crate::constants::DENOISE_FRAME;

const PCM_SCALE: f32 = 32767.0;

const _: () = assert!(DENOISE_FRAME == DenoiseState::<'static>::FRAME_SIZE);

/// Denoiser state for one audio channel.
///
/// The state is process-local and carries nothing the consumer depends on;
/// it is rebuilt on device change or disable because stale state produces
/// audible artifacts.
pub struct Denoiser {
    state: Box<DenoiseState<'static>>,
    scaled_in: [f32; DENOISE_FRAME],
    scaled_out: [f32; DENOISE_FRAME],
}

impl Default for Denoiser {
    fn default() -> Self {
        Self::new()
    }
}

impl Denoiser {
    pub fn new() -> Self {
        Self {
            state: DenoiseState::new(),
            scaled_in: [0.0; DENOISE_FRAME],
            scaled_out: [0.0; DENOISE_FRAME],
        }
    }

    /// Denoises one 480-sample block. `output` and `input` must both hold
    /// exactly [`DENOISE_FRAME`] samples; blocks must be fed in order.
    pub fn process(&mut self, output: &mut [f32], input: &[f32]) {
        assert_eq!(input.len(), DENOISE_FRAME);
        assert_eq!(output.len(), DENOISE_FRAME);

        for (scaled, &sample) in self.scaled_in.iter_mut().zip(input) {
            *scaled = sample * PCM_SCALE;
        }
        self.state.process_frame(&mut self.scaled_out, &self.scaled_in);
        for (out, &scaled) in output.iter_mut().zip(self.scaled_out.iter()) {
            *out = scaled / PCM_SCALE;
        }
    }

    /// Discards the model state, as after a device change.
    pub fn reset(&mut self) {
        self.state = DenoiseState::new();
    }
}
