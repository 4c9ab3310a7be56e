//! Level metering for the UI collaborator.
//!
//! The pipeline publishes one [`LevelsUpdate`] per denoise block on a bounded
//! channel with `try_send`, so a stalled UI never backpressures the audio
//! thread. Fixed-size arrays keep the hand-off allocation-free.

/// Points in the decimated waveform snapshot.
pub const WAVEFORM_POINTS: usize = 100;

/// Per-block metering snapshot, before and after denoising.
#[derive(Clone, Copy, Debug)]
pub struct LevelsUpdate {
    pub rms_in: f32,
    pub rms_out: f32,
    pub waveform_in: [f32; WAVEFORM_POINTS],
    pub waveform_out: [f32; WAVEFORM_POINTS],
}

impl Default for LevelsUpdate {
    fn default() -> Self {
        Self {
            rms_in: 0.0,
            rms_out: 0.0,
            waveform_in: [0.0; WAVEFORM_POINTS],
            waveform_out: [0.0; WAVEFORM_POINTS],
        }
    }
}

/// Root-mean-square level of a block.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Decimates a block into [`WAVEFORM_POINTS`] amplitude values.
///
/// Each point is the RMS of an equal-width chunk, clamped to `[0, 1]`; if the
/// block is shorter than the point count, the remaining points are zero.
pub fn decimate(samples: &[f32], out: &mut [f32; WAVEFORM_POINTS]) {
    out.fill(0.0);
    if samples.is_empty() {
        return;
    }

    let chunk = (samples.len() / WAVEFORM_POINTS).max(1);
    for (point, window) in out.iter_mut().zip(samples.chunks(chunk)) {
        let mean_sq = window.iter().map(|s| s * s).sum::<f32>() / window.len() as f32;
        *point = mean_sq.sqrt().min(1.0);
    }
}
