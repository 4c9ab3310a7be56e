//! Capture pipeline: turns the device's capture stream into 48kHz stereo
//! denoise blocks for the shared channel.
//!
//! Runs entirely inside the capture callback on the audio thread, so every
//! stage works out of pre-sized buffers: deinterleave, resample to 48kHz if
//! the device rate differs, accumulate per channel, extract 480-frame blocks,
//! denoise each channel, reinterleave (duplicating mono into both channels),
//! and hand the block to the sink. A full sink drops the block; blocking is
//! never an option here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

use crate::constants::{CHANNELS, DENOISE_FRAME, SAMPLE_RATE};
use crate::denoise::Denoiser;
use crate::levels::{decimate, rms, LevelsUpdate};
use crate::resample::{needs_resample, resample_linear};

// Per-channel accumulator capacity: one second of audio, far above any
// callback size a host hands out.
const ACCUMULATOR_CAPACITY: usize = SAMPLE_RATE as usize;

/// Producer-side frame assembler.
///
/// One instance per capture session; device changes rebuild it so the
/// accumulators and denoiser state start fresh.
pub struct CapturePipeline {
    // Interleave stride of the capture stream; only the first two channels
    // are processed.
    stride: usize,
    channels: usize,
    acc: Vec<HeapRb<f32>>,
    planar: Vec<Vec<f32>>,
    resampled: Vec<Vec<f32>>,
    denoisers: Vec<Denoiser>,
    block_in: [[f32; DENOISE_FRAME]; CHANNELS],
    block_out: [[f32; DENOISE_FRAME]; CHANNELS],
    interleaved: [f32; DENOISE_FRAME * CHANNELS],
    /// Non-real-time hand-off to the UI; one update per block, try_send.
    pub levels_tx: Option<Sender<LevelsUpdate>>,
    /// Blocks dropped because the channel was detached or full.
    pub dropped_blocks: Arc<AtomicU64>,
}

impl CapturePipeline {
    /// Builds a pipeline for a capture stream with `capture_channels`
    /// interleaved channels.
    pub fn new(capture_channels: u16) -> Self {
        let stride = capture_channels.max(1) as usize;
        let channels = stride.min(CHANNELS);

        Self {
            stride,
            channels,
            acc: (0..channels)
                .map(|_| HeapRb::new(ACCUMULATOR_CAPACITY))
                .collect(),
            planar: (0..channels)
                .map(|_| Vec::with_capacity(ACCUMULATOR_CAPACITY / 4))
                .collect(),
            resampled: (0..channels)
                .map(|_| Vec::with_capacity(ACCUMULATOR_CAPACITY / 4))
                .collect(),
            denoisers: (0..channels).map(|_| Denoiser::new()).collect(),
            block_in: [[0.0; DENOISE_FRAME]; CHANNELS],
            block_out: [[0.0; DENOISE_FRAME]; CHANNELS],
            interleaved: [0.0; DENOISE_FRAME * CHANNELS],
            levels_tx: None,
            dropped_blocks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Capture frames buffered but not yet assembled into a block.
    pub fn pending_frames(&self) -> usize {
        self.acc
            .iter()
            .map(|rb| rb.occupied_len())
            .min()
            .unwrap_or(0)
    }

    /// Feeds one capture callback's worth of interleaved samples.
    ///
    /// `sink` receives each completed 480-frame interleaved stereo block and
    /// returns whether it was delivered; undelivered blocks are counted and
    /// dropped.
    pub fn process(
        &mut self,
        input: &[f32],
        sample_rate: f64,
        mut sink: impl FnMut(&[f32]) -> bool,
    ) {
        let frames = input.len() / self.stride;

        for ch in 0..self.channels {
            self.planar[ch].clear();
            for f in 0..frames {
                self.planar[ch].push(input[f * self.stride + ch]);
            }

            if needs_resample(sample_rate, SAMPLE_RATE as f64) {
                resample_linear(
                    &self.planar[ch],
                    sample_rate,
                    SAMPLE_RATE as f64,
                    &mut self.resampled[ch],
                );
                self.acc[ch].push_slice(&self.resampled[ch]);
            } else {
                self.acc[ch].push_slice(&self.planar[ch]);
            }
        }

        while self.pending_frames() >= DENOISE_FRAME {
            for ch in 0..self.channels {
                self.acc[ch].pop_slice(&mut self.block_in[ch]);
            }

            let mut update = LevelsUpdate::default();
            let mut mix = [0.0f32; DENOISE_FRAME];
            self.mono_mix(&self.block_in, &mut mix);
            update.rms_in = rms(&mix);
            decimate(&mix, &mut update.waveform_in);

            for ch in 0..self.channels {
                self.denoisers[ch].process(&mut self.block_out[ch], &self.block_in[ch]);
            }

            // Mono capture duplicates its single channel into both sides.
            for j in 0..DENOISE_FRAME {
                let left = self.block_out[0][j];
                let right = self.block_out[self.channels - 1][j];
                self.interleaved[j * CHANNELS] = left;
                self.interleaved[j * CHANNELS + 1] = right;
            }

            if !sink(&self.interleaved) {
                self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
            }

            self.mono_mix(&self.block_out, &mut mix);
            update.rms_out = rms(&mix);
            decimate(&mix, &mut update.waveform_out);
            if let Some(tx) = &self.levels_tx {
                let _ = tx.try_send(update);
            }
        }
    }

    fn mono_mix(&self, blocks: &[[f32; DENOISE_FRAME]; CHANNELS], mix: &mut [f32; DENOISE_FRAME]) {
        let norm = 1.0 / self.channels as f32;
        for (j, out) in mix.iter_mut().enumerate() {
            let mut sum = 0.0;
            for block in blocks.iter().take(self.channels) {
                sum += block[j];
            }
            *out = sum * norm;
        }
    }

    /// Discards buffered samples and denoiser state, as on device change or
    /// disable.
    pub fn reset(&mut self) {
        for rb in &mut self.acc {
            rb.clear();
        }
        for denoiser in &mut self.denoisers {
            denoiser.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize) -> Vec<f32> {
        (0..frames).map(|i| (i as f32 * 0.05).sin() * 0.25).collect()
    }

    fn collect_blocks(
        pipeline: &mut CapturePipeline,
        input: &[f32],
        sample_rate: f64,
    ) -> Vec<Vec<f32>> {
        let mut blocks = Vec::new();
        pipeline.process(input, sample_rate, |block| {
            blocks.push(block.to_vec());
            true
        });
        blocks
    }

    #[test]
    fn whole_blocks_in_whole_blocks_out() {
        let mut pipeline = CapturePipeline::new(1);
        let input = sine(3 * DENOISE_FRAME);
        let blocks = collect_blocks(&mut pipeline, &input, 48000.0);

        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.len() == DENOISE_FRAME * CHANNELS));
        assert_eq!(pipeline.pending_frames(), 0);
    }

    #[test]
    fn partial_block_accumulates_without_output() {
        let mut pipeline = CapturePipeline::new(1);
        let blocks = collect_blocks(&mut pipeline, &sine(DENOISE_FRAME - 1), 48000.0);
        assert!(blocks.is_empty());
        assert_eq!(pipeline.pending_frames(), DENOISE_FRAME - 1);

        // One more sample completes the block.
        let blocks = collect_blocks(&mut pipeline, &[0.1], 48000.0);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn mono_input_duplicates_into_both_channels() {
        let mut pipeline = CapturePipeline::new(1);
        let blocks = collect_blocks(&mut pipeline, &sine(DENOISE_FRAME), 48000.0);
        let block = &blocks[0];
        for j in 0..DENOISE_FRAME {
            assert_eq!(block[j * CHANNELS], block[j * CHANNELS + 1]);
        }
    }

    #[test]
    fn matches_a_standalone_denoiser() {
        let input = sine(DENOISE_FRAME);

        let mut expected = [0.0f32; DENOISE_FRAME];
        Denoiser::new().process(&mut expected, &input);

        let mut pipeline = CapturePipeline::new(1);
        let blocks = collect_blocks(&mut pipeline, &input, 48000.0);
        let left: Vec<f32> = blocks[0].iter().step_by(CHANNELS).copied().collect();
        assert_eq!(left, expected.to_vec());
    }

    #[test]
    fn stereo_channels_are_processed_independently() {
        // Left carries signal, right is silent; the silent side must stay
        // silent through the pipeline.
        let mut input = vec![0.0f32; DENOISE_FRAME * 2];
        for (j, s) in sine(DENOISE_FRAME).into_iter().enumerate() {
            input[j * 2] = s;
        }

        let mut pipeline = CapturePipeline::new(2);
        let blocks = collect_blocks(&mut pipeline, &input, 48000.0);
        let right_rms = rms(&blocks[0].iter().skip(1).step_by(2).copied().collect::<Vec<_>>());
        assert!(right_rms < 1e-3, "right_rms = {right_rms}");
    }

    #[test]
    fn capture_rate_is_converted_to_stream_rate() {
        let mut pipeline = CapturePipeline::new(1);
        // 441 samples at 44.1kHz resample to exactly one 480-frame block.
        let blocks = collect_blocks(&mut pipeline, &sine(441), 44100.0);
        assert_eq!(blocks.len(), 1);
        assert_eq!(pipeline.pending_frames(), 0);
    }

    #[test]
    fn reset_discards_buffered_samples() {
        let mut pipeline = CapturePipeline::new(1);
        assert!(collect_blocks(&mut pipeline, &sine(400), 48000.0).is_empty());
        pipeline.reset();

        let blocks = collect_blocks(&mut pipeline, &sine(400), 48000.0);
        assert!(blocks.is_empty());
        assert_eq!(pipeline.pending_frames(), 400);
    }

    #[test]
    fn undelivered_blocks_are_counted() {
        let mut pipeline = CapturePipeline::new(1);
        let dropped = Arc::clone(&pipeline.dropped_blocks);
        pipeline.process(&sine(2 * DENOISE_FRAME), 48000.0, |_| false);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn levels_are_published_per_block() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let mut pipeline = CapturePipeline::new(1);
        pipeline.levels_tx = Some(tx);

        let _ = collect_blocks(&mut pipeline, &sine(2 * DENOISE_FRAME), 48000.0);
        let update = rx.try_recv().expect("first block update");
        assert!(update.rms_in > 0.0);
        assert!(rx.try_recv().is_ok(), "second block update");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn extra_capture_channels_beyond_stereo_are_ignored() {
        // Four-channel interleave; only the first two land in the block.
        let mut input = vec![0.0f32; DENOISE_FRAME * 4];
        for j in 0..DENOISE_FRAME {
            input[j * 4] = 0.1;
            input[j * 4 + 1] = 0.1;
            input[j * 4 + 2] = 0.9;
            input[j * 4 + 3] = 0.9;
        }
        let mut pipeline = CapturePipeline::new(4);
        let blocks = collect_blocks(&mut pipeline, &input, 48000.0);
        assert_eq!(blocks.len(), 1);
    }
}
