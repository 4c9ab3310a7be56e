//! Linear-interpolation resampling for the capture path.
//!
//! The pipeline converts whatever rate the capture device runs at to the
//! fixed 48kHz stream rate. Linear interpolation is deliberately simple; a
//! polyphase FIR could replace the inner loop without changing any caller.

/// Rates closer than this are treated as equal and passed through.
const RATE_EPSILON: f64 = 1.0;

/// True when `src_rate` differs from `dst_rate` enough to need conversion.
pub fn needs_resample(src_rate: f64, dst_rate: f64) -> bool {
    (src_rate - dst_rate).abs() > RATE_EPSILON
}

/// Resamples `input` from `src_rate` to `dst_rate` into `output`.
///
/// `output` is cleared first and ends up with `⌊input.len() × ratio⌋`
/// samples, each a linear blend of the two nearest source samples; the final
/// positions clamp to the last source sample. Stateless per call, so it is
/// applied per channel to planar (non-interleaved) data.
pub fn resample_linear(input: &[f32], src_rate: f64, dst_rate: f64, output: &mut Vec<f32>) {
    output.clear();
    if input.is_empty() {
        return;
    }

    let ratio = dst_rate / src_rate;
    let out_len = (input.len() as f64 * ratio) as usize;
    output.reserve(out_len);

    for j in 0..out_len {
        let src = j as f64 / ratio;
        let idx = src as usize;
        let frac = (src - idx as f64) as f32;

        let sample = if idx + 1 < input.len() {
            input[idx] * (1.0 - frac) + input[idx + 1] * frac
        } else {
            input[input.len() - 1]
        };
        output.push(sample);
    }
}
