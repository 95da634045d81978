//! Energy-based voice activity gate used to skip inference on quiet windows.
//!
//! A single-pole high-pass pre-emphasis strips rumble below speech before the
//! energy measurement, so air handling and desk thumps do not read as voice.
//! The pre-emphasis mutates the ASR-bound mono buffer in place; the
//! original-rate audio kept for output is never touched here.

use std::f32::consts::PI;

/// Mean-absolute-amplitude floor below which a window is treated as silent.
pub(crate) const ENERGY_THRESHOLD: f32 = 0.0001;

/// Pre-emphasis cutoff in Hz.
pub(crate) const HIGH_PASS_CUTOFF_HZ: f32 = 100.0;

/// Single-pole high-pass: the first sample passes through, then
/// `y[i] = alpha * (y[i-1] + x[i] - x[i-1])`.
pub(crate) fn high_pass_filter(samples: &mut [f32], cutoff_hz: f32, sample_rate: u32) {
    if samples.is_empty() {
        return;
    }
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    let dt = 1.0 / sample_rate as f32;
    let alpha = dt / (rc + dt);

    let mut y = samples[0];
    for i in 1..samples.len() {
        y = alpha * (y + samples[i] - samples[i - 1]);
        samples[i] = y;
    }
}

/// Returns true when the window carries enough energy to be worth
/// transcribing. Applies the pre-emphasis in place when `cutoff_hz > 0`.
pub(crate) fn is_speech(
    samples: &mut [f32],
    sample_rate: u32,
    energy_threshold: f32,
    cutoff_hz: f32,
) -> bool {
    if samples.is_empty() {
        return false;
    }
    if cutoff_hz > 0.0 {
        high_pass_filter(samples, cutoff_hz, sample_rate);
    }

    let mut energy = 0.0f32;
    for sample in samples.iter() {
        energy += sample.abs();
    }
    energy /= samples.len() as f32;

    tracing::debug!(energy, energy_threshold, cutoff_hz, "vad window energy");

    energy >= energy_threshold
}
