//! Streaming conversion from planar multi-channel audio at the host rate to
//! the mono 16 kHz stream the ASR engine expects.
//!
//! Downsampling runs a short windowed-sinc FIR before linear interpolation so
//! 44.1/48 kHz content does not alias into the speech band. Both the FIR
//! history and the interpolation phase carry across calls, keeping successive
//! windows sample-accurate.

use std::f32::consts::PI;

const MAX_DOWNSAMPLING_TAPS: usize = 129;

/// Planar N-channel source-rate input to mono target-rate output.
#[derive(Debug)]
pub(crate) struct MonoResampler {
    src_rate: u32,
    step: f64,
    coeffs: Vec<f32>,
    history: Vec<f32>,
    frac: f64,
    prev: f32,
    primed: bool,
    mono: Vec<f32>,
    filtered: Vec<f32>,
    out: Vec<f32>,
}

impl MonoResampler {
    pub(crate) fn new(src_rate: u32, dst_rate: u32) -> Self {
        let coeffs = if src_rate > dst_rate {
            let taps = downsampling_tap_count(src_rate, dst_rate);
            design_low_pass((dst_rate as f32 * 0.5 / src_rate as f32).min(0.499), taps)
        } else {
            Vec::new()
        };
        let history = vec![0.0; coeffs.len().saturating_sub(1)];
        Self {
            src_rate,
            step: src_rate as f64 / dst_rate as f64,
            coeffs,
            history,
            frac: 0.0,
            prev: 0.0,
            primed: false,
            mono: Vec::new(),
            filtered: Vec::new(),
            out: Vec::new(),
        }
    }

    /// Convert `frames` samples per channel; returns the produced mono frame
    /// count and the filter's group delay as a timestamp offset in
    /// nanoseconds.
    pub(crate) fn process(&mut self, planes: &[Vec<f32>], frames: usize) -> (usize, u64) {
        self.downmix(planes, frames);
        self.low_pass();
        self.interpolate();
        (self.out.len(), self.ts_offset_ns())
    }

    /// Mono output of the most recent [`process`](Self::process) call. The
    /// VAD pre-emphasis mutates this buffer in place.
    pub(crate) fn mono_mut(&mut self) -> &mut [f32] {
        &mut self.out
    }

    fn ts_offset_ns(&self) -> u64 {
        let delay_samples = (self.coeffs.len() / 2) as u64;
        delay_samples * 1_000_000_000 / u64::from(self.src_rate)
    }

    fn downmix(&mut self, planes: &[Vec<f32>], frames: usize) {
        self.mono.clear();
        self.mono.reserve(frames);
        if planes.len() == 1 {
            self.mono.extend_from_slice(&planes[0][..frames]);
            return;
        }
        let scale = 1.0 / planes.len() as f32;
        for i in 0..frames {
            let mut acc = 0.0f32;
            for plane in planes {
                acc += plane[i];
            }
            self.mono.push(acc * scale);
        }
    }

    fn low_pass(&mut self) {
        if self.coeffs.is_empty() {
            self.filtered.clear();
            self.filtered.extend_from_slice(&self.mono);
            return;
        }
        let hist_len = self.history.len();
        self.filtered.clear();
        self.filtered.reserve(self.mono.len());
        for i in 0..self.mono.len() {
            let mut acc = 0.0f32;
            for (k, coeff) in self.coeffs.iter().enumerate() {
                // Tap k reads from the history-plus-current stream; index i
                // lines up with the newest sample of the convolution window.
                let idx = i + k;
                let sample = if idx < hist_len {
                    self.history[idx]
                } else {
                    self.mono[idx - hist_len]
                };
                acc += sample * coeff;
            }
            self.filtered.push(acc);
        }
        // Retain the newest hist_len raw samples for the next call.
        if self.mono.len() >= hist_len {
            self.history
                .copy_from_slice(&self.mono[self.mono.len() - hist_len..]);
        } else {
            self.history.rotate_left(self.mono.len());
            let start = hist_len - self.mono.len();
            self.history[start..].copy_from_slice(&self.mono);
        }
    }

    fn interpolate(&mut self) {
        self.out.clear();
        if self.filtered.is_empty() {
            return;
        }
        // Virtual stream: the carried sample (once primed) followed by this
        // call's filtered samples. `frac` indexes into it.
        let carry = usize::from(self.primed);
        let virt_len = carry + self.filtered.len();
        let prev = self.prev;
        let filtered = &self.filtered;
        let sample_at = |idx: usize| -> f32 {
            if idx < carry {
                prev
            } else {
                filtered[idx - carry]
            }
        };
        let mut pos = self.frac;
        loop {
            let idx = pos.floor() as usize;
            let t = (pos - idx as f64) as f32;
            if idx + 1 >= virt_len && !(t == 0.0 && idx + 1 == virt_len) {
                break;
            }
            let a = sample_at(idx);
            let value = if t == 0.0 {
                a
            } else {
                a * (1.0 - t) + sample_at(idx + 1) * t
            };
            self.out.push(value);
            pos += self.step;
        }
        self.prev = *self.filtered.last().unwrap_or(&self.prev);
        self.frac = pos - (virt_len - 1) as f64;
        self.primed = true;
    }
}

fn downsampling_tap_count(src_rate: u32, dst_rate: u32) -> usize {
    let decimation_ratio = src_rate as f32 / dst_rate as f32;
    let mut taps = (decimation_ratio * 4.0).ceil().max(11.0) as usize;
    if taps % 2 == 0 {
        taps += 1;
    }
    taps.min(MAX_DOWNSAMPLING_TAPS)
}

/// Normalized Hamming-windowed sinc taps.
fn design_low_pass(normalized_cutoff: f32, taps: usize) -> Vec<f32> {
    let mut coeffs = Vec::with_capacity(taps);
    let m = (taps - 1) as f32;
    for n in 0..taps {
        let centered = n as f32 - m / 2.0;
        let x = 2.0 * PI * normalized_cutoff * centered;
        let sinc = if centered == 0.0 {
            2.0 * normalized_cutoff
        } else {
            (2.0 * normalized_cutoff * x.sin()) / x
        };
        let window = 0.54 - 0.46 * ((2.0 * PI * n as f32) / m).cos();
        coeffs.push(sinc * window);
    }
    let sum: f32 = coeffs.iter().sum();
    if sum != 0.0 {
        for coeff in coeffs.iter_mut() {
            *coeff /= sum;
        }
    }
    coeffs
}
