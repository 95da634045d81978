//! Window assembly, inference, and output reconstruction.
//!
//! One call to [`SegmentProcessor::process_window`] drains one window's worth
//! of new packets from the input stage, reuses the tail of the previous
//! window as overlap context, runs resample → VAD → classify, rewrites the
//! published region when a filler or profanity was heard, and republishes the
//! audio with its original framing. The overlap length adapts to how fast
//! inference keeps up.

use crate::audio::resample::MonoResampler;
use crate::audio::ring::PacketInfo;
use crate::audio::{vad, TARGET_RATE};
use crate::classify::{Classifier, Detection};
use crate::config::{OVERLAP_MIN_MS, OVERLAP_START_MS, WINDOW_MS};
use crate::engine::EngineError;
use crate::state::SharedState;
use std::f32::consts::PI;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Frequency of the replacement tone for profane windows, in Hz.
const BEEP_HZ: f32 = 440.0;

pub(crate) struct SegmentProcessor {
    sample_rate: u32,
    frames_per_window: usize,
    overlap_ms: u64,
    overlap_frames: usize,
    last_num_frames: usize,
    copy_buffers: Vec<Vec<f32>>,
    staging: Vec<Vec<f32>>,
    resampler: MonoResampler,
    classifier: Classifier,
}

impl SegmentProcessor {
    pub(crate) fn new(channels: usize, sample_rate: u32) -> Self {
        let frames_per_window = (u64::from(sample_rate) * WINDOW_MS / 1000) as usize;
        let overlap_ms = OVERLAP_START_MS;
        Self {
            sample_rate,
            frames_per_window,
            overlap_ms,
            overlap_frames: (overlap_ms * u64::from(sample_rate) / 1000) as usize,
            last_num_frames: 0,
            copy_buffers: vec![vec![0.0; frames_per_window]; channels],
            staging: vec![Vec::with_capacity(frames_per_window); channels],
            resampler: MonoResampler::new(sample_rate, TARGET_RATE),
            classifier: Classifier::default(),
        }
    }

    pub(crate) fn frames_per_window(&self) -> usize {
        self.frames_per_window
    }

    #[cfg(test)]
    pub(crate) fn overlap_ms(&self) -> u64 {
        self.overlap_ms
    }

    /// Process exactly one window.
    ///
    /// The window's output is published even when inference fails; a fatal
    /// engine error is returned after publishing so the worker can tear the
    /// engine down.
    pub(crate) fn process_window(&mut self, shared: &SharedState) -> Result<(), EngineError> {
        let Some((num_new_frames, start_timestamp)) = self.assemble_window(shared) else {
            return Ok(());
        };

        debug!(
            frames = self.last_num_frames,
            ms = self.last_num_frames as u64 * 1000 / u64::from(self.sample_rate),
            start_timestamp,
            "processing window"
        );

        let timer = Instant::now();
        let controls = crate::lock_or_recover(&shared.asr, "asr slot")
            .controls
            .clone();

        let (mono_frames, _ts_offset) = self
            .resampler
            .process(&self.copy_buffers, self.last_num_frames);

        let mut skipped_inference = false;
        if controls.vad_enabled {
            let mono = &mut self.resampler.mono_mut()[..mono_frames];
            skipped_inference = !vad::is_speech(
                mono,
                TARGET_RATE,
                vad::ENERGY_THRESHOLD,
                vad::HIGH_PASS_CUTOFF_HZ,
            );
        }

        // Snapshot before any rewrite; the transform acts on the snapshot so
        // the overlap tail reused next window stays untouched.
        for (staging, source) in self.staging.iter_mut().zip(&self.copy_buffers) {
            staging.clear();
            staging.extend_from_slice(&source[..self.last_num_frames]);
        }

        let mut fatal = None;
        if !skipped_inference {
            let detection = {
                let mut slot = crate::lock_or_recover(&shared.asr, "asr slot");
                let slot = &mut *slot;
                match slot.engine.as_deref_mut() {
                    Some(engine) => {
                        let mono = &self.resampler.mono_mut()[..mono_frames];
                        self.classifier.run(
                            engine,
                            &slot.params,
                            mono,
                            &controls.detect_regex,
                            &controls.beep_regex,
                            controls.log_words,
                        )
                    }
                    None => {
                        warn!("no engine loaded, leaving window untouched");
                        Ok(Detection::Unknown)
                    }
                }
            };

            let detection = match detection {
                Ok(detection) => detection,
                Err(err) => {
                    fatal = Some(err);
                    Detection::Unknown
                }
            };

            match detection {
                Detection::Filler => {
                    if controls.log_words {
                        info!("filler window, muting frames 0 -> {num_new_frames}");
                    }
                    if controls.do_silence {
                        for staging in &mut self.staging {
                            staging[..num_new_frames].fill(0.0);
                        }
                    }
                }
                Detection::Beep => {
                    if controls.log_words {
                        info!("profane window, beeping frames 0 -> {num_new_frames}");
                    }
                    if controls.do_silence {
                        let rate = self.sample_rate as f32;
                        for staging in &mut self.staging {
                            for (i, sample) in staging[..num_new_frames].iter_mut().enumerate() {
                                *sample = 0.5 * (2.0 * PI * BEEP_HZ * i as f32 / rate).sin();
                            }
                        }
                    }
                }
                Detection::Speech | Detection::Silence | Detection::Unknown => {}
            }
        } else if controls.log_words {
            info!("skipping inference");
        }

        {
            let mut output = crate::lock_or_recover(&shared.output, "output stage");
            output.meta.push_back(PacketInfo {
                frames: num_new_frames as u32,
                timestamp: start_timestamp,
            });
            for (ring, staging) in output.pcm.iter_mut().zip(&self.staging) {
                ring.push_slice(&staging[..num_new_frames]);
            }
            debug!(
                packets = output.meta.len(),
                samples = output.queued_samples(),
                "published window"
            );
        }

        self.adapt_overlap(num_new_frames, timer, skipped_inference);

        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Steps 1 and 2: drain packet descriptors up to the new-data target and
    /// pull the corresponding samples in behind the overlap tail. Returns the
    /// accepted frame count and the window's start timestamp, or `None` when
    /// the metadata ring is empty.
    fn assemble_window(&mut self, shared: &SharedState) -> Option<(usize, u64)> {
        let mut input = crate::lock_or_recover(&shared.input, "input stage");

        let target = if self.last_num_frames == 0 {
            self.frames_per_window
        } else {
            self.frames_per_window - self.overlap_frames
        };

        let mut num_new_frames = 0usize;
        let mut start_timestamp = 0u64;
        while let Some(info) = input.meta.pop_front() {
            let frames = info.frames as usize;
            if num_new_frames > 0 && num_new_frames + frames > target {
                // Straddles the window boundary; return it unconsumed.
                input.meta.push_front(info);
                break;
            }
            if num_new_frames == 0 {
                start_timestamp = info.timestamp;
            }
            num_new_frames += frames;
            debug!(
                accepted = num_new_frames,
                needed = target,
                "accepted packet into window"
            );
            if num_new_frames >= target {
                break;
            }
        }
        if num_new_frames == 0 {
            return None;
        }

        let overlap = if self.last_num_frames > 0 {
            self.overlap_frames.min(self.last_num_frames)
        } else {
            0
        };
        let total = overlap + num_new_frames;
        for (channel, ring) in input.pcm.iter_mut().enumerate() {
            let buffer = &mut self.copy_buffers[channel];
            if buffer.len() < total {
                buffer.resize(total, 0.0);
            }
            if overlap > 0 {
                let tail = self.last_num_frames - overlap;
                buffer.copy_within(tail..tail + overlap, 0);
            }
            let popped = ring.pop_into(&mut buffer[overlap..total]);
            debug_assert_eq!(popped, num_new_frames);
        }
        self.last_num_frames = total;

        debug!(
            popped = num_new_frames,
            queued = input.queued_samples(),
            "drained input stage"
        );
        Some((num_new_frames, start_timestamp))
    }

    /// Step 8: widen the overlap while inference keeps up, shrink it when a
    /// window took longer than the realtime it covered.
    fn adapt_overlap(&mut self, num_new_frames: usize, timer: Instant, skipped_inference: bool) {
        let duration_ms = timer.elapsed().as_millis() as u64;
        let new_ms = num_new_frames as u64 * 1000 / u64::from(self.sample_rate);

        if duration_ms > new_ms {
            self.overlap_ms = self.overlap_ms.saturating_sub(10).max(OVERLAP_MIN_MS);
            debug!(
                duration_ms,
                overlap_ms = self.overlap_ms,
                "window over realtime, shrinking overlap"
            );
        } else if !skipped_inference {
            self.overlap_ms = (self.overlap_ms + 10).min((new_ms as f32 * 0.75) as u64);
            debug!(
                duration_ms,
                overlap_ms = self.overlap_ms,
                "window under realtime, widening overlap"
            );
        }
        self.overlap_frames = (self.overlap_ms * u64::from(self.sample_rate) / 1000) as usize;
    }
}
