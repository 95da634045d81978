//! State shared between the host-facing tick and the worker thread.
//!
//! Three locks, per filter instance, never held together: the input stage,
//! the output stage, and the recognizer slot. The push path touches the
//! stages only; the worker takes the input lock to assemble a window,
//! releases it for the heavy steps, and takes the output lock to publish.

use crate::audio::ring::StageBuffers;
use crate::config::FilterSettings;
use crate::engine::{AsrParams, SpeechEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Detection and logging knobs the worker reads once per window.
#[derive(Debug, Clone)]
pub(crate) struct DetectionControls {
    pub(crate) do_silence: bool,
    pub(crate) vad_enabled: bool,
    pub(crate) detect_regex: String,
    pub(crate) beep_regex: String,
    pub(crate) log_words: bool,
}

impl DetectionControls {
    pub(crate) fn from_settings(settings: &FilterSettings) -> Self {
        Self {
            do_silence: settings.do_silence,
            vad_enabled: settings.vad_enabled,
            detect_regex: settings.detect_regex.clone(),
            beep_regex: settings.beep_regex.clone(),
            log_words: settings.log_words,
        }
    }
}

/// The recognizer plus everything read under the same lock.
pub(crate) struct AsrSlot {
    pub(crate) engine: Option<Box<dyn SpeechEngine>>,
    pub(crate) params: AsrParams,
    pub(crate) controls: DetectionControls,
}

pub(crate) struct SharedState {
    pub(crate) input: Mutex<StageBuffers>,
    pub(crate) output: Mutex<StageBuffers>,
    pub(crate) asr: Mutex<AsrSlot>,
    /// Lock-free mirror of `asr.engine.is_some()` so the push path can
    /// decide on pass-through without touching the recognizer lock.
    engine_ready: AtomicBool,
}

impl SharedState {
    pub(crate) fn new(channels: usize, capacity_per_channel: usize, slot: AsrSlot) -> Self {
        let ready = slot.engine.is_some();
        Self {
            input: Mutex::new(StageBuffers::new(channels, capacity_per_channel)),
            output: Mutex::new(StageBuffers::new(channels, capacity_per_channel)),
            asr: Mutex::new(slot),
            engine_ready: AtomicBool::new(ready),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.engine_ready.load(Ordering::Acquire)
    }

    /// Install a new engine (or none) and update the ready mirror.
    pub(crate) fn set_engine(&self, engine: Option<Box<dyn SpeechEngine>>) {
        let mut slot = crate::lock_or_recover(&self.asr, "asr slot");
        self.engine_ready
            .store(engine.is_some(), Ordering::Release);
        slot.engine = engine;
    }

    /// Tear the engine down; the worker exits on its next check.
    pub(crate) fn clear_engine(&self) {
        self.set_engine(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, Sampling, Transcript};

    struct NullEngine;

    impl SpeechEngine for NullEngine {
        fn transcribe(
            &mut self,
            _pcm: &[f32],
            _params: &AsrParams,
        ) -> Result<Transcript, EngineError> {
            Ok(Transcript::default())
        }
    }

    fn slot(engine: Option<Box<dyn SpeechEngine>>) -> AsrSlot {
        AsrSlot {
            engine,
            params: AsrParams::defaults_for(Sampling::Greedy { best_of: 1 }),
            controls: DetectionControls::from_settings(&FilterSettings::default()),
        }
    }

    #[test]
    fn ready_mirror_tracks_the_engine_slot() {
        let shared = SharedState::new(1, 64, slot(None));
        assert!(!shared.is_ready());
        shared.set_engine(Some(Box::new(NullEngine)));
        assert!(shared.is_ready());
        shared.clear_engine();
        assert!(!shared.is_ready());
        assert!(crate::lock_or_recover(&shared.asr, "asr slot")
            .engine
            .is_none());
    }
}
