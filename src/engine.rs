//! The seam between the filter and the speech recognizer.
//!
//! The filter core never talks to whisper directly; it drives a
//! [`SpeechEngine`] built by an [`EngineFactory`]. The whisper-rs
//! implementation lives in [`crate::stt`] behind the `whisper` cargo feature,
//! and tests drive the pipeline with stub engines.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures surfaced by an engine or its factory.
///
/// `Inference` is the soft path: the window is published unmodified and the
/// worker keeps running. `Fatal` tears the engine down; the filter drops to
/// pass-through until a configuration update reloads a model.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model file not found: {0}")]
    ModelMissing(PathBuf),
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("inference returned status {0}")]
    Inference(i32),
    #[error("engine unusable: {0}")]
    Fatal(String),
}

impl EngineError {
    /// True when the engine can no longer be used and must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// One transcribed segment: text plus token-range timestamps in centiseconds
/// and per-token probabilities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub t0_cs: i64,
    pub t1_cs: i64,
    pub token_probs: Vec<f32>,
}

impl Transcript {
    /// Arithmetic mean of the token probabilities; zero for an empty segment.
    pub fn sentence_probability(&self) -> f32 {
        if self.token_probs.is_empty() {
            return 0.0;
        }
        self.token_probs.iter().sum::<f32>() / self.token_probs.len() as f32
    }
}

/// Decoding strategy plus its strategy-specific knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    Greedy { best_of: i32 },
    BeamSearch { beam_size: i32, patience: f32 },
}

/// Parameter block handed to the engine on every call.
///
/// Built from strategy defaults and then overridden field by field from the
/// filter settings, so a settings update always starts from a clean slate.
#[derive(Debug, Clone, PartialEq)]
pub struct AsrParams {
    pub sampling: Sampling,
    pub language: String,
    pub translate: bool,
    pub duration_ms: i32,
    pub initial_prompt: String,
    pub n_threads: i32,
    pub n_max_text_ctx: i32,
    pub no_context: bool,
    pub single_segment: bool,
    pub print_special: bool,
    pub print_progress: bool,
    pub print_realtime: bool,
    pub print_timestamps: bool,
    pub token_timestamps: bool,
    pub thold_pt: f32,
    pub thold_ptsum: f32,
    pub max_len: i32,
    pub split_on_word: bool,
    pub max_tokens: i32,
    pub suppress_blank: bool,
    pub suppress_non_speech_tokens: bool,
    pub temperature: f32,
    pub max_initial_ts: f32,
    pub length_penalty: f32,
}

impl AsrParams {
    /// Baseline parameters for a decoding strategy, mirroring the recognizer's
    /// own defaults.
    pub fn defaults_for(sampling: Sampling) -> Self {
        Self {
            sampling,
            language: "en".to_string(),
            translate: false,
            duration_ms: 0,
            initial_prompt: String::new(),
            n_threads: 4,
            n_max_text_ctx: 16384,
            no_context: true,
            single_segment: false,
            print_special: false,
            print_progress: true,
            print_realtime: false,
            print_timestamps: true,
            token_timestamps: false,
            thold_pt: 0.01,
            thold_ptsum: 0.01,
            max_len: 0,
            split_on_word: false,
            max_tokens: 0,
            suppress_blank: true,
            suppress_non_speech_tokens: false,
            temperature: 0.0,
            max_initial_ts: 1.0,
            length_penalty: -1.0,
        }
    }
}

/// A loaded speech recognizer. Stateful and not safe for concurrent use; the
/// worker is the only caller.
pub trait SpeechEngine: Send {
    /// Transcribe mono 16 kHz samples and return segment 0.
    fn transcribe(
        &mut self,
        pcm_mono_16k: &[f32],
        params: &AsrParams,
    ) -> Result<Transcript, EngineError>;
}

/// Builds engines from model files. The `ensure_model` hook is where a host
/// hangs its model downloader; the default only checks for presence.
pub trait EngineFactory: Send + Sync {
    fn ensure_model(&self, model_path: &Path) -> Result<(), EngineError> {
        if model_path.exists() {
            Ok(())
        } else {
            Err(EngineError::ModelMissing(model_path.to_path_buf()))
        }
    }

    fn load(&self, model_path: &Path) -> Result<Box<dyn SpeechEngine>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_probability_is_the_token_mean() {
        let transcript = Transcript {
            text: "uh".to_string(),
            t0_cs: 0,
            t1_cs: 100,
            token_probs: vec![0.2, 0.4, 0.9],
        };
        assert!((transcript.sentence_probability() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn empty_segment_has_zero_probability() {
        assert_eq!(Transcript::default().sentence_probability(), 0.0);
    }

    #[test]
    fn strategy_defaults_start_from_a_clean_slate() {
        let params = AsrParams::defaults_for(Sampling::BeamSearch {
            beam_size: 5,
            patience: -1.0,
        });
        assert!(params.no_context);
        assert_eq!(params.max_tokens, 0);
        assert_eq!(params.temperature, 0.0);
        assert!(!params.single_segment);
    }

    #[test]
    fn only_fatal_errors_tear_the_engine_down() {
        assert!(EngineError::Fatal("boom".into()).is_fatal());
        assert!(!EngineError::Inference(-6).is_fatal());
        assert!(!EngineError::ModelMissing(PathBuf::from("x.bin")).is_fatal());
    }
}
