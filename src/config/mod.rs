//! Typed filter settings and their validation.
//!
//! Hosts hold a [`FilterSettings`] value, deserialize it from whatever
//! configuration store they use, and hand it to the filter on create and
//! update. Every field has a default, so a partial configuration works.

mod validation;

use crate::engine::{AsrParams, Sampling};
use serde::Deserialize;
use std::path::PathBuf;

/// Window submitted to the recognizer, in milliseconds.
pub(crate) const WINDOW_MS: u64 = 1010;

/// Overlap carried between consecutive windows at startup, in milliseconds.
pub(crate) const OVERLAP_START_MS: u64 = 340;

/// Adaptive overlap never shrinks below this, in milliseconds.
pub(crate) const OVERLAP_MIN_MS: u64 = 100;

/// Verbosity of the filter's tracing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
}

impl LogLevel {
    pub fn as_tracing(self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
        }
    }
}

/// Decoding strategy selector exposed to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    BeamSearch,
    Greedy,
}

impl SamplingMethod {
    pub(crate) fn sampling(self) -> Sampling {
        match self {
            Self::BeamSearch => Sampling::BeamSearch {
                beam_size: 5,
                patience: -1.0,
            },
            Self::Greedy => Sampling::Greedy { best_of: 5 },
        }
    }
}

/// Everything a host can tune on the filter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Path to the recognizer's model weights; a change triggers a reload.
    pub model_path: PathBuf,
    pub log_level: LogLevel,
    /// Whether filler/profane windows get their new-data region overwritten.
    pub do_silence: bool,
    /// Whether the energy gate may skip inference on quiet windows.
    pub vad_enabled: bool,
    /// Filler pattern; empty disables filler detection.
    pub detect_regex: String,
    /// Profanity pattern; empty disables the beep.
    pub beep_regex: String,
    /// Emit transcribed text and decisions to the log.
    pub log_words: bool,
    pub language: String,
    pub sampling_method: SamplingMethod,
    /// Prompt bias; the default seeds filler tokens.
    pub initial_prompt: String,
    pub n_threads: u32,
    pub n_max_text_ctx: u32,
    pub no_context: bool,
    pub single_segment: bool,
    pub print_special: bool,
    pub print_progress: bool,
    pub print_realtime: bool,
    pub print_timestamps: bool,
    pub token_timestamps: bool,
    pub thold_pt: f32,
    pub thold_ptsum: f32,
    pub max_len: u32,
    pub split_on_word: bool,
    pub max_tokens: u32,
    pub suppress_blank: bool,
    pub suppress_non_speech_tokens: bool,
    pub temperature: f32,
    pub max_initial_ts: f32,
    pub length_penalty: f32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/ggml-tiny.en.bin"),
            log_level: LogLevel::Debug,
            do_silence: true,
            vad_enabled: true,
            detect_regex: r"\b(uh+)|(um+)|(ah+)\b".to_string(),
            // Profane words taken from
            // https://en.wiktionary.org/wiki/Category:English_swear_words
            beep_regex: "(fuck)|(shit)|(bitch)|(cunt)|(pussy)|(dick)|(asshole)|(whore)|(cock)|(nigger)|(nigga)|(prick)"
                .to_string(),
            log_words: true,
            language: "en".to_string(),
            sampling_method: SamplingMethod::BeamSearch,
            initial_prompt: "uhm, Uh, um, Uhh, um. um... uh. uh... ".to_string(),
            n_threads: 4,
            n_max_text_ctx: 16384,
            no_context: true,
            single_segment: true,
            print_special: false,
            print_progress: false,
            print_realtime: false,
            print_timestamps: false,
            token_timestamps: false,
            thold_pt: 0.01,
            thold_ptsum: 0.01,
            max_len: 0,
            split_on_word: false,
            max_tokens: 3,
            suppress_blank: false,
            suppress_non_speech_tokens: true,
            temperature: 0.5,
            max_initial_ts: 1.0,
            length_penalty: -1.0,
        }
    }
}

impl FilterSettings {
    /// Assemble the per-call parameter block: strategy defaults first, then
    /// every configured field layered on top.
    pub(crate) fn asr_params(&self) -> AsrParams {
        let mut params = AsrParams::defaults_for(self.sampling_method.sampling());
        params.duration_ms = WINDOW_MS as i32;
        params.language = self.language.clone();
        params.translate = false;
        params.initial_prompt = self.initial_prompt.clone();
        params.n_threads = self.n_threads as i32;
        params.n_max_text_ctx = self.n_max_text_ctx as i32;
        params.no_context = self.no_context;
        params.single_segment = self.single_segment;
        params.print_special = self.print_special;
        params.print_progress = self.print_progress;
        params.print_realtime = self.print_realtime;
        params.print_timestamps = self.print_timestamps;
        params.token_timestamps = self.token_timestamps;
        params.thold_pt = self.thold_pt;
        params.thold_ptsum = self.thold_ptsum;
        params.max_len = self.max_len as i32;
        params.split_on_word = self.split_on_word;
        params.max_tokens = self.max_tokens as i32;
        params.suppress_blank = self.suppress_blank;
        params.suppress_non_speech_tokens = self.suppress_non_speech_tokens;
        params.temperature = self.temperature;
        params.max_initial_ts = self.max_initial_ts;
        params.length_penalty = self.length_penalty;
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_seed_filler_detection() {
        let settings = FilterSettings::default();
        assert!(settings.do_silence);
        assert!(settings.vad_enabled);
        assert!(settings.detect_regex.contains("uh"));
        assert!(settings.initial_prompt.contains("um"));
        assert_eq!(settings.sampling_method, SamplingMethod::BeamSearch);
        assert_eq!(settings.max_tokens, 3);
        assert!((settings.temperature - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn asr_params_layer_settings_over_strategy_defaults() {
        let settings = FilterSettings::default();
        let params = settings.asr_params();
        assert_eq!(params.duration_ms, 1010);
        assert!(params.single_segment);
        assert_eq!(params.max_tokens, 3);
        assert!(params.suppress_non_speech_tokens);
        assert!(!params.suppress_blank);
        assert_eq!(
            params.sampling,
            crate::engine::Sampling::BeamSearch {
                beam_size: 5,
                patience: -1.0
            }
        );
    }

    #[test]
    fn greedy_method_switches_the_strategy() {
        let settings = FilterSettings {
            sampling_method: SamplingMethod::Greedy,
            ..FilterSettings::default()
        };
        assert_eq!(
            settings.asr_params().sampling,
            crate::engine::Sampling::Greedy { best_of: 5 }
        );
    }

    #[test]
    fn partial_configuration_deserializes_over_defaults() {
        let settings: FilterSettings =
            serde_json::from_str(r#"{"vad_enabled": false, "log_level": "warning"}"#)
                .expect("partial settings should deserialize");
        assert!(!settings.vad_enabled);
        assert_eq!(settings.log_level, LogLevel::Warning);
        assert!(settings.do_silence);
    }

    #[test]
    fn log_levels_map_to_tracing() {
        assert_eq!(LogLevel::Debug.as_tracing(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::Info.as_tracing(), tracing::Level::INFO);
        assert_eq!(LogLevel::Warning.as_tracing(), tracing::Level::WARN);
    }
}
