//! whisper-rs implementation of the engine seam.
//!
//! The GGML model is loaded once per engine and reused across windows; a
//! fresh decoding state is created per call. whisper.cpp's own C logger is
//! silenced once per process so it cannot interleave with the host's output.

use crate::engine::{AsrParams, EngineError, EngineFactory, Sampling, SpeechEngine, Transcript};
use std::os::raw::{c_char, c_uint, c_void};
use std::path::Path;
use std::sync::Once;
use tracing::debug;
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperError,
};

/// Speech recognizer backed by a whisper.cpp model.
pub struct WhisperEngine {
    ctx: WhisperContext,
}

impl WhisperEngine {
    /// Load the model from disk.
    pub fn new(model_path: &Path) -> Result<Self, EngineError> {
        install_log_silencer();
        let path = model_path
            .to_str()
            .ok_or_else(|| EngineError::ModelLoad("model path is not valid UTF-8".to_string()))?;
        let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|err| EngineError::ModelLoad(err.to_string()))?;
        Ok(Self { ctx })
    }
}

impl SpeechEngine for WhisperEngine {
    fn transcribe(
        &mut self,
        pcm_mono_16k: &[f32],
        params: &AsrParams,
    ) -> Result<Transcript, EngineError> {
        debug!(
            samples = pcm_mono_16k.len(),
            seconds = pcm_mono_16k.len() as f32 / 16_000.0,
            threads = params.n_threads,
            "running whisper inference"
        );

        let mut state = self
            .ctx
            .create_state()
            .map_err(|err| EngineError::Fatal(format!("failed to create decoding state: {err}")))?;

        let mut full = match params.sampling {
            Sampling::Greedy { best_of } => FullParams::new(SamplingStrategy::Greedy { best_of }),
            Sampling::BeamSearch {
                beam_size,
                patience,
            } => FullParams::new(SamplingStrategy::BeamSearch {
                beam_size,
                patience,
            }),
        };
        full.set_language(Some(&params.language));
        full.set_translate(params.translate);
        full.set_duration_ms(params.duration_ms);
        full.set_initial_prompt(&params.initial_prompt);
        full.set_n_threads(params.n_threads);
        full.set_n_max_text_ctx(params.n_max_text_ctx);
        full.set_no_context(params.no_context);
        full.set_single_segment(params.single_segment);
        full.set_print_special(params.print_special);
        full.set_print_progress(params.print_progress);
        full.set_print_realtime(params.print_realtime);
        full.set_print_timestamps(params.print_timestamps);
        full.set_token_timestamps(params.token_timestamps);
        full.set_thold_pt(params.thold_pt);
        full.set_thold_ptsum(params.thold_ptsum);
        full.set_max_len(params.max_len);
        full.set_split_on_word(params.split_on_word);
        full.set_max_tokens(params.max_tokens);
        full.set_suppress_blank(params.suppress_blank);
        full.set_suppress_non_speech_tokens(params.suppress_non_speech_tokens);
        full.set_temperature(params.temperature);
        full.set_max_initial_ts(params.max_initial_ts);
        full.set_length_penalty(params.length_penalty);

        state
            .full(full, pcm_mono_16k)
            .map_err(|err| EngineError::Inference(error_code(&err)))?;

        let n_segments = state
            .full_n_segments()
            .map_err(|err| EngineError::Inference(error_code(&err)))?;
        if n_segments <= 0 {
            return Ok(Transcript::default());
        }

        let text = state
            .full_get_segment_text_lossy(0)
            .map_err(|err| EngineError::Inference(error_code(&err)))?;
        let t0_cs = state
            .full_get_segment_t0(0)
            .map_err(|err| EngineError::Inference(error_code(&err)))?;
        let t1_cs = state
            .full_get_segment_t1(0)
            .map_err(|err| EngineError::Inference(error_code(&err)))?;
        let n_tokens = state
            .full_n_tokens(0)
            .map_err(|err| EngineError::Inference(error_code(&err)))?;
        let mut token_probs = Vec::with_capacity(n_tokens.max(0) as usize);
        for token in 0..n_tokens {
            let prob = state
                .full_get_token_prob(0, token)
                .map_err(|err| EngineError::Inference(error_code(&err)))?;
            token_probs.push(prob);
        }

        Ok(Transcript {
            text,
            t0_cs,
            t1_cs,
            token_probs,
        })
    }
}

/// Builds [`WhisperEngine`]s. The default `ensure_model` presence check
/// applies; hosts that download models wrap or replace this factory.
pub struct WhisperFactory;

impl EngineFactory for WhisperFactory {
    fn load(&self, model_path: &Path) -> Result<Box<dyn SpeechEngine>, EngineError> {
        Ok(Box::new(WhisperEngine::new(model_path)?))
    }
}

fn error_code(err: &WhisperError) -> i32 {
    match err {
        WhisperError::GenericError(code) => *code,
        _ => -1,
    }
}

fn install_log_silencer() {
    static INSTALL_LOG_CALLBACK: Once = Once::new();
    INSTALL_LOG_CALLBACK.call_once(|| unsafe {
        whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
    });
}

unsafe extern "C" fn whisper_log_callback(
    _level: c_uint,
    _text: *const c_char,
    _user_data: *mut c_void,
) {
    // whisper.cpp logs straight to stderr otherwise.
}
