//! Turns one transcribed window into a detection decision.
//!
//! The recognizer's text is lowercased and right-trimmed, then matched
//! against the user's filler and profanity patterns. Patterns are compiled
//! lazily and cached per pattern string; a pattern that fails to compile is
//! logged and never matches, so one bad field cannot stall the stream.

use crate::engine::{AsrParams, EngineError, SpeechEngine};
use regex::Regex;
use tracing::{info, warn};

/// What the classifier decided about a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Inference failed softly; the window passes through unmodified.
    Unknown,
    Silence,
    Speech,
    /// Hesitation sounds ("uh", "um"); muted when silencing is enabled.
    Filler,
    /// Profanity; replaced with a tone when silencing is enabled.
    Beep,
}

/// Compiled-regex cache keyed by the pattern string.
#[derive(Debug, Default)]
struct PatternCache {
    pattern: String,
    compiled: Option<Regex>,
}

impl PatternCache {
    /// True when the pattern is non-empty and matches anywhere in `text`.
    fn matches(&mut self, pattern: &str, text: &str) -> bool {
        if pattern.is_empty() {
            return false;
        }
        if pattern != self.pattern {
            self.pattern = pattern.to_string();
            self.compiled = match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(%pattern, %err, "pattern does not compile; treating as non-match");
                    None
                }
            };
        }
        self.compiled
            .as_ref()
            .is_some_and(|re| re.is_match(text))
    }
}

/// Runs the recognizer on a window and maps its transcript to a
/// [`Detection`].
#[derive(Debug, Default)]
pub(crate) struct Classifier {
    filler: PatternCache,
    beep: PatternCache,
}

impl Classifier {
    /// Transcribe `pcm` and classify the result.
    ///
    /// A soft inference failure is logged and reported as
    /// [`Detection::Unknown`]; a fatal failure propagates so the caller can
    /// tear the engine down.
    pub(crate) fn run(
        &mut self,
        engine: &mut dyn SpeechEngine,
        params: &AsrParams,
        pcm: &[f32],
        detect_pattern: &str,
        beep_pattern: &str,
        log_words: bool,
    ) -> Result<Detection, EngineError> {
        let transcript = match engine.transcribe(pcm, params) {
            Ok(transcript) => transcript,
            Err(err @ EngineError::Fatal(_)) => return Err(err),
            Err(err) => {
                warn!(%err, "inference failed, leaving window untouched");
                return Ok(Detection::Unknown);
            }
        };

        let text = normalize(&transcript.text);
        if log_words {
            info!(
                "[{} --> {}] ({:.3}) {}",
                to_timestamp(transcript.t0_cs),
                to_timestamp(transcript.t1_cs),
                transcript.sentence_probability(),
                text
            );
        }

        Ok(self.decide(&text, detect_pattern, beep_pattern))
    }

    fn decide(&mut self, text: &str, detect_pattern: &str, beep_pattern: &str) -> Detection {
        if text.is_empty() {
            return Detection::Silence;
        }
        if self.filler.matches(detect_pattern, text) {
            return Detection::Filler;
        }
        if self.beep.matches(beep_pattern, text) {
            return Detection::Beep;
        }
        Detection::Speech
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase().trim_end().to_string()
}

/// Render centiseconds as `MM:SS.mmm` for word logging.
fn to_timestamp(t_cs: i64) -> String {
    let sec = t_cs / 100;
    let msec = (t_cs - sec * 100) * 10;
    let min = sec / 60;
    let sec = sec - min * 60;
    format!("{min:02}:{sec:02}.{msec:03}")
}
