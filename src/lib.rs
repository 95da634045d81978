//! Inline speech filter for live audio streams.
//!
//! `scrubstream` sits between an audio source and its sink: the host pushes
//! planar f32 packets in, a worker thread transcribes overlapping ~1 s
//! windows through a speech recognizer, and packets come back out with
//! hesitation sounds muted and profanity replaced by a 440 Hz tone. While no
//! recognizer is loaded the filter passes audio through verbatim, so it can
//! never silence a broadcast.
//!
//! The recognizer is injected through the [`engine::EngineFactory`] seam; the
//! whisper.cpp implementation lives behind the `whisper` cargo feature.

pub mod audio;
mod classify;
pub mod config;
pub mod engine;
pub mod filter;
mod segment;
mod state;
#[cfg(feature = "whisper")]
pub mod stt;
mod worker;

pub use audio::{PacketInfo, SpeakerLayout, TARGET_RATE};
pub use classify::Detection;
pub use config::{FilterSettings, LogLevel, SamplingMethod};
pub use engine::{AsrParams, EngineError, EngineFactory, Sampling, SpeechEngine, Transcript};
pub use filter::{AudioPacket, FilterError, FilterOutput, OutputBlock, ScrubFilter, StreamFormat};
#[cfg(feature = "whisper")]
pub use stt::{WhisperEngine, WhisperFactory};

use std::sync::{Mutex, MutexGuard, OnceLock};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install a process-wide fmt subscriber at the given level.
///
/// Optional: hosts with their own `tracing` setup should skip this. Only the
/// first call has any effect.
pub fn init_tracing(level: LogLevel) {
    let _ = TRACING_INIT.get_or_init(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level.as_tracing())
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(context, "mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
