//! The inference worker thread.
//!
//! Single consumer: drains windows from the input stage whenever at least a
//! full window of samples is queued, otherwise waits on the wake channel the
//! push path signals (bounded by the 10 ms idle tick). The thread exits when
//! the engine slot empties, either because inference failed fatally or
//! because the facade is reloading or shutting down.

use crate::segment::SegmentProcessor;
use crate::state::SharedState;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Upper bound on how long the worker dozes between queue checks.
const IDLE_TICK: Duration = Duration::from_millis(10);

pub(crate) fn run(shared: Arc<SharedState>, mut processor: SegmentProcessor, wake: Receiver<()>) {
    info!("starting inference worker");

    loop {
        {
            let slot = crate::lock_or_recover(&shared.asr, "asr slot");
            if slot.engine.is_none() {
                info!("engine slot is empty, exiting worker");
                break;
            }
        }

        loop {
            let queued = crate::lock_or_recover(&shared.input, "input stage").queued_samples();
            if queued < processor.frames_per_window() {
                break;
            }
            if let Err(err) = processor.process_window(&shared) {
                error!(%err, "engine failed, tearing it down");
                shared.clear_engine();
                break;
            }
        }

        match wake.recv_timeout(IDLE_TICK) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("wake channel closed, exiting worker");
                break;
            }
        }
    }

    info!("inference worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterSettings;
    use crate::engine::{AsrParams, EngineError, Sampling, SpeechEngine, Transcript};
    use crate::state::{AsrSlot, DetectionControls};
    use crate::audio::ring::PacketInfo;
    use crossbeam_channel::bounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    struct CountingEngine {
        calls: Arc<AtomicUsize>,
    }

    impl SpeechEngine for CountingEngine {
        fn transcribe(
            &mut self,
            _pcm: &[f32],
            _params: &AsrParams,
        ) -> Result<Transcript, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Transcript {
                text: "hello".to_string(),
                t0_cs: 0,
                t1_cs: 101,
                token_probs: vec![0.9],
            })
        }
    }

    fn shared_with_engine(calls: Arc<AtomicUsize>) -> Arc<SharedState> {
        let mut settings = FilterSettings::default();
        settings.vad_enabled = false;
        settings.log_words = false;
        Arc::new(SharedState::new(
            1,
            48_000 * 4,
            AsrSlot {
                engine: Some(Box::new(CountingEngine { calls })),
                params: AsrParams::defaults_for(Sampling::Greedy { best_of: 1 }),
                controls: DetectionControls::from_settings(&settings),
            },
        ))
    }

    #[test]
    fn worker_exits_when_the_engine_slot_empties() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = shared_with_engine(calls);
        let (tx, rx) = bounded::<()>(1);
        let processor = SegmentProcessor::new(1, 48_000);

        let handle = {
            let shared = shared.clone();
            thread::spawn(move || run(shared, processor, rx))
        };

        shared.clear_engine();
        let _ = tx.try_send(());
        handle.join().expect("worker should exit cleanly");
    }

    #[test]
    fn worker_drains_queued_windows_and_idles() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = shared_with_engine(calls.clone());
        let (tx, rx) = bounded::<()>(1);
        let processor = SegmentProcessor::new(1, 48_000);

        {
            let mut input = crate::lock_or_recover(&shared.input, "input stage");
            let packet = vec![0.25f32; 480];
            for p in 0..110 {
                input.pcm[0].push_slice(&packet);
                input.meta.push_back(PacketInfo {
                    frames: 480,
                    timestamp: p as u64 * 10_000_000,
                });
            }
        }

        let handle = {
            let shared = shared.clone();
            thread::spawn(move || run(shared, processor, rx))
        };
        let _ = tx.try_send(());

        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!crate::lock_or_recover(&shared.output, "output stage")
            .meta
            .is_empty());

        shared.clear_engine();
        handle.join().expect("worker should exit cleanly");
    }
}
