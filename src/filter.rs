//! The host-facing filter.
//!
//! A [`ScrubFilter`] sits inline in an audio pipeline: the host hands it one
//! planar packet per tick and plays back whatever comes out. While the
//! recognizer is unavailable the filter passes audio through verbatim, so a
//! missing model never silences a stream.

use crate::audio::ring::PacketInfo;
use crate::audio::SpeakerLayout;
use crate::config::{FilterSettings, WINDOW_MS};
use crate::engine::{EngineError, EngineFactory, SpeechEngine};
use crate::segment::SegmentProcessor;
use crate::state::{AsrSlot, DetectionControls, SharedState};
use crate::worker;
use crossbeam_channel::Sender;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, info};

/// Fixed per-stream properties, supplied by the host at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u8,
}

/// One planar input packet: a contiguous sample slice per channel.
#[derive(Debug, Clone, Copy)]
pub struct AudioPacket<'a> {
    pub channels: &'a [&'a [f32]],
    pub frames: u32,
    pub timestamp: u64,
}

/// One processed packet, borrowed from the filter's output scratch.
#[derive(Debug)]
pub struct OutputBlock<'a> {
    planes: &'a [Vec<f32>],
    frames: u32,
    timestamp: u64,
}

impl<'a> OutputBlock<'a> {
    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn channel_count(&self) -> usize {
        self.planes.len()
    }

    pub fn channel(&self, index: usize) -> &'a [f32] {
        &self.planes[index][..self.frames as usize]
    }
}

/// What one tick of [`ScrubFilter::process`] produced.
#[derive(Debug)]
pub enum FilterOutput<'a> {
    /// The filter is inactive or has no recognizer; play the input verbatim.
    PassThrough(AudioPacket<'a>),
    /// The input was queued but no processed packet is ready this tick.
    Pending,
    /// A processed packet, in arrival order, with its original framing.
    Ready(OutputBlock<'a>),
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("unsupported channel count {0}")]
    UnsupportedLayout(u8),
    #[error("packet has {got} channels, filter was created for {want}")]
    ChannelMismatch { want: usize, got: usize },
    #[error("packet channel {channel} holds {got} samples but claims {want} frames")]
    ShortChannel {
        channel: usize,
        want: usize,
        got: usize,
    },
    #[error("invalid settings: {0}")]
    Settings(String),
}

pub struct ScrubFilter {
    shared: Arc<SharedState>,
    worker: Option<JoinHandle<()>>,
    wake: Option<Sender<()>>,
    settings: FilterSettings,
    factory: Arc<dyn EngineFactory>,
    sample_rate: u32,
    channels: usize,
    layout: SpeakerLayout,
    active: bool,
    scratch: Vec<Vec<f32>>,
}

impl ScrubFilter {
    /// Build a filter for a fixed stream format.
    ///
    /// A model that fails to load is not an error: the filter starts in
    /// pass-through and a later [`update`](Self::update) can retry.
    pub fn new(
        format: StreamFormat,
        settings: FilterSettings,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<Self, FilterError> {
        let layout = SpeakerLayout::from_channels(format.channels)
            .ok_or(FilterError::UnsupportedLayout(format.channels))?;
        settings
            .validate()
            .map_err(|err| FilterError::Settings(err.to_string()))?;

        let channels = usize::from(format.channels);
        let frames_per_window = (u64::from(format.sample_rate) * WINDOW_MS / 1000) as usize;
        let engine = match Self::load_engine(factory.as_ref(), &settings.model_path) {
            Ok(engine) => Some(engine),
            Err(err) => {
                error!(%err, "model unavailable, starting in pass-through");
                None
            }
        };
        let slot = AsrSlot {
            engine,
            params: settings.asr_params(),
            controls: DetectionControls::from_settings(&settings),
        };
        let shared = Arc::new(SharedState::new(channels, frames_per_window * 2, slot));

        let mut filter = Self {
            shared,
            worker: None,
            wake: None,
            settings,
            factory,
            sample_rate: format.sample_rate,
            channels,
            layout,
            active: true,
            scratch: vec![Vec::new(); channels],
        };
        if filter.shared.is_ready() {
            filter.spawn_worker();
        }
        info!(
            channels,
            sample_rate = format.sample_rate,
            frames_per_window,
            layout = ?filter.layout,
            ready = filter.is_ready(),
            "filter created"
        );
        Ok(filter)
    }

    /// One host tick: queue the packet, then return whatever processed packet
    /// is ready. Non-blocking; the critical sections are short copies.
    pub fn process<'a>(
        &'a mut self,
        packet: AudioPacket<'a>,
    ) -> Result<FilterOutput<'a>, FilterError> {
        if !self.active || !self.shared.is_ready() {
            return Ok(FilterOutput::PassThrough(packet));
        }
        self.push(&packet)?;
        match Self::pull(self) {
            Some(block) => Ok(FilterOutput::Ready(block)),
            None => Ok(FilterOutput::Pending),
        }
    }

    /// Pop one processed packet, if any. Packets come out in the order their
    /// first contributing input packet arrived.
    pub fn pull(&mut self) -> Option<OutputBlock<'_>> {
        let (frames, timestamp) = {
            let mut output = crate::lock_or_recover(&self.shared.output, "output stage");
            let info = output.meta.pop_front()?;
            let n = info.frames as usize;
            for (ring, scratch) in output.pcm.iter_mut().zip(&mut self.scratch) {
                scratch.resize(n, 0.0);
                ring.pop_into(&mut scratch[..n]);
            }
            (info.frames, info.timestamp)
        };
        debug!(frames, timestamp, "pulled output packet");
        Some(OutputBlock {
            planes: &self.scratch,
            frames,
            timestamp,
        })
    }

    /// Apply a settings change. A changed model path quiesces the worker,
    /// loads the new model, and restarts windowing from scratch; on reload
    /// failure the filter stays in pass-through until the next update.
    pub fn update(&mut self, settings: FilterSettings) -> Result<(), FilterError> {
        settings
            .validate()
            .map_err(|err| FilterError::Settings(err.to_string()))?;

        {
            let mut slot = crate::lock_or_recover(&self.shared.asr, "asr slot");
            slot.controls = DetectionControls::from_settings(&settings);
            slot.params = settings.asr_params();
        }

        if settings.model_path != self.settings.model_path {
            info!(path = %settings.model_path.display(), "model path changed, reloading");
            self.teardown_worker();
            match Self::load_engine(self.factory.as_ref(), &settings.model_path) {
                Ok(engine) => {
                    self.shared.set_engine(Some(engine));
                    self.spawn_worker();
                }
                Err(err) => {
                    error!(%err, "model reload failed, staying in pass-through");
                }
            }
        }

        self.settings = settings;
        Ok(())
    }

    /// An inactive filter passes every packet through untouched.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        info!(active, "filter activation changed");
    }

    /// False while no recognizer is loaded (pass-through mode).
    pub fn is_ready(&self) -> bool {
        self.shared.is_ready()
    }

    pub fn layout(&self) -> SpeakerLayout {
        self.layout
    }

    fn push(&mut self, packet: &AudioPacket<'_>) -> Result<(), FilterError> {
        if packet.channels.len() != self.channels {
            return Err(FilterError::ChannelMismatch {
                want: self.channels,
                got: packet.channels.len(),
            });
        }
        let frames = packet.frames as usize;
        for (channel, plane) in packet.channels.iter().enumerate() {
            if plane.len() < frames {
                return Err(FilterError::ShortChannel {
                    channel,
                    want: frames,
                    got: plane.len(),
                });
            }
        }

        {
            let mut input = crate::lock_or_recover(&self.shared.input, "input stage");
            for (ring, plane) in input.pcm.iter_mut().zip(packet.channels) {
                ring.push_slice(&plane[..frames]);
            }
            input.meta.push_back(PacketInfo {
                frames: packet.frames,
                timestamp: packet.timestamp,
            });
            debug!(
                frames = packet.frames,
                queued = input.queued_samples(),
                "queued input packet"
            );
        }
        if let Some(wake) = &self.wake {
            let _ = wake.try_send(());
        }
        Ok(())
    }

    fn load_engine(
        factory: &dyn EngineFactory,
        model_path: &Path,
    ) -> Result<Box<dyn SpeechEngine>, EngineError> {
        factory.ensure_model(model_path)?;
        factory.load(model_path)
    }

    fn spawn_worker(&mut self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let processor = SegmentProcessor::new(self.channels, self.sample_rate);
        let shared = self.shared.clone();
        match std::thread::Builder::new()
            .name("scrubstream-worker".to_string())
            .spawn(move || worker::run(shared, processor, rx))
        {
            Ok(handle) => {
                self.wake = Some(tx);
                self.worker = Some(handle);
            }
            Err(err) => {
                error!(%err, "could not spawn worker, dropping to pass-through");
                self.shared.clear_engine();
            }
        }
    }

    fn teardown_worker(&mut self) {
        self.shared.clear_engine();
        // Dropping the sender disconnects the wake channel, so an idle worker
        // leaves immediately instead of finishing its 10 ms doze.
        self.wake = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("worker thread panicked during teardown");
            }
        }
    }
}

impl Drop for ScrubFilter {
    fn drop(&mut self) {
        self.teardown_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AsrParams, Transcript};

    struct NoModelFactory;

    impl EngineFactory for NoModelFactory {
        fn ensure_model(&self, model_path: &Path) -> Result<(), EngineError> {
            Err(EngineError::ModelMissing(model_path.to_path_buf()))
        }

        fn load(&self, _model_path: &Path) -> Result<Box<dyn SpeechEngine>, EngineError> {
            unreachable!("ensure_model always fails")
        }
    }

    struct EchoEngine;

    impl SpeechEngine for EchoEngine {
        fn transcribe(
            &mut self,
            _pcm: &[f32],
            _params: &AsrParams,
        ) -> Result<Transcript, EngineError> {
            Ok(Transcript {
                text: "hello".to_string(),
                t0_cs: 0,
                t1_cs: 101,
                token_probs: vec![0.9],
            })
        }
    }

    struct EchoFactory;

    impl EngineFactory for EchoFactory {
        fn ensure_model(&self, _model_path: &Path) -> Result<(), EngineError> {
            Ok(())
        }

        fn load(&self, _model_path: &Path) -> Result<Box<dyn SpeechEngine>, EngineError> {
            Ok(Box::new(EchoEngine))
        }
    }

    fn format() -> StreamFormat {
        StreamFormat {
            sample_rate: 48_000,
            channels: 1,
        }
    }

    #[test]
    fn seven_channels_have_no_layout() {
        let result = ScrubFilter::new(
            StreamFormat {
                sample_rate: 48_000,
                channels: 7,
            },
            FilterSettings::default(),
            Arc::new(EchoFactory),
        );
        assert!(matches!(result, Err(FilterError::UnsupportedLayout(7))));
    }

    #[test]
    fn invalid_settings_are_rejected_at_creation() {
        let settings = FilterSettings {
            n_threads: 0,
            ..FilterSettings::default()
        };
        let result = ScrubFilter::new(format(), settings, Arc::new(EchoFactory));
        assert!(matches!(result, Err(FilterError::Settings(_))));
    }

    #[test]
    fn missing_model_starts_in_pass_through() {
        let mut filter =
            ScrubFilter::new(format(), FilterSettings::default(), Arc::new(NoModelFactory))
                .expect("creation should survive a missing model");
        assert!(!filter.is_ready());

        let samples = vec![0.25f32; 480];
        let planes: Vec<&[f32]> = vec![&samples];
        let packet = AudioPacket {
            channels: &planes,
            frames: 480,
            timestamp: 0,
        };
        match filter.process(packet).unwrap() {
            FilterOutput::PassThrough(returned) => {
                assert_eq!(returned.frames, 480);
                assert_eq!(returned.channels[0], &samples[..]);
            }
            other => panic!("expected pass-through, got {other:?}"),
        }
    }

    #[test]
    fn inactive_filter_passes_through_even_when_ready() {
        let mut filter =
            ScrubFilter::new(format(), FilterSettings::default(), Arc::new(EchoFactory))
                .expect("creation should succeed");
        assert!(filter.is_ready());
        filter.set_active(false);

        let samples = vec![0.25f32; 480];
        let planes: Vec<&[f32]> = vec![&samples];
        let packet = AudioPacket {
            channels: &planes,
            frames: 480,
            timestamp: 0,
        };
        assert!(matches!(
            filter.process(packet).unwrap(),
            FilterOutput::PassThrough(_)
        ));
    }

    #[test]
    fn mismatched_channel_count_is_rejected() {
        let mut filter =
            ScrubFilter::new(format(), FilterSettings::default(), Arc::new(EchoFactory))
                .expect("creation should succeed");
        let left = vec![0.0f32; 480];
        let right = vec![0.0f32; 480];
        let planes: Vec<&[f32]> = vec![&left, &right];
        let packet = AudioPacket {
            channels: &planes,
            frames: 480,
            timestamp: 0,
        };
        assert!(matches!(
            filter.process(packet),
            Err(FilterError::ChannelMismatch { want: 1, got: 2 })
        ));
    }

    #[test]
    fn short_channel_slices_are_rejected() {
        let mut filter =
            ScrubFilter::new(format(), FilterSettings::default(), Arc::new(EchoFactory))
                .expect("creation should succeed");
        let samples = vec![0.0f32; 100];
        let planes: Vec<&[f32]> = vec![&samples];
        let packet = AudioPacket {
            channels: &planes,
            frames: 480,
            timestamp: 0,
        };
        assert!(matches!(
            filter.process(packet),
            Err(FilterError::ShortChannel { channel: 0, .. })
        ));
    }
}
