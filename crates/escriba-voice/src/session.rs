//! Session lifecycle: one controller instance per dictation session.
//!
//! The controller owns the segmenter, dispatcher, sink and worker registry —
//! no process-wide state, so parallel sessions (and parallel tests) stay
//! isolated. State machine: Idle → Listening → Stopping → Idle.

use crate::audio::{AudioConfig, AudioSource};
use crate::dispatcher::TranscriptionDispatcher;
use crate::engine::RecognitionEngine;
use crate::error::{DictationError, DictationResult};
use crate::segmenter::{PhraseSegmenter, SegmenterConfig};
use crate::sink::{spawn_consumer, transcript_channel, RenderSurface, SinkConfig, TranscriptConsumer, TranscriptSink};
use crate::vad::VadConfig;
use crate::workers::WorkerRegistry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the session currently is. `Stopping` covers the bounded shutdown
/// join between a stop request and the return to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Listening,
    Stopping,
}

/// Everything tunable about one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub segmenter: SegmenterConfig,
    pub sink: SinkConfig,

    /// Cap on concurrent phrase workers (default 8).
    pub max_workers: usize,

    /// Per-thread join budget during stop/close (default 1s).
    pub shutdown_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            segmenter: SegmenterConfig::default(),
            sink: SinkConfig::default(),
            max_workers: 8,
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden from `ESCRIBA_*` environment variables. Invalid
    /// values are a configuration error, not a silent fallback.
    pub fn from_env() -> DictationResult<Self> {
        let mut config = Self::default();

        if let Some(ms) = env_u64("ESCRIBA_PAUSE_THRESHOLD_MS")? {
            config.segmenter.pause_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("ESCRIBA_NON_SPEAKING_GRACE_MS")? {
            config.segmenter.non_speaking_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("ESCRIBA_CALIBRATION_MS")? {
            config.vad.calibration = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("ESCRIBA_DRAIN_TICK_MS")? {
            config.sink.drain_tick = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = env_u64("ESCRIBA_SHUTDOWN_TIMEOUT_MS")? {
            config.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("ESCRIBA_MAX_WORKERS")? {
            config.max_workers = n.max(1) as usize;
        }
        if let Some(rate) = env_u64("ESCRIBA_SAMPLE_RATE")? {
            config.audio.sample_rate = rate as u32;
            // Keep 30ms chunks at the new rate.
            config.audio.chunk_size = (rate as usize * 30) / 1000;
        }

        Ok(config)
    }
}

fn env_u64(key: &str) -> DictationResult<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| DictationError::Config(format!("invalid {}: {}", key, value))),
        Err(_) => Ok(None),
    }
}

/// Owns one dictation session end to end. Not `Send` while a microphone
/// stream is held — keep it on the thread that starts and stops the session
/// (the pattern a UI event loop imposes anyway).
pub struct DictationController {
    config: SessionConfig,
    dispatcher: Arc<TranscriptionDispatcher>,
    registry: Arc<WorkerRegistry>,
    state: SessionState,
    source: Option<Box<dyn AudioSource>>,
    segmenter: Option<PhraseSegmenter>,
    sink: Option<TranscriptSink>,
    consumer: Option<TranscriptConsumer>,
}

impl DictationController {
    pub fn new(
        config: SessionConfig,
        engines: Vec<Arc<dyn RecognitionEngine>>,
        source: Box<dyn AudioSource>,
    ) -> Self {
        let registry = Arc::new(WorkerRegistry::new(config.max_workers));
        let dispatcher = Arc::new(TranscriptionDispatcher::new(engines));
        info!("session ready (engines: {:?})", dispatcher.engine_names());
        Self {
            config,
            dispatcher,
            registry,
            state: SessionState::Idle,
            source: Some(source),
            segmenter: None,
            sink: None,
            consumer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Phrase workers currently running.
    pub fn active_workers(&self) -> usize {
        self.registry.in_flight()
    }

    /// Idle → Listening. Reuses the session's audio source, builds a fresh
    /// segmenter and sink, starts the render tick. A device or calibration
    /// failure is returned and leaves the controller Idle; calling while
    /// already Listening is a no-op.
    pub fn start_recording(&mut self, surface: Box<dyn RenderSurface>) -> DictationResult<()> {
        if self.state != SessionState::Idle {
            debug!("start_recording ignored: session is {:?}", self.state);
            return Ok(());
        }

        let source = self
            .source
            .take()
            .ok_or_else(|| DictationError::Device("audio source unavailable".to_string()))?;

        let (sink, events) = transcript_channel();
        let consumer = spawn_consumer(self.config.sink.clone(), events, surface);

        let mut segmenter = PhraseSegmenter::new(
            self.config.audio.clone(),
            self.config.vad.clone(),
            self.config.segmenter.clone(),
            source,
        );

        match segmenter.start(
            Arc::clone(&self.dispatcher),
            sink.clone(),
            Arc::clone(&self.registry),
        ) {
            Ok(()) => {
                self.state = SessionState::Listening;
                self.segmenter = Some(segmenter);
                self.sink = Some(sink);
                self.consumer = Some(consumer);
                info!("recording started");
                Ok(())
            }
            Err(e) => {
                // Still Idle: reclaim the source for a retry, tear the sink
                // back down.
                self.source = Some(segmenter.into_source());
                drop(sink);
                consumer.stop();
                warn!("start_recording failed: {}", e);
                Err(e)
            }
        }
    }

    /// Listening → Stopping → Idle. Joins the capture loop and all phrase
    /// workers with the configured per-thread budget, then drains the sink a
    /// final time. Calling while Idle is a no-op. Returns the number of
    /// workers abandoned to the shutdown timeout.
    pub fn stop_recording(&mut self) -> usize {
        if self.state != SessionState::Listening {
            debug!("stop_recording ignored: session is {:?}", self.state);
            return 0;
        }

        self.state = SessionState::Stopping;
        info!("stopping recording");

        let mut abandoned = 0;
        if let Some(mut segmenter) = self.segmenter.take() {
            abandoned = segmenter.stop(self.config.shutdown_timeout);
            self.source = Some(segmenter.into_source());
        }

        // Workers are done (or abandoned): release our producer handle and
        // let the consumer render what is queued before it stops.
        self.sink = None;
        if let Some(consumer) = self.consumer.take() {
            consumer.stop();
        }

        self.state = SessionState::Idle;
        if abandoned > 0 {
            warn!("recording stopped; {} worker(s) abandoned", abandoned);
        } else {
            info!("recording stopped");
        }
        abandoned
    }

    /// Teardown: stop if listening, join stragglers, release the source.
    /// Returns the total abandoned-worker count.
    pub fn close(&mut self) -> usize {
        info!("closing session");
        let mut abandoned = self.stop_recording();
        abandoned += self.registry.join_all(self.config.shutdown_timeout);

        self.sink = None;
        if let Some(consumer) = self.consumer.take() {
            consumer.stop();
        }
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        abandoned
    }
}
