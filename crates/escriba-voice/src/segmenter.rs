//! Phrase segmentation: capture loop, silence-gap detection, phrase dispatch.
//!
//! The segmenter exclusively owns the audio source for the session. Chunks are
//! classified against the calibrated VAD and folded into a phrase state
//! machine (Silence → Speech → TrailingSilence); a phrase commits when
//! `pause_threshold` of trailing silence follows speech. Every committed
//! phrase goes to a freshly spawned transcription worker *without* waiting —
//! capture never stalls on recognition latency.

use crate::audio::{AudioChunk, AudioConfig, AudioPhrase, AudioSource};
use crate::dispatcher::TranscriptionDispatcher;
use crate::error::{DictationError, DictationResult};
use crate::sink::{TranscriptEvent, TranscriptSink};
use crate::vad::{EnergyVad, VadConfig};
use crate::workers::WorkerRegistry;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Segmentation tuning.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Trailing silence that ends a phrase (default 2.0s).
    pub pause_threshold: Duration,

    /// Silence kept as padding inside a phrase — brief breaths and the
    /// lead-in before onset (default 300ms).
    pub non_speaking_grace: Duration,

    /// Minimum speech for a phrase to be worth transcribing (default 200ms).
    pub min_phrase: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            pause_threshold: Duration::from_secs(2),
            non_speaking_grace: Duration::from_millis(300),
            min_phrase: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhraseState {
    Silence,
    Speech,
    TrailingSilence,
}

/// Folds classified chunks into phrase buffers. Accounts silence in audio
/// time (sample counts), so replayed sessions segment identically to live
/// ones.
struct PhraseBuilder {
    sample_rate: u32,
    pause_samples: usize,
    grace_samples: usize,
    min_samples: usize,
    state: PhraseState,
    buffer: Vec<f32>,
    lead_in: VecDeque<Vec<f32>>,
    lead_in_samples: usize,
    speech_samples: usize,
    trailing_samples: usize,
}

impl PhraseBuilder {
    fn new(config: &SegmenterConfig, sample_rate: u32) -> Self {
        let to_samples =
            |d: Duration| (d.as_secs_f64() * sample_rate as f64).round() as usize;
        Self {
            sample_rate,
            pause_samples: to_samples(config.pause_threshold),
            grace_samples: to_samples(config.non_speaking_grace),
            min_samples: to_samples(config.min_phrase),
            state: PhraseState::Silence,
            buffer: Vec::new(),
            lead_in: VecDeque::new(),
            lead_in_samples: 0,
            speech_samples: 0,
            trailing_samples: 0,
        }
    }

    /// Feed one classified chunk; returns a finished phrase buffer when the
    /// trailing-silence gap is reached.
    fn push(&mut self, is_speech: bool, samples: &[f32]) -> Option<Vec<f32>> {
        match (self.state, is_speech) {
            (PhraseState::Silence, false) => {
                // Remember a little pre-onset audio so the first syllable
                // is not clipped.
                self.lead_in.push_back(samples.to_vec());
                self.lead_in_samples += samples.len();
                while self.lead_in_samples > self.grace_samples {
                    match self.lead_in.pop_front() {
                        Some(front) => self.lead_in_samples -= front.len(),
                        None => break,
                    }
                }
                None
            }
            (PhraseState::Silence, true) => {
                info!("🎤 speech started");
                self.state = PhraseState::Speech;
                self.buffer.clear();
                for chunk in self.lead_in.drain(..) {
                    self.buffer.extend_from_slice(&chunk);
                }
                self.lead_in_samples = 0;
                self.buffer.extend_from_slice(samples);
                self.speech_samples = samples.len();
                self.trailing_samples = 0;
                None
            }
            (PhraseState::Speech, true) => {
                self.buffer.extend_from_slice(samples);
                self.speech_samples += samples.len();
                None
            }
            (PhraseState::Speech, false) => {
                self.state = PhraseState::TrailingSilence;
                self.buffer.extend_from_slice(samples);
                self.trailing_samples = samples.len();
                None
            }
            (PhraseState::TrailingSilence, true) => {
                // A pause shorter than the gap: same phrase continues.
                self.state = PhraseState::Speech;
                self.buffer.extend_from_slice(samples);
                self.speech_samples += samples.len();
                self.trailing_samples = 0;
                None
            }
            (PhraseState::TrailingSilence, false) => {
                self.buffer.extend_from_slice(samples);
                self.trailing_samples += samples.len();
                if self.trailing_samples < self.pause_samples {
                    return None;
                }
                self.commit()
            }
        }
    }

    fn commit(&mut self) -> Option<Vec<f32>> {
        // Keep only grace-worth of the trailing gap as padding.
        let excess = self.trailing_samples.saturating_sub(self.grace_samples);
        let keep = self.buffer.len().saturating_sub(excess);
        self.buffer.truncate(keep);

        let long_enough = self.speech_samples >= self.min_samples;
        let samples = std::mem::take(&mut self.buffer);
        let speech_secs = self.speech_samples as f32 / self.sample_rate.max(1) as f32;

        self.state = PhraseState::Silence;
        self.speech_samples = 0;
        self.trailing_samples = 0;

        if long_enough {
            Some(samples)
        } else {
            debug!("phrase too short ({:.2}s), discarding", speech_secs);
            None
        }
    }
}

/// Runs the capture loop for one session and hands phrases to transcription
/// workers. Exclusively owns the audio source while listening.
pub struct PhraseSegmenter {
    audio: AudioConfig,
    vad: VadConfig,
    config: SegmenterConfig,
    source: Box<dyn AudioSource>,
    listening: Arc<AtomicBool>,
    loop_handle: Option<thread::JoinHandle<()>>,
    loop_done_rx: Option<mpsc::UnboundedReceiver<()>>,
    registry: Option<Arc<WorkerRegistry>>,
}

impl PhraseSegmenter {
    pub fn new(
        audio: AudioConfig,
        vad: VadConfig,
        config: SegmenterConfig,
        source: Box<dyn AudioSource>,
    ) -> Self {
        Self {
            audio,
            vad,
            config,
            source,
            listening: Arc::new(AtomicBool::new(false)),
            loop_handle: None,
            loop_done_rx: None,
            registry: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Acquire the source, calibrate, and start the capture loop. Idempotent:
    /// a no-op when already listening. On a device or calibration failure the
    /// source is released and nothing changes.
    pub fn start(
        &mut self,
        dispatcher: Arc<TranscriptionDispatcher>,
        sink: TranscriptSink,
        registry: Arc<WorkerRegistry>,
    ) -> DictationResult<()> {
        if self.listening.load(Ordering::SeqCst) {
            debug!("segmenter already listening");
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.source.open(tx)?;

        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| DictationError::Config(format!("runtime start failed: {}", e)))?;

        // One fixed-duration ambient pass before anything is treated as
        // speech. No audio at all within the window means a dead source.
        info!("adjusting for ambient noise ({:?})", self.vad.calibration);
        let sample_rate = self.source.sample_rate();
        let target_samples =
            (self.vad.calibration.as_secs_f64() * sample_rate as f64).round() as usize;
        let deadline = Instant::now() + self.vad.calibration + Duration::from_secs(2);
        let mut ambient: Vec<AudioChunk> = Vec::new();
        let mut collected = 0usize;
        while collected < target_samples {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rt.block_on(async { tokio::time::timeout(remaining, rx.recv()).await }) {
                Ok(Some(chunk)) => {
                    collected += chunk.samples.len();
                    ambient.push(chunk);
                }
                Ok(None) | Err(_) => break,
            }
        }

        let vad = match EnergyVad::calibrate(&self.vad, &ambient) {
            Ok(vad) => vad,
            Err(e) => {
                self.source.close();
                return Err(e);
            }
        };

        self.listening.store(true, Ordering::SeqCst);

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let listening = Arc::clone(&self.listening);
        let loop_registry = Arc::clone(&registry);
        let mut builder = PhraseBuilder::new(&self.config, sample_rate);

        let handle = thread::spawn(move || {
            let mut next_phrase_id: u64 = 0;
            while listening.load(Ordering::SeqCst) {
                // A read in flight when stop() is requested completes
                // naturally; the loop exits once the source closes the
                // channel or the flag is seen.
                let chunk = match rt.block_on(rx.recv()) {
                    Some(chunk) => chunk,
                    None => break,
                };

                let is_speech = vad.is_speech(&chunk.samples);
                if let Some(samples) = builder.push(is_speech, &chunk.samples) {
                    let phrase = AudioPhrase {
                        id: next_phrase_id,
                        samples: Arc::new(samples),
                        sample_rate,
                        sample_width: 2,
                        captured_at: Utc::now(),
                    };
                    next_phrase_id += 1;
                    info!(
                        "🧠 phrase {} committed ({:.1}s); dispatching",
                        phrase.id,
                        phrase.duration().as_secs_f32()
                    );

                    let dispatcher = Arc::clone(&dispatcher);
                    let sink = sink.clone();
                    let label = format!("phrase-{}", phrase.id);
                    let phrase_id = phrase.id;
                    let accepted = loop_registry.spawn(&label, move || {
                        dispatch_phrase(&dispatcher, &sink, phrase);
                    });
                    if !accepted {
                        warn!(
                            "worker registry saturated; transcription shed for phrase {}",
                            phrase_id
                        );
                    }
                }
            }
            let _ = done_tx.send(());
            debug!("capture loop ended");
        });

        self.loop_handle = Some(handle);
        self.loop_done_rx = Some(done_rx);
        self.registry = Some(registry);
        info!(
            "ready to listen (pause threshold {:?})",
            self.config.pause_threshold
        );
        Ok(())
    }

    /// Stop listening and join the capture loop plus every phrase worker,
    /// each wait bounded by `timeout`. Idempotent; returns the number of
    /// workers abandoned to the timeout.
    pub fn stop(&mut self, timeout: Duration) -> usize {
        if !self.listening.swap(false, Ordering::SeqCst) {
            debug!("segmenter not listening; nothing to stop");
            return 0;
        }

        // Closing the source drops its sender; the loop drains what is
        // buffered and exits.
        self.source.close();

        let mut abandoned = 0;
        if let (Some(handle), Some(mut done_rx)) =
            (self.loop_handle.take(), self.loop_done_rx.take())
        {
            let rt = tokio::runtime::Runtime::new().unwrap();
            match rt.block_on(async { tokio::time::timeout(timeout, done_rx.recv()).await }) {
                Ok(_) => {
                    let _ = handle.join();
                }
                Err(_) => {
                    warn!("shutdown timeout: abandoning capture loop");
                    abandoned += 1;
                }
            }
        }

        if let Some(registry) = self.registry.take() {
            abandoned += registry.join_all(timeout);
        }
        abandoned
    }

    /// Reclaim the source after a stop so the next session can reuse it.
    pub fn into_source(mut self) -> Box<dyn AudioSource> {
        self.listening.store(false, Ordering::SeqCst);
        std::mem::replace(&mut self.source, Box::new(ClosedSource))
    }

    pub fn audio_config(&self) -> &AudioConfig {
        &self.audio
    }
}

impl Drop for PhraseSegmenter {
    fn drop(&mut self) {
        self.listening.store(false, Ordering::SeqCst);
        self.source.close();
    }
}

/// Placeholder source left behind by `into_source`.
struct ClosedSource;

impl AudioSource for ClosedSource {
    fn open(&mut self, _tx: mpsc::UnboundedSender<AudioChunk>) -> DictationResult<()> {
        Err(DictationError::Device("source already reclaimed".to_string()))
    }

    fn close(&mut self) {}

    fn sample_rate(&self) -> u32 {
        0
    }
}

/// Phrase worker body: fan out to all engines, forward what they heard.
/// Failures stay here as log lines; the feed simply misses that engine.
fn dispatch_phrase(
    dispatcher: &TranscriptionDispatcher,
    sink: &TranscriptSink,
    phrase: AudioPhrase,
) {
    let outcomes = dispatcher.transcribe_all(&phrase);
    for (engine, outcome) in outcomes {
        match outcome {
            Ok(text) => {
                if text.trim().is_empty() {
                    debug!("engine '{}' heard nothing for phrase {}", engine, phrase.id);
                } else {
                    sink.push(TranscriptEvent {
                        engine,
                        text,
                        phrase_id: phrase.id,
                    });
                }
            }
            Err(failure) => {
                warn!(
                    "engine '{}' failed on phrase {}: {}",
                    engine, phrase.id, failure
                );
            }
        }
    }
}
