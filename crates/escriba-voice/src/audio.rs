//! Audio capture: chunk/phrase buffers and the capture-source abstraction.
//!
//! A source pushes fixed-size 30 ms [`AudioChunk`]s into an unbounded channel;
//! the segmenter owns the receiving end exclusively for the session lifetime.

use crate::error::{DictationError, DictationResult};
use chrono::{DateTime, Utc};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Audio configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000, what recognition engines expect).
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono).
    pub channels: u16,

    /// Chunk size in samples (default: 480 = 30ms at 16kHz).
    pub chunk_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            chunk_size: 480, // 30ms at 16kHz
        }
    }
}

/// One fixed-size frame sent from the capture source.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Audio samples (f32, normalized to -1.0..1.0).
    pub samples: Vec<f32>,

    /// When the frame left the device.
    pub captured_at: Instant,
}

impl AudioChunk {
    /// Audio time carried by this chunk at the given rate.
    pub fn duration(&self, sample_rate: u32) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / sample_rate.max(1) as f64)
    }
}

/// One voice-activity-delimited utterance, from speech onset to sufficient
/// trailing silence. Produced once by the segmenter and shared read-only with
/// every recognition engine; never mutated after emission.
#[derive(Debug, Clone)]
pub struct AudioPhrase {
    /// Session-monotonic phrase id.
    pub id: u64,

    /// PCM samples (f32, -1.0..1.0) for the full phrase.
    pub samples: Arc<Vec<f32>>,

    /// Sample rate (e.g. 16000).
    pub sample_rate: u32,

    /// Bytes per encoded sample (2 for the 16-bit PCM engines consume).
    pub sample_width: u16,

    /// When the phrase was committed (trailing silence observed).
    pub captured_at: DateTime<Utc>,
}

impl AudioPhrase {
    /// Approximate phrase duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Capture source contract: push [`AudioChunk`]s into `tx` until closed.
///
/// `close` must release the device and drop the sender so the consumer's
/// channel terminates; an in-flight device read is allowed to complete
/// naturally rather than being interrupted.
pub trait AudioSource {
    /// Acquire the device and start pushing chunks. Fails with
    /// [`DictationError::Device`] when no device is available.
    fn open(&mut self, tx: mpsc::UnboundedSender<AudioChunk>) -> DictationResult<()>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    /// Rate of the chunks this source emits.
    fn sample_rate(&self) -> u32;
}

/// Microphone capture via CPAL (default input device).
pub struct MicSource {
    config: AudioConfig,
    stream: Option<Stream>,
}

impl MicSource {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    /// List available input device names.
    pub fn list_input_devices() -> DictationResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

impl AudioSource for MicSource {
    fn open(&mut self, tx: mpsc::UnboundedSender<AudioChunk>) -> DictationResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = cpal::default_host().default_input_device().ok_or_else(|| {
            DictationError::Device("no input device available".to_string())
        })?;

        info!(
            "🎤 Using input device: {} ({}Hz, {} channel(s))",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            self.config.sample_rate,
            self.config.channels
        );

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let chunk_size = self.config.chunk_size;
        let mut pending: Vec<f32> = Vec::with_capacity(chunk_size);

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    pending.push(sample);
                    if pending.len() >= chunk_size {
                        let chunk = AudioChunk {
                            samples: std::mem::replace(
                                &mut pending,
                                Vec::with_capacity(chunk_size),
                            ),
                            captured_at: Instant::now(),
                        };
                        if tx.send(chunk).is_err() {
                            // Consumer gone; the stream is about to be dropped.
                            return;
                        }
                    }
                }
            },
            move |err| {
                warn!("audio stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the stream stops capture and drops the sender with it.
        self.stream = None;
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }
}

/// Scripted capture source: replays pre-baked chunks from a feeder thread.
/// Stands in for a microphone in tests, demos and CI (no audio hardware).
pub struct ScriptedSource {
    sample_rate: u32,
    chunks: Vec<Vec<f32>>,
    /// Sleep between chunks; `Duration::ZERO` floods the channel immediately.
    pace: Duration,
    stop: Arc<AtomicBool>,
    feeder: Option<thread::JoinHandle<()>>,
}

impl ScriptedSource {
    pub fn new(sample_rate: u32, chunks: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            chunks,
            pace: Duration::ZERO,
            stop: Arc::new(AtomicBool::new(false)),
            feeder: None,
        }
    }

    /// Pace the replay in (approximate) real time.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    /// `n` chunks of flat-amplitude "speech" (square-ish, well above any
    /// calibrated silence threshold).
    pub fn speech_chunks(n: usize, chunk_size: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|_| {
                (0..chunk_size)
                    .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
                    .collect()
            })
            .collect()
    }

    /// `n` chunks of silence.
    pub fn silence_chunks(n: usize, chunk_size: usize) -> Vec<Vec<f32>> {
        (0..n).map(|_| vec![0.0; chunk_size]).collect()
    }
}

impl AudioSource for ScriptedSource {
    fn open(&mut self, tx: mpsc::UnboundedSender<AudioChunk>) -> DictationResult<()> {
        if self.feeder.is_some() {
            return Ok(());
        }

        let chunks = std::mem::take(&mut self.chunks);
        let pace = self.pace;
        let stop = Arc::clone(&self.stop);

        self.feeder = Some(thread::spawn(move || {
            for samples in chunks {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let chunk = AudioChunk {
                    samples,
                    captured_at: Instant::now(),
                };
                if tx.send(chunk).is_err() {
                    break;
                }
                if !pace.is_zero() {
                    thread::sleep(pace);
                }
            }
            // tx drops here; the consumer sees the channel close.
        }));
        Ok(())
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.feeder.take() {
            let _ = handle.join();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_config_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.chunk_size, 480);
    }

    #[test]
    fn chunk_duration_in_audio_time() {
        let chunk = AudioChunk {
            samples: vec![0.0; 480],
            captured_at: Instant::now(),
        };
        assert_eq!(chunk.duration(16_000), Duration::from_millis(30));
    }

    #[test]
    fn scripted_source_replays_and_closes_channel() {
        let chunks = ScriptedSource::speech_chunks(3, 480);
        let mut source = ScriptedSource::new(16_000, chunks);

        let (tx, mut rx) = mpsc::unbounded_channel();
        source.open(tx).unwrap();

        let mut received = 0;
        while let Some(chunk) = rx.blocking_recv() {
            assert_eq!(chunk.samples.len(), 480);
            received += 1;
        }
        assert_eq!(received, 3);
        source.close();
    }

    #[test]
    fn scripted_source_close_is_idempotent() {
        let mut source = ScriptedSource::new(16_000, vec![]);
        source.close();
        source.close();
    }
}
