//! # Escriba Voice — live dictation pipeline
//!
//! Captures microphone audio, segments it into speech phrases with a
//! calibrated energy VAD, transcribes each phrase concurrently through every
//! configured recognition engine, and merges the results into an ordered
//! transcript feed for a display surface.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Dictation Controller                      │
//! │  ┌────────────┐   ┌───────────────┐   ┌───────────────────┐  │
//! │  │ Audio In   │ → │   Phrase      │ → │  Transcription    │  │
//! │  │  (cpal)    │   │  Segmenter    │   │   Dispatcher      │  │
//! │  └────────────┘   │ (energy VAD)  │   │ (1 thread/engine) │  │
//! │                   └───────────────┘   └─────────┬─────────┘  │
//! │                                                 ↓            │
//! │  ┌────────────────┐   drain tick   ┌────────────────────┐    │
//! │  │ Render Surface │ ←───────────── │  Transcript Sink   │    │
//! │  └────────────────┘                └────────────────────┘    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! One capture thread owns the source; each phrase gets its own worker so
//! recognition latency never stalls capture; a single consumer thread renders
//! the feed. Engine failures stay contained in their own result slots.

pub mod audio;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod segmenter;
pub mod session;
pub mod sink;
pub mod text;
pub mod vad;
pub mod workers;

pub use audio::{AudioChunk, AudioConfig, AudioPhrase, AudioSource, MicSource, ScriptedSource};
pub use dispatcher::TranscriptionDispatcher;
pub use engine::{
    default_engines, ApiSttEngine, EngineFailure, EngineFailureKind, EngineOutcome,
    FixedReplyEngine, RecognitionEngine,
};
#[cfg(feature = "whisper")]
pub use engine::WhisperEngine;
pub use error::{DictationError, DictationResult};
pub use segmenter::{PhraseSegmenter, SegmenterConfig};
pub use session::{DictationController, SessionConfig, SessionState};
pub use sink::{
    spawn_consumer, transcript_channel, ConsoleSurface, MemorySurface, RenderSurface, SinkConfig,
    TranscriptConsumer, TranscriptEvent, TranscriptSink,
};
pub use text::collapse_repeated_words;
pub use vad::{EnergyVad, VadConfig};
pub use workers::WorkerRegistry;
