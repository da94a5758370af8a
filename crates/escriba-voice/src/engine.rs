//! Recognition engines: pluggable speech-to-text backends.
//!
//! The pipeline only needs `recognize(phrase) -> text`; identity and count of
//! engines is configuration. A cloud engine and a local Whisper engine can run
//! side by side — one failing never disturbs the other's result slot.

use crate::audio::AudioPhrase;
use crate::error::{DictationError, DictationResult};
use crate::text::collapse_repeated_words;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Why one engine produced no text for one phrase. Never escapes its result
/// slot in the dispatcher's mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFailureKind {
    /// Transport-level failure reaching a remote engine.
    Network,
    /// Engine not usable at all (model missing, backend gone).
    Unavailable,
    /// Engine ran and errored.
    Failed,
}

/// A contained per-engine error, tagged with its kind so diagnostics can tell
/// a dead network from a broken model.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineFailure {
    pub kind: EngineFailureKind,
    pub message: String,
}

impl EngineFailure {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: EngineFailureKind::Network,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: EngineFailureKind::Unavailable,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: EngineFailureKind::Failed,
            message: message.into(),
        }
    }
}

/// Tagged per-engine result: transcribed text, or a contained failure.
pub type EngineOutcome = Result<String, EngineFailure>;

/// Backend for converting one phrase to text. Implement for cloud APIs or
/// local models; `recognize` may block (called from a dispatch thread).
pub trait RecognitionEngine: Send + Sync {
    /// Engine name, unique within one dispatcher's configuration.
    fn name(&self) -> &str;

    /// Transcribe one phrase. PCM is mono f32; return an empty string when the
    /// engine understood nothing (that is not a failure).
    fn recognize(&self, phrase: &AudioPhrase) -> EngineOutcome;
}

/// Encode a phrase to 16-bit PCM WAV bytes for API upload.
fn phrase_to_wav(phrase: &AudioPhrase) -> Result<Vec<u8>, EngineFailure> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: phrase.sample_rate,
        bits_per_sample: phrase.sample_width * 8,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| EngineFailure::failed(format!("WAV encode failed: {}", e)))?;
        for &sample in phrase.samples.iter() {
            let value = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            writer
                .write_sample(value)
                .map_err(|e| EngineFailure::failed(format!("WAV encode failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| EngineFailure::failed(format!("WAV encode failed: {}", e)))?;
    }
    Ok(cursor.into_inner())
}

/// Cloud engine: OpenAI-compatible transcription API (OpenAI Whisper,
/// OpenRouter, self-hosted gateways). Uploads the phrase as a WAV part.
#[derive(Debug, Clone)]
pub struct ApiSttEngine {
    name: String,
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    base_url: String,
    api_key: String,
    /// Model: whisper-1, gpt-4o-transcribe, etc.
    model: String,
    /// ISO language hint passed to the API (default "pt").
    language: String,
    client: reqwest::blocking::Client,
}

impl ApiSttEngine {
    /// Build from environment: `ESCRIBA_STT_API_URL`, `ESCRIBA_STT_API_KEY`
    /// (required), `ESCRIBA_STT_MODEL`, `ESCRIBA_STT_LANGUAGE`,
    /// `ESCRIBA_STT_ENGINE_NAME`.
    pub fn from_env() -> DictationResult<Self> {
        let base_url = std::env::var("ESCRIBA_STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("ESCRIBA_STT_API_KEY").map_err(|_| {
            DictationError::Config("cloud engine requires ESCRIBA_STT_API_KEY".to_string())
        })?;
        let model =
            std::env::var("ESCRIBA_STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let language =
            std::env::var("ESCRIBA_STT_LANGUAGE").unwrap_or_else(|_| "pt".to_string());
        let name =
            std::env::var("ESCRIBA_STT_ENGINE_NAME").unwrap_or_else(|_| "cloud".to_string());
        Self::new(name, base_url, api_key, model, language)
    }

    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> DictationResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| DictationError::Config(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            language: language.into(),
            client,
        })
    }
}

impl RecognitionEngine for ApiSttEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&self, phrase: &AudioPhrase) -> EngineOutcome {
        if phrase.samples.is_empty() {
            return Ok(String::new());
        }

        let wav = phrase_to_wav(phrase)?;
        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let part = reqwest::blocking::multipart::Part::bytes(wav)
            .file_name("phrase.wav")
            .mime_str("audio/wav")
            .map_err(|e| EngineFailure::failed(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|e| EngineFailure::network(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(EngineFailure::network(format!(
                "API error {}: {}",
                status, body
            )));
        }

        let json: serde_json::Value = res
            .json()
            .map_err(|e| EngineFailure::failed(e.to_string()))?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim();
        Ok(collapse_repeated_words(text))
    }
}

/// Deterministic engine for demos and tests: a fixed reply, a fixed failure,
/// or (by default) a descriptive placeholder line.
#[derive(Debug, Clone)]
pub struct FixedReplyEngine {
    name: String,
    reply: Option<EngineOutcome>,
}

impl FixedReplyEngine {
    /// Placeholder: describes the phrase it received.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reply: None,
        }
    }

    /// Always succeeds with `text`.
    pub fn ok(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reply: Some(Ok(text.into())),
        }
    }

    /// Always fails with `failure`.
    pub fn failing(name: impl Into<String>, failure: EngineFailure) -> Self {
        Self {
            name: name.into(),
            reply: Some(Err(failure)),
        }
    }
}

impl RecognitionEngine for FixedReplyEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&self, phrase: &AudioPhrase) -> EngineOutcome {
        match &self.reply {
            Some(reply) => reply.clone(),
            None => Ok(format!(
                "[{}: phrase {} — {} samples, {:.1}s]",
                self.name,
                phrase.id,
                phrase.samples.len(),
                phrase.duration().as_secs_f32()
            )),
        }
    }
}

// -----------------------------------------------------------------------------
// Local Whisper engine (optional feature). Requires whisper.cpp/ggml.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod whisper_engine {
    use super::*;
    use std::sync::Mutex;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Local Whisper engine: loads a ggml quantized model (e.g. ggml-base.bin)
    /// and runs inference on-device. Audio must be 16 kHz mono f32.
    pub struct WhisperEngine {
        name: String,
        language: String,
        #[allow(dead_code)]
        context: WhisperContext,
        state: Mutex<whisper_rs::WhisperState>,
    }

    impl WhisperEngine {
        /// Load the model from `model_path` (e.g. path to ggml-base.bin).
        pub fn new(model_path: &str, language: impl Into<String>) -> DictationResult<Self> {
            let params = WhisperContextParameters::default();
            let context = WhisperContext::new_with_params(model_path, params).map_err(|e| {
                DictationError::Config(format!("Whisper load failed: {}", e))
            })?;
            let state = context.create_state().map_err(|e| {
                DictationError::Config(format!("Whisper state init failed: {}", e))
            })?;
            Ok(Self {
                name: "whisper".to_string(),
                language: language.into(),
                context,
                state: Mutex::new(state),
            })
        }

        /// Build from env: `ESCRIBA_WHISPER_MODEL_PATH` must point to a .bin
        /// model; `ESCRIBA_STT_LANGUAGE` selects the language (default "pt").
        pub fn from_env() -> DictationResult<Self> {
            let path = std::env::var("ESCRIBA_WHISPER_MODEL_PATH").map_err(|_| {
                DictationError::Config("ESCRIBA_WHISPER_MODEL_PATH not set".to_string())
            })?;
            let path = path.trim();
            if path.is_empty() {
                return Err(DictationError::Config(
                    "ESCRIBA_WHISPER_MODEL_PATH is empty".to_string(),
                ));
            }
            let language =
                std::env::var("ESCRIBA_STT_LANGUAGE").unwrap_or_else(|_| "pt".to_string());
            Self::new(path, language)
        }
    }

    impl RecognitionEngine for WhisperEngine {
        fn name(&self) -> &str {
            &self.name
        }

        fn recognize(&self, phrase: &AudioPhrase) -> EngineOutcome {
            if phrase.samples.is_empty() {
                return Ok(String::new());
            }
            if phrase.sample_rate != 16_000 {
                return Err(EngineFailure::failed(format!(
                    "Whisper expects 16 kHz; got {} Hz",
                    phrase.sample_rate
                )));
            }

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_no_timestamps(true);
            params.set_language(Some(&self.language));

            let mut state = self
                .state
                .lock()
                .map_err(|e| EngineFailure::failed(format!("Whisper lock poisoned: {}", e)))?;
            state
                .full(&params, &phrase.samples)
                .map_err(|e| EngineFailure::failed(format!("Whisper inference failed: {}", e)))?;
            let text = state
                .as_iter()
                .filter_map(|seg| seg.to_str().ok())
                .collect::<Vec<_>>()
                .join(" ")
                .trim()
                .to_string();
            Ok(collapse_repeated_words(&text))
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_engine::WhisperEngine;

/// Assemble every engine available from the environment: local Whisper when
/// the `whisper` feature and `ESCRIBA_WHISPER_MODEL_PATH` are present, the
/// cloud API when `ESCRIBA_STT_API_KEY` is set, and a placeholder when
/// nothing else is configured (so the pipeline always has output).
pub fn default_engines() -> Vec<Arc<dyn RecognitionEngine>> {
    let mut engines: Vec<Arc<dyn RecognitionEngine>> = Vec::new();

    #[cfg(feature = "whisper")]
    {
        match WhisperEngine::from_env() {
            Ok(whisper) => {
                info!("engine 'whisper': local model loaded");
                engines.push(Arc::new(whisper));
            }
            Err(e) => info!("local Whisper engine not configured: {}", e),
        }
    }

    match ApiSttEngine::from_env() {
        Ok(api) => {
            info!("engine '{}': cloud transcription API", api.name());
            engines.push(Arc::new(api));
        }
        Err(e) => info!("cloud engine not configured: {}", e),
    }

    if engines.is_empty() {
        info!("no engine configured; using placeholder");
        engines.push(Arc::new(FixedReplyEngine::placeholder("placeholder")));
    }

    engines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn phrase(samples: Vec<f32>) -> AudioPhrase {
        AudioPhrase {
            id: 7,
            samples: Arc::new(samples),
            sample_rate: 16_000,
            sample_width: 2,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn placeholder_describes_the_phrase() {
        let engine = FixedReplyEngine::placeholder("demo");
        let text = engine.recognize(&phrase(vec![0.0; 480])).unwrap();
        assert!(text.contains("demo"));
        assert!(text.contains("480"));
    }

    #[test]
    fn fixed_reply_and_failure() {
        let ok = FixedReplyEngine::ok("ok", "bom dia");
        assert_eq!(ok.recognize(&phrase(vec![])).unwrap(), "bom dia");

        let failing = FixedReplyEngine::failing("down", EngineFailure::network("offline"));
        let err = failing.recognize(&phrase(vec![])).unwrap_err();
        assert_eq!(err.kind, EngineFailureKind::Network);
    }

    #[test]
    fn wav_encoding_carries_header_and_samples() {
        let wav = phrase_to_wav(&phrase(vec![0.25; 480])).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte header + 2 bytes per sample
        assert_eq!(wav.len(), 44 + 480 * 2);
    }

    #[test]
    fn api_engine_skips_empty_phrases() {
        let engine =
            ApiSttEngine::new("cloud", "http://localhost:1", "key", "whisper-1", "pt").unwrap();
        assert_eq!(engine.recognize(&phrase(vec![])).unwrap(), "");
    }
}
