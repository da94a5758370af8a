//! Fan-out of one phrase to every registered engine, fan-in of all results.

use crate::audio::AudioPhrase;
use crate::engine::{EngineFailure, EngineOutcome, RecognitionEngine};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Dispatches each phrase to N engines concurrently and collects a snapshot
/// mapping of every engine's outcome. Holds no per-phrase state; safe to share
/// across phrase workers behind an `Arc`.
pub struct TranscriptionDispatcher {
    engines: Vec<Arc<dyn RecognitionEngine>>,
}

impl TranscriptionDispatcher {
    /// Engine names must be unique; duplicates are dropped with a warning so
    /// the result mapping always carries one slot per configured engine.
    pub fn new(engines: Vec<Arc<dyn RecognitionEngine>>) -> Self {
        let mut unique: Vec<Arc<dyn RecognitionEngine>> = Vec::with_capacity(engines.len());
        for engine in engines {
            if unique.iter().any(|e| e.name() == engine.name()) {
                warn!("duplicate engine name '{}' dropped", engine.name());
                continue;
            }
            unique.push(engine);
        }
        Self { engines: unique }
    }

    pub fn engine_names(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.name().to_string()).collect()
    }

    /// Run every engine against the identical phrase buffer, one thread per
    /// engine, and wait for **all** of them (not first-completed). A failure
    /// or panic in one engine is contained in its own slot; siblings run to
    /// completion untouched. Blocks the calling phrase worker only — never
    /// the segmenter and never the render consumer.
    pub fn transcribe_all(&self, phrase: &AudioPhrase) -> BTreeMap<String, EngineOutcome> {
        let mut outcomes = BTreeMap::new();

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.engines.len());
            for engine in &self.engines {
                let name = engine.name().to_string();
                debug!("phrase {} → engine '{}'", phrase.id, name);
                let handle = scope.spawn(move || engine.recognize(phrase));
                handles.push((name, handle));
            }

            for (name, handle) in handles {
                let outcome = handle
                    .join()
                    .unwrap_or_else(|_| Err(EngineFailure::failed("engine panicked")));
                outcomes.insert(name, outcome);
            }
        });

        outcomes
    }
}
