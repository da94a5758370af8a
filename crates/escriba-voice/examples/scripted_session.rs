//! Scripted session demo — the full pipeline with no audio hardware.
//!
//! Replays a synthetic "two utterances" script through the segmenter and a
//! pair of placeholder engines, one healthy and one permanently offline, to
//! show failure isolation end to end.

use escriba_voice::{
    ConsoleSurface, DictationController, EngineFailure, FixedReplyEngine, RecognitionEngine,
    ScriptedSource, SessionConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let chunk = 480; // 30ms at 16kHz
    let mut script = ScriptedSource::silence_chunks(20, chunk); // ambient
    script.extend(ScriptedSource::speech_chunks(34, chunk)); // "primeira frase"
    script.extend(ScriptedSource::silence_chunks(70, chunk)); // gap
    script.extend(ScriptedSource::speech_chunks(50, chunk)); // "segunda frase"
    script.extend(ScriptedSource::silence_chunks(70, chunk)); // gap

    let source =
        ScriptedSource::new(16_000, script).with_pace(Duration::from_millis(2));
    let engines: Vec<Arc<dyn RecognitionEngine>> = vec![
        Arc::new(FixedReplyEngine::placeholder("local")),
        Arc::new(FixedReplyEngine::failing(
            "cloud",
            EngineFailure::network("no network in this demo"),
        )),
    ];

    let mut controller =
        DictationController::new(SessionConfig::default(), engines, Box::new(source));
    controller.start_recording(Box::new(ConsoleSurface))?;

    // Let the script play out, then shut down cleanly.
    std::thread::sleep(Duration::from_secs(2));
    controller.close();
    info!("scripted session finished");
    Ok(())
}
