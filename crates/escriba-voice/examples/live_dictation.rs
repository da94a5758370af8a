//! Live dictation demo — microphone → phrases → every configured engine.
//!
//! Engines come from the environment: local Whisper when built with
//! `--features whisper` and `ESCRIBA_WHISPER_MODEL_PATH` is set, the cloud
//! API when `ESCRIBA_STT_API_KEY` is set, a placeholder otherwise. Transcript
//! lines print as `[ENGINE]: text`.

use escriba_voice::{
    default_engines, ConsoleSurface, DictationController, MicSource, SessionConfig,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = SessionConfig::from_env()?;
    let engines = default_engines();
    let source = MicSource::new(config.audio.clone());

    let mut controller = DictationController::new(config, engines, Box::new(source));
    controller.start_recording(Box::new(ConsoleSurface))?;

    info!("listening — speak into the microphone; press Enter to stop");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    let abandoned = controller.close();
    if abandoned > 0 {
        info!("done ({} slow worker(s) abandoned)", abandoned);
    } else {
        info!("done");
    }
    Ok(())
}
