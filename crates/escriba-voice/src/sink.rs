//! Transcript sink: many producer threads, one render consumer.
//!
//! Phrase workers enqueue without blocking; a single consumer thread drains
//! everything queued on a fixed tick and renders in enqueue order. This is the
//! only bridge from workers into the rendering context — no other mutable
//! state is shared with them.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

/// One engine's text for one phrase, on its way to the render surface.
/// FIFO within a drain tick; no global sequencing across phrases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEvent {
    pub engine: String,
    pub text: String,
    pub phrase_id: u64,
}

/// Where rendered lines go. Called only from the single consumer thread.
pub trait RenderSurface: Send {
    fn render(&mut self, engine: &str, text: &str);
}

/// Prints `[ENGINE]: text` lines to stdout.
pub struct ConsoleSurface;

impl RenderSurface for ConsoleSurface {
    fn render(&mut self, engine: &str, text: &str) {
        println!("[{}]: {}", engine.to_uppercase(), text);
    }
}

/// Collects rendered pairs in memory; the test/demo counterpart of a real
/// display surface.
#[derive(Clone, Default)]
pub struct MemorySurface {
    lines: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl RenderSurface for MemorySurface {
    fn render(&mut self, engine: &str, text: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((engine.to_string(), text.to_string()));
    }
}

/// Sink configuration.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Consumer drain interval (default 100ms).
    pub drain_tick: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            drain_tick: Duration::from_millis(100),
        }
    }
}

/// Producer handle held by phrase workers. Enqueue never blocks; when the
/// consumer is gone the event is dropped silently.
#[derive(Clone)]
pub struct TranscriptSink {
    tx: mpsc::UnboundedSender<TranscriptEvent>,
}

impl TranscriptSink {
    pub fn push(&self, event: TranscriptEvent) {
        if self.tx.send(event).is_err() {
            debug!("transcript sink torn down; dropping event");
        }
    }
}

/// Create the sink pair: producer handle plus the receiver the consumer owns.
pub fn transcript_channel() -> (TranscriptSink, mpsc::UnboundedReceiver<TranscriptEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TranscriptSink { tx }, rx)
}

/// Empty everything queued right now, in enqueue order. Returns the rendered
/// count and whether the producer side has disconnected.
fn drain_queued(
    rx: &mut mpsc::UnboundedReceiver<TranscriptEvent>,
    surface: &mut dyn RenderSurface,
) -> (usize, bool) {
    let mut rendered = 0;
    loop {
        match rx.try_recv() {
            Ok(event) => {
                surface.render(&event.engine, &event.text);
                rendered += 1;
            }
            Err(TryRecvError::Empty) => return (rendered, false),
            Err(TryRecvError::Disconnected) => return (rendered, true),
        }
    }
}

/// Handle for the single consumer thread. Stopping performs one final drain so
/// already-queued events still render.
pub struct TranscriptConsumer {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TranscriptConsumer {
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TranscriptConsumer {
    fn drop(&mut self) {
        // Let a forgotten consumer wind down on its next tick.
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Spawn the render tick thread: every `drain_tick` it empties the queue onto
/// the surface. Exits when the producers disconnect or `stop()` is called.
pub fn spawn_consumer(
    config: SinkConfig,
    mut rx: mpsc::UnboundedReceiver<TranscriptEvent>,
    mut surface: Box<dyn RenderSurface>,
) -> TranscriptConsumer {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let mut tick = tokio::time::interval(config.drain_tick);
            loop {
                tick.tick().await;
                let (_, disconnected) = drain_queued(&mut rx, surface.as_mut());
                if disconnected {
                    break;
                }
                if shutdown_flag.load(Ordering::SeqCst) {
                    // Final drain: render whatever raced in before the stop.
                    drain_queued(&mut rx, surface.as_mut());
                    break;
                }
            }
        });
        debug!("transcript consumer stopped");
    });

    TranscriptConsumer {
        shutdown,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(engine: &str, text: &str) -> TranscriptEvent {
        TranscriptEvent {
            engine: engine.to_string(),
            text: text.to_string(),
            phrase_id: 0,
        }
    }

    #[test]
    fn one_drain_preserves_enqueue_order() {
        let (sink, mut rx) = transcript_channel();
        sink.push(event("e1", "a"));
        sink.push(event("e2", "b"));
        sink.push(event("e1", "c"));

        let mut surface = MemorySurface::new();
        let (rendered, disconnected) = drain_queued(&mut rx, &mut surface);

        assert_eq!(rendered, 3);
        assert!(!disconnected);
        assert_eq!(
            surface.lines(),
            vec![
                ("e1".to_string(), "a".to_string()),
                ("e2".to_string(), "b".to_string()),
                ("e1".to_string(), "c".to_string()),
            ]
        );
    }

    #[test]
    fn push_after_teardown_is_dropped_silently() {
        let (sink, rx) = transcript_channel();
        drop(rx);
        sink.push(event("e1", "late")); // must not panic
    }

    #[test]
    fn consumer_renders_on_its_tick_and_drains_on_stop() {
        let (sink, rx) = transcript_channel();
        let surface = MemorySurface::new();
        let consumer = spawn_consumer(
            SinkConfig {
                drain_tick: Duration::from_millis(10),
            },
            rx,
            Box::new(surface.clone()),
        );

        sink.push(event("e1", "a"));
        sink.push(event("e2", "b"));
        thread::sleep(Duration::from_millis(60));
        assert_eq!(surface.lines().len(), 2);

        sink.push(event("e1", "c"));
        consumer.stop();
        assert_eq!(
            surface.lines().last(),
            Some(&("e1".to_string(), "c".to_string()))
        );
    }

    #[test]
    fn consumer_exits_when_producers_disconnect() {
        let (sink, rx) = transcript_channel();
        let surface = MemorySurface::new();
        let consumer = spawn_consumer(SinkConfig::default(), rx, Box::new(surface.clone()));

        sink.push(event("e1", "a"));
        drop(sink);

        // The consumer thread should terminate on its own once the channel
        // closes; join via stop() must not hang.
        consumer.stop();
        assert_eq!(surface.lines(), vec![("e1".to_string(), "a".to_string())]);
    }
}
