//! Async facade over the speech detector.
//!
//! Scoring runs a neural model, so each chunk is offloaded to the blocking
//! pool; the async caller suspends until inference returns. The detector
//! sits behind one `parking_lot::Mutex`, which makes `reset()` atomic with
//! respect to in-flight processing.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::config::VadTuning;
use crate::error::{Result, VelaError};
use crate::stats::PipelineStats;
use crate::vad::{SpeechDetector, SpeechScorer, VadEvent};

/// Boundary events buffered for slow consumers.
const EVENT_CAP: usize = 64;

pub struct VadEngine {
    detector: Arc<Mutex<SpeechDetector>>,
    stats: Arc<PipelineStats>,
    events_tx: broadcast::Sender<VadEvent>,
}

impl VadEngine {
    pub fn new(scorer: Box<dyn SpeechScorer>, tuning: VadTuning, stats: Arc<PipelineStats>) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAP);
        Self {
            detector: Arc::new(Mutex::new(SpeechDetector::new(scorer, tuning))),
            stats,
            events_tx,
        }
    }

    /// Run one PCM chunk through the detector on the blocking pool.
    ///
    /// Returns the published probability for the chunk (`None` when the
    /// chunk was shorter than one window). Boundary events are broadcast to
    /// subscribers before this returns.
    pub async fn process_audio_chunk(&self, pcm: Vec<u8>) -> Result<Option<f32>> {
        let detector = Arc::clone(&self.detector);
        let stats = Arc::clone(&self.stats);
        let (probability, event) = tokio::task::spawn_blocking(move || {
            let mut detector = detector.lock();
            detector.process(&pcm, &stats)
        })
        .await
        .map_err(|e| VelaError::Inference(format!("vad worker died: {e}")))?;

        if let Some(event) = event {
            let _ = self.events_tx.send(event);
        }
        Ok(probability)
    }

    /// Subscribe to speech boundary events.
    pub fn subscribe(&self) -> broadcast::Receiver<VadEvent> {
        self.events_tx.subscribe()
    }

    /// Zero hidden state and timers. Atomic w.r.t. `process_audio_chunk`.
    pub fn reset(&self) {
        self.detector.lock().reset();
    }

    /// Drop the inference session.
    pub fn release(&self) {
        self.detector.lock().release();
    }

    /// Whether the detector currently considers the user speaking.
    pub fn is_active(&self) -> bool {
        self.detector.lock().is_active()
    }
}
