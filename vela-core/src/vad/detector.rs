//! Hysteresis state machine over raw speech probabilities.
//!
//! ## Transitions
//!
//! ```text
//!            prob ≥ speech_threshold
//! inactive ───────────────────────────► active (SpeechStart)
//!
//!            prob < silence_threshold for ≥ min_silence_ms
//!            AND active for ≥ min_speech_ms
//! active   ───────────────────────────► inactive (SpeechEnd)
//! ```
//!
//! Time is the audio-stream clock: every 512-sample window advances "now"
//! by 32 ms, so the machine behaves identically under test and in real
//! time. The last window's probability in a call is the one published and
//! the one that drives the state update.

use std::time::Duration;

use tracing::warn;

use crate::config::VadTuning;
use crate::stats::PipelineStats;
use crate::vad::{SpeechScorer, VadEvent, SAMPLE_RATE, WINDOW};

/// Stream-time length of one window.
const WINDOW_DURATION: Duration = Duration::from_millis((WINDOW as u64 * 1_000) / SAMPLE_RATE as u64);

/// Converts PCM chunks into speech boundary events.
///
/// Owned exclusively by [`super::engine::VadEngine`]; nothing outside the
/// VAD may observe or mutate the recurrent state.
pub struct SpeechDetector {
    scorer: Option<Box<dyn SpeechScorer>>,
    tuning: VadTuning,
    /// Audio-stream clock; advances one window per scored window.
    clock: Duration,
    active: bool,
    speech_started_at: Duration,
    silence_onset: Option<Duration>,
    last_probability: f32,
}

impl SpeechDetector {
    pub fn new(scorer: Box<dyn SpeechScorer>, tuning: VadTuning) -> Self {
        Self {
            scorer: Some(scorer),
            tuning,
            clock: Duration::ZERO,
            active: false,
            speech_started_at: Duration::ZERO,
            silence_onset: None,
            last_probability: 0.0,
        }
    }

    /// Feed one chunk of signed 16-bit little-endian mono PCM at 16 kHz.
    ///
    /// The chunk is split into non-overlapping 512-sample windows; remainder
    /// samples are discarded within the call. Returns the published
    /// probability and at most one boundary event. A chunk shorter than one
    /// window produces neither.
    pub fn process(&mut self, pcm: &[u8], stats: &PipelineStats) -> (Option<f32>, Option<VadEvent>) {
        let mut probability = None;

        let mut window = [0.0f32; WINDOW];
        for chunk in pcm.chunks_exact(2 * WINDOW) {
            for (sample, bytes) in window.iter_mut().zip(chunk.chunks_exact(2)) {
                *sample = i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0;
            }
            probability = Some(self.score_window(&window, stats));
            self.clock += WINDOW_DURATION;
        }

        let Some(probability) = probability else {
            return (None, None);
        };
        self.last_probability = probability;

        (Some(probability), self.apply_hysteresis(probability))
    }

    fn score_window(&mut self, window: &[f32], stats: &PipelineStats) -> f32 {
        stats
            .vad_windows
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let Some(scorer) = self.scorer.as_mut() else {
            warn!("speech scorer released, treating window as silence");
            return 0.0;
        };
        match scorer.score(window) {
            Ok(probability) => probability.clamp(0.0, 1.0),
            Err(e) => {
                // Per-window failure is silence, never fatal.
                stats
                    .inference_errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                warn!("speech scoring failed: {e}");
                0.0
            }
        }
    }

    fn apply_hysteresis(&mut self, probability: f32) -> Option<VadEvent> {
        let now = self.clock;

        if !self.active {
            if probability >= self.tuning.speech_threshold {
                self.active = true;
                self.speech_started_at = now;
                self.silence_onset = None;
                return Some(VadEvent::SpeechStart);
            }
            return None;
        }

        if probability >= self.tuning.silence_threshold {
            // Still speaking.
            self.silence_onset = None;
            return None;
        }

        let onset = *self.silence_onset.get_or_insert(now);
        let silence_long_enough = now - onset >= Duration::from_millis(self.tuning.min_silence_ms);
        let speech_long_enough =
            now - self.speech_started_at >= Duration::from_millis(self.tuning.min_speech_ms);
        if silence_long_enough && speech_long_enough {
            self.active = false;
            self.silence_onset = None;
            return Some(VadEvent::SpeechEnd);
        }
        None
    }

    /// Latest published probability.
    pub fn last_probability(&self) -> f32 {
        self.last_probability
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Zero recurrent state, clear timers, force inactive.
    pub fn reset(&mut self) {
        if let Some(scorer) = self.scorer.as_mut() {
            scorer.reset();
        }
        self.clock = Duration::ZERO;
        self.active = false;
        self.speech_started_at = Duration::ZERO;
        self.silence_onset = None;
        self.last_probability = 0.0;
    }

    /// Drop the inference session. Further windows score as silence.
    pub fn release(&mut self) {
        self.scorer = None;
    }
}
