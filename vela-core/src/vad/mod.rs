//! Voice activity detection.
//!
//! Three layers, innermost first:
//!
//! - [`SpeechScorer`] — scores one 512-sample window, owning whatever
//!   recurrent state the model carries. [`silero::SileroModel`] is the
//!   production implementation.
//! - [`detector::SpeechDetector`] — PCM normalization, windowing and the
//!   dual-threshold hysteresis that turns raw probabilities into
//!   `SpeechStart` / `SpeechEnd` transitions.
//! - [`engine::VadEngine`] — async facade: offloads scoring to the blocking
//!   pool, broadcasts events, serializes `reset()` against processing.

pub mod detector;
pub mod engine;

#[cfg(feature = "onnx")]
pub mod silero;

#[cfg(feature = "onnx")]
pub use silero::SileroModel;

pub use detector::SpeechDetector;
pub use engine::VadEngine;

use crate::error::Result;

/// Samples consumed per inference window (32 ms at 16 kHz).
pub const WINDOW: usize = 512;

/// Input sample rate the detector is specified for.
pub const SAMPLE_RATE: u32 = 16_000;

/// Coarse speech boundary events with hysteresis already applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart,
    SpeechEnd,
}

/// Scores one window of normalized samples with speech probability in [0, 1].
///
/// Implementors may be stateful (RNN hidden tensors); all calls for one
/// stream go through a single detector, so `&mut self` is the contract.
pub trait SpeechScorer: Send + 'static {
    /// Score one window. `window.len()` is always [`WINDOW`].
    fn score(&mut self, window: &[f32]) -> Result<f32>;

    /// Zero all recurrent state.
    fn reset(&mut self);
}
