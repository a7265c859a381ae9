//! # vela-core
//!
//! Real-time session core of the Vela assistant.
//!
//! ## Architecture
//!
//! ```text
//! Camera ─► CameraForwarder ──────────────► SessionClient ─► WebSocket
//! Mic ────► AudioForwarder ─► VadEngine ──┘        │
//!                                │                 │ model PCM
//!                          SpeechStart/End         ▼
//!                                │          ResponseHandler ─► PcmPlayer
//!                                ▼
//!                           VadHandler (barge-in + turn signals)
//!
//! StateMapper: (connectionState, isPlaying, isSpeaking) ─► state
//! ```
//!
//! The coordinator owns all of it; capture drivers and UI live outside
//! this crate and talk to it through the `capture` traits and the watch /
//! broadcast observables.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod instructions;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{PcmPlayer, Player};
pub use capture::{CameraSource, ImageFrame, MicrophoneSource};
pub use config::{CameraConfig, ReconnectConfig, VadTuning, VelaConfig};
pub use coordinator::{Coordinator, CoordinatorDeps, CoordinatorState, ScorerFactory};
pub use error::VelaError;
pub use instructions::AssistMode;
pub use session::transport::{Connector, WsConnector};
pub use session::{ConnectionState, SessionClient, SessionEvent};
pub use stats::StatsSnapshot;
pub use vad::{SpeechScorer, VadEngine, VadEvent};

#[cfg(feature = "onnx")]
pub use vad::SileroModel;
