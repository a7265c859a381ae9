use thiserror::Error;

use crate::protocol::ProtocolError;

/// All errors produced by vela-core.
#[derive(Debug, Error)]
pub enum VelaError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("initialization error: {0}")]
    Init(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("coordinator is already running")]
    AlreadyRunning,

    #[error("coordinator is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VelaError>;
