//! Capture source interfaces consumed by the coordinator.
//!
//! Platform drivers (camera HAL, microphone stack, permissions) live outside
//! this crate. The coordinator only sees hot streams of owned frames:
//!
//! - camera: compressed still images at a source-controlled rate (1–4 fps)
//! - microphone: signed 16-bit little-endian mono PCM at 16 kHz, ~100 ms
//!   per chunk
//!
//! Frames are ephemeral; nothing in the core persists them.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::CameraConfig;
use crate::error::Result;

/// One compressed still image with its declared media type.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageFrame {
    /// Convenience constructor for the common JPEG case.
    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "image/jpeg".into(),
        }
    }
}

/// Camera driver seam. `start` returns a hot frame stream; the sender side
/// is owned by the driver and closed when the driver stops.
#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn start(&self, config: &CameraConfig) -> Result<mpsc::Receiver<ImageFrame>>;

    /// Stop capturing. Idempotent.
    async fn stop(&self);
}

/// Microphone driver seam. Chunks are raw i16-LE bytes at 16 kHz mono.
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    async fn start(&self) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Stop capturing. Idempotent.
    async fn stop(&self);
}
