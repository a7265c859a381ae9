//! Typed configuration for the session core.
//!
//! All tunables are plain data with validated ranges. `VelaConfig::validate`
//! runs once at `start()`; a bad value surfaces as a fatal `Config` error
//! before any device or transport is touched.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, VelaError};

/// Default live endpoint. Overridable for proxy deployments; when no
/// credential is configured the endpoint is assumed to inject one itself.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model id used when the caller does not pick one.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Default prebuilt voice for audio responses.
pub const DEFAULT_VOICE: &str = "Aoede";

/// Top-level configuration record, immutable once the coordinator starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VelaConfig {
    /// Transport URL for the live session.
    pub endpoint: String,
    /// Optional API credential, appended as the `key` query parameter.
    /// `None` assumes the endpoint routes through a credential proxy.
    pub credential: Option<String>,
    /// Model id sent in the setup frame.
    pub model: String,
    /// Prebuilt voice id for the speech config.
    pub voice: String,
    pub camera: CameraConfig,
    pub reconnect: ReconnectConfig,
    pub vad: VadTuning,
}

impl Default for VelaConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            credential: None,
            model: DEFAULT_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            camera: CameraConfig::default(),
            reconnect: ReconnectConfig::default(),
            vad: VadTuning::default(),
        }
    }
}

impl VelaConfig {
    /// Validate all numeric ranges. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(VelaError::Config("endpoint must not be empty".into()));
        }
        if self.model.is_empty() {
            return Err(VelaError::Config("model id must not be empty".into()));
        }
        self.camera.validate()?;
        self.reconnect.validate()?;
        self.vad.validate()?;
        Ok(())
    }

    /// Build the transport URL, appending the `key` query parameter when a
    /// direct credential is configured.
    pub fn session_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| VelaError::Config(format!("invalid endpoint: {e}")))?;
        if let Some(credential) = &self.credential {
            url.query_pairs_mut().append_pair("key", credential);
        }
        Ok(url)
    }
}

/// Capture parameters handed to the camera source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CameraConfig {
    /// Image capture rate in frames per second. Valid range: 1–4.
    pub fps: u32,
    /// JPEG compression quality. Valid range: 10–100.
    pub jpeg_quality: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fps: 2,
            jpeg_quality: 50,
            width: 640,
            height: 480,
        }
    }
}

impl CameraConfig {
    fn validate(&self) -> Result<()> {
        if !(1..=4).contains(&self.fps) {
            return Err(VelaError::Config(format!(
                "camera.fps out of range [1, 4]: {}",
                self.fps
            )));
        }
        if !(10..=100).contains(&self.jpeg_quality) {
            return Err(VelaError::Config(format!(
                "camera.jpeg_quality out of range [10, 100]: {}",
                self.jpeg_quality
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(VelaError::Config("camera resolution must be non-zero".into()));
        }
        Ok(())
    }
}

/// Reconnection budget and exponential backoff base.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum reconnect attempts per unclean disconnect.
    pub max_attempts: u32,
    /// Base delay in milliseconds; attempt `n` waits `base · 2^(n-1)`,
    /// capped at 30 s.
    pub base_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(VelaError::Config("reconnect.max_attempts must be ≥ 1".into()));
        }
        if self.base_delay_ms == 0 {
            return Err(VelaError::Config("reconnect.base_delay_ms must be ≥ 1".into()));
        }
        Ok(())
    }
}

/// Hysteresis thresholds and timing for the speech detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VadTuning {
    /// Probability at or above which speech starts.
    pub speech_threshold: f32,
    /// Probability below which silence accumulates. Must stay below
    /// `speech_threshold` so the detector cannot oscillate on one value.
    pub silence_threshold: f32,
    /// Minimum speech duration before a `SpeechEnd` may fire.
    pub min_speech_ms: u64,
    /// Minimum trailing silence before a `SpeechEnd` fires.
    pub min_silence_ms: u64,
}

impl Default for VadTuning {
    fn default() -> Self {
        Self {
            speech_threshold: 0.5,
            silence_threshold: 0.35,
            min_speech_ms: 250,
            min_silence_ms: 100,
        }
    }
}

impl VadTuning {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.speech_threshold)
            || !(0.0..=1.0).contains(&self.silence_threshold)
        {
            return Err(VelaError::Config(
                "vad thresholds must lie in [0, 1]".into(),
            ));
        }
        if self.silence_threshold >= self.speech_threshold {
            return Err(VelaError::Config(
                "vad.silence_threshold must be below vad.speech_threshold".into(),
            ));
        }
        Ok(())
    }
}
