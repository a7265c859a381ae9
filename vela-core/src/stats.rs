//! Shared pipeline counters for observability.
//!
//! Written with relaxed atomics from the hot paths; read via `snapshot()`
//! by whatever surface embeds the core. Counters are monotonic between
//! `reset()` calls and carry no timing information.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Audio chunks handed to the transport.
    pub audio_frames_out: AtomicUsize,
    /// Image frames handed to the transport.
    pub image_frames_out: AtomicUsize,
    /// Outgoing frames dropped because the connection could not accept them.
    pub send_drops: AtomicUsize,
    /// Server frames received (before decoding).
    pub frames_in: AtomicUsize,
    /// Server frames dropped as malformed or unrecognized.
    pub decode_errors: AtomicUsize,
    /// Model audio bytes pushed to the playback channel.
    pub audio_bytes_in: AtomicUsize,
    /// 512-sample windows scored by the VAD.
    pub vad_windows: AtomicUsize,
    /// VAD windows whose inference failed (scored as silence).
    pub inference_errors: AtomicUsize,
    /// Reconnect attempts started.
    pub reconnect_attempts: AtomicUsize,
}

impl PipelineStats {
    pub fn reset(&self) {
        self.audio_frames_out.store(0, Ordering::Relaxed);
        self.image_frames_out.store(0, Ordering::Relaxed);
        self.send_drops.store(0, Ordering::Relaxed);
        self.frames_in.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.audio_bytes_in.store(0, Ordering::Relaxed);
        self.vad_windows.store(0, Ordering::Relaxed);
        self.inference_errors.store(0, Ordering::Relaxed);
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            audio_frames_out: self.audio_frames_out.load(Ordering::Relaxed),
            image_frames_out: self.image_frames_out.load(Ordering::Relaxed),
            send_drops: self.send_drops.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            audio_bytes_in: self.audio_bytes_in.load(Ordering::Relaxed),
            vad_windows: self.vad_windows.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub audio_frames_out: usize,
    pub image_frames_out: usize,
    pub send_drops: usize,
    pub frames_in: usize,
    pub decode_errors: usize,
    pub audio_bytes_in: usize,
    pub vad_windows: usize,
    pub inference_errors: usize,
    pub reconnect_attempts: usize,
}
