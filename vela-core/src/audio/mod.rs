//! Streaming playback of model audio.
//!
//! # Design constraints
//!
//! The cpal output callback runs on an OS audio thread at elevated
//! priority. It **must not** allocate, block on a contended lock, or
//! perform I/O. The callback therefore pops samples under `try_lock` and
//! renders silence when the queue lock is momentarily held elsewhere.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). The stream is created, paused, resumed and dropped on one
//! dedicated render thread; `pause()`/`resume()` reach it through a
//! crossbeam command channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{Result, VelaError};

/// Model audio is 24 kHz signed 16-bit mono.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Playback seam consumed by the coordinator.
///
/// The contract the coordinator relies on for barge-in: after `flush()`
/// returns, no chunk enqueued before the flush will ever be rendered.
#[async_trait]
pub trait Player: Send + Sync {
    /// Open the output device. Idempotent; also invoked lazily by the
    /// first `enqueue`.
    async fn initialize(&self) -> Result<()>;

    /// Append one chunk of i16-LE PCM to the playback queue.
    async fn enqueue(&self, pcm: Vec<u8>) -> Result<()>;

    /// Suspend rendering. Queued data is retained.
    async fn pause(&self);

    /// Reverse `pause()`.
    async fn resume(&self);

    /// Drop everything queued and anything the device has not yet rendered.
    /// Safe to call while paused.
    async fn flush(&self);

    /// Stop rendering and release the device.
    async fn release(&self);

    /// Snapshot of the playing flag.
    fn is_playing(&self) -> bool;

    /// Observable playing flag for the state mapper.
    fn playing_watch(&self) -> watch::Receiver<bool>;
}

// ---------------------------------------------------------------------------
// Sample queue
// ---------------------------------------------------------------------------

/// FIFO of decoded samples shared between the async side and the device
/// callback. One mutex serializes enqueue, flush and pop, which is what
/// makes the flush guarantee hold: once `clear()` returns, a sample queued
/// before it can no longer be popped.
pub(crate) struct PlaybackQueue {
    samples: Mutex<VecDeque<i16>>,
    paused: AtomicBool,
}

impl PlaybackQueue {
    pub(crate) fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            paused: AtomicBool::new(false),
        }
    }

    /// Append i16-LE bytes. A trailing odd byte is dropped.
    pub(crate) fn push(&self, pcm: &[u8]) {
        let mut samples = self.samples.lock();
        samples.extend(
            pcm.chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
    }

    /// Pop up to `out.len()` samples; the rest of `out` is zeroed.
    /// Returns the number of real samples written. Never blocks: a
    /// contended lock renders one buffer of silence.
    pub(crate) fn pop_into(&self, out: &mut [i16]) -> usize {
        if self.paused.load(Ordering::Relaxed) {
            out.fill(0);
            return 0;
        }
        let Some(mut samples) = self.samples.try_lock() else {
            out.fill(0);
            return 0;
        };
        let n = out.len().min(samples.len());
        for slot in out.iter_mut().take(n) {
            *slot = samples.pop_front().unwrap_or(0);
        }
        out[n..].fill(0);
        n
    }

    pub(crate) fn clear(&self) {
        self.samples.lock().clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub(crate) fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Device-backed player
// ---------------------------------------------------------------------------

enum PlayerCommand {
    Pause,
    Resume,
    Shutdown,
}

/// cpal-backed streaming player.
pub struct PcmPlayer {
    queue: Arc<PlaybackQueue>,
    playing_tx: Arc<watch::Sender<bool>>,
    control: Mutex<Option<Sender<PlayerCommand>>>,
}

impl PcmPlayer {
    pub fn new() -> Self {
        let (playing_tx, _) = watch::channel(false);
        Self {
            queue: Arc::new(PlaybackQueue::new()),
            playing_tx: Arc::new(playing_tx),
            control: Mutex::new(None),
        }
    }

    fn set_playing(playing_tx: &watch::Sender<bool>, value: bool) {
        playing_tx.send_if_modified(|current| {
            if *current != value {
                *current = value;
                true
            } else {
                false
            }
        });
    }

    fn send_command(&self, command: PlayerCommand) {
        let control = self.control.lock();
        if let Some(sender) = control.as_ref() {
            let _ = sender.send(command);
        }
    }
}

impl Default for PcmPlayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Player for PcmPlayer {
    async fn initialize(&self) -> Result<()> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        {
            let mut control = self.control.lock();
            if control.is_some() {
                return Ok(());
            }
            *control = Some(command_tx);
        }

        let (open_tx, open_rx) = oneshot::channel::<Result<()>>();
        let queue = Arc::clone(&self.queue);
        let playing_tx = Arc::clone(&self.playing_tx);
        tokio::task::spawn_blocking(move || render_thread(queue, playing_tx, command_rx, open_tx));

        match open_rx.await {
            Ok(Ok(())) => {
                info!("playback device open");
                Ok(())
            }
            Ok(Err(e)) => {
                *self.control.lock() = None;
                Err(e)
            }
            Err(_) => {
                *self.control.lock() = None;
                Err(VelaError::Init("render thread died during device open".into()))
            }
        }
    }

    async fn enqueue(&self, pcm: Vec<u8>) -> Result<()> {
        if self.control.lock().is_none() {
            self.initialize().await?;
        }
        self.queue.push(&pcm);
        if !self.queue.paused() {
            Self::set_playing(&self.playing_tx, true);
        }
        Ok(())
    }

    async fn pause(&self) {
        self.queue.set_paused(true);
        self.send_command(PlayerCommand::Pause);
        Self::set_playing(&self.playing_tx, false);
    }

    async fn resume(&self) {
        self.queue.set_paused(false);
        self.send_command(PlayerCommand::Resume);
        Self::set_playing(&self.playing_tx, !self.queue.is_empty());
    }

    async fn flush(&self) {
        self.queue.clear();
        Self::set_playing(&self.playing_tx, false);
        debug!("playback queue flushed");
    }

    async fn release(&self) {
        if let Some(sender) = self.control.lock().take() {
            let _ = sender.send(PlayerCommand::Shutdown);
        }
        self.queue.clear();
        self.queue.set_paused(false);
        Self::set_playing(&self.playing_tx, false);
    }

    fn is_playing(&self) -> bool {
        *self.playing_tx.borrow()
    }

    fn playing_watch(&self) -> watch::Receiver<bool> {
        self.playing_tx.subscribe()
    }
}

/// Interval at which the render thread syncs queue drain into the watch.
const SYNC_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(feature = "audio-cpal")]
fn render_thread(
    queue: Arc<PlaybackQueue>,
    playing_tx: Arc<watch::Sender<bool>>,
    command_rx: Receiver<PlayerCommand>,
    open_tx: oneshot::Sender<Result<()>>,
) {
    use cpal::traits::StreamTrait;

    // The stream must be created and dropped on this thread.
    let stream = match open_output_stream(Arc::clone(&queue)) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = open_tx.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = open_tx.send(Err(VelaError::AudioDevice(e.to_string())));
        return;
    }
    let _ = open_tx.send(Ok(()));

    loop {
        match command_rx.recv_timeout(SYNC_INTERVAL) {
            Ok(PlayerCommand::Pause) => {
                if let Err(e) = stream.pause() {
                    warn!("device pause failed: {e}");
                }
            }
            Ok(PlayerCommand::Resume) => {
                if let Err(e) = stream.play() {
                    warn!("device resume failed: {e}");
                }
            }
            Ok(PlayerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                // The callback cannot touch the watch; sync drain state here.
                if queue.is_empty() {
                    PcmPlayer::set_playing(&playing_tx, false);
                }
            }
        }
    }

    // Stream drops here, releasing the device on this thread.
    drop(stream);
    info!("playback device released");
}

#[cfg(feature = "audio-cpal")]
fn open_output_stream(queue: Arc<PlaybackQueue>) -> Result<cpal::Stream> {
    use cpal::traits::{DeviceTrait, HostTrait};
    use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize};

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(VelaError::NoDefaultOutputDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|e| VelaError::AudioDevice(e.to_string()))?;

    let channels = supported.channels();
    // At least twice the platform minimum, when the platform reports one.
    let buffer_size = match supported.buffer_size() {
        SupportedBufferSize::Range { min, .. } if *min > 0 => BufferSize::Fixed(min * 2),
        _ => BufferSize::Default,
    };
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(OUTPUT_SAMPLE_RATE),
        buffer_size,
    };

    info!(
        device = device.name().unwrap_or_else(|_| "<unknown>".into()).as_str(),
        channels,
        sample_rate = OUTPUT_SAMPLE_RATE,
        "opening output device"
    );

    let ch = channels as usize;
    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let mut mono = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    let frames = data.len() / ch;
                    mono.resize(frames, 0);
                    queue.pop_into(&mut mono);
                    for (frame, sample) in data.chunks_exact_mut(ch).zip(mono.iter()) {
                        let value = *sample as f32 / 32768.0;
                        frame.fill(value);
                    }
                },
                |err| warn!("output stream error: {err}"),
                None,
            )
        }
        SampleFormat::I16 => {
            let mut mono = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    let frames = data.len() / ch;
                    mono.resize(frames, 0);
                    queue.pop_into(&mut mono);
                    for (frame, sample) in data.chunks_exact_mut(ch).zip(mono.iter()) {
                        frame.fill(*sample);
                    }
                },
                |err| warn!("output stream error: {err}"),
                None,
            )
        }
        fmt => {
            return Err(VelaError::AudioDevice(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| VelaError::AudioDevice(e.to_string()))?;

    Ok(stream)
}

/// Stub when the `audio-cpal` feature is disabled: commands drain into
/// nothing and the queue is still exercised, so higher layers stay testable.
#[cfg(not(feature = "audio-cpal"))]
fn render_thread(
    queue: Arc<PlaybackQueue>,
    playing_tx: Arc<watch::Sender<bool>>,
    command_rx: Receiver<PlayerCommand>,
    open_tx: oneshot::Sender<Result<()>>,
) {
    let _ = open_tx.send(Ok(()));
    loop {
        match command_rx.recv_timeout(SYNC_INTERVAL) {
            Ok(PlayerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                if queue.is_empty() {
                    PcmPlayer::set_playing(&playing_tx, false);
                }
            }
        }
    }
}
