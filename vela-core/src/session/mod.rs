//! Live session client.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──transport open──► Initializing
//!        ▲                                                        │
//!        │                                              setup_complete
//!   disconnect()                                                  ▼
//!        └───────────────◄──────── Connected ◄──────────► Streaming
//!                                      │ unclean close
//!                                      ▼
//!                           Reconnecting{n, max} ──exhausted──► Error
//! ```
//!
//! The first outgoing frame after transport open is always the setup frame;
//! nothing else is written before the acknowledgement because every other
//! send is gated on `can_send_messages()`. One writer task owns the sink,
//! so frames submitted by a single caller reach the wire in submission
//! order.

pub mod transport;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::capture::ImageFrame;
use crate::config::VelaConfig;
use crate::error::Result;
use crate::protocol::{
    self, ActivityMarker, AutomaticActivityDetection, Blob, ClientMessage, Content,
    GenerationConfig, PrebuiltVoiceConfig, RealtimeInput, RealtimeInputConfig, ServerMessage,
    Setup, SpeechConfig, VoiceConfig, INPUT_AUDIO_MIME,
};
use crate::stats::PipelineStats;
use transport::{Connector, FrameSink, FrameStream, TransportPair, CLOSE_NORMAL};

/// Outbound frames buffered before transport back-pressure throttles senders.
const OUTBOUND_CAP: usize = 64;
/// Incoming PCM chunks buffered for the playback consumer.
const AUDIO_CAP: usize = 64;
/// Session events buffered for slow subscribers.
const EVENT_CAP: usize = 64;
/// Exponential backoff is capped here regardless of attempt count.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connection lifecycle, published through a watch channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport open, setup sent, awaiting acknowledgement.
    Initializing,
    /// Handshake acknowledged; media and turn signals are accepted.
    Connected,
    /// The model is currently emitting a response turn.
    Streaming,
    Reconnecting {
        attempt: u32,
        max: u32,
    },
    Error {
        message: String,
        cause: Option<String>,
    },
}

impl ConnectionState {
    /// Outgoing media and turn signals are accepted only here.
    pub fn can_send_messages(&self) -> bool {
        matches!(self, Self::Connected | Self::Streaming)
    }

    /// Anything between `connect()` and a terminal state.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::Error { .. })
    }
}

/// Events published on the session bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Setup acknowledged; the session accepts media.
    Ready,
    /// The model finished a response turn.
    TurnComplete,
    /// Barge-in: locally published, nothing is sent on the wire.
    Interrupted,
    /// Reconnection budget exhausted.
    ConnectionLost,
}

enum Outbound {
    Frame(String),
    Close,
}

/// Client for one live session. Created once per process; `connect` and
/// `disconnect` cycle the underlying transport.
pub struct SessionClient {
    shared: Arc<SessionShared>,
}

struct SessionShared {
    config: VelaConfig,
    connector: Box<dyn Connector>,
    stats: Arc<PipelineStats>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    events_tx: broadcast::Sender<SessionEvent>,
    audio_tx: Mutex<mpsc::Sender<Vec<u8>>>,
    outbound_tx: Mutex<Option<mpsc::Sender<Outbound>>>,
    instruction: Mutex<Option<String>>,
    /// Set by `disconnect()`; a close observed while this is up is clean.
    closing: AtomicBool,
    /// Bumped per physical connection; stale reader tasks exit on mismatch.
    generation: AtomicU64,
    reconnect_cancel: Mutex<Option<CancellationToken>>,
}

impl SessionClient {
    pub fn new(config: VelaConfig, connector: Box<dyn Connector>, stats: Arc<PipelineStats>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CAP);
        // Dead sender until the coordinator arms the channel.
        let (audio_tx, _) = mpsc::channel(AUDIO_CAP);
        Self {
            shared: Arc::new(SessionShared {
                config,
                connector,
                stats,
                state_tx: Arc::new(state_tx),
                events_tx,
                audio_tx: Mutex::new(audio_tx),
                outbound_tx: Mutex::new(None),
                instruction: Mutex::new(None),
                closing: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                reconnect_cancel: Mutex::new(None),
            }),
        }
    }

    /// Open the transport and run the setup handshake.
    ///
    /// Idempotent: a call while the session is active logs a warning and
    /// returns without touching the connection.
    pub async fn connect(&self, instruction: &str) -> Result<()> {
        if self.shared.state_tx.borrow().is_active() {
            warn!("connect called while session is active; ignoring");
            return Ok(());
        }
        self.shared.closing.store(false, Ordering::SeqCst);
        *self.shared.instruction.lock() = Some(instruction.to_string());
        self.shared.set_state(ConnectionState::Connecting);

        match self.shared.open_connection().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.set_state(ConnectionState::Error {
                    message: "connection failed".into(),
                    cause: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    /// Close the transport with status 1000 / "client closing" and cancel
    /// any pending reconnection.
    pub async fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.shared.reconnect_cancel.lock().take() {
            token.cancel();
        }
        let sender = self.shared.outbound_tx.lock().take();
        if let Some(tx) = sender {
            let _ = tx.send(Outbound::Close).await;
        }
        self.shared.set_state(ConnectionState::Disconnected);
        info!("session disconnected");
    }

    /// Send audio and/or image media as one realtime-input frame.
    /// A call with neither is a no-op; a call in a non-sending state is
    /// dropped with a warning.
    pub async fn send_media(&self, audio: Option<&[u8]>, image: Option<&ImageFrame>) -> Result<()> {
        if audio.is_none() && image.is_none() {
            return Ok(());
        }
        if !self.can_send_messages() {
            self.shared.stats.send_drops.fetch_add(1, Ordering::Relaxed);
            warn!("send_media while connection cannot accept frames; dropping");
            return Ok(());
        }

        let mut media_chunks = Vec::with_capacity(2);
        if let Some(pcm) = audio {
            media_chunks.push(Blob::encode(INPUT_AUDIO_MIME, pcm));
            self.shared
                .stats
                .audio_frames_out
                .fetch_add(1, Ordering::Relaxed);
        }
        if let Some(frame) = image {
            media_chunks.push(Blob::encode(frame.mime_type.clone(), &frame.bytes));
            self.shared
                .stats
                .image_frames_out
                .fetch_add(1, Ordering::Relaxed);
        }

        self.shared
            .dispatch(ClientMessage::RealtimeInput(RealtimeInput {
                media_chunks,
                ..Default::default()
            }))
            .await
    }

    /// Mark the start of user speech. Dropped silently when not connected.
    pub async fn send_activity_start(&self) -> Result<()> {
        self.send_activity_marker(RealtimeInput {
            activity_start: Some(ActivityMarker {}),
            ..Default::default()
        })
        .await
    }

    /// Mark the end of user speech. Dropped silently when not connected.
    pub async fn send_activity_end(&self) -> Result<()> {
        self.send_activity_marker(RealtimeInput {
            activity_end: Some(ActivityMarker {}),
            ..Default::default()
        })
        .await
    }

    async fn send_activity_marker(&self, input: RealtimeInput) -> Result<()> {
        if !self.can_send_messages() {
            trace!("activity marker dropped; connection cannot accept frames");
            return Ok(());
        }
        self.shared.dispatch(ClientMessage::RealtimeInput(input)).await
    }

    /// Purely local: publish `Interrupted` on the event bus. The remote
    /// infers interruption from the client starting a new activity; no
    /// frame is sent.
    pub fn signal_interruption(&self) {
        let _ = self.shared.events_tx.send(SessionEvent::Interrupted);
    }

    pub fn can_send_messages(&self) -> bool {
        self.shared.state_tx.borrow().can_send_messages()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn state_snapshot(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Re-arm the incoming PCM channel and return its consumer half.
    /// The channel survives reconnects; only a new call replaces it.
    pub fn reset_audio_channel(&self) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(AUDIO_CAP);
        *self.shared.audio_tx.lock() = tx;
        rx
    }
}

impl SessionShared {
    fn set_state(&self, state: ConnectionState) {
        debug!(?state, "connection state");
        self.state_tx.send_replace(state);
    }

    /// Open a transport, emit the setup frame, spawn the IO tasks.
    /// The caller decides what state to show while this runs (Connecting
    /// for an explicit connect, Reconnecting{n} during backoff).
    ///
    /// Boxed explicitly (rather than a plain `async fn`) because the mutual
    /// recursion with `run_reconnect` otherwise trips a rustc opaque-type
    /// cycle limitation when inferring this future's `Send`-ness.
    fn open_connection<'a>(
        self: &'a Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
        let url = self.config.session_url()?;
        let instruction = self.instruction.lock().clone().unwrap_or_default();

        let TransportPair { mut sink, stream } = self.connector.connect(&url).await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // The setup frame goes out before anything else can touch the sink.
        let setup = build_setup(&self.config, &instruction);
        sink.send(protocol::encode_client(&setup)?).await?;
        self.set_state(ConnectionState::Initializing);

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAP);
        *self.outbound_tx.lock() = Some(outbound_tx);

        tokio::spawn(write_loop(sink, outbound_rx));
        tokio::spawn(read_loop(Arc::clone(self), stream, generation));
        Ok(())
        })
    }

    async fn dispatch(&self, message: ClientMessage) -> Result<()> {
        let frame = protocol::encode_client(&message)?;
        let sender = self.outbound_tx.lock().as_ref().cloned();
        match sender {
            Some(tx) => {
                if tx.send(Outbound::Frame(frame)).await.is_err() {
                    warn!("writer task gone; outgoing frame dropped");
                }
                Ok(())
            }
            None => {
                warn!("no active connection; outgoing frame dropped");
                Ok(())
            }
        }
    }

    /// Handle one decoded server frame per the incoming-handling rules.
    async fn handle_frame(&self, frame: &str) {
        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);
        let message = match protocol::decode_server(frame) {
            Ok(message) => message,
            Err(e) => {
                // Per-frame: drop and log, never tear the connection down.
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("dropping server frame: {e}");
                return;
            }
        };

        match message {
            ServerMessage::SetupComplete(_) => {
                let mut acknowledged = false;
                self.state_tx.send_if_modified(|state| {
                    if matches!(state, ConnectionState::Initializing) {
                        *state = ConnectionState::Connected;
                        acknowledged = true;
                        true
                    } else {
                        false
                    }
                });
                if acknowledged {
                    info!("setup acknowledged; session ready");
                    let _ = self.events_tx.send(SessionEvent::Ready);
                } else {
                    warn!("setup acknowledgement outside handshake; ignoring");
                }
            }
            ServerMessage::ServerContent(content) => {
                if content.interrupted {
                    debug!("server reports turn interrupted");
                    let _ = self.events_tx.send(SessionEvent::Interrupted);
                }
                if content.turn_complete {
                    self.state_tx.send_if_modified(|state| {
                        if matches!(state, ConnectionState::Streaming) {
                            *state = ConnectionState::Connected;
                            true
                        } else {
                            false
                        }
                    });
                    let _ = self.events_tx.send(SessionEvent::TurnComplete);
                }
                // An interrupted frame advances no audio.
                if content.interrupted {
                    return;
                }
                let Some(turn) = content.model_turn else {
                    return;
                };
                for part in turn.parts {
                    if part.is_audio() {
                        let Some(blob) = part.inline_data else { continue };
                        match blob.decode_bytes() {
                            Ok(bytes) => {
                                self.stats
                                    .audio_bytes_in
                                    .fetch_add(bytes.len(), Ordering::Relaxed);
                                self.state_tx.send_if_modified(|state| {
                                    if matches!(state, ConnectionState::Connected) {
                                        *state = ConnectionState::Streaming;
                                        true
                                    } else {
                                        false
                                    }
                                });
                                let tx = self.audio_tx.lock().clone();
                                if tx.send(bytes).await.is_err() {
                                    debug!("no playback consumer; model audio dropped");
                                }
                            }
                            Err(e) => warn!("undecodable audio part: {e}"),
                        }
                    } else if let Some(text) = part.text {
                        debug!(text = text.as_str(), "model text part");
                    }
                }
            }
            ServerMessage::GoAway(notice) => {
                warn!(time_left = ?notice.time_left, "server requested disconnect");
            }
            ServerMessage::UsageMetadata(usage) => {
                debug!(
                    prompt = ?usage.prompt_token_count,
                    total = ?usage.total_token_count,
                    "usage metadata"
                );
            }
            ServerMessage::InputTranscription(t) => {
                debug!(text = t.text.as_str(), "input transcription");
            }
            ServerMessage::OutputTranscription(t) => {
                debug!(text = t.text.as_str(), "output transcription");
            }
            ServerMessage::ToolCall(_) | ServerMessage::ToolCallCancellation(_) => {
                debug!("tool traffic ignored by the core");
            }
            ServerMessage::SessionResumptionUpdate(update) => {
                trace!(resumable = update.resumable, "session resumption update");
            }
        }
    }
}

/// Writer task: sole owner of the sink after the handshake frame.
async fn write_loop(mut sink: Box<dyn FrameSink>, mut outbound_rx: mpsc::Receiver<Outbound>) {
    while let Some(command) = outbound_rx.recv().await {
        match command {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(frame).await {
                    warn!("transport write failed: {e}");
                    break;
                }
            }
            Outbound::Close => {
                sink.close(CLOSE_NORMAL, "client closing").await;
                break;
            }
        }
    }
}

/// Reader task: one per physical connection. Exits silently when
/// superseded by a newer connection.
async fn read_loop(
    shared: Arc<SessionShared>,
    mut stream: Box<dyn FrameStream>,
    generation: u64,
) {
    loop {
        let item = stream.next_frame().await;
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        match item {
            Some(Ok(frame)) => shared.handle_frame(&frame).await,
            Some(Err(e)) => {
                warn!("transport failed: {e}");
                break;
            }
            None => {
                info!("transport closed by peer");
                break;
            }
        }
    }

    if shared.closing.load(Ordering::SeqCst) {
        shared.set_state(ConnectionState::Disconnected);
        return;
    }
    tokio::spawn(run_reconnect(shared));
}

/// Backoff-and-retry loop after an unclean close. At most one runs at a
/// time; `disconnect()` cancels it through the stored token.
async fn run_reconnect(shared: Arc<SessionShared>) {
    let token = CancellationToken::new();
    {
        let mut slot = shared.reconnect_cancel.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(token.clone());
    }

    let max = shared.config.reconnect.max_attempts;
    let base = Duration::from_millis(shared.config.reconnect.base_delay_ms);

    for attempt in 1..=max {
        if shared.closing.load(Ordering::SeqCst) {
            shared.reconnect_cancel.lock().take();
            return;
        }
        shared.set_state(ConnectionState::Reconnecting { attempt, max });
        shared
            .stats
            .reconnect_attempts
            .fetch_add(1, Ordering::Relaxed);

        // Full handshake with the cached system instruction.
        match shared.open_connection().await {
            Ok(()) => {
                info!(attempt, "reconnected");
                shared.reconnect_cancel.lock().take();
                return;
            }
            Err(e) => warn!(attempt, max, "reconnect attempt failed: {e}"),
        }

        let delay = backoff_delay(base, attempt);
        tokio::select! {
            _ = token.cancelled() => {
                shared.reconnect_cancel.lock().take();
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.reconnect_cancel.lock().take();
    shared.set_state(ConnectionState::Error {
        message: "Max reconnection attempts reached".into(),
        cause: None,
    });
    let _ = shared.events_tx.send(SessionEvent::ConnectionLost);
}

/// `base · 2^(attempt-1)`, capped at 30 s.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << (attempt.saturating_sub(1)).min(20);
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

fn build_setup(config: &VelaConfig, instruction: &str) -> ClientMessage {
    ClientMessage::Setup(Setup {
        model: config.model.clone(),
        generation_config: Some(GenerationConfig {
            response_modalities: vec!["AUDIO".into()],
            speech_config: Some(SpeechConfig {
                voice_config: Some(VoiceConfig {
                    prebuilt_voice_config: Some(PrebuiltVoiceConfig {
                        voice_name: config.voice.clone(),
                    }),
                }),
            }),
        }),
        system_instruction: Some(Content::text(instruction)),
        realtime_input_config: Some(RealtimeInputConfig {
            automatic_activity_detection: AutomaticActivityDetection { disabled: true },
        }),
    })
}
