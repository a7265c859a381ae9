//! Coordinator — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Coordinator::new(config, deps)
//!     └─► start(mode)   → VAD loaded, player open, sources hot,
//!                          session connected, five tasks spawned
//!         ├─► switch_mode(mode) → reconnect with the new instruction
//!         └─► stop()    → tasks cancelled, session closed, devices released
//! ```
//!
//! ## Tasks
//!
//! | Task | Consumes | Produces |
//! |------|----------|----------|
//! | CameraForwarder | camera frames | `send_media(image)` |
//! | AudioForwarder | mic chunks | VAD scoring, then `send_media(audio)` |
//! | ResponseHandler | model PCM | `player.enqueue` |
//! | VadHandler | speech events | barge-in + turn signals |
//! | StateMapper | three observables | published top-level state |
//!
//! AudioForwarder runs VAD strictly before the network send for each
//! chunk. All tasks exit through one `CancellationToken`.

pub mod state;

pub use state::{derive_state, CoordinatorState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audio::Player;
use crate::capture::{CameraSource, ImageFrame, MicrophoneSource};
use crate::config::VelaConfig;
use crate::error::{Result, VelaError};
use crate::instructions::{instruction, AssistMode};
use crate::session::transport::Connector;
use crate::session::{ConnectionState, SessionClient, SessionEvent};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::vad::{SpeechScorer, VadEngine, VadEvent};

/// Builds the speech scorer at `start()`; the model stays loaded until
/// `stop()` releases it.
pub type ScorerFactory = Box<dyn Fn() -> Result<Box<dyn SpeechScorer>> + Send + Sync>;

/// Everything the coordinator wires together but does not implement.
pub struct CoordinatorDeps {
    pub connector: Box<dyn Connector>,
    pub player: Arc<dyn Player>,
    pub camera: Arc<dyn CameraSource>,
    pub microphone: Arc<dyn MicrophoneSource>,
    pub scorer_factory: ScorerFactory,
}

struct ActivePipeline {
    cancel: CancellationToken,
    vad: Arc<VadEngine>,
    mode: AssistMode,
}

/// Owns the session, playback, VAD and capture wiring.
///
/// `Coordinator` is `Send + Sync`; wrap in `Arc` to share with UI glue.
pub struct Coordinator {
    config: VelaConfig,
    session: Arc<SessionClient>,
    player: Arc<dyn Player>,
    camera: Arc<dyn CameraSource>,
    microphone: Arc<dyn MicrophoneSource>,
    scorer_factory: ScorerFactory,
    stats: Arc<PipelineStats>,
    state_tx: Arc<watch::Sender<CoordinatorState>>,
    probability_tx: Arc<watch::Sender<f32>>,
    speaking_tx: Arc<watch::Sender<bool>>,
    running: AtomicBool,
    pipeline: Mutex<Option<ActivePipeline>>,
}

impl Coordinator {
    pub fn new(config: VelaConfig, deps: CoordinatorDeps) -> Self {
        let stats = Arc::new(PipelineStats::default());
        let session = Arc::new(SessionClient::new(
            config.clone(),
            deps.connector,
            Arc::clone(&stats),
        ));
        let (state_tx, _) = watch::channel(CoordinatorState::Idle);
        let (probability_tx, _) = watch::channel(0.0f32);
        let (speaking_tx, _) = watch::channel(false);
        Self {
            config,
            session,
            player: deps.player,
            camera: deps.camera,
            microphone: deps.microphone,
            scorer_factory: deps.scorer_factory,
            stats,
            state_tx: Arc::new(state_tx),
            probability_tx: Arc::new(probability_tx),
            speaking_tx: Arc::new(speaking_tx),
            running: AtomicBool::new(false),
            pipeline: Mutex::new(None),
        }
    }

    /// Bring the whole pipeline up. Rejected while already running.
    pub async fn start(&self, mode: AssistMode) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VelaError::AlreadyRunning);
        }
        match self.start_inner(mode).await {
            Ok(()) => {
                info!(?mode, "coordinator started");
                Ok(())
            }
            Err(e) => {
                // Fatal init failure: unwind whatever came up, surface Error.
                self.teardown().await;
                self.running.store(false, Ordering::SeqCst);
                self.state_tx.send_replace(CoordinatorState::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn start_inner(&self, mode: AssistMode) -> Result<()> {
        self.config.validate()?;
        self.stats.reset();

        // VAD, then player, then sources, then the session.
        let scorer = (self.scorer_factory)()?;
        let vad = Arc::new(VadEngine::new(
            scorer,
            self.config.vad,
            Arc::clone(&self.stats),
        ));
        self.player.initialize().await?;
        let mic_rx = self.microphone.start().await?;
        let camera_rx = self.camera.start(&self.config.camera).await?;

        let model_audio_rx = self.session.reset_audio_channel();
        let vad_events = vad.subscribe();
        self.session.connect(instruction(mode)).await?;

        let cancel = CancellationToken::new();
        tokio::spawn(camera_forwarder(
            cancel.child_token(),
            camera_rx,
            Arc::clone(&self.session),
        ));
        tokio::spawn(audio_forwarder(
            cancel.child_token(),
            mic_rx,
            Arc::clone(&vad),
            Arc::clone(&self.session),
            Arc::clone(&self.probability_tx),
        ));
        tokio::spawn(response_handler(
            cancel.child_token(),
            model_audio_rx,
            Arc::clone(&self.player),
        ));
        tokio::spawn(vad_handler(
            cancel.child_token(),
            vad_events,
            Arc::clone(&self.player),
            Arc::clone(&self.session),
            Arc::clone(&self.speaking_tx),
        ));
        tokio::spawn(state_mapper(
            cancel.child_token(),
            self.session.connection_state(),
            self.player.playing_watch(),
            self.speaking_tx.subscribe(),
            Arc::clone(&self.state_tx),
        ));

        *self.pipeline.lock() = Some(ActivePipeline { cancel, vad, mode });
        Ok(())
    }

    /// Cancel all tasks, disconnect, release devices and the model.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(VelaError::NotRunning);
        }
        self.teardown().await;
        info!("coordinator stopped");
        Ok(())
    }

    /// Reconnect under a different instruction without touching capture.
    pub async fn switch_mode(&self, mode: AssistMode) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(VelaError::NotRunning);
        }
        {
            let pipeline = self.pipeline.lock();
            let Some(active) = pipeline.as_ref() else {
                return Err(VelaError::NotRunning);
            };
            if active.mode == mode {
                return Ok(());
            }
        }

        info!(?mode, "switching mode");
        self.session.disconnect().await;
        if let Some(active) = self.pipeline.lock().as_ref() {
            active.vad.reset();
        }
        self.session.connect(instruction(mode)).await?;
        if let Some(active) = self.pipeline.lock().as_mut() {
            active.mode = mode;
        }
        Ok(())
    }

    async fn teardown(&self) {
        let pipeline = self.pipeline.lock().take();
        if let Some(active) = pipeline {
            active.cancel.cancel();
            active.vad.release();
        }
        self.session.disconnect().await;
        self.camera.stop().await;
        self.microphone.stop().await;
        self.player.release().await;
        self.speaking_tx.send_replace(false);
        self.probability_tx.send_replace(0.0);
        self.state_tx.send_replace(CoordinatorState::Idle);
    }

    // ── Observables ──────────────────────────────────────────────────────

    pub fn state(&self) -> watch::Receiver<CoordinatorState> {
        self.state_tx.subscribe()
    }

    pub fn speech_probability(&self) -> watch::Receiver<f32> {
        self.probability_tx.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.connection_state()
    }

    /// The underlying session, for event subscriptions.
    pub fn session(&self) -> &SessionClient {
        &self.session
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe_events()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

// ---------------------------------------------------------------------------
// Long-lived tasks
// ---------------------------------------------------------------------------

async fn camera_forwarder(
    cancel: CancellationToken,
    mut frames: mpsc::Receiver<ImageFrame>,
    session: Arc<SessionClient>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    let _ = session.send_media(None, Some(&frame)).await;
                }
                None => break,
            },
        }
    }
}

async fn audio_forwarder(
    cancel: CancellationToken,
    mut chunks: mpsc::Receiver<Vec<u8>>,
    vad: Arc<VadEngine>,
    session: Arc<SessionClient>,
    probability_tx: Arc<watch::Sender<f32>>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = chunks.recv() => match chunk {
                Some(chunk) => {
                    // The VAD must see the chunk no later than the network.
                    match vad.process_audio_chunk(chunk.clone()).await {
                        Ok(Some(probability)) => {
                            probability_tx.send_replace(probability);
                        }
                        Ok(None) => {}
                        Err(e) => warn!("vad processing failed: {e}"),
                    }
                    let _ = session.send_media(Some(&chunk), None).await;
                }
                None => break,
            },
        }
    }
}

async fn response_handler(
    cancel: CancellationToken,
    mut model_audio: mpsc::Receiver<Vec<u8>>,
    player: Arc<dyn Player>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            pcm = model_audio.recv() => match pcm {
                Some(pcm) => {
                    // Fresh model audio ends any barge-in pause.
                    if !player.is_playing() {
                        player.resume().await;
                    }
                    if let Err(e) = player.enqueue(pcm).await {
                        warn!("playback enqueue failed: {e}");
                    }
                }
                None => break,
            },
        }
    }
}

async fn vad_handler(
    cancel: CancellationToken,
    mut events: broadcast::Receiver<VadEvent>,
    player: Arc<dyn Player>,
    session: Arc<SessionClient>,
    speaking_tx: Arc<watch::Sender<bool>>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(VadEvent::SpeechStart) => {
                    speaking_tx.send_replace(true);
                    if player.is_playing() {
                        player.pause().await;
                        player.flush().await;
                    }
                    let _ = session.send_activity_start().await;
                    session.signal_interruption();
                }
                Ok(VadEvent::SpeechEnd) => {
                    speaking_tx.send_replace(false);
                    let _ = session.send_activity_end().await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "vad handler lagged behind events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn state_mapper(
    cancel: CancellationToken,
    mut connection_rx: watch::Receiver<ConnectionState>,
    mut playing_rx: watch::Receiver<bool>,
    mut speaking_rx: watch::Receiver<bool>,
    state_tx: Arc<watch::Sender<CoordinatorState>>,
) {
    loop {
        let next = derive_state(
            &connection_rx.borrow(),
            *playing_rx.borrow(),
            *speaking_rx.borrow(),
        );
        state_tx.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = connection_rx.changed() => if changed.is_err() { break },
            changed = playing_rx.changed() => if changed.is_err() { break },
            changed = speaking_rx.changed() => if changed.is_err() { break },
        }
    }
}
