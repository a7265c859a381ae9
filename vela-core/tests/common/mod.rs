//! Channel-backed fakes injected through the crate's trait seams.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use url::Url;

use vela_core::config::CameraConfig;
use vela_core::session::transport::{Connector, FrameSink, FrameStream, TransportPair};
use vela_core::{
    CameraSource, ImageFrame, MicrophoneSource, Player, SpeechScorer, VelaError,
};

/// Route `RUST_LOG`-filtered tracing output through the test harness.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Transport fakes
// ---------------------------------------------------------------------------

/// Test-side handle to one fake connection.
pub struct ServerHandle {
    /// Frames the client wrote, in wire order.
    pub from_client: mpsc::UnboundedReceiver<String>,
    /// Inject server frames; drop the sender (or call `drop_connection`)
    /// to simulate an unclean close.
    pub to_client: Option<mpsc::UnboundedSender<Result<String, VelaError>>>,
    /// Close calls observed on the sink: (code, reason).
    pub closes: Arc<Mutex<Vec<(u16, String)>>>,
}

impl ServerHandle {
    pub fn send(&self, frame: &str) {
        self.to_client
            .as_ref()
            .expect("connection already dropped")
            .send(Ok(frame.to_string()))
            .expect("client reader gone");
    }

    pub fn send_error(&self, message: &str) {
        let _ = self
            .to_client
            .as_ref()
            .expect("connection already dropped")
            .send(Err(VelaError::Transport(message.into())));
    }

    /// Simulate an unclean close: the read side ends without a local close.
    pub fn drop_connection(&mut self) {
        self.to_client = None;
    }

    pub async fn recv_frame(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client writer gone")
    }

    /// Next frame whose JSON contains `needle`, skipping others.
    pub async fn recv_frame_containing(&mut self, needle: &str) -> String {
        loop {
            let frame = self.recv_frame().await;
            if frame.contains(needle) {
                return frame;
            }
        }
    }
}

#[derive(Clone)]
pub struct FakeConnector {
    connections_tx: mpsc::UnboundedSender<ServerHandle>,
    pub connects: Arc<AtomicUsize>,
    fail_all: Arc<AtomicBool>,
}

impl FakeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerHandle>) {
        let (connections_tx, connections_rx) = mpsc::unbounded_channel();
        (
            Self {
                connections_tx,
                connects: Arc::new(AtomicUsize::new(0)),
                fail_all: Arc::new(AtomicBool::new(false)),
            },
            connections_rx,
        )
    }

    /// Make every subsequent connect attempt fail with a transport error.
    pub fn fail_connects(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _url: &Url) -> Result<TransportPair, VelaError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(VelaError::Transport("connection refused".into()));
        }

        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let closes = Arc::new(Mutex::new(Vec::new()));

        let handle = ServerHandle {
            from_client: from_client_rx,
            to_client: Some(to_client_tx),
            closes: Arc::clone(&closes),
        };
        self.connections_tx
            .send(handle)
            .expect("test dropped the connection receiver");

        Ok(TransportPair {
            sink: Box::new(FakeSink {
                tx: from_client_tx,
                closes,
            }),
            stream: Box::new(FakeStream { rx: to_client_rx }),
        })
    }
}

struct FakeSink {
    tx: mpsc::UnboundedSender<String>,
    closes: Arc<Mutex<Vec<(u16, String)>>>,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send(&mut self, frame: String) -> Result<(), VelaError> {
        self.tx
            .send(frame)
            .map_err(|_| VelaError::Transport("fake sink closed".into()))
    }

    async fn close(&mut self, code: u16, reason: &str) {
        self.closes.lock().push((code, reason.to_string()));
    }
}

struct FakeStream {
    rx: mpsc::UnboundedReceiver<Result<String, VelaError>>,
}

#[async_trait]
impl FrameStream for FakeStream {
    async fn next_frame(&mut self) -> Option<Result<String, VelaError>> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Player fake
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerOp {
    Initialize,
    Enqueue(Vec<u8>),
    Pause,
    Resume,
    Flush,
    Release,
}

pub struct FakePlayer {
    pub ops: Mutex<Vec<PlayerOp>>,
    playing_tx: watch::Sender<bool>,
}

impl FakePlayer {
    pub fn new() -> Arc<Self> {
        let (playing_tx, _) = watch::channel(false);
        Arc::new(Self {
            ops: Mutex::new(Vec::new()),
            playing_tx,
        })
    }

    pub fn ops_snapshot(&self) -> Vec<PlayerOp> {
        self.ops.lock().clone()
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn initialize(&self) -> Result<(), VelaError> {
        self.ops.lock().push(PlayerOp::Initialize);
        Ok(())
    }

    async fn enqueue(&self, pcm: Vec<u8>) -> Result<(), VelaError> {
        self.ops.lock().push(PlayerOp::Enqueue(pcm));
        let _ = self.playing_tx.send(true);
        Ok(())
    }

    async fn pause(&self) {
        self.ops.lock().push(PlayerOp::Pause);
        let _ = self.playing_tx.send(false);
    }

    async fn resume(&self) {
        self.ops.lock().push(PlayerOp::Resume);
    }

    async fn flush(&self) {
        self.ops.lock().push(PlayerOp::Flush);
        let _ = self.playing_tx.send(false);
    }

    async fn release(&self) {
        self.ops.lock().push(PlayerOp::Release);
        let _ = self.playing_tx.send(false);
    }

    fn is_playing(&self) -> bool {
        *self.playing_tx.borrow()
    }

    fn playing_watch(&self) -> watch::Receiver<bool> {
        self.playing_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Capture fakes
// ---------------------------------------------------------------------------

pub struct FakeCamera {
    frames_tx: Mutex<Option<mpsc::Sender<ImageFrame>>>,
    pub stops: AtomicUsize,
}

impl FakeCamera {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames_tx: Mutex::new(None),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn emit(&self, frame: ImageFrame) {
        if let Some(tx) = self.frames_tx.lock().as_ref() {
            let _ = tx.try_send(frame);
        }
    }
}

#[async_trait]
impl CameraSource for FakeCamera {
    async fn start(&self, _config: &CameraConfig) -> Result<mpsc::Receiver<ImageFrame>, VelaError> {
        let (tx, rx) = mpsc::channel(16);
        *self.frames_tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.frames_tx.lock() = None;
    }
}

pub struct FakeMicrophone {
    chunks_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    pub stops: AtomicUsize,
}

impl FakeMicrophone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            chunks_tx: Mutex::new(None),
            stops: AtomicUsize::new(0),
        })
    }

    pub async fn emit(&self, chunk: Vec<u8>) {
        let tx = self.chunks_tx.lock().as_ref().cloned();
        if let Some(tx) = tx {
            let _ = tx.send(chunk).await;
        }
    }
}

#[async_trait]
impl MicrophoneSource for FakeMicrophone {
    async fn start(&self) -> Result<mpsc::Receiver<Vec<u8>>, VelaError> {
        let (tx, rx) = mpsc::channel(64);
        *self.chunks_tx.lock() = Some(tx);
        Ok(rx)
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.chunks_tx.lock() = None;
    }
}

// ---------------------------------------------------------------------------
// Scorer fake
// ---------------------------------------------------------------------------

/// Replays a probability script, one value per 512-sample window, and
/// counts resets so tests can assert hidden state was zeroed.
pub struct ScriptedScorer {
    script: Vec<f32>,
    cursor: usize,
    resets: Arc<AtomicUsize>,
}

impl ScriptedScorer {
    pub fn new(script: Vec<f32>, resets: Arc<AtomicUsize>) -> Self {
        Self {
            script,
            cursor: 0,
            resets,
        }
    }
}

impl SpeechScorer for ScriptedScorer {
    fn score(&mut self, _window: &[f32]) -> Result<f32, VelaError> {
        let p = self.script.get(self.cursor).copied().unwrap_or(0.0);
        self.cursor += 1;
        Ok(p)
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}
