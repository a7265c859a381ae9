//! Transport seam between the session client and the wire.
//!
//! The session only ever sees text frames. Production uses a WebSocket via
//! `tokio-tungstenite`; tests inject channel-backed fakes through the same
//! traits.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, VelaError};

/// Close code used for local shutdown, paired with reason "client closing".
pub const CLOSE_NORMAL: u16 = 1000;

/// Writing half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one JSON document as a single text frame.
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Close the connection with a status code and reason.
    async fn close(&mut self, code: u16, reason: &str);
}

/// Reading half of a connection.
#[async_trait]
pub trait FrameStream: Send {
    /// Next text frame. `None` means the peer closed the stream; `Err`
    /// means the transport failed. Both end the connection.
    async fn next_frame(&mut self) -> Option<Result<String>>;
}

/// A connected transport, split so one task can write while another reads.
pub struct TransportPair {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens transports. The seam the tests replace.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<TransportPair>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

type WsSplitSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSplitStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Production connector: secure WebSocket, one JSON document per message.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<TransportPair> {
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| VelaError::Transport(format!("websocket connect failed: {e}")))?;
        debug!("websocket open");
        let (sink, stream) = ws.split();
        Ok(TransportPair {
            sink: Box::new(WsSink { sink }),
            stream: Box::new(WsStream { stream }),
        })
    }
}

struct WsSink {
    sink: WsSplitSink,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.sink
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| VelaError::Transport(format!("websocket send failed: {e}")))
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            debug!("websocket close send failed: {e}");
        }
        let _ = self.sink.close().await;
    }
}

struct WsStream {
    stream: WsSplitStream,
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<String>> {
        loop {
            let message = self.stream.next().await?;
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                // Some server builds deliver JSON control frames as binary.
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        warn!(len = bytes.len(), "dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket closed by peer");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => {
                    return Some(Err(VelaError::Transport(format!(
                        "websocket receive failed: {e}"
                    ))))
                }
            }
        }
    }
}
