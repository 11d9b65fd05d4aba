/// Tokio-based WebSocket transport implementation for p2p-voice
///
/// This crate provides the signaling transport collaborator: a message-oriented,
/// order-preserving connection to the relay server, built on tokio-tungstenite.
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// An event produced by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text message has been received from the relay.
    MessageReceived(String),
    /// The connection was closed, with the peer's close reason when one was given.
    Disconnected(Option<String>),
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one text message. Fails if the connection is not open.
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error>;

    /// Whether the connection is still open for sending.
    fn is_open(&self) -> bool;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Connects to `url` and returns the transport along with its stream of events.
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Tokio-based WebSocket transport
pub struct TokioWebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
    is_open: Arc<AtomicBool>,
}

impl TokioWebSocketTransport {
    fn new(sink: WsSink, is_open: Arc<AtomicBool>) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
            is_open,
        }
    }
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send_text(&self, text: &str) -> Result<(), anyhow::Error> {
        if !self.is_open() {
            return Err(anyhow::anyhow!("Socket is closed"));
        }
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        debug!("--> Sending message: {} bytes", text.len());
        if let Err(e) = sink.send(Message::text(text.to_owned())).await {
            self.is_open.store(false, Ordering::Relaxed);
            return Err(anyhow::anyhow!("WebSocket send error: {}", e));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Relaxed)
    }

    async fn disconnect(&self) {
        if self.is_open.swap(false, Ordering::Relaxed) {
            if let Some(mut sink) = self.ws_sink.lock().await.take() {
                if let Err(e) = sink.close().await {
                    trace!("WebSocket close error: {e}");
                }
            }
        }
    }
}

/// Factory for creating Tokio WebSocket transports
pub struct TokioWebSocketTransportFactory;

impl TokioWebSocketTransportFactory {
    /// Create a new factory instance
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioWebSocketTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!("Dialing {url}");
        let (client, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = client.split();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let is_open = Arc::new(AtomicBool::new(true));
        let transport = Arc::new(TokioWebSocketTransport::new(sink, is_open.clone()));

        // The open event is queued before the read pump can queue any message.
        let _ = event_tx.send(TransportEvent::Connected).await;

        tokio::task::spawn(read_pump(stream, event_tx, is_open));

        Ok((transport, event_rx))
    }
}

async fn read_pump(
    mut stream: WsStream,
    event_tx: mpsc::Sender<TransportEvent>,
    is_open: Arc<AtomicBool>,
) {
    let mut reason = None;

    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!("<-- Received WebSocket message: {} bytes", text.len());
                if event_tx
                    .send(TransportEvent::MessageReceived(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    warn!("Event receiver dropped, closing read pump");
                    break;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        if event_tx
                            .send(TransportEvent::MessageReceived(text))
                            .await
                            .is_err()
                        {
                            warn!("Event receiver dropped, closing read pump");
                            break;
                        }
                    }
                    Err(_) => warn!("Dropping non-UTF-8 binary frame ({} bytes)", data.len()),
                }
            }
            Some(Ok(Message::Close(frame))) => {
                trace!("Received close frame: {frame:?}");
                reason = frame.map(|f| format!("{} (code: {})", f.reason.as_str(), f.code));
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                reason = Some(e.to_string());
                break;
            }
            None => {
                trace!("Websocket stream ended");
                break;
            }
        }
    }

    is_open.store(false, Ordering::Relaxed);
    let _ = event_tx.send(TransportEvent::Disconnected(reason)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn spawn_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() {
                    ws.send(msg).await.unwrap();
                } else if msg.is_close() {
                    break;
                }
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_connected_event_precedes_messages() {
        let url = spawn_echo_server().await;
        let (transport, mut events) = TokioWebSocketTransportFactory::new()
            .create_transport(&url)
            .await
            .unwrap();

        assert!(transport.is_open());
        assert_eq!(events.recv().await, Some(TransportEvent::Connected));

        transport.send_text(r#"{"type":"offer","sdp":"x"}"#).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::MessageReceived(
                r#"{"type":"offer","sdp":"x"}"#.to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_send_after_disconnect_fails() {
        let url = spawn_echo_server().await;
        let (transport, _events) = TokioWebSocketTransportFactory::new()
            .create_transport(&url)
            .await
            .unwrap();

        transport.disconnect().await;
        assert!(!transport.is_open());
        assert!(transport.send_text("{}").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TokioWebSocketTransportFactory::new()
            .create_transport(&format!("ws://{addr}"))
            .await;
        assert!(result.is_err());
    }
}
