//! Relay (signaling) server.
//!
//! Clients are numbered from 1 in connection order and greeted with
//! `{"type":"connection","clientId":<n>,"message":"connected"}`. Every text frame that
//! parses as JSON is forwarded to every other connected client. Frames that do not
//! parse are logged and dropped.

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::{Value, json};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub type ClientId = u64;

type Clients = Arc<DashMap<ClientId, mpsc::UnboundedSender<Message>>>;

pub struct RelayServer {
    listener: TcpListener,
    clients: Clients,
    next_id: Arc<AtomicU64>,
}

impl RelayServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            clients: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until `shutdown` resolves.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        match self.local_addr() {
            Ok(addr) => info!(target: "Relay", "Signaling server listening on ws://{addr}"),
            Err(e) => warn!(target: "Relay", "Signaling server started, address unknown: {e}"),
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(target: "Relay", "Shutting down, {} client(s) connected", self.clients.len());
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(handle_client(stream, peer, id, self.clients.clone()));
                    }
                    Err(e) => error!(target: "Relay", "Accept failed: {e}"),
                },
            }
        }
        self.clients.clear();
    }

    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }
}

fn welcome(id: ClientId) -> String {
    json!({
        "type": "connection",
        "clientId": id,
        "message": "connected",
    })
    .to_string()
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, id: ClientId, clients: Clients) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(target: "Relay", "Handshake with {peer} failed: {e}");
            return;
        }
    };
    info!(target: "Relay", "Client {id} connected from {peer}");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                debug!(target: "Relay", "Client {id} write failed: {e}");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let _ = tx.send(Message::text(welcome(id)));
    clients.insert(id, tx);

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!(target: "Relay", "Client {id} sent non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(target: "Relay", "Client {id} error: {e}");
                break;
            }
        };
        forward(id, &text, &clients);
    }

    clients.remove(&id);
    writer.abort();
    info!(target: "Relay", "Client {id} disconnected");
}

fn forward(from: ClientId, text: &str, clients: &Clients) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(target: "Relay", "Dropping unparseable message from client {from}: {e}");
            return;
        }
    };
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("?");
    debug!(target: "Relay", "Client {from} sent {kind}");

    let payload = value.to_string();
    for entry in clients.iter().filter(|entry| *entry.key() != from) {
        if entry.value().send(Message::text(payload.clone())).is_err() {
            debug!(target: "Relay", "Client {} is closing, skipped", entry.key());
        }
    }
}
