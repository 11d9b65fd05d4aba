//! Signaling client: the relay connection as seen by the call controller.
//!
//! The client is owned by the controller task and never shared. Connect attempts run
//! in spawned tasks and report back through a channel; every other operation happens
//! on the controller task, so connection state has a single writer.
//!
//! Sends never block on the network being up. A message that cannot be written
//! because the relay is unreachable triggers one connect attempt and is parked in a
//! deferred queue. When the connection opens the queue is flushed in order. A parked
//! message whose retry deadline passes while still disconnected is abandoned and
//! logged; it is never attempted a third time.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::codec::{self, SignalingMessage};
use crate::error::{DecodeError, SignalingError};
use crate::events::{EventBus, Status};
use crate::reconnect::{ReconnectPolicy, ReconnectState};
use crate::transport::{Transport, TransportEvent, TransportFactory};

/// Transport-level connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

type Connection = (Arc<dyn Transport>, mpsc::Receiver<TransportEvent>);

/// Result of a spawned connect attempt.
pub(crate) struct ConnectOutcome {
    epoch: u64,
    result: Result<Connection, String>,
}

/// What happened to a message handed to [`SignalingClient::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Delivered,
    Deferred,
}

#[derive(Debug)]
struct DeferredSend {
    message: SignalingMessage,
    deadline: Instant,
}

pub(crate) struct SignalingClient {
    url: String,
    factory: Arc<dyn TransportFactory>,
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    /// Bumped on every connect and disconnect so that late connect results are discarded.
    epoch: u64,
    connect_tx: mpsc::UnboundedSender<ConnectOutcome>,
    deferred: VecDeque<DeferredSend>,
    policy: Box<dyn ReconnectPolicy>,
    reconnect: ReconnectState,
    bus: EventBus,
}

impl SignalingClient {
    pub(crate) fn new(
        url: String,
        factory: Arc<dyn TransportFactory>,
        policy: Box<dyn ReconnectPolicy>,
        bus: EventBus,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectOutcome>) {
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let client = Self {
            url,
            factory,
            state: ConnectionState::Disconnected,
            transport: None,
            events: None,
            epoch: 0,
            connect_tx,
            deferred: VecDeque::new(),
            policy,
            reconnect: ReconnectState::default(),
            bus,
        };
        (client, connect_rx)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub(crate) fn reconnect_state(&self) -> &ReconnectState {
        &self.reconnect
    }

    pub(crate) fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Earliest retry deadline among the parked messages. Delays differ between
    /// attempts, so this is not necessarily the oldest entry's.
    pub(crate) fn next_retry_deadline(&self) -> Option<Instant> {
        self.deferred.iter().map(|d| d.deadline).min()
    }

    /// Starts a connect attempt unless one is in flight or the connection is open.
    pub(crate) fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!(target: "Signaling", "connect() ignored, already {:?}", self.state);
            return;
        }

        self.epoch += 1;
        self.set_state(ConnectionState::Connecting);
        let delay = self.policy.retry_delay(&self.reconnect);
        self.reconnect.record_attempt(delay);
        self.bus.status(Status::Connecting);
        self.bus.log(format!("Connecting to {}", self.url));

        let epoch = self.epoch;
        let url = self.url.clone();
        let factory = self.factory.clone();
        let connect_tx = self.connect_tx.clone();
        tokio::spawn(async move {
            let result = factory
                .create_transport(&url)
                .await
                .map_err(|e| e.to_string());
            // The controller may be gone already.
            let _ = connect_tx.send(ConnectOutcome { epoch, result });
        });
    }

    pub(crate) async fn on_connect_result(&mut self, outcome: ConnectOutcome) {
        if outcome.epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(target: "Signaling", "Discarding stale connect result");
            if let Ok((transport, _)) = outcome.result {
                transport.disconnect().await;
            }
            return;
        }

        match outcome.result {
            Ok((transport, events)) => {
                // Stays Connecting until the transport reports the open event.
                self.transport = Some(transport);
                self.events = Some(events);
            }
            Err(reason) => {
                let err = SignalingError::Connect {
                    url: self.url.clone(),
                    reason,
                };
                warn!(target: "Signaling", "{err}");
                self.set_state(ConnectionState::Disconnected);
                self.bus.log(format!("Connection error: {err}"));
                self.bus.status(Status::Disconnected);
            }
        }
    }

    /// Next event of the open transport. Pending forever while there is none.
    pub(crate) async fn next_event(&mut self) -> Option<TransportEvent> {
        match self.events.as_mut() {
            Some(events) => events.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Handles a transport event. Returns the decoded message for inbound frames and
    /// every message the open event delivered from the deferred queue.
    pub(crate) async fn on_transport_event(
        &mut self,
        event: Option<TransportEvent>,
    ) -> (Option<SignalingMessage>, Vec<SignalingMessage>) {
        match event {
            Some(TransportEvent::Connected) => (None, self.on_open().await),
            Some(TransportEvent::MessageReceived(text)) => (self.on_frame(&text), Vec::new()),
            Some(TransportEvent::Disconnected(reason)) => {
                self.on_close(reason);
                (None, Vec::new())
            }
            None => {
                self.on_close(None);
                (None, Vec::new())
            }
        }
    }

    async fn on_open(&mut self) -> Vec<SignalingMessage> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        info!(target: "Signaling", "Connected to {}", self.url);
        self.set_state(ConnectionState::Connected);
        self.bus.status(Status::Connected);
        self.bus.log("Connected to signaling server");
        self.flush_deferred().await
    }

    fn on_frame(&mut self, text: &str) -> Option<SignalingMessage> {
        match codec::decode(text.as_bytes()) {
            Ok(message) => {
                self.bus.log(format!("Received {}", message.kind()));
                Some(message)
            }
            Err(DecodeError::UnknownType(kind)) => {
                debug!(target: "Signaling", "Ignoring message of type {kind}");
                self.bus.log(format!("Unknown message type: {kind}"));
                None
            }
            Err(e) => {
                warn!(target: "Signaling", "Dropping inbound frame: {e}");
                self.bus.log(format!("Error parsing message: {e}"));
                None
            }
        }
    }

    fn on_close(&mut self, reason: Option<String>) {
        let was = self.state;
        self.transport = None;
        self.events = None;
        self.set_state(ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            let reason = reason.unwrap_or_else(|| "no reason given".to_string());
            info!(target: "Signaling", "Connection closed: {reason}");
            self.bus.log(format!("Connection closed: {reason}"));
            self.bus.status(Status::Disconnected);
        }
    }

    /// Writes `message` now if the connection is open, otherwise parks it for one
    /// retry and starts a connect attempt.
    pub(crate) async fn send(
        &mut self,
        message: SignalingMessage,
    ) -> Result<SendOutcome, SignalingError> {
        match self.write(&message).await {
            Ok(()) => Ok(SendOutcome::Delivered),
            Err(SignalingError::NotConnected) | Err(SignalingError::Send(_)) => {
                let kind = message.kind();
                self.connect();
                // connect() picks the delay for the attempt it starts.
                let delay = self.reconnect.next_delay;
                self.deferred.push_back(DeferredSend {
                    message,
                    deadline: Instant::now() + delay,
                });
                self.bus.log(format!(
                    "Not connected, will retry sending {kind} in {}ms",
                    delay.as_millis()
                ));
                Ok(SendOutcome::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    async fn write(&mut self, message: &SignalingMessage) -> Result<(), SignalingError> {
        let text = codec::encode(message)?;
        let transport = match (&self.transport, self.state) {
            (Some(transport), ConnectionState::Connected) if transport.is_open() => {
                transport.clone()
            }
            _ => return Err(SignalingError::NotConnected),
        };

        match transport.send_text(&text).await {
            Ok(()) => {
                self.bus.log(format!("Sent {}", message.kind()));
                Ok(())
            }
            Err(e) => {
                warn!(target: "Signaling", "Send of {} failed: {e}", message.kind());
                self.on_close(Some(e.to_string()));
                Err(SignalingError::Send(e.to_string()))
            }
        }
    }

    /// Retries every parked message in order. Each gets this one attempt only.
    async fn flush_deferred(&mut self) -> Vec<SignalingMessage> {
        let mut delivered = Vec::new();
        while let Some(parked) = self.deferred.pop_front() {
            match self.write(&parked.message).await {
                Ok(()) => delivered.push(parked.message),
                Err(e) => {
                    self.abandon(&parked.message, &e);
                    if !self.is_connected() {
                        break;
                    }
                }
            }
        }
        delivered
    }

    /// Performs the retry of every parked message whose deadline has passed. Entries
    /// still waiting keep their place in the queue.
    pub(crate) async fn on_retry_deadline(&mut self, now: Instant) -> Vec<SignalingMessage> {
        let (due, waiting): (VecDeque<_>, VecDeque<_>) =
            self.deferred.drain(..).partition(|d| d.deadline <= now);
        self.deferred = waiting;

        let mut delivered = Vec::new();
        for parked in due {
            match self.write(&parked.message).await {
                Ok(()) => delivered.push(parked.message),
                Err(e) => self.abandon(&parked.message, &e),
            }
        }
        delivered
    }

    fn abandon(&self, message: &SignalingMessage, error: &SignalingError) {
        warn!(target: "Signaling/Reconnect", "Giving up on {}: {error}", message.kind());
        self.bus.log(format!(
            "Failed to send {} after retry: {error}",
            message.kind()
        ));
    }

    /// Closes the connection, cancels any in-flight connect and drops parked messages.
    pub(crate) async fn disconnect(&mut self) {
        self.epoch += 1;
        let dropped = self.deferred.len();
        self.deferred.clear();
        if dropped > 0 {
            debug!(target: "Signaling/Reconnect", "Dropped {dropped} parked message(s)");
        }

        let was = self.state;
        self.events = None;
        if let Some(transport) = self.transport.take() {
            transport.disconnect().await;
        }
        self.set_state(ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            self.bus.log("Disconnected from signaling server");
            self.bus.status(Status::Disconnected);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.reconnect.observe(state);
    }
}
