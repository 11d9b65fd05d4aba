//! Call controller: the public face of the call stack.
//!
//! [`CallController`] is a cheap cloneable handle. All state lives in a single
//! controller task that owns the [`Negotiator`], the [`SignalingClient`] and the
//! sending half of the media worker queue. Commands from the handle, transport
//! events, media completions, media events and timers are all handled on that task,
//! one at a time.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::CallError;
use super::media::worker::{MediaRequest, run_media_worker};
use super::media::{MediaCompletion, MediaEngine, MediaEvent, MediaOp};
use super::negotiation::{Action, GlarePolicy, Input, Negotiator};
use super::state::{CallId, CallState, Role};
use crate::codec::SignalingMessage;
use crate::config::ClientConfig;
use crate::events::{ControllerEvent, EventBus, Status};
use crate::reconnect::ReconnectState;
use crate::signaling::{ConnectOutcome, ConnectionState, SendOutcome, SignalingClient};
use crate::transport::{TokioWebSocketTransportFactory, TransportEvent, TransportFactory};

/// Point-in-time view of the controller's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSnapshot {
    pub call_state: CallState,
    pub call_id: Option<CallId>,
    pub role: Option<Role>,
    pub connection_state: ConnectionState,
    #[serde(skip)]
    pub reconnect: ReconnectState,
    pub pending_remote_candidates: usize,
    pub deferred_messages: usize,
}

#[derive(Debug)]
enum ControllerCommand {
    Connect,
    StartCall,
    StopCall,
    Snapshot(oneshot::Sender<CallSnapshot>),
    Cleanup(oneshot::Sender<()>),
}

pub struct CallControllerBuilder {
    config: ClientConfig,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    media: Option<(Arc<dyn MediaEngine>, mpsc::UnboundedReceiver<MediaEvent>)>,
    glare_policy: Option<Box<dyn GlarePolicy>>,
}

impl CallControllerBuilder {
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    /// The engine plus the receiving end of the channel its
    /// [`MediaEventSink`](super::media::MediaEventSink) feeds.
    pub fn with_media_engine(
        mut self,
        engine: Arc<dyn MediaEngine>,
        events: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> Self {
        self.media = Some((engine, events));
        self
    }

    pub fn with_glare_policy(mut self, policy: Box<dyn GlarePolicy>) -> Self {
        self.glare_policy = Some(policy);
        self
    }

    /// Spawns the controller and media worker tasks. Must be called inside a Tokio
    /// runtime.
    pub fn build(self) -> Result<CallController, CallError> {
        let (engine, media_events) = self
            .media
            .ok_or(CallError::MissingComponent("media engine"))?;
        let factory = self
            .transport_factory
            .unwrap_or_else(|| Arc::new(TokioWebSocketTransportFactory::new()));

        let bus = EventBus::new();
        let (signaling, connect_rx) = SignalingClient::new(
            self.config.signaling.url(),
            factory,
            self.config.reconnect.build_policy(),
            bus.clone(),
        );
        let negotiator = match self.glare_policy {
            Some(policy) => Negotiator::new(policy),
            None => Negotiator::default(),
        };

        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (completion_tx, completions) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_media_worker(engine.clone(), media_rx, completion_tx));

        let (command_tx, commands) = mpsc::unbounded_channel();
        let task = ControllerTask {
            config: self.config,
            commands,
            negotiator,
            signaling,
            connect_rx,
            engine,
            media_tx,
            completions,
            media_events,
            worker,
            pending_start: None,
            bus: bus.clone(),
        };
        tokio::spawn(task.run());

        Ok(CallController {
            commands: command_tx,
            bus,
        })
    }
}

#[derive(Clone)]
pub struct CallController {
    commands: mpsc::UnboundedSender<ControllerCommand>,
    bus: EventBus,
}

impl CallController {
    pub fn builder(config: ClientConfig) -> CallControllerBuilder {
        CallControllerBuilder {
            config,
            transport_factory: None,
            media: None,
            glare_policy: None,
        }
    }

    fn send(&self, command: ControllerCommand) -> Result<(), CallError> {
        self.commands
            .send(command)
            .map_err(|_| CallError::ControllerClosed)
    }

    /// Opens the relay connection. Does nothing if it is open or opening.
    pub fn connect(&self) -> Result<(), CallError> {
        self.send(ControllerCommand::Connect)
    }

    /// Starts an outgoing call. If the relay is not reachable yet the call starts as
    /// soon as it is, or is reported failed once the configured wait elapses.
    pub fn start_call(&self) -> Result<(), CallError> {
        self.send(ControllerCommand::StartCall)
    }

    /// Ends the current call and closes the relay connection. Safe to call at any time.
    pub fn stop_call(&self) {
        if self.send(ControllerCommand::StopCall).is_err() {
            debug!(target: "Controller", "stop_call after cleanup ignored");
        }
    }

    /// Stops any call and releases every engine resource. The controller rejects all
    /// further commands.
    pub async fn cleanup(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(ControllerCommand::Cleanup(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot, CallError> {
        let (tx, rx) = oneshot::channel();
        self.send(ControllerCommand::Snapshot(tx))?;
        rx.await.map_err(|_| CallError::ControllerClosed)
    }

    /// Status changes and log lines, in the order they were produced.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.bus.subscribe()
    }
}

struct ControllerTask {
    config: ClientConfig,
    commands: mpsc::UnboundedReceiver<ControllerCommand>,
    negotiator: Negotiator,
    signaling: SignalingClient,
    connect_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
    engine: Arc<dyn MediaEngine>,
    media_tx: mpsc::UnboundedSender<MediaRequest>,
    completions: mpsc::UnboundedReceiver<MediaCompletion>,
    media_events: mpsc::UnboundedReceiver<MediaEvent>,
    worker: JoinHandle<()>,
    /// Deadline of a call start waiting for the relay connection.
    pending_start: Option<Instant>,
    bus: EventBus,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl ControllerTask {
    async fn run(mut self) {
        info!(target: "Controller", "Controller started for {}", self.config.signaling.url());
        let reply = loop {
            let retry_at = self.signaling.next_retry_deadline();
            let start_deadline = self.pending_start;

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ControllerCommand::Cleanup(reply)) => break Some(reply),
                    Some(command) => self.on_command(command).await,
                    None => break None,
                },
                Some(outcome) = self.connect_rx.recv() => {
                    self.signaling.on_connect_result(outcome).await;
                }
                event = self.signaling.next_event() => self.on_transport_event(event).await,
                Some(completion) = self.completions.recv() => {
                    self.apply(Input::MediaCompleted(completion)).await;
                }
                Some(event) = self.media_events.recv() => self.apply(Input::Media(event)).await,
                _ = sleep_until_opt(retry_at) => {
                    let delivered = self.signaling.on_retry_deadline(Instant::now()).await;
                    self.note_delivered(delivered);
                }
                _ = sleep_until_opt(start_deadline) => self.on_start_wait_elapsed(),
            }
        };

        self.shutdown().await;
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    async fn on_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::Connect => self.signaling.connect(),
            ControllerCommand::StartCall => self.start_call().await,
            ControllerCommand::StopCall => self.stop_call().await,
            ControllerCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop.
            ControllerCommand::Cleanup(_) => {}
        }
    }

    async fn start_call(&mut self) {
        if !self.engine.audio_capture_available() {
            warn!(target: "Controller", "Audio capture unavailable, call not started");
            self.bus.log("Microphone permission required to start a call");
            return;
        }
        if !self.negotiator.state().is_vacant() {
            self.bus.log(format!(
                "Call already in progress ({:?})",
                self.negotiator.state()
            ));
            return;
        }
        if self.signaling.is_connected() {
            self.apply(Input::StartCall).await;
            return;
        }
        if self.pending_start.is_some() {
            self.bus.log("Already waiting for the signaling connection");
            return;
        }

        self.bus
            .log("Not connected to signaling server, connecting before starting the call");
        self.signaling.connect();
        self.pending_start = Some(Instant::now() + self.config.start_call_wait);
    }

    fn on_start_wait_elapsed(&mut self) {
        self.pending_start = None;
        warn!(
            target: "Controller",
            "Signaling not connected after {:?}, call not started",
            self.config.start_call_wait
        );
        self.bus
            .log("Could not connect to signaling server, call not started");
        self.bus.status(Status::CallFailed);
    }

    async fn stop_call(&mut self) {
        if self.pending_start.take().is_some() {
            self.bus.log("Pending call start cancelled");
        }
        self.apply(Input::StopCall).await;
        self.signaling.disconnect().await;
    }

    async fn shutdown(mut self) {
        self.stop_call().await;
        let call_id = self
            .negotiator
            .call()
            .map(|c| c.call_id)
            .unwrap_or(CallId::new(0));
        let _ = self.media_tx.send(MediaRequest {
            call_id,
            op: MediaOp::Dispose,
        });

        let ControllerTask {
            media_tx,
            worker,
            completions,
            bus,
            ..
        } = self;
        // Closing the request queue lets the worker drain it and exit.
        drop(media_tx);
        if let Err(e) = worker.await {
            warn!(target: "Controller", "Media worker ended abnormally: {e}");
        }
        drop(completions);
        bus.log("Cleaned up");
        info!(target: "Controller", "Controller stopped");
    }

    async fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        let (inbound, delivered) = self.signaling.on_transport_event(event).await;
        self.note_delivered(delivered);

        if self.signaling.is_connected() && self.pending_start.take().is_some() {
            debug!(target: "Controller", "Signaling connected, starting deferred call");
            if self.negotiator.state().is_vacant() {
                self.apply(Input::StartCall).await;
            }
        }

        if let Some(message) = inbound {
            self.apply(Input::Remote(message)).await;
        }
    }

    fn note_delivered(&mut self, delivered: Vec<SignalingMessage>) {
        for message in delivered {
            for action in self.negotiator.handle(Input::Delivered(message)) {
                self.report(action);
            }
        }
    }

    fn report(&self, action: Action) {
        match action {
            Action::Status(status) => self.bus.status(status),
            Action::Log(line) => self.bus.log(line),
            other => debug!(target: "Controller", "Unexpected action {other:?}"),
        }
    }

    /// Feeds one input to the negotiation and carries out the resulting actions in order.
    async fn apply(&mut self, input: Input) {
        let mut queue: VecDeque<Action> = self.negotiator.handle(input).into();
        while let Some(action) = queue.pop_front() {
            match action {
                Action::Media { call_id, op } => {
                    if self.media_tx.send(MediaRequest { call_id, op }).is_err() {
                        warn!(target: "Controller", "Media worker is gone");
                    }
                }
                Action::Send(message) => match self.signaling.send(message.clone()).await {
                    Ok(SendOutcome::Delivered) => {
                        queue.extend(self.negotiator.handle(Input::Delivered(message)));
                    }
                    Ok(SendOutcome::Deferred) => {}
                    Err(e) => {
                        warn!(target: "Controller", "Failed to send {}: {e}", message.kind());
                        self.bus.log(format!("Failed to send {}: {e}", message.kind()));
                    }
                },
                other => self.report(other),
            }
        }
    }

    fn snapshot(&self) -> CallSnapshot {
        let call = self.negotiator.call();
        CallSnapshot {
            call_state: self.negotiator.state(),
            call_id: call.map(|c| c.call_id),
            role: call.map(|c| c.role),
            connection_state: self.signaling.state(),
            reconnect: self.signaling.reconnect_state().clone(),
            pending_remote_candidates: self.negotiator.pending_remote_candidates(),
            deferred_messages: self.signaling.deferred_len(),
        }
    }
}
