use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 256;

/// Coarse connection and call phase shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Connecting,
    Connected,
    Disconnected,
    Calling,
    IncomingCall,
    CallConnected,
    CallInterrupted,
    CallFailed,
    CallEnded,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Connecting => "Connecting",
            Status::Connected => "Connected",
            Status::Disconnected => "Disconnected",
            Status::Calling => "Calling",
            Status::IncomingCall => "Incoming call",
            Status::CallConnected => "Call connected",
            Status::CallInterrupted => "Call interrupted",
            Status::CallFailed => "Call failed",
            Status::CallEnded => "Call ended",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the controller reports to its observers.
///
/// Status changes and log lines share one channel so that a subscriber sees them in
/// the order the controller produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    Status(Status),
    Log(String),
}

impl ControllerEvent {
    pub fn status(&self) -> Option<Status> {
        match self {
            ControllerEvent::Status(status) => Some(*status),
            ControllerEvent::Log(_) => None,
        }
    }

    pub fn log_line(&self) -> Option<&str> {
        match self {
            ControllerEvent::Log(line) => Some(line),
            ControllerEvent::Status(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    events: broadcast::Sender<ControllerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            events: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn status(&self, status: Status) {
        log::info!(target: "Controller", "Status: {status}");
        // No subscribers is not an error.
        let _ = self.events.send(ControllerEvent::Status(status));
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        log::debug!(target: "Controller", "{line}");
        let _ = self.events.send(ControllerEvent::Log(line));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
