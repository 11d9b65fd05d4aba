pub mod calls;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod reconnect;
pub mod relay;
pub mod signaling;
pub mod transport;

#[cfg(test)]
pub mod test_utils;

pub use calls::{CallController, CallError, CallSnapshot, CallState, MediaEngine};
pub use codec::SignalingMessage;
pub use config::{ClientConfig, SignalingConfig};
pub use events::{ControllerEvent, Status};
pub use signaling::ConnectionState;
