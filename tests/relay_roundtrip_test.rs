// Integration test: two controllers negotiate a call through a real relay.
// Covers the offer/answer exchange over WebSocket with recording media engines.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use p2p_voice::calls::{IceCandidate, MediaEvent, SdpKind, media_event_channel};
use p2p_voice::error::MediaError;
use p2p_voice::relay::RelayServer;
use p2p_voice::{
    CallController, CallState, ClientConfig, ConnectionState, MediaEngine, SignalingConfig,
};

// Helper: engine that records operations and returns fixed descriptions
#[derive(Default)]
struct RecordingEngine {
    ops: Mutex<Vec<String>>,
}

impl RecordingEngine {
    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }

    fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaEngine for RecordingEngine {
    async fn attach_local_audio_track(&self) -> Result<(), MediaError> {
        self.record("attach".into());
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<String, MediaError> {
        self.record("create_offer".into());
        Ok("v=0 offer".into())
    }

    async fn create_local_answer(&self) -> Result<String, MediaError> {
        self.record("create_answer".into());
        Ok("v=0 answer".into())
    }

    async fn set_local_description(&self, kind: SdpKind, sdp: &str) -> Result<(), MediaError> {
        self.record(format!("set_local:{kind}:{sdp}"));
        Ok(())
    }

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str) -> Result<(), MediaError> {
        self.record(format!("set_remote:{kind}:{sdp}"));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError> {
        self.record(format!("add_ice:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.record("close".into());
        Ok(())
    }

    async fn dispose(&self) -> Result<(), MediaError> {
        self.record("dispose".into());
        Ok(())
    }
}

// Helper: controller pointed at the relay, with its engine and event sink
fn create_peer(
    port: u16,
) -> (
    CallController,
    Arc<RecordingEngine>,
    p2p_voice::calls::MediaEventSink,
) {
    let config = ClientConfig::default().with_signaling(SignalingConfig::new("127.0.0.1", port));
    let (sink, events) = media_event_channel();
    let engine = Arc::new(RecordingEngine::default());
    let controller = CallController::builder(config)
        .with_media_engine(engine.clone(), events)
        .build()
        .expect("controller should build");
    (controller, engine, sink)
}

async fn wait_for_state(controller: &CallController, expected: CallState) -> bool {
    for _ in 0..300 {
        if controller.snapshot().await.unwrap().call_state == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn wait_connected(controller: &CallController) -> bool {
    for _ in 0..300 {
        if controller.snapshot().await.unwrap().connection_state == ConnectionState::Connected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_offer_answer_through_relay() {
    // === 1. SETUP ===
    let server = RelayServer::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();
    tokio::spawn(server.run());

    let (caller, caller_engine, caller_sink) = create_peer(port);
    let (callee, callee_engine, _callee_sink) = create_peer(port);

    caller.connect().unwrap();
    callee.connect().unwrap();
    assert!(wait_connected(&caller).await, "caller never connected");
    assert!(wait_connected(&callee).await, "callee never connected");

    // The relay registers a client after its handshake; give it a moment.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // === 2. OFFER / ANSWER ===
    caller.start_call().unwrap();

    assert!(wait_for_state(&callee, CallState::AnswerSent).await);
    assert!(wait_for_state(&caller, CallState::Negotiating).await);

    assert_eq!(
        callee_engine.ops(),
        vec![
            "set_remote:offer:v=0 offer",
            "attach",
            "create_answer",
            "set_local:answer:v=0 answer",
        ]
    );
    assert_eq!(
        caller_engine.ops(),
        vec![
            "attach",
            "create_offer",
            "set_local:offer:v=0 offer",
            "set_remote:answer:v=0 answer",
        ]
    );

    // === 3. CANDIDATES ===
    caller_sink.emit(MediaEvent::LocalIceCandidate("candidate:1 udp".into()));
    let mut delivered = false;
    for _ in 0..300 {
        if callee_engine.ops().iter().any(|op| op == "add_ice:candidate:1 udp") {
            delivered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(delivered, "candidate never reached the callee");

    // === 4. TEARDOWN ===
    caller.stop_call();
    assert!(wait_for_state(&caller, CallState::Closed).await);

    caller.cleanup().await;
    callee.cleanup().await;
    assert_eq!(caller_engine.ops().last().map(String::as_str), Some("dispose"));
    assert_eq!(callee_engine.ops().last().map(String::as_str), Some("dispose"));
}
