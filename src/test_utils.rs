use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::calls::IceCandidate;
use crate::calls::media::{MediaEngine, MediaEvent, MediaEventSink, SdpKind};
use crate::error::MediaError;

/// A media engine that records every call in order and answers with canned
/// descriptions.
#[derive(Default)]
pub struct ScriptedEngine {
    ops: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
    offer_delay: Option<Duration>,
    capture_denied: bool,
    disposed: AtomicBool,
    sink: Mutex<Option<MediaEventSink>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation whose log entry starts with `prefix` fail.
    pub fn fail_on(mut self, prefix: &'static str) -> Self {
        self.fail_on = Some(prefix);
        self
    }

    pub fn with_offer_delay(mut self, delay: Duration) -> Self {
        self.offer_delay = Some(delay);
        self
    }

    pub fn without_audio_capture(mut self) -> Self {
        self.capture_denied = true;
        self
    }

    pub fn with_sink(self, sink: MediaEventSink) -> Self {
        *self.sink.lock().unwrap() = Some(sink);
        self
    }

    /// Emits an event as if the engine had observed it.
    pub fn emit(&self, event: MediaEvent) {
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            sink.emit(event);
        }
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, entry: String) -> Result<(), String> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err("disposed".to_string());
        }
        let fails = self.fail_on.is_some_and(|prefix| entry.starts_with(prefix));
        self.ops.lock().unwrap().push(entry.clone());
        if fails {
            Err(format!("scripted failure of {entry}"))
        } else {
            Ok(())
        }
    }

    fn check(&self, entry: String, err: fn(String) -> MediaError) -> Result<(), MediaError> {
        match self.record(entry) {
            Ok(()) => Ok(()),
            Err(reason) if reason == "disposed" => Err(MediaError::Closed),
            Err(reason) => Err(err(reason)),
        }
    }
}

#[async_trait]
impl MediaEngine for ScriptedEngine {
    fn audio_capture_available(&self) -> bool {
        !self.capture_denied
    }

    async fn attach_local_audio_track(&self) -> Result<(), MediaError> {
        self.check("attach".to_string(), MediaError::Track)
    }

    async fn create_local_offer(&self) -> Result<String, MediaError> {
        if let Some(delay) = self.offer_delay {
            tokio::time::sleep(delay).await;
        }
        self.check("create_offer".to_string(), MediaError::Create)?;
        Ok("local-offer".to_string())
    }

    async fn create_local_answer(&self) -> Result<String, MediaError> {
        self.check("create_answer".to_string(), MediaError::Create)?;
        Ok("local-answer".to_string())
    }

    async fn set_local_description(&self, kind: SdpKind, _sdp: &str) -> Result<(), MediaError> {
        self.check(format!("set_local:{kind}"), MediaError::SetDescription)
    }

    async fn set_remote_description(&self, kind: SdpKind, _sdp: &str) -> Result<(), MediaError> {
        self.check(format!("set_remote:{kind}"), MediaError::SetDescription)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError> {
        self.check(
            format!(
                "add_ice:{}:{}:{}",
                candidate.candidate, candidate.sdp_mid, candidate.sdp_m_line_index
            ),
            MediaError::AddCandidate,
        )
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.check("close".to_string(), MediaError::Track)
    }

    async fn dispose(&self) -> Result<(), MediaError> {
        self.check("dispose".to_string(), MediaError::Track)?;
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
