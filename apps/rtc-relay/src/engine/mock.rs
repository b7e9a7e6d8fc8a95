use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ConnectionState, DataChannel, EngineError, EngineEvent, Payload, PeerEngine};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};

/// Every capability call the mock has seen, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateOffer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    AddIceCandidate(IceCandidate),
    CreateDataChannel(String),
    Close,
}

/// Scriptable engine double. Events are injected by the test and flow
/// through the same stream a real engine would use.
pub struct MockEngine {
    offer_sdp: String,
    calls: Mutex<Vec<EngineCall>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    channel_label: Mutex<Option<String>>,
    channel_open: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<Payload>>>,
    reject_remote: AtomicBool,
    remote_applied: AtomicBool,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_offer("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=mock-offer\r\n")
    }

    pub fn with_offer(sdp: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            offer_sdp: sdp.into(),
            calls: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            channel_label: Mutex::new(None),
            channel_open: Arc::new(AtomicBool::new(false)),
            sent: Arc::new(Mutex::new(Vec::new())),
            reject_remote: AtomicBool::new(false),
            remote_applied: AtomicBool::new(false),
        }
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn discover_candidate(&self, candidate: IceCandidate) {
        self.emit(EngineEvent::LocalCandidate(Some(candidate)));
    }

    pub fn finish_gathering(&self) {
        self.emit(EngineEvent::LocalCandidate(None));
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.emit(EngineEvent::ConnectionState(state));
    }

    pub fn open_channel(&self) {
        self.channel_open.store(true, Ordering::SeqCst);
        let label = self.channel_label.lock().clone().unwrap_or_default();
        self.emit(EngineEvent::ChannelOpen { label });
    }

    pub fn deliver(&self, payload: Payload) {
        self.emit(EngineEvent::ChannelMessage(payload));
    }

    pub fn reject_remote_description(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                EngineCall::SetRemoteDescription(desc) => Some(desc.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                EngineCall::AddIceCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_payloads(&self) -> Vec<Payload> {
        self.sent.lock().clone()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PeerEngine for MockEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.record(EngineCall::CreateOffer);
        Ok(SessionDescription::offer(self.offer_sdp.clone()))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        self.record(EngineCall::SetLocalDescription(description));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        let kind = description.kind;
        self.record(EngineCall::SetRemoteDescription(description));
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(EngineError::Description("remote description rejected".into()));
        }
        if kind != SdpType::Answer {
            return Err(EngineError::Description(format!(
                "expected answer, got {kind}"
            )));
        }
        if self.remote_applied.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Description(
                "remote description already applied".into(),
            ));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.record(EngineCall::AddIceCandidate(candidate));
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, EngineError> {
        self.record(EngineCall::CreateDataChannel(label.to_string()));
        *self.channel_label.lock() = Some(label.to_string());
        Ok(Arc::new(MockDataChannel {
            label: label.to_string(),
            open: Arc::clone(&self.channel_open),
            sent: Arc::clone(&self.sent),
        }))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events_rx.lock().take()
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.record(EngineCall::Close);
        self.channel_open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MockDataChannel {
    label: String,
    open: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<Payload>>>,
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, payload: &Payload) -> Result<usize, EngineError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(EngineError::Channel("data channel is not open".into()));
        }
        self.sent.lock().push(payload.clone());
        Ok(payload.len())
    }
}
