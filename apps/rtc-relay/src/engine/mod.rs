//! Transport engine capability.
//!
//! The negotiation logic only talks to a [`PeerEngine`]. Engine-driven
//! notifications (local candidates, connection state, data channel
//! lifecycle) arrive on a single ordered event stream taken once per
//! engine instance.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::signaling::{IceCandidate, SessionDescription};

pub mod mock;
pub mod webrtc;

pub use self::webrtc::{WebRtcEngine, WebRtcEngineConfig};
pub use mock::MockEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_owned())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(value))
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Binary(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A locally gathered candidate; `None` marks the end of gathering.
    LocalCandidate(Option<IceCandidate>),
    ConnectionState(ConnectionState),
    ChannelOpen { label: String },
    ChannelMessage(Payload),
    ChannelClosed,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine setup failed: {0}")]
    Setup(String),
    #[error("session description rejected: {0}")]
    Description(String),
    #[error("ice candidate rejected: {0}")]
    Candidate(String),
    #[error("data channel delivery failed: {0}")]
    Channel(String),
    #[error("engine event stream already taken")]
    EventsTaken,
    #[error("engine closed")]
    Closed,
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Sends on the text or binary path according to the payload variant.
    async fn send(&self, payload: &Payload) -> Result<usize, EngineError>;
}

#[async_trait]
pub trait PeerEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, EngineError>;

    /// Hands out the engine event stream. Returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>>;

    async fn close(&self) -> Result<(), EngineError>;
}
