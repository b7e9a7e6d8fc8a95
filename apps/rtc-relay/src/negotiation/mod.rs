//! One offer/answer round per connection attempt.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::engine::PeerEngine;
use crate::error::ConnectionError;
use crate::signaling::{AnswerResponse, OfferRequest, SessionDescription, SignalingApi};

pub mod buffer;
pub mod gate;

pub use buffer::CandidateBuffer;
pub use gate::{CandidateGate, CandidateStats, Dispatch};

/// Id value before the relay has assigned one.
pub const UNASSIGNED_ID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStage {
    CreateOffer,
    SetLocalDescription,
    PostOffer,
    SetRemoteDescription,
}

impl fmt::Display for NegotiationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationStage::CreateOffer => "create offer",
            NegotiationStage::SetLocalDescription => "set local description",
            NegotiationStage::PostOffer => "post offer",
            NegotiationStage::SetRemoteDescription => "set remote description",
        };
        f.write_str(name)
    }
}

/// Relay-assigned connection id. Moves from [`UNASSIGNED_ID`] to a real value
/// at most once.
#[derive(Debug)]
pub struct ConnectionId(AtomicI64);

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(AtomicI64::new(UNASSIGNED_ID))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn assigned(&self) -> Option<i64> {
        match self.get() {
            UNASSIGNED_ID => None,
            id => Some(id),
        }
    }

    /// Returns false when an id was already assigned.
    pub fn assign(&self, id: i64) -> bool {
        self.0
            .compare_exchange(UNASSIGNED_ID, id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Which connection id, if any, candidate requests are tagged with.
#[derive(Debug, Clone)]
pub struct CandidateScope {
    id: Arc<ConnectionId>,
    enabled: bool,
}

impl CandidateScope {
    pub fn new(id: Arc<ConnectionId>, enabled: bool) -> Self {
        Self { id, enabled }
    }

    /// Unscoped while disabled or before an id is assigned.
    pub fn current(&self) -> Option<i64> {
        if self.enabled { self.id.assigned() } else { None }
    }

    /// Scoping is on but the relay has not handed out an id yet. Requests
    /// made now would hit the shared, unscoped pool.
    pub fn awaiting_id(&self) -> bool {
        self.enabled && self.id.assigned().is_none()
    }
}

/// Drives the offer/answer exchange and opens the candidate gate once the
/// answer has been applied.
pub struct Negotiator {
    engine: Arc<dyn PeerEngine>,
    signaling: Arc<dyn SignalingApi>,
    gate: Arc<CandidateGate>,
    id: Arc<ConnectionId>,
    answered: AtomicBool,
}

impl Negotiator {
    pub fn new(
        engine: Arc<dyn PeerEngine>,
        signaling: Arc<dyn SignalingApi>,
        gate: Arc<CandidateGate>,
        id: Arc<ConnectionId>,
    ) -> Self {
        Self {
            engine,
            signaling,
            gate,
            id,
            answered: AtomicBool::new(false),
        }
    }

    /// Full round: offer out, answer in, buffered candidates flushed.
    /// Returns the assigned connection id.
    pub async fn negotiate(&self) -> Result<i64, ConnectionError> {
        let answer = self.send_offer().await?;
        let id = answer.id;
        self.apply_answer(answer).await?;
        Ok(id)
    }

    /// Creates the local offer, applies it and posts it to the relay.
    pub async fn send_offer(&self) -> Result<AnswerResponse, ConnectionError> {
        tracing::trace!(
            target = "rtc_relay::negotiation",
            await = "engine.create_offer",
            state = "start"
        );
        let offer = self
            .engine
            .create_offer()
            .await
            .map_err(|err| ConnectionError::negotiation(NegotiationStage::CreateOffer, err))?;
        tracing::trace!(
            target = "rtc_relay::negotiation",
            await = "engine.create_offer",
            state = "end",
            sdp_len = offer.sdp.len()
        );

        let request = OfferRequest {
            sdp: offer.sdp.clone(),
        };
        tracing::trace!(
            target = "rtc_relay::negotiation",
            await = "engine.set_local_description",
            state = "start"
        );
        self.engine
            .set_local_description(offer)
            .await
            .map_err(|err| {
                ConnectionError::negotiation(NegotiationStage::SetLocalDescription, err)
            })?;
        tracing::trace!(
            target = "rtc_relay::negotiation",
            await = "engine.set_local_description",
            state = "end"
        );

        tracing::trace!(
            target = "rtc_relay::negotiation",
            await = "signaling.post_offer",
            state = "start"
        );
        let result = self.signaling.post_offer(&request).await;
        tracing::trace!(
            target = "rtc_relay::negotiation",
            await = "signaling.post_offer",
            state = "end",
            ok = result.is_ok()
        );
        result.map_err(|err| {
            tracing::warn!(
                target = "rtc_relay::negotiation",
                error = %err,
                "offer post failed"
            );
            ConnectionError::negotiation(NegotiationStage::PostOffer, err)
        })
    }

    /// Applies the relay's answer, records the connection id and flushes the
    /// candidate buffer. Only the first call may touch the engine.
    pub async fn apply_answer(&self, answer: AnswerResponse) -> Result<usize, ConnectionError> {
        if self.answered.swap(true, Ordering::AcqRel) {
            return Err(ConnectionError::negotiation(
                NegotiationStage::SetRemoteDescription,
                "answer already applied",
            ));
        }

        tracing::trace!(
            target = "rtc_relay::negotiation",
            await = "engine.set_remote_description",
            state = "start",
            connection_id = answer.id
        );
        self.engine
            .set_remote_description(SessionDescription::answer(answer.sdp))
            .await
            .map_err(|err| {
                ConnectionError::negotiation(NegotiationStage::SetRemoteDescription, err)
            })?;
        tracing::trace!(
            target = "rtc_relay::negotiation",
            await = "engine.set_remote_description",
            state = "end",
            connection_id = answer.id
        );

        if !self.id.assign(answer.id) {
            tracing::warn!(
                target = "rtc_relay::negotiation",
                current = self.id.get(),
                offered = answer.id,
                "connection id already assigned"
            );
        }

        let flushed = self.gate.open();
        tracing::debug!(
            target = "rtc_relay::negotiation",
            connection_id = answer.id,
            flushed,
            "answer applied"
        );
        Ok(flushed)
    }

    pub fn connection_id(&self) -> &Arc<ConnectionId> {
        &self.id
    }
}
