use thiserror::Error;

use crate::engine::EngineError;
use crate::negotiation::NegotiationStage;
use crate::signaling::SignalingError;

/// Failures surfaced by a connection attempt.
///
/// Poll failures and exhaustion are recovered inside the poller and reported
/// through logs and [`PollState`](crate::poller::PollState).
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("negotiation failed during {stage}: {reason}")]
    NegotiationFailed {
        stage: NegotiationStage,
        reason: String,
    },
    #[error("candidate poll attempt {attempt} failed: {source}")]
    PollFetchFailed {
        attempt: u32,
        #[source]
        source: SignalingError,
    },
    #[error("data channel not ready: {0}")]
    ChannelNotReady(#[source] EngineError),
    #[error("candidate polling exhausted after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },
    #[error("connection attempt already started")]
    AlreadyStarted,
    #[error("transport engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("signaling client error: {0}")]
    Signaling(#[from] SignalingError),
}

impl ConnectionError {
    pub(crate) fn negotiation<E: std::fmt::Display>(stage: NegotiationStage, err: E) -> Self {
        ConnectionError::NegotiationFailed {
            stage,
            reason: err.to_string(),
        }
    }

    pub fn is_negotiation_failure(&self) -> bool {
        matches!(self, ConnectionError::NegotiationFailed { .. })
    }
}
