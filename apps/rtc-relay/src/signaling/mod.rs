//! Signaling relay contract.
//!
//! Offers, answers and ICE candidates travel out-of-band through a plain
//! HTTP server. The relay is stateless from the client's point of view:
//! every exchange is a single request/response pair.

use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod mock;

pub use http::HttpSignalingClient;
pub use mock::MockSignaling;

pub const NEW_OFFER_PATH: &str = "api/new_offer";
pub const ICE_CANDIDATE_PATH: &str = "api/ice_candidate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// An opaque negotiation blob tagged with its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate in the browser's `RTCIceCandidateInit` JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, sdp_mid: impl Into<String>, sdp_mline_index: u16) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self.sdp_mline_index = Some(sdp_mline_index);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub sdp: String,
    pub id: i64,
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid signaling url: {0}")]
    InvalidUrl(String),
    #[error("signaling relay unavailable: {0}")]
    Unavailable(String),
}

/// Request/response operations against the signaling relay.
///
/// `scope` is the assigned connection id when candidate exchange is scoped
/// per session, `None` for the unscoped endpoint.
#[async_trait]
pub trait SignalingApi: Send + Sync {
    async fn post_offer(&self, offer: &OfferRequest) -> Result<AnswerResponse, SignalingError>;

    async fn post_candidate(
        &self,
        scope: Option<i64>,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError>;

    async fn fetch_candidates(&self, scope: Option<i64>)
    -> Result<Vec<IceCandidate>, SignalingError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidate_uses_browser_field_names() {
        let candidate = IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host")
            .with_mid("0", 0);
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(value["sdpMid"], json!("0"));
        assert_eq!(value["sdpMLineIndex"], json!(0));
        assert!(value.get("usernameFragment").is_none());
    }

    #[test]
    fn candidate_accepts_missing_optionals() {
        let parsed: IceCandidate =
            serde_json::from_value(json!({ "candidate": "candidate:2 1 udp 1 1.2.3.4 9 typ host" }))
                .unwrap();
        assert_eq!(parsed.sdp_mid, None);
        assert_eq!(parsed.sdp_mline_index, None);
    }

    #[test]
    fn answer_response_requires_id() {
        let missing = serde_json::from_value::<AnswerResponse>(json!({ "sdp": "v=0" }));
        assert!(missing.is_err());
        let answer: AnswerResponse =
            serde_json::from_value(json!({ "sdp": "answer-sdp", "id": 42 })).unwrap();
        assert_eq!(answer.id, 42);
    }

    #[test]
    fn session_description_tags_role() {
        let value = serde_json::to_value(SessionDescription::answer("v=0")).unwrap();
        assert_eq!(value, json!({ "type": "answer", "sdp": "v=0" }));
    }
}
