use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{ConnectionState, DataChannel, EngineError, EngineEvent, Payload, PeerEngine};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};

#[derive(Debug, Clone)]
pub struct WebRtcEngineConfig {
    pub ice_servers: Vec<String>,
    pub include_loopback_candidates: bool,
    pub disconnected_timeout: Duration,
    pub failed_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl Default for WebRtcEngineConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            include_loopback_candidates: false,
            disconnected_timeout: Duration::from_secs(3),
            failed_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_millis(500),
        }
    }
}

fn to_setup_error<E: std::fmt::Display>(err: E) -> EngineError {
    EngineError::Setup(err.to_string())
}

fn to_description_error<E: std::fmt::Display>(err: E) -> EngineError {
    EngineError::Description(err.to_string())
}

fn build_api(config: &WebRtcEngineConfig) -> Result<API, EngineError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    let mut setting = SettingEngine::default();
    setting.set_ice_timeouts(
        Some(config.disconnected_timeout),
        Some(config.failed_timeout),
        Some(config.keepalive_interval),
    );
    setting.set_include_loopback_candidate(config.include_loopback_candidates);

    Ok(APIBuilder::new()
        .with_setting_engine(setting)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn map_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn init_from_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn to_rtc_description(
    description: SessionDescription,
) -> Result<RTCSessionDescription, EngineError> {
    let parsed = match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(to_description_error)
}

/// `PeerEngine` backed by a webrtc-rs peer connection.
pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl WebRtcEngine {
    pub async fn new(config: &WebRtcEngineConfig) -> Result<Self, EngineError> {
        let api = build_api(config)?;
        let ice_servers = if config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        tracing::trace!(
            target = "rtc_relay::engine",
            await = "api.new_peer_connection",
            state = "start"
        );
        let pc_result = api.new_peer_connection(rtc_config).await;
        tracing::trace!(
            target = "rtc_relay::engine",
            await = "api.new_peer_connection",
            state = "end",
            ok = pc_result.is_ok()
        );
        let pc = Arc::new(pc_result.map_err(to_setup_error)?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let event = match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => EngineEvent::LocalCandidate(Some(candidate_from_init(init))),
                        Err(err) => {
                            tracing::warn!(
                                target = "rtc_relay::engine",
                                error = %err,
                                "failed to serialize local candidate"
                            );
                            return;
                        }
                    },
                    None => EngineEvent::LocalCandidate(None),
                };
                let _ = tx.send(event);
            })
        }));

        let state_tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                tracing::debug!(target = "rtc_relay::engine", ?state, "peer connection state changed");
                let _ = tx.send(EngineEvent::ConnectionState(map_state(state)));
            })
        }));

        Ok(Self {
            pc,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }
}

#[async_trait]
impl PeerEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(to_description_error)?;
        if offer.sdp_type != RTCSdpType::Offer {
            return Err(EngineError::Description(format!(
                "engine produced {} instead of offer",
                offer.sdp_type
            )));
        }
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(to_description_error)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), EngineError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(to_description_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(init_from_candidate(candidate))
            .await
            .map_err(|err| EngineError::Candidate(err.to_string()))
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, EngineError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(to_setup_error)?;

        let open_tx = self.events_tx.clone();
        let open_label = label.to_string();
        dc.on_open(Box::new(move || {
            let tx = open_tx.clone();
            let label = open_label.clone();
            Box::pin(async move {
                tracing::debug!(target = "rtc_relay::engine", %label, "data channel opened");
                let _ = tx.send(EngineEvent::ChannelOpen { label });
            })
        }));

        let message_tx = self.events_tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = message_tx.clone();
            Box::pin(async move {
                let payload = if msg.is_string {
                    Payload::Text(String::from_utf8_lossy(&msg.data).into_owned())
                } else {
                    Payload::Binary(msg.data)
                };
                let _ = tx.send(EngineEvent::ChannelMessage(payload));
            })
        }));

        let close_tx = self.events_tx.clone();
        dc.on_close(Box::new(move || {
            let tx = close_tx.clone();
            Box::pin(async move {
                let _ = tx.send(EngineEvent::ChannelClosed);
            })
        }));

        Ok(Arc::new(WebRtcDataChannel {
            label: label.to_string(),
            dc,
        }))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events_rx.lock().take()
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc.close().await.map_err(to_setup_error)
    }
}

struct WebRtcDataChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, payload: &Payload) -> Result<usize, EngineError> {
        let result = match payload {
            Payload::Text(text) => self.dc.send_text(text.clone()).await,
            Payload::Binary(bytes) => self.dc.send(bytes).await,
        };
        result.map_err(|err| EngineError::Channel(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_conversion_keeps_every_field() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 192.168.1.4 53421 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some("abcd".into()),
        };
        let init = init_from_candidate(candidate.clone());
        assert_eq!(candidate_from_init(init), candidate);
    }

    #[test]
    fn peer_states_map_onto_engine_states() {
        assert_eq!(
            map_state(RTCPeerConnectionState::Connected),
            ConnectionState::Connected
        );
        assert_eq!(
            map_state(RTCPeerConnectionState::Unspecified),
            ConnectionState::New
        );
        assert_eq!(map_state(RTCPeerConnectionState::Failed), ConnectionState::Failed);
    }

    #[test]
    fn malformed_answer_is_rejected() {
        let result = to_rtc_description(SessionDescription::answer("not sdp"));
        assert!(matches!(result, Err(EngineError::Description(_))));
    }

    #[test_timeout::tokio_timeout_test(20)]
    async fn engine_creates_offer_with_data_channel() {
        let config = WebRtcEngineConfig {
            ice_servers: Vec::new(),
            ..Default::default()
        };
        let engine = WebRtcEngine::new(&config).await.expect("webrtc engine");
        let channel = engine.create_data_channel("data").await.expect("data channel");
        assert_eq!(channel.label(), "data");
        let offer = engine.create_offer().await.expect("offer");
        assert_eq!(offer.kind, SdpType::Offer);
        assert!(offer.sdp.contains("m=application"));
        engine
            .set_local_description(offer)
            .await
            .expect("local description");
        assert!(engine.take_events().is_some());
        assert!(engine.take_events().is_none());
        let _ = engine.close().await;
    }
}
