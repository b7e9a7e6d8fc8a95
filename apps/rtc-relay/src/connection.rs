//! Public handle for one connection attempt.
//!
//! A [`Connection`] owns its engine, candidate gate and poller; none of them
//! are shared with another attempt. Engine events are drained by a single
//! pump task, local candidates are posted by a single dispatcher task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, DEFAULT_CHANNEL_LABEL, DEFAULT_GREETING};
use crate::engine::{
    ConnectionState, DataChannel, EngineError, EngineEvent, Payload, PeerEngine, WebRtcEngine,
};
use crate::error::ConnectionError;
use crate::negotiation::gate::run_dispatcher;
use crate::negotiation::{CandidateGate, CandidateScope, CandidateStats, ConnectionId, Negotiator};
use crate::poller::{CandidatePoller, PollState, PollerConfig};
use crate::signaling::{HttpSignalingClient, SignalingApi};

pub const DEFAULT_INBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub channel_label: String,
    /// Sent once when the data channel opens.
    pub greeting: Option<String>,
    pub poller: PollerConfig,
    pub scope_candidates: bool,
    /// Inbound payloads held for [`Connection::recv`]. Messages arriving
    /// while the queue is full are dropped.
    pub inbound_capacity: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            greeting: Some(DEFAULT_GREETING.to_string()),
            poller: PollerConfig::default(),
            scope_candidates: true,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }
}

pub struct Connection {
    engine: Arc<dyn PeerEngine>,
    signaling: Arc<dyn SignalingApi>,
    channel: Arc<dyn DataChannel>,
    negotiator: Negotiator,
    gate: Arc<CandidateGate>,
    poller: Arc<CandidatePoller>,
    id: Arc<ConnectionId>,
    scope: CandidateScope,
    started: AtomicBool,
    closed: AtomicBool,
    ready: watch::Receiver<bool>,
    state: watch::Receiver<ConnectionState>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Payload>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Builds the webrtc engine and HTTP relay client from `config`, then
    /// runs the negotiation round.
    pub async fn establish(config: &ClientConfig) -> Result<Self, ConnectionError> {
        let engine = Arc::new(WebRtcEngine::new(&config.engine()).await?);
        let signaling = Arc::new(HttpSignalingClient::new(
            &config.signaling_url,
            config.http_timeout,
        )?);
        let connection = Self::new(engine, signaling, config.connect_options()).await?;
        connection.begin().await?;
        Ok(connection)
    }

    /// Wires the engine event pump and creates the data channel. Nothing is
    /// sent to the relay until [`begin`](Self::begin).
    pub async fn new(
        engine: Arc<dyn PeerEngine>,
        signaling: Arc<dyn SignalingApi>,
        options: ConnectOptions,
    ) -> Result<Self, ConnectionError> {
        let events = engine.take_events().ok_or(EngineError::EventsTaken)?;
        let channel = engine.create_data_channel(&options.channel_label).await?;

        let id = Arc::new(ConnectionId::new());
        let scope = CandidateScope::new(Arc::clone(&id), options.scope_candidates);
        let (gate, queue) = CandidateGate::new();
        let gate = Arc::new(gate);
        let poller = Arc::new(CandidatePoller::new(options.poller));
        let negotiator = Negotiator::new(
            Arc::clone(&engine),
            Arc::clone(&signaling),
            Arc::clone(&gate),
            Arc::clone(&id),
        );

        let (ready_tx, ready_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::New);
        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_capacity.max(1));

        let dispatcher = tokio::spawn(run_dispatcher(
            queue,
            Arc::clone(&signaling),
            scope.clone(),
        ));
        let pump = EventPump {
            gate: Arc::clone(&gate),
            poller: Arc::clone(&poller),
            channel: Arc::clone(&channel),
            greeting: options.greeting,
            ready: ready_tx,
            state: state_tx,
            inbound: inbound_tx,
        };
        let pump = tokio::spawn(pump.run(events));

        tracing::debug!(
            target = "rtc_relay::connection",
            label = %options.channel_label,
            scoped = options.scope_candidates,
            "connection created"
        );

        Ok(Self {
            engine,
            signaling,
            channel,
            negotiator,
            gate,
            poller,
            id,
            scope,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            ready: ready_rx,
            state: state_rx,
            inbound: tokio::sync::Mutex::new(inbound_rx),
            tasks: Mutex::new(vec![dispatcher, pump]),
        })
    }

    /// Starts candidate polling and runs the offer/answer round. Returns the
    /// relay-assigned connection id. A failed round tears the attempt down;
    /// retrying means building a new `Connection`.
    pub async fn begin(&self) -> Result<i64, ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed.into());
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ConnectionError::AlreadyStarted);
        }

        self.poller.start(
            Arc::clone(&self.engine),
            Arc::clone(&self.signaling),
            self.scope.clone(),
        );

        match self.negotiator.negotiate().await {
            Ok(id) => {
                tracing::info!(
                    target = "rtc_relay::connection",
                    connection_id = id,
                    "negotiation complete"
                );
                Ok(id)
            }
            Err(err) => {
                tracing::warn!(
                    target = "rtc_relay::connection",
                    error = %err,
                    "negotiation failed; tearing down attempt"
                );
                self.teardown();
                Err(err)
            }
        }
    }

    /// Sends on the text or binary path according to the payload variant.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<usize, ConnectionError> {
        let payload = payload.into();
        self.channel
            .send(&payload)
            .await
            .map_err(ConnectionError::ChannelNotReady)
    }

    pub async fn send_text(&self, text: &str) -> Result<usize, ConnectionError> {
        self.send(Payload::Text(text.to_string())).await
    }

    pub async fn send_bytes(&self, bytes: impl Into<Bytes>) -> Result<usize, ConnectionError> {
        self.send(Payload::Binary(bytes.into())).await
    }

    /// Next inbound data channel payload; `None` once the attempt is closed.
    pub async fn recv(&self) -> Option<Payload> {
        self.inbound.lock().await.recv().await
    }

    /// Waits for the data channel to open.
    pub async fn ready(&self) -> Result<(), ConnectionError> {
        let mut ready = self.ready.clone();
        ready
            .wait_for(|open| *open)
            .await
            .map(|_| ())
            .map_err(|_| ConnectionError::ChannelNotReady(EngineError::Closed))
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Relay-assigned id, or [`UNASSIGNED_ID`](crate::negotiation::UNASSIGNED_ID)
    /// before the answer has been applied.
    pub fn id(&self) -> i64 {
        self.id.get()
    }

    pub fn assigned_id(&self) -> Option<i64> {
        self.id.assigned()
    }

    pub fn channel_label(&self) -> &str {
        self.channel.label()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn poll_state(&self) -> PollState {
        self.poller.state()
    }

    pub fn candidate_stats(&self) -> CandidateStats {
        self.gate.stats()
    }

    /// Stops polling and background tasks and closes the engine. Later calls
    /// do nothing.
    pub async fn close(&self) -> Result<(), ConnectionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.teardown();
        self.engine.close().await?;
        tracing::debug!(
            target = "rtc_relay::connection",
            connection_id = self.id.get(),
            "connection closed"
        );
        Ok(())
    }

    fn teardown(&self) {
        self.poller.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.teardown();
    }
}

struct EventPump {
    gate: Arc<CandidateGate>,
    poller: Arc<CandidatePoller>,
    channel: Arc<dyn DataChannel>,
    greeting: Option<String>,
    ready: watch::Sender<bool>,
    state: watch::Sender<ConnectionState>,
    inbound: mpsc::Sender<Payload>,
}

impl EventPump {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<EngineEvent>) {
        tracing::trace!(target = "rtc_relay::connection", "event pump start");
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        tracing::trace!(target = "rtc_relay::connection", "event pump ended");
    }

    async fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                let dispatch = self.gate.on_local_candidate(candidate);
                tracing::trace!(
                    target = "rtc_relay::connection",
                    dispatch = ?dispatch,
                    "local candidate"
                );
            }
            EngineEvent::ConnectionState(state) => {
                tracing::debug!(
                    target = "rtc_relay::connection",
                    state = %state,
                    "peer connection state changed"
                );
                self.state.send_replace(state);
                if state == ConnectionState::Connected {
                    self.poller.mark_connected();
                }
            }
            EngineEvent::ChannelOpen { label } => {
                tracing::debug!(target = "rtc_relay::connection", label = %label, "data channel open");
                self.ready.send_replace(true);
                if let Some(greeting) = self.greeting.take() {
                    let payload = Payload::Text(greeting);
                    if let Err(err) = self.channel.send(&payload).await {
                        tracing::warn!(
                            target = "rtc_relay::connection",
                            error = %err,
                            "failed to send greeting"
                        );
                    }
                }
            }
            EngineEvent::ChannelMessage(payload) => {
                tracing::trace!(
                    target = "rtc_relay::connection",
                    bytes = payload.len(),
                    "inbound message"
                );
                if let Err(mpsc::error::TrySendError::Full(dropped)) =
                    self.inbound.try_send(payload)
                {
                    tracing::warn!(
                        target = "rtc_relay::connection",
                        bytes = dropped.len(),
                        "inbound queue full; message dropped"
                    );
                }
            }
            EngineEvent::ChannelClosed => {
                tracing::debug!(target = "rtc_relay::connection", "data channel closed");
                self.ready.send_replace(false);
            }
        }
    }
}
