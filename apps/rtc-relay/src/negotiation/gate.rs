use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::CandidateScope;
use super::buffer::CandidateBuffer;
use crate::signaling::{IceCandidate, SignalingApi};

/// What the gate did with one local candidate event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// End-of-gathering marker; nothing to transmit.
    Ignored,
    Buffered,
    Sent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateStats {
    /// Candidates currently waiting for the offer round-trip.
    pub pending: usize,
    pub buffered: usize,
    pub flushed: usize,
    pub sent_immediately: usize,
    pub ignored: usize,
}

/// The offer counts as sent once the buffer has been drained.
struct GateState {
    buffer: CandidateBuffer,
    stats: CandidateStats,
}

/// Decides per local candidate whether to send now or hold it until the
/// offer has been answered.
///
/// Sends go through an ordered outbound queue. Flushing enqueues the whole
/// buffer under the same lock that marks the offer sent, so every candidate
/// lands in the queue exactly once.
pub struct CandidateGate {
    state: Mutex<GateState>,
    outbound: mpsc::UnboundedSender<IceCandidate>,
}

impl CandidateGate {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IceCandidate>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let gate = Self {
            state: Mutex::new(GateState {
                buffer: CandidateBuffer::new(),
                stats: CandidateStats::default(),
            }),
            outbound,
        };
        (gate, rx)
    }

    pub fn on_local_candidate(&self, candidate: Option<IceCandidate>) -> Dispatch {
        let mut state = self.state.lock();
        let Some(candidate) = candidate else {
            state.stats.ignored += 1;
            return Dispatch::Ignored;
        };

        match state.buffer.push(candidate) {
            Ok(()) => {
                state.stats.buffered += 1;
                state.stats.pending = state.buffer.len();
                Dispatch::Buffered
            }
            Err(candidate) => {
                self.enqueue(candidate);
                state.stats.sent_immediately += 1;
                Dispatch::Sent
            }
        }
    }

    /// Marks the offer sent and flushes the buffer in discovery order.
    /// Returns the number of flushed candidates; later calls flush nothing.
    pub fn open(&self) -> usize {
        let mut state = self.state.lock();
        if state.buffer.is_drained() {
            return 0;
        }
        let drained = state.buffer.drain();
        let flushed = drained.len();
        for candidate in drained {
            self.enqueue(candidate);
        }
        state.stats.flushed += flushed;
        state.stats.pending = 0;
        flushed
    }

    pub fn offer_sent(&self) -> bool {
        self.state.lock().buffer.is_drained()
    }

    pub fn stats(&self) -> CandidateStats {
        self.state.lock().stats
    }

    fn enqueue(&self, candidate: IceCandidate) {
        if self.outbound.send(candidate).is_err() {
            tracing::warn!(
                target = "rtc_relay::negotiation",
                "candidate dispatcher stopped; dropping local candidate"
            );
        }
    }
}

/// Posts queued local candidates to the relay one at a time, in queue order.
pub async fn run_dispatcher(
    mut queue: mpsc::UnboundedReceiver<IceCandidate>,
    signaling: Arc<dyn SignalingApi>,
    scope: CandidateScope,
) {
    while let Some(candidate) = queue.recv().await {
        let target = scope.current();
        match signaling.post_candidate(target, &candidate).await {
            Ok(()) => tracing::trace!(
                target = "rtc_relay::negotiation",
                scope = ?target,
                candidate = %candidate.candidate,
                "local candidate posted"
            ),
            Err(err) => tracing::warn!(
                target = "rtc_relay::negotiation",
                scope = ?target,
                error = %err,
                "failed to post local candidate"
            ),
        }
    }
}
