use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::engine::PeerEngine;
use crate::error::ConnectionError;
use crate::negotiation::CandidateScope;
use crate::signaling::SignalingApi;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollState {
    #[default]
    Idle,
    Polling,
    Connected,
    Exhausted,
    /// Cancelled by teardown before either outcome.
    Stopped,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PollState::Idle | PollState::Polling)
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollState::Idle => "idle",
            PollState::Polling => "polling",
            PollState::Connected => "connected",
            PollState::Exhausted => "exhausted",
            PollState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Pulls remote candidates from the relay into the engine on a fixed
/// interval until the peer connects or the attempt budget runs out.
///
/// The first fetch happens one interval after [`start`](Self::start). The
/// tick that spends the last attempt still fetches; nothing fires after it.
pub struct CandidatePoller {
    config: PollerConfig,
    state: Arc<watch::Sender<PollState>>,
    attempts: Arc<AtomicU32>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CandidatePoller {
    pub fn new(config: PollerConfig) -> Self {
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            config,
            state: Arc::new(state),
            attempts: Arc::new(AtomicU32::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Moves `Idle -> Polling` and spawns the timer task. Returns false if the
    /// poller was already started or finished.
    pub fn start(
        &self,
        engine: Arc<dyn PeerEngine>,
        signaling: Arc<dyn SignalingApi>,
        scope: CandidateScope,
    ) -> bool {
        let started = self.state.send_if_modified(|state| {
            if *state == PollState::Idle {
                *state = PollState::Polling;
                true
            } else {
                false
            }
        });
        if !started {
            return false;
        }

        tracing::debug!(
            target = "rtc_relay::poller",
            interval_ms = self.config.interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "candidate polling started"
        );
        let handle = tokio::spawn(poll_loop(
            self.config,
            Arc::clone(&self.state),
            Arc::clone(&self.attempts),
            engine,
            signaling,
            scope,
        ));
        *self.task.lock() = Some(handle);
        true
    }

    /// The peer reached "connected": stop polling regardless of the attempts
    /// left. No effect once polling has been exhausted.
    pub fn mark_connected(&self) -> bool {
        let changed = self.state.send_if_modified(|state| match state {
            PollState::Idle | PollState::Polling => {
                *state = PollState::Connected;
                true
            }
            _ => false,
        });
        if changed {
            tracing::debug!(
                target = "rtc_relay::poller",
                attempts = self.attempts(),
                "peer connected; candidate polling stopped"
            );
            self.cancel();
        }
        changed
    }

    /// Stops the timer task. Safe to call any number of times; a poller that
    /// has not reached an outcome yet ends up `Stopped`.
    pub fn cancel(&self) {
        self.state.send_if_modified(|state| match state {
            PollState::Idle | PollState::Polling => {
                *state = PollState::Stopped;
                true
            }
            _ => false,
        });
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }
}

impl Drop for CandidatePoller {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn poll_loop(
    config: PollerConfig,
    state: Arc<watch::Sender<PollState>>,
    attempts: Arc<AtomicU32>,
    engine: Arc<dyn PeerEngine>,
    signaling: Arc<dyn SignalingApi>,
    scope: CandidateScope,
) {
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if *state.borrow() != PollState::Polling {
            break;
        }

        let attempt = attempts.fetch_add(1, Ordering::AcqRel) + 1;
        let last = attempt >= config.max_attempts;
        if last {
            state.send_if_modified(|current| {
                if *current == PollState::Polling {
                    *current = PollState::Exhausted;
                    true
                } else {
                    false
                }
            });
        }

        poll_once(attempt, engine.as_ref(), signaling.as_ref(), &scope).await;

        if last {
            let err = ConnectionError::AttemptsExhausted { attempts: attempt };
            tracing::info!(target = "rtc_relay::poller", error = %err, "candidate polling stopped");
            break;
        }
    }
}

async fn poll_once(
    attempt: u32,
    engine: &dyn PeerEngine,
    signaling: &dyn SignalingApi,
    scope: &CandidateScope,
) {
    if scope.awaiting_id() {
        tracing::debug!(
            target = "rtc_relay::poller",
            attempt,
            "no connection id yet; fetch skipped"
        );
        return;
    }
    let target = scope.current();
    tracing::trace!(
        target = "rtc_relay::poller",
        await = "signaling.fetch_candidates",
        state = "start",
        attempt,
        scope = ?target
    );
    let fetched = signaling.fetch_candidates(target).await;
    tracing::trace!(
        target = "rtc_relay::poller",
        await = "signaling.fetch_candidates",
        state = "end",
        attempt,
        ok = fetched.is_ok()
    );

    let candidates = match fetched {
        Ok(candidates) => candidates,
        Err(source) => {
            let err = ConnectionError::PollFetchFailed { attempt, source };
            tracing::warn!(target = "rtc_relay::poller", error = %err, "candidate fetch failed");
            return;
        }
    };

    let fetched_count = candidates.len();
    for candidate in candidates {
        if let Err(err) = engine.add_ice_candidate(candidate).await {
            tracing::warn!(
                target = "rtc_relay::poller",
                attempt,
                error = %err,
                "remote candidate rejected"
            );
        }
    }
    tracing::debug!(
        target = "rtc_relay::poller",
        attempt,
        candidates = fetched_count,
        "remote candidates applied"
    );
}
