use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use super::{AnswerResponse, IceCandidate, OfferRequest, SignalingApi, SignalingError};

/// Request counters published by [`MockSignaling`] after every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Activity {
    pub offers: usize,
    pub candidates: usize,
    pub fetches: usize,
}

/// Scripted in-memory relay for driving a connection without a server.
pub struct MockSignaling {
    answer: Mutex<Result<AnswerResponse, String>>,
    offer_hold: Mutex<Option<oneshot::Receiver<()>>>,
    offers: Mutex<Vec<OfferRequest>>,
    posted: Mutex<Vec<(Option<i64>, IceCandidate)>>,
    fetch_script: Mutex<VecDeque<Result<Vec<IceCandidate>, String>>>,
    fetch_scopes: Mutex<Vec<Option<i64>>>,
    activity: watch::Sender<Activity>,
}

impl Default for MockSignaling {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSignaling {
    pub fn new() -> Self {
        let (activity, _) = watch::channel(Activity::default());
        Self {
            answer: Mutex::new(Err("no answer scripted".into())),
            offer_hold: Mutex::new(None),
            offers: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
            fetch_script: Mutex::new(VecDeque::new()),
            fetch_scopes: Mutex::new(Vec::new()),
            activity,
        }
    }

    pub fn with_answer(sdp: impl Into<String>, id: i64) -> Self {
        let mock = Self::new();
        *mock.answer.lock() = Ok(AnswerResponse {
            sdp: sdp.into(),
            id,
        });
        mock
    }

    pub fn fail_offer(&self, reason: impl Into<String>) {
        *self.answer.lock() = Err(reason.into());
    }

    /// Holds the offer response until the returned sender fires or drops.
    pub fn hold_offer(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.offer_hold.lock() = Some(rx);
        tx
    }

    /// Queues the result of the next unscripted fetch. Fetches past the end
    /// of the script return an empty list.
    pub fn script_fetch(&self, candidates: Vec<IceCandidate>) {
        self.fetch_script.lock().push_back(Ok(candidates));
    }

    pub fn script_fetch_failure(&self, reason: impl Into<String>) {
        self.fetch_script.lock().push_back(Err(reason.into()));
    }

    pub fn offers(&self) -> Vec<OfferRequest> {
        self.offers.lock().clone()
    }

    pub fn posted_candidates(&self) -> Vec<IceCandidate> {
        self.posted.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn candidate_scopes(&self) -> Vec<Option<i64>> {
        self.posted.lock().iter().map(|(scope, _)| *scope).collect()
    }

    pub fn fetch_scopes(&self) -> Vec<Option<i64>> {
        self.fetch_scopes.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_scopes.lock().len()
    }

    pub fn activity(&self) -> watch::Receiver<Activity> {
        self.activity.subscribe()
    }

    pub async fn wait_for_candidates(&self, count: usize) {
        let mut rx = self.activity.subscribe();
        let _ = rx.wait_for(|activity| activity.candidates >= count).await;
    }

    pub async fn wait_for_offer(&self) {
        let mut rx = self.activity.subscribe();
        let _ = rx.wait_for(|activity| activity.offers >= 1).await;
    }
}

#[async_trait]
impl SignalingApi for MockSignaling {
    async fn post_offer(&self, offer: &OfferRequest) -> Result<AnswerResponse, SignalingError> {
        self.offers.lock().push(offer.clone());
        self.activity.send_modify(|activity| activity.offers += 1);
        let hold = self.offer_hold.lock().take();
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        self.answer
            .lock()
            .clone()
            .map_err(SignalingError::Unavailable)
    }

    async fn post_candidate(
        &self,
        scope: Option<i64>,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        self.posted.lock().push((scope, candidate.clone()));
        self.activity
            .send_modify(|activity| activity.candidates += 1);
        Ok(())
    }

    async fn fetch_candidates(
        &self,
        scope: Option<i64>,
    ) -> Result<Vec<IceCandidate>, SignalingError> {
        self.fetch_scopes.lock().push(scope);
        self.activity.send_modify(|activity| activity.fetches += 1);
        match self.fetch_script.lock().pop_front() {
            Some(Ok(candidates)) => Ok(candidates),
            Some(Err(reason)) => Err(SignalingError::Unavailable(reason)),
            None => Ok(Vec::new()),
        }
    }
}
