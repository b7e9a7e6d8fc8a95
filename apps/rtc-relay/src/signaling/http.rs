use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use url::Url;

use super::{
    AnswerResponse, ICE_CANDIDATE_PATH, IceCandidate, NEW_OFFER_PATH, OfferRequest, SignalingApi,
    SignalingError,
};

/// `SignalingApi` over the relay's JSON HTTP endpoints.
#[derive(Clone, Debug)]
pub struct HttpSignalingClient {
    http: Client,
    base: Url,
}

impl HttpSignalingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SignalingError> {
        let http = Client::builder().timeout(timeout).build()?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self, SignalingError> {
        Ok(Self {
            http,
            base: normalize_base(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str, scope: Option<i64>) -> Result<Url, SignalingError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|err| SignalingError::InvalidUrl(format!("{path}: {err}")))?;
        if let Some(id) = scope {
            url.query_pairs_mut().append_pair("id", &id.to_string());
        }
        Ok(url)
    }
}

/// Parses the relay base URL and guarantees a trailing `/` so relative
/// endpoint paths join beneath any path prefix.
pub(crate) fn normalize_base(base_url: &str) -> Result<Url, SignalingError> {
    let trimmed = base_url.trim();
    let mut url = Url::parse(trimmed)
        .map_err(|err| SignalingError::InvalidUrl(format!("{trimmed}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(SignalingError::InvalidUrl(format!(
            "{trimmed}: expected an http(s) base url"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

async fn ensure_success(response: Response) -> Result<Response, SignalingError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(SignalingError::UnexpectedStatus { status, body })
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, SignalingError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| SignalingError::InvalidResponse(err.to_string()))
}

#[async_trait]
impl SignalingApi for HttpSignalingClient {
    async fn post_offer(&self, offer: &OfferRequest) -> Result<AnswerResponse, SignalingError> {
        let url = self.endpoint(NEW_OFFER_PATH, None)?;
        tracing::trace!(
            target = "rtc_relay::signaling",
            phase = "post_offer",
            %url,
            await = "client.send",
            state = "start"
        );
        let send_attempt = self.http.post(url).json(offer).send().await;
        tracing::trace!(
            target = "rtc_relay::signaling",
            phase = "post_offer",
            await = "client.send",
            state = "end",
            result = ?send_attempt.as_ref().map(Response::status)
        );
        let response = ensure_success(send_attempt?).await?;
        decode_json::<AnswerResponse>(response).await
    }

    async fn post_candidate(
        &self,
        scope: Option<i64>,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        let url = self.endpoint(ICE_CANDIDATE_PATH, scope)?;
        let response = self.http.post(url).json(candidate).send().await?;
        tracing::trace!(
            target = "rtc_relay::signaling",
            phase = "post_candidate",
            status = %response.status(),
            scope = ?scope
        );
        ensure_success(response).await?;
        Ok(())
    }

    async fn fetch_candidates(
        &self,
        scope: Option<i64>,
    ) -> Result<Vec<IceCandidate>, SignalingError> {
        let url = self.endpoint(ICE_CANDIDATE_PATH, scope)?;
        let response = ensure_success(self.http.get(url).send().await?).await?;
        let bytes = response.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        // The relay answers `null` when it holds nothing for this session.
        let candidates: Option<Vec<IceCandidate>> = serde_json::from_slice(&bytes)
            .map_err(|err| SignalingError::InvalidResponse(err.to_string()))?;
        let candidates = candidates.unwrap_or_default();
        tracing::trace!(
            target = "rtc_relay::signaling",
            phase = "fetch_candidates",
            count = candidates.len(),
            scope = ?scope
        );
        Ok(candidates)
    }
}
