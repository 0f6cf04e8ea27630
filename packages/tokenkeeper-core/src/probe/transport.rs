//! HTTP transport used by the prober.

use super::endpoints::{ClientIdentity, Endpoint};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, PRAGMA, USER_AGENT};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;

/// One trial's request.
#[derive(Debug, Clone, Copy)]
pub struct ProbeRequest<'a> {
    pub endpoint: &'a Endpoint,
    pub identity: &'a ClientIdentity,
    /// JSON request body
    pub body: &'a str,
}

/// A complete HTTP response. The body is parsed as JSON once, up front.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    json: Option<Value>,
}

impl ProbeResponse {
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let json = serde_json::from_str(&body).ok();
        Self {
            status,
            headers,
            body,
            json,
        }
    }

    /// The body as JSON, if it parsed.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }
}

/// Failure before a response was received (DNS, connect, TLS, reset).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Sends probe requests.
///
/// The prober bounds every call with its timeout and drops the future when
/// the bound is hit, so implementations must cancel cleanly on drop.
pub trait ProbeTransport {
    fn send(
        &self,
        request: ProbeRequest<'_>,
    ) -> impl Future<Output = Result<ProbeResponse, TransportError>> + Send;
}

/// Transport over `reqwest`.
///
/// Redirects are not followed: a 3xx is the trial's answer.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    scheme: String,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError(e.to_string()))?;

        Ok(Self {
            client,
            scheme: "https".to_string(),
        })
    }

    /// Use another URL scheme (plain `http` for local test servers).
    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    fn url_for(&self, endpoint: &Endpoint) -> String {
        format!("{}://{}{}", self.scheme, endpoint.host, endpoint.path)
    }
}

impl ProbeTransport for ReqwestTransport {
    async fn send(&self, request: ProbeRequest<'_>) -> Result<ProbeResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.endpoint.method.as_bytes())
            .map_err(|e| TransportError(e.to_string()))?;
        let url = self.url_for(request.endpoint);
        tracing::debug!("{} {} as {}", method, url, request.identity.label());

        let resp = self
            .client
            .request(method, &url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &request.identity.user_agent)
            .header(ACCEPT, "application/json")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .body(request.body.to_string())
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.text().await.map_err(|e| TransportError(e.to_string()))?;

        Ok(ProbeResponse::new(status, headers, body))
    }
}
