//! Refresh endpoint probing.
//!
//! Tries every candidate endpoint with every client identity to find out
//! which combination the remote service currently accepts:
//! - endpoint-major, identity-minor order
//! - one trial at a time, with a fixed pause between trials
//! - each trial bounded by a timeout that aborts the request
//!
//! Pacing matters for correctness: unthrottled trials trip rate limiting and
//! bot detection on the remote side, which would skew every classification.

mod classify;
mod endpoints;
mod transport;

pub use classify::{
    classify, ResponseRule, TrialError, TrialOutcome, CHALLENGE_MARKERS, RESPONSE_RULES,
};
pub use endpoints::{default_endpoints, default_identities, ClientIdentity, Endpoint, PROBE_HOST};
pub use transport::{ProbeRequest, ProbeResponse, ProbeTransport, ReqwestTransport, TransportError};

use crate::persistence::write_file_atomically;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};

/// Advice printed when no combination worked
pub const RECOMMENDATIONS: &[&str] = &[
    "All endpoints are blocked by Cloudflare or not found",
    "Consider using a proxy service",
    "Try manual token refresh for now",
    "Check if Claude has updated their API endpoints",
];

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Failed to serialize probe data: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write probe results to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Pacing policy for a probing run.
///
/// Trials never overlap: the next one starts only after the previous one
/// finished (or timed out) and `delay` has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Pause between consecutive trials
    pub delay: Duration,
    /// Upper bound for a single trial, including reading the body
    pub timeout: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of one (endpoint, identity) trial
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub endpoint: String,
    #[serde(rename = "userAgent")]
    pub identity: String,
    /// HTTP status, 0 when no response was received
    pub status: u16,
    pub success: bool,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<TrialError>,
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

fn serialize_error<S>(error: &Option<TrialError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ProbeResult {
    fn without_response(endpoint: &Endpoint, identity: &ClientIdentity, error: TrialError) -> Self {
        Self {
            endpoint: endpoint.name.clone(),
            identity: identity.label().to_string(),
            status: 0,
            success: false,
            error: Some(error),
            data: None,
            headers: None,
        }
    }

    fn from_response(
        endpoint: &Endpoint,
        identity: &ClientIdentity,
        response: ProbeResponse,
    ) -> Self {
        let (success, error, data) = match classify(&response) {
            TrialOutcome::Accepted(body) => (true, None, Some(body)),
            TrialOutcome::Rejected(err) => (false, Some(err), None),
        };

        Self {
            endpoint: endpoint.name.clone(),
            identity: identity.label().to_string(),
            status: response.status,
            success,
            error,
            data,
            headers: Some(response.headers),
        }
    }
}

/// Progress updates during a probing run
#[derive(Debug, Clone, Copy)]
pub enum ProbeProgress<'a> {
    Started {
        index: usize,
        total: usize,
        endpoint: &'a Endpoint,
        identity: &'a ClientIdentity,
    },
    Finished {
        index: usize,
        total: usize,
        result: &'a ProbeResult,
    },
}

/// Callback type for probe progress updates
pub type ProgressCallback = Box<dyn Fn(ProbeProgress<'_>) + Send + Sync>;

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Runs trials over the endpoint x identity product.
#[derive(Debug, Clone)]
pub struct Prober<T> {
    transport: T,
    endpoints: Vec<Endpoint>,
    identities: Vec<ClientIdentity>,
    pacing: Pacing,
}

impl<T: ProbeTransport> Prober<T> {
    /// A prober over the built-in endpoints and identities.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            endpoints: default_endpoints(),
            identities: default_identities(),
            pacing: Pacing::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_identities(mut self, identities: Vec<ClientIdentity>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    pub fn trial_count(&self) -> usize {
        self.endpoints.len() * self.identities.len()
    }

    fn trials(&self) -> impl Iterator<Item = (&Endpoint, &ClientIdentity)> {
        self.endpoints
            .iter()
            .flat_map(move |endpoint| self.identities.iter().map(move |identity| (endpoint, identity)))
    }

    /// Run every trial in order and return one result per trial.
    ///
    /// Individual trial failures are recorded, never returned as errors.
    pub async fn run(
        &self,
        refresh_token: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<ProbeResult>, ProbeError> {
        if refresh_token.is_empty() {
            return Err(ProbeError::MissingRefreshToken);
        }

        let body = serde_json::to_string(&RefreshRequest { refresh_token })
            .map_err(ProbeError::Serialize)?;
        let total = self.trial_count();
        let mut results = Vec::with_capacity(total);

        tracing::info!(
            "Probing {} endpoints x {} identities ({} trials)",
            self.endpoints.len(),
            self.identities.len(),
            total
        );

        for (index, (endpoint, identity)) in self.trials().enumerate() {
            if index > 0 {
                sleep(self.pacing.delay).await;
            }

            if let Some(emit) = &progress {
                emit(ProbeProgress::Started {
                    index,
                    total,
                    endpoint,
                    identity,
                });
            }

            let result = self.run_trial(endpoint, identity, &body).await;

            if let Some(emit) = &progress {
                emit(ProbeProgress::Finished {
                    index,
                    total,
                    result: &result,
                });
            }
            results.push(result);
        }

        Ok(results)
    }

    async fn run_trial(
        &self,
        endpoint: &Endpoint,
        identity: &ClientIdentity,
        body: &str,
    ) -> ProbeResult {
        let request = ProbeRequest {
            endpoint,
            identity,
            body,
        };

        // Dropping the send future on timeout aborts the in-flight request.
        let result = match timeout(self.pacing.timeout, self.transport.send(request)).await {
            Err(_) => ProbeResult::without_response(endpoint, identity, TrialError::Timeout),
            Ok(Err(e)) => {
                ProbeResult::without_response(endpoint, identity, TrialError::Transport(e.0))
            }
            Ok(Ok(response)) => ProbeResult::from_response(endpoint, identity, response),
        };

        tracing::debug!(
            "{} as {}: status {}, {}",
            endpoint.name,
            identity.label(),
            result.status,
            result
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "success".to_string())
        );
        result
    }
}

/// A combination that issued a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkingCombination {
    pub endpoint: String,
    pub identity: String,
}

/// Tally of a probing run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub total: usize,
    pub successful: usize,
    pub challenged: usize,
    pub not_found: usize,
    pub other_errors: usize,
    pub working: Vec<WorkingCombination>,
}

impl ProbeSummary {
    pub fn from_results(results: &[ProbeResult]) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        let challenged = results
            .iter()
            .filter(|r| r.error == Some(TrialError::Challenge))
            .count();
        let not_found = results
            .iter()
            .filter(|r| r.error == Some(TrialError::NotFound))
            .count();

        let working = results
            .iter()
            .filter(|r| r.success)
            .map(|r| WorkingCombination {
                endpoint: r.endpoint.clone(),
                identity: r.identity.clone(),
            })
            .collect();

        Self {
            total: results.len(),
            successful,
            challenged,
            not_found,
            other_errors: results.len() - successful - challenged - not_found,
            working,
        }
    }

    /// Advice to show, empty when at least one combination worked.
    pub fn recommendations(&self) -> &'static [&'static str] {
        if self.successful == 0 {
            RECOMMENDATIONS
        } else {
            &[]
        }
    }
}

/// Write the full result list as pretty JSON, replacing any earlier report.
pub fn save_results(path: &Path, results: &[ProbeResult]) -> Result<(), ProbeError> {
    let json = serde_json::to_string_pretty(results).map_err(ProbeError::Serialize)?;
    write_file_atomically(path, json.as_bytes()).map_err(|source| ProbeError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!("Saved {} probe results to {:?}", results.len(), path);
    Ok(())
}
