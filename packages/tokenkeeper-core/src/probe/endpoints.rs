//! Candidate refresh endpoints and simulated client identities.

use serde::Serialize;

/// Host serving all built-in candidate endpoints
pub const PROBE_HOST: &str = "claude.ai";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub name: String,
    pub host: String,
    pub path: String,
    pub method: String,
}

impl Endpoint {
    /// A POST endpoint on `host`.
    pub fn post(name: &str, host: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            path: path.to_string(),
            method: "POST".to_string(),
        }
    }
}

/// A simulated client, identified by the user agent it sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_agent: String,
}

impl ClientIdentity {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    /// Short label used in reports: the user agent up to the first `/`.
    pub fn label(&self) -> &str {
        self.user_agent
            .split('/')
            .next()
            .unwrap_or(&self.user_agent)
    }
}

/// Candidate endpoints, in trial order.
pub fn default_endpoints() -> Vec<Endpoint> {
    vec![
        Endpoint::post("Standard auth/refresh", PROBE_HOST, "/api/auth/refresh"),
        Endpoint::post("OAuth refresh", PROBE_HOST, "/api/auth/oauth/refresh"),
        Endpoint::post("V1 auth refresh", PROBE_HOST, "/api/v1/auth/refresh"),
        Endpoint::post("V2 auth refresh", PROBE_HOST, "/api/v2/auth/refresh"),
        Endpoint::post("Token refresh", PROBE_HOST, "/api/token/refresh"),
    ]
}

/// Browser and native-client identities, in trial order.
pub fn default_identities() -> Vec<ClientIdentity> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Claude-Desktop/1.0.0",
        "Claude-CLI/1.0.0",
    ]
    .into_iter()
    .map(ClientIdentity::new)
    .collect()
}
