//! Proactive access token refresh.
//!
//! A token is refreshed when six hours or less of validity remain (including
//! when it has already expired). The exchange is a single POST with no retry;
//! any failure is returned to the caller.

use crate::auth::credentials::{CredentialStore, Credentials, StoreError};
use crate::config::RuntimeConfig;
use reqwest::header::USER_AGENT;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Default refresh endpoint
pub const DEFAULT_REFRESH_URL: &str = "https://claude.ai/api/auth/refresh";

/// User agent sent with refresh requests
pub const DEFAULT_USER_AGENT: &str = "Claude-GitHub-Action/1.0";

/// Lifetime assumed when the server omits `expires_in`
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 86_400;

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Upper bound for one refresh exchange
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// When to refresh ahead of expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh when whole hours left is at or below this value
    pub threshold_hours: i64,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self { threshold_hours: 6 }
    }
}

impl RefreshPolicy {
    /// Whole hours until `expires_at`, rounded down. A missing expiry counts as 0.
    pub fn hours_left(expires_at: Option<i64>, now: i64) -> i64 {
        expires_at
            .unwrap_or(0)
            .saturating_sub(now)
            .div_euclid(MILLIS_PER_HOUR)
    }

    pub fn needs_refresh(&self, expires_at: Option<i64>, now: i64) -> bool {
        Self::hours_left(expires_at, now) <= self.threshold_hours
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("No refresh token in stored credentials")]
    MissingRefreshToken,

    #[error("Refresh request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Token refresh failed (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Token refresh failed: no access_token in response: {body}")]
    MissingAccessToken { body: String },

    #[error("Failed to parse refresh response: {source}")]
    InvalidJson {
        body: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of [`TokenRefresher::ensure_fresh`]
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// Credentials now in effect (refreshed or unchanged)
    pub credentials: Credentials,
    /// Whole hours that were left before any refresh
    pub hours_left: i64,
    pub refreshed: bool,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Client for the refresh endpoint.
#[derive(Debug, Clone)]
pub struct TokenRefresher {
    client: reqwest::Client,
    url: String,
    user_agent: String,
    policy: RefreshPolicy,
}

impl TokenRefresher {
    pub fn new(url: impl Into<String>, user_agent: impl Into<String>) -> Result<Self, RefreshError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(RefreshError::Transport)?;

        Ok(Self {
            client,
            url: url.into(),
            user_agent: user_agent.into(),
            policy: RefreshPolicy::default(),
        })
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self, RefreshError> {
        Self::new(config.refresh_url.clone(), config.user_agent.clone())
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Exchange `refresh_token` for a new credential record.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credentials, RefreshError> {
        tracing::debug!("Requesting token refresh from {}", self.url);

        let resp = self
            .client
            .post(&self.url)
            .header(USER_AGENT, &self.user_agent)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(RefreshError::Transport)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(RefreshError::Transport)?;
        tracing::debug!("Refresh endpoint returned {}", status);

        interpret_response(status, body, refresh_token, now_millis())
    }

    /// Refresh `current` if the policy says so and persist the result.
    pub async fn refresh_if_needed(
        &self,
        store: &CredentialStore,
        current: Credentials,
    ) -> Result<RefreshOutcome, RefreshError> {
        let now = now_millis();
        let hours_left = RefreshPolicy::hours_left(current.expires_at, now);

        if !self.policy.needs_refresh(current.expires_at, now) {
            tracing::info!("Token still valid ({} hours left)", hours_left);
            return Ok(RefreshOutcome {
                credentials: current,
                hours_left,
                refreshed: false,
            });
        }

        tracing::info!("Token expires in {} hours, refreshing", hours_left);
        let refresh_token = current
            .usable_refresh_token()
            .ok_or(RefreshError::MissingRefreshToken)?;

        let renewed = self.refresh(refresh_token).await?;
        store.save(&renewed)?;
        tracing::info!("Token refreshed");

        Ok(RefreshOutcome {
            credentials: renewed,
            hours_left,
            refreshed: true,
        })
    }

    /// Load the stored credentials and refresh them if needed.
    pub async fn ensure_fresh(&self, store: &CredentialStore) -> Result<RefreshOutcome, RefreshError> {
        let current = store.load_file()?;
        self.refresh_if_needed(store, current).await
    }
}

/// Turn a refresh response into credentials.
///
/// Only HTTP 200 with a non-empty string `access_token` succeeds. A missing
/// `refresh_token` keeps the original one and a missing or zero `expires_in`
/// falls back to [`DEFAULT_EXPIRES_IN_SECS`].
fn interpret_response(
    status: u16,
    body: String,
    original_refresh_token: &str,
    now: i64,
) -> Result<Credentials, RefreshError> {
    if status != 200 {
        return Err(RefreshError::Rejected { status, body });
    }

    let payload: Value = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(source) => return Err(RefreshError::InvalidJson { body, source }),
    };

    let Some(access_token) = payload
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
    else {
        return Err(RefreshError::MissingAccessToken { body });
    };

    let refresh_token = payload
        .get("refresh_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or(original_refresh_token);

    let expires_in = payload
        .get("expires_in")
        .and_then(Value::as_f64)
        .filter(|secs| *secs > 0.0)
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS as f64);

    // The cast saturates, the addition must too
    let lifetime_ms = (expires_in * 1000.0).round() as i64;

    Ok(Credentials {
        access_token: Some(access_token.to_string()),
        refresh_token: Some(refresh_token.to_string()),
        expires_at: Some(now.saturating_add(lifetime_ms)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = MILLIS_PER_HOUR;
    const NOW: i64 = 1_700_000_000_000;

    fn store_with(dir: &tempfile::TempDir, creds: &Credentials) -> CredentialStore {
        let store = CredentialStore::new(dir.path().join(".credentials.json"));
        store.save(creds).unwrap();
        store
    }

    fn creds_expiring_at(expires_at: i64) -> Credentials {
        Credentials {
            access_token: Some("old-access".to_string()),
            refresh_token: Some("old-refresh".to_string()),
            expires_at: Some(expires_at),
        }
    }

    #[test]
    fn test_hours_left_rounds_down() {
        assert_eq!(RefreshPolicy::hours_left(Some(NOW + 7 * HOUR), NOW), 7);
        assert_eq!(RefreshPolicy::hours_left(Some(NOW + 7 * HOUR - 1), NOW), 6);
        assert_eq!(RefreshPolicy::hours_left(Some(NOW - 1), NOW), -1);
        assert!(RefreshPolicy::hours_left(None, NOW) < 0);
    }

    #[test]
    fn test_refresh_threshold() {
        let policy = RefreshPolicy::default();
        assert!(policy.needs_refresh(None, NOW));
        assert!(policy.needs_refresh(Some(NOW - 48 * HOUR), NOW));
        assert!(policy.needs_refresh(Some(NOW), NOW));
        assert!(policy.needs_refresh(Some(NOW + 6 * HOUR), NOW));
        assert!(policy.needs_refresh(Some(NOW + 6 * HOUR + 30 * 60 * 1000), NOW));
        assert!(!policy.needs_refresh(Some(NOW + 7 * HOUR), NOW));
        assert!(!policy.needs_refresh(Some(NOW + 30 * 24 * HOUR), NOW));
    }

    #[test]
    fn test_interpret_success_reuses_refresh_token() {
        let creds = interpret_response(
            200,
            r#"{"access_token":"A","expires_in":100}"#.to_string(),
            "original",
            NOW,
        )
        .unwrap();

        assert_eq!(creds.access_token.as_deref(), Some("A"));
        assert_eq!(creds.refresh_token.as_deref(), Some("original"));
        assert_eq!(creds.expires_at, Some(NOW + 100_000));
    }

    #[test]
    fn test_interpret_success_rotates_refresh_token_and_defaults_lifetime() {
        let creds = interpret_response(
            200,
            r#"{"access_token":"A","refresh_token":"R2"}"#.to_string(),
            "original",
            NOW,
        )
        .unwrap();

        assert_eq!(creds.refresh_token.as_deref(), Some("R2"));
        assert_eq!(creds.expires_at, Some(NOW + 86_400_000));
    }

    #[test]
    fn test_interpret_failures_are_distinct() {
        let missing = interpret_response(200, r#"{"token":"x"}"#.to_string(), "r", NOW);
        assert!(matches!(missing, Err(RefreshError::MissingAccessToken { .. })));

        let empty = interpret_response(200, r#"{"access_token":""}"#.to_string(), "r", NOW);
        assert!(matches!(empty, Err(RefreshError::MissingAccessToken { .. })));

        let invalid = interpret_response(200, "<html>".to_string(), "r", NOW);
        assert!(matches!(invalid, Err(RefreshError::InvalidJson { .. })));

        match interpret_response(401, r#"{"error":"expired"}"#.to_string(), "r", NOW) {
            Err(RefreshError::Rejected { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, r#"{"error":"expired"}"#);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_interpret_huge_lifetime_saturates() {
        let creds = interpret_response(
            200,
            r#"{"access_token":"A","expires_in":1e17}"#.to_string(),
            "r",
            NOW,
        )
        .unwrap();
        assert_eq!(creds.expires_at, Some(i64::MAX));
        assert!(!RefreshPolicy::default().needs_refresh(creds.expires_at, NOW));
    }

    #[tokio::test]
    async fn test_redirect_is_rejected_not_followed() {
        let mut server = mockito::Server::new_async().await;
        let refresh = server
            .mock("POST", "/api/auth/refresh")
            .with_status(302)
            .with_header("location", "/login")
            .with_body("")
            .create_async()
            .await;
        let login = server
            .mock("GET", "/login")
            .with_status(200)
            .with_body(r#"{"access_token":"from-login-page"}"#)
            .expect(0)
            .create_async()
            .await;

        let refresher =
            TokenRefresher::new(format!("{}/api/auth/refresh", server.url()), DEFAULT_USER_AGENT)
                .unwrap();

        let err = refresher.refresh("old-refresh").await.unwrap_err();

        refresh.assert_async().await;
        login.assert_async().await;
        assert!(matches!(err, RefreshError::Rejected { status: 302, .. }));
    }

    #[tokio::test]
    async fn test_refresh_sends_json_body_and_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/auth/refresh")
            .match_header("content-type", "application/json")
            .match_header("user-agent", DEFAULT_USER_AGENT)
            .match_body(mockito::Matcher::Json(
                serde_json::json!({"refresh_token": "old-refresh"}),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"A","expires_in":100}"#)
            .create_async()
            .await;

        let refresher =
            TokenRefresher::new(format!("{}/api/auth/refresh", server.url()), DEFAULT_USER_AGENT)
                .unwrap();

        let before = now_millis();
        let creds = refresher.refresh("old-refresh").await.unwrap();
        let after = now_millis();

        mock.assert_async().await;
        assert_eq!(creds.access_token.as_deref(), Some("A"));
        assert_eq!(creds.refresh_token.as_deref(), Some("old-refresh"));
        let expires_at = creds.expires_at.unwrap();
        assert!(expires_at >= before + 100_000 && expires_at <= after + 100_000);
    }

    #[tokio::test]
    async fn test_ensure_fresh_refreshes_and_persists() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/refresh")
            .with_status(200)
            .with_body(r#"{"access_token":"new-access","refresh_token":"new-refresh","expires_in":3600}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, &creds_expiring_at(now_millis() + HOUR));
        let refresher = TokenRefresher::new(format!("{}/refresh", server.url()), "test").unwrap();

        let outcome = refresher.ensure_fresh(&store).await.unwrap();

        mock.assert_async().await;
        assert!(outcome.refreshed);
        assert_eq!(outcome.hours_left, 0);
        assert_eq!(store.load_file().unwrap(), outcome.credentials);
        assert_eq!(outcome.credentials.refresh_token.as_deref(), Some("new-refresh"));
    }

    #[tokio::test]
    async fn test_ensure_fresh_skips_valid_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/refresh")
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let current = creds_expiring_at(now_millis() + 24 * HOUR);
        let store = store_with(&dir, &current);
        let refresher = TokenRefresher::new(format!("{}/refresh", server.url()), "test").unwrap();

        let outcome = refresher.ensure_fresh(&store).await.unwrap();

        mock.assert_async().await;
        assert!(!outcome.refreshed);
        assert_eq!(outcome.credentials, current);
    }

    #[tokio::test]
    async fn test_missing_access_token_does_not_persist() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/refresh")
            .with_status(200)
            .with_body(r#"{"expires_in":3600}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let current = creds_expiring_at(now_millis() - HOUR);
        let store = store_with(&dir, &current);
        let refresher = TokenRefresher::new(format!("{}/refresh", server.url()), "test").unwrap();

        let err = refresher.ensure_fresh(&store).await.unwrap_err();

        assert!(matches!(err, RefreshError::MissingAccessToken { .. }));
        assert_eq!(store.load_file().unwrap(), current);
    }

    #[tokio::test]
    async fn test_ensure_fresh_without_credentials_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("absent.json"));
        let refresher = TokenRefresher::new("http://127.0.0.1:9/refresh", "test").unwrap();

        let err = refresher.ensure_fresh(&store).await.unwrap_err();
        assert!(matches!(err, RefreshError::Store(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(
            &dir,
            &Credentials {
                access_token: Some("a".to_string()),
                refresh_token: None,
                expires_at: None,
            },
        );
        let refresher = TokenRefresher::new("http://127.0.0.1:9/refresh", "test").unwrap();

        let err = refresher.ensure_fresh(&store).await.unwrap_err();
        assert!(matches!(err, RefreshError::MissingRefreshToken));
    }

    #[tokio::test]
    async fn test_connection_failure_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&dir, &creds_expiring_at(0));
        // Port 9 (discard) is not expected to accept HTTP connections
        let refresher = TokenRefresher::new("http://127.0.0.1:9/refresh", "test").unwrap();

        let err = refresher.ensure_fresh(&store).await.unwrap_err();
        assert!(matches!(err, RefreshError::Transport(_)));
    }
}
