//! Classification of probe responses.
//!
//! Responses are matched against [`RESPONSE_RULES`] top-down; the first rule
//! whose predicate holds decides the outcome. Transport failures and
//! timeouts never reach this table, the prober classifies them directly.

use super::transport::ProbeResponse;
use serde_json::Value;
use thiserror::Error;

/// Case-sensitive body markers of an anti-automation challenge page
pub const CHALLENGE_MARKERS: &[&str] = &["cloudflare", "challenge"];

/// Why a trial did not yield an access token.
///
/// The `Display` text is what ends up in the probe report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrialError {
    #[error("{0}")]
    Transport(String),
    #[error("Timeout")]
    Timeout,
    #[error("No access_token in response")]
    MissingAccessToken,
    #[error("Invalid JSON response")]
    InvalidJson,
    #[error("Cloudflare challenge")]
    Challenge,
    #[error("Forbidden")]
    Forbidden,
    #[error("Endpoint not found")]
    NotFound,
    #[error("HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    /// The endpoint issued a token; holds the parsed response body
    Accepted(Value),
    Rejected(TrialError),
}

/// One entry of the classification table.
pub struct ResponseRule {
    pub name: &'static str,
    pub matches: fn(&ProbeResponse) -> bool,
    pub outcome: fn(&ProbeResponse) -> TrialOutcome,
}

/// Ordered classification policy for received responses.
pub static RESPONSE_RULES: &[ResponseRule] = &[
    ResponseRule {
        name: "token issued",
        matches: issued_token,
        outcome: accept_body,
    },
    ResponseRule {
        name: "missing access_token",
        matches: ok_with_json,
        outcome: |_| TrialOutcome::Rejected(TrialError::MissingAccessToken),
    },
    ResponseRule {
        name: "invalid json",
        matches: is_ok,
        outcome: |_| TrialOutcome::Rejected(TrialError::InvalidJson),
    },
    ResponseRule {
        name: "anti-automation challenge",
        matches: challenged,
        outcome: |_| TrialOutcome::Rejected(TrialError::Challenge),
    },
    ResponseRule {
        name: "forbidden",
        matches: |r| r.status == 403,
        outcome: |_| TrialOutcome::Rejected(TrialError::Forbidden),
    },
    ResponseRule {
        name: "not found",
        matches: |r| r.status == 404,
        outcome: |_| TrialOutcome::Rejected(TrialError::NotFound),
    },
];

/// Classify a received response. Statuses no rule covers become `HTTP <status>`.
pub fn classify(response: &ProbeResponse) -> TrialOutcome {
    RESPONSE_RULES
        .iter()
        .find(|rule| (rule.matches)(response))
        .map(|rule| (rule.outcome)(response))
        .unwrap_or(TrialOutcome::Rejected(TrialError::Status(response.status)))
}

/// JavaScript-style truthiness of a JSON value.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn is_ok(response: &ProbeResponse) -> bool {
    response.status == 200
}

fn ok_with_json(response: &ProbeResponse) -> bool {
    is_ok(response) && response.json().is_some()
}

fn issued_token(response: &ProbeResponse) -> bool {
    is_ok(response)
        && response
            .json()
            .and_then(|body| body.get("access_token"))
            .is_some_and(is_truthy)
}

fn accept_body(response: &ProbeResponse) -> TrialOutcome {
    TrialOutcome::Accepted(response.json().cloned().unwrap_or(Value::Null))
}

fn challenged(response: &ProbeResponse) -> bool {
    response.status == 403
        && CHALLENGE_MARKERS
            .iter()
            .any(|marker| response.body.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn response(status: u16, body: &str) -> ProbeResponse {
        ProbeResponse::new(status, BTreeMap::new(), body)
    }

    fn rejected(status: u16, body: &str) -> TrialError {
        match classify(&response(status, body)) {
            TrialOutcome::Rejected(err) => err,
            TrialOutcome::Accepted(body) => panic!("unexpected success: {}", body),
        }
    }

    #[test]
    fn test_rule_order() {
        let names: Vec<_> = RESPONSE_RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            [
                "token issued",
                "missing access_token",
                "invalid json",
                "anti-automation challenge",
                "forbidden",
                "not found",
            ]
        );
    }

    #[test]
    fn test_success_keeps_body() {
        let outcome = classify(&response(200, r#"{"access_token":"A","expires_in":60}"#));
        assert_eq!(
            outcome,
            TrialOutcome::Accepted(json!({"access_token": "A", "expires_in": 60}))
        );
    }

    #[test]
    fn test_ok_response_failures() {
        assert_eq!(rejected(200, r#"{"ok":true}"#), TrialError::MissingAccessToken);
        assert_eq!(rejected(200, r#"{"access_token":""}"#), TrialError::MissingAccessToken);
        assert_eq!(rejected(200, r#"{"access_token":null}"#), TrialError::MissingAccessToken);
        assert_eq!(rejected(200, "<html></html>"), TrialError::InvalidJson);
        assert_eq!(rejected(200, ""), TrialError::InvalidJson);
    }

    #[test]
    fn test_forbidden_variants() {
        assert_eq!(
            rejected(403, "<title>Just a moment...</title> cloudflare"),
            TrialError::Challenge
        );
        assert_eq!(rejected(403, "managed challenge"), TrialError::Challenge);
        assert_eq!(rejected(403, "Cloudflare"), TrialError::Forbidden);
        assert_eq!(rejected(403, "access denied"), TrialError::Forbidden);
    }

    #[test]
    fn test_other_statuses() {
        assert_eq!(rejected(404, "cloudflare"), TrialError::NotFound);
        assert_eq!(rejected(429, "slow down"), TrialError::Status(429));
        assert_eq!(rejected(500, "{}"), TrialError::Status(500));
    }

    #[test]
    fn test_error_strings() {
        assert_eq!(TrialError::Timeout.to_string(), "Timeout");
        assert_eq!(TrialError::Challenge.to_string(), "Cloudflare challenge");
        assert_eq!(TrialError::NotFound.to_string(), "Endpoint not found");
        assert_eq!(TrialError::Status(502).to_string(), "HTTP 502");
        assert_eq!(
            TrialError::Transport("connection refused".to_string()).to_string(),
            "connection refused"
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!({})));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!("")));
    }
}
