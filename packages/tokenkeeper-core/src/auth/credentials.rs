//! Credential storage backed by a flat JSON file.
//!
//! Load priority for the lenient loader:
//! 1. `CLAUDE_*` environment variables (when `CLAUDE_REFRESH_TOKEN` is set)
//! 2. The credential file (by default `~/.claude/.credentials.json`)
//!
//! The refresh flow uses the strict [`CredentialStore::load_file`] instead,
//! which reports a missing or unparseable file as an error.

use crate::persistence::write_file_atomically;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the refresh token
pub const ENV_REFRESH_TOKEN: &str = "CLAUDE_REFRESH_TOKEN";
/// Environment variable holding the access token
pub const ENV_ACCESS_TOKEN: &str = "CLAUDE_ACCESS_TOKEN";
/// Environment variable holding the expiry (milliseconds since epoch)
pub const ENV_EXPIRES_AT: &str = "CLAUDE_EXPIRES_AT";

/// OAuth state for one account.
///
/// Fields are optional because credentials taken from the environment may be
/// partial. A record produced by a successful refresh always has all three.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, alias = "accessToken")]
    pub access_token: Option<String>,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    /// Expiry in milliseconds since the Unix epoch
    #[serde(default, alias = "expiresAt", deserialize_with = "deserialize_millis")]
    pub expires_at: Option<i64>,
}

impl Credentials {
    /// The refresh token, if present and non-empty.
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

// Tokens are secrets, keep them out of debug output and logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(millis_from_value))
}

fn millis_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => parse_millis(s),
        _ => None,
    }
}

fn parse_millis(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Credentials file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read credentials file {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to parse credentials file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write credentials file {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("Could not determine the home directory")]
    NoHomeDir,
}

/// Build credentials from `CLAUDE_*` variables using the given lookup.
///
/// Returns `None` unless the refresh token variable is set to a non-empty
/// value. The other two variables are taken as-is; missing ones stay `None`.
pub fn credentials_from_env<F>(lookup: F) -> Option<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let refresh_token = lookup(ENV_REFRESH_TOKEN).filter(|t| !t.is_empty())?;

    let expires_at = lookup(ENV_EXPIRES_AT).and_then(|raw| {
        let parsed = parse_millis(&raw);
        if parsed.is_none() {
            tracing::warn!("Ignoring {}: not an integer millisecond timestamp", ENV_EXPIRES_AT);
        }
        parsed
    });

    Some(Credentials {
        access_token: lookup(ENV_ACCESS_TOKEN),
        refresh_token: Some(refresh_token),
        expires_at,
    })
}

/// Credential file at an injected location.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The well-known per-user location, `~/.claude/.credentials.json`.
    pub fn default_location() -> Result<PathBuf, StoreError> {
        dirs::home_dir()
            .map(|home| home.join(".claude").join(".credentials.json"))
            .ok_or(StoreError::NoHomeDir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the credential file, failing if it is missing or malformed.
    pub fn load_file(&self) -> Result<Credentials, StoreError> {
        let content = fs::read_to_string(&self.path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound {
                    path: self.path.clone(),
                }
            } else {
                StoreError::Read {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        let creds = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!("Credentials loaded from {:?}", self.path);
        Ok(creds)
    }

    /// Load credentials from the process environment, then the file.
    ///
    /// Returns `None` when neither source has credentials.
    pub fn load(&self) -> Option<Credentials> {
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable lookup.
    pub fn load_with_env<F>(&self, lookup: F) -> Option<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(creds) = credentials_from_env(lookup) {
            tracing::debug!("Credentials loaded from environment");
            return Some(creds);
        }

        match self.load_file() {
            Ok(creds) => Some(creds),
            Err(StoreError::NotFound { .. }) => {
                tracing::debug!("No credentials file at {:?}", self.path);
                None
            }
            Err(e) => {
                tracing::warn!("Could not load credentials: {}", e);
                None
            }
        }
    }

    /// Replace the credential file with `creds` as pretty-printed JSON.
    pub fn save(&self, creds: &Credentials) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(creds).map_err(StoreError::Serialize)?;
        write_file_atomically(&self.path, json.as_bytes()).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!("Credentials saved to {:?}", self.path);
        Ok(())
    }
}
