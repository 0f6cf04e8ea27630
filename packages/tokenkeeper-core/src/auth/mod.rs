//! Credential handling for Tokenkeeper.
//!
//! Provides the flat-file credential store and the proactive refresh client.

mod credentials;
mod refresh;

pub use credentials::{
    credentials_from_env, CredentialStore, Credentials, StoreError, ENV_ACCESS_TOKEN,
    ENV_EXPIRES_AT, ENV_REFRESH_TOKEN,
};
pub use refresh::{
    now_millis, RefreshError, RefreshOutcome, RefreshPolicy, TokenRefresher,
    DEFAULT_EXPIRES_IN_SECS, DEFAULT_REFRESH_URL, DEFAULT_USER_AGENT,
};
