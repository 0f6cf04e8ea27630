//! Tokenkeeper Core Library
//!
//! This crate provides the core functionality behind the Tokenkeeper tools:
//! - Credential management (flat JSON credential file, `CLAUDE_*` environment overrides)
//! - Proactive token refresh (refresh when six hours or less of validity remain)
//! - Refresh endpoint probing (endpoint x client identity trials, paced and classified)
//!
//! # Example
//!
//! ```no_run
//! use tokenkeeper_core::{auth, config, probe};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load_config();
//!     let store = auth::CredentialStore::new(&config.credentials_path);
//!
//!     // Refresh the stored token if it is close to expiry
//!     let refresher = auth::TokenRefresher::from_config(&config)?;
//!     let outcome = refresher.ensure_fresh(&store).await?;
//!     println!("{} hours left", outcome.hours_left);
//!
//!     // Probe the candidate refresh endpoints
//!     let prober = probe::Prober::new(probe::ReqwestTransport::new()?)
//!         .with_pacing(config.probe.pacing());
//!     let token = outcome.credentials.refresh_token.unwrap_or_default();
//!     let results = prober.run(&token, None).await?;
//!     println!("{} trials", results.len());
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
mod persistence;
pub mod probe;

// Re-export commonly used types
pub use auth::{Credentials, CredentialStore, RefreshError, RefreshOutcome, StoreError, TokenRefresher};
pub use config::{ConfigSource, RuntimeConfig};
pub use probe::{ProbeResult, ProbeSummary, Prober, TrialError};
