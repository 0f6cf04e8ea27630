//! refresh-oauth-token - keep Claude OAuth credentials fresh
//!
//! Checks the expiry of the stored access token and refreshes it when six
//! hours or less remain, then prints the values to store as CI secrets.

mod common;

use anyhow::{Context, Result};
use clap::Parser;
use common::OutputFormat;
use std::path::PathBuf;
use tokenkeeper_core::auth::{
    self, CredentialStore, Credentials, RefreshOutcome, RefreshPolicy, TokenRefresher,
    ENV_ACCESS_TOKEN, ENV_EXPIRES_AT, ENV_REFRESH_TOKEN,
};
use tokenkeeper_core::config;

#[derive(Parser)]
#[command(name = "refresh-oauth-token")]
#[command(version)]
#[command(about = "Refresh Claude OAuth credentials before they expire")]
#[command(long_about = "
Reads ~/.claude/.credentials.json, refreshes the access token when six hours
or less of validity remain, writes the new credentials back and prints the
values to store as CI secrets.

Log in with the Claude CLI first (claude login) so the credentials file exists.
")]
struct Cli {
    /// Credentials file (default: ~/.claude/.credentials.json)
    #[arg(short, long, value_name = "PATH")]
    credentials: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Print the resolved configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    common::init_logging(cli.verbose);

    let mut config = config::load_config();
    if let Some(path) = cli.credentials {
        config.credentials_path = path;
    }

    tracing::debug!("Configuration source: {}", config.source);

    if cli.show_config {
        common::print_config(&config, cli.format);
        return Ok(());
    }

    let store = CredentialStore::new(&config.credentials_path);
    let current = load_current(&store)?;

    let refresher = TokenRefresher::from_config(&config).context("Failed to create HTTP client")?;

    if let OutputFormat::Text = cli.format {
        let now = auth::now_millis();
        println!("Current time:  {}", common::format_millis(Some(now)));
        println!("Token expires: {}", common::format_millis(current.expires_at));
        println!(
            "Hours left:    {}",
            RefreshPolicy::hours_left(current.expires_at, now)
        );
        if refresher.policy().needs_refresh(current.expires_at, now) {
            println!("Refreshing token...");
        }
    }

    let outcome = refresher
        .refresh_if_needed(&store, current)
        .await
        .context("Token refresh failed")?;

    print_outcome(&outcome, cli.format);
    Ok(())
}

/// Read the credentials file. A missing or unreadable file is fatal, with a
/// hint to log in first.
fn load_current(store: &CredentialStore) -> Result<Credentials> {
    store.load_file().with_context(|| {
        format!(
            "Failed to load credentials from {}. Log in with the Claude CLI first: claude login",
            store.path().display()
        )
    })
}

fn print_outcome(outcome: &RefreshOutcome, format: OutputFormat) {
    let creds = &outcome.credentials;
    let access_token = creds.access_token.as_deref().unwrap_or_default();
    let refresh_token = creds.refresh_token.as_deref().unwrap_or_default();
    let expires_at = creds
        .expires_at
        .map(|ms| ms.to_string())
        .unwrap_or_default();

    match format {
        OutputFormat::Text => {
            if outcome.refreshed {
                println!("Credentials updated");
            } else {
                println!("Token is still valid");
            }

            println!();
            println!("=== Values for GitHub Secrets ===");
            println!("{}: {}", ENV_ACCESS_TOKEN, access_token);
            println!("{}: {}", ENV_REFRESH_TOKEN, refresh_token);
            println!("{}: {}", ENV_EXPIRES_AT, expires_at);
            println!();
            println!("=== Example commands ===");
            println!("gh secret set {} --body \"{}\"", ENV_ACCESS_TOKEN, access_token);
            println!("gh secret set {} --body \"{}\"", ENV_REFRESH_TOKEN, refresh_token);
            println!("gh secret set {} --body \"{}\"", ENV_EXPIRES_AT, expires_at);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "refreshed": outcome.refreshed,
                    "hours_left": outcome.hours_left,
                    "access_token": creds.access_token,
                    "refresh_token": creds.refresh_token,
                    "expires_at": creds.expires_at,
                })
            );
        }
    }
}
