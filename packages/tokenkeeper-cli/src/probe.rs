//! test-refresh-endpoints - find out which refresh endpoint currently works
//!
//! Tries every candidate refresh endpoint with every simulated client
//! identity, one request at a time, and reports which combinations issued a
//! new access token. The full result list is written to a JSON file.

mod common;

use anyhow::{Context, Result};
use clap::Parser;
use common::OutputFormat;
use std::path::PathBuf;
use std::time::Duration;
use tokenkeeper_core::auth::{CredentialStore, Credentials, ENV_REFRESH_TOKEN};
use tokenkeeper_core::config;
use tokenkeeper_core::probe::{
    self, ProbeProgress, ProbeSummary, Prober, ProgressCallback, ReqwestTransport,
};

#[derive(Parser)]
#[command(name = "test-refresh-endpoints")]
#[command(version)]
#[command(about = "Probe candidate OAuth refresh endpoints and client identities")]
#[command(long_about = "
Sends the refresh token to each candidate endpoint with each simulated client
identity (browser and native user agents), strictly one request at a time with
a pause in between, and classifies every response.

The refresh token is taken from CLAUDE_REFRESH_TOKEN (with CLAUDE_ACCESS_TOKEN
and CLAUDE_EXPIRES_AT) when set, otherwise from ~/.claude/.credentials.json.
")]
struct Cli {
    /// Credentials file (default: ~/.claude/.credentials.json)
    #[arg(short, long, value_name = "PATH")]
    credentials: Option<PathBuf>,

    /// Where to write the detailed results
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Pause between requests in milliseconds
    #[arg(long, value_name = "MS")]
    delay_ms: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: Option<u64>,

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
    if let Some(path) = cli.output {
        config.probe.results_path = path;
    }
    if let Some(ms) = cli.delay_ms {
        config.probe.delay = Duration::from_millis(ms);
    }
    if let Some(secs) = cli.timeout_secs {
        config.probe.timeout = Duration::from_secs(secs);
    }

    tracing::debug!("Configuration source: {}", config.source);

    if cli.show_config {
        common::print_config(&config, cli.format);
        return Ok(());
    }

    if let OutputFormat::Text = cli.format {
        println!("Claude API Refresh Endpoint Tester");
        println!();
    }

    let store = CredentialStore::new(&config.credentials_path);
    let credentials = store.load();
    let refresh_token = required_refresh_token(credentials.as_ref(), &store)?;

    if let OutputFormat::Text = cli.format {
        println!("Found refresh token");
        println!(
            "Current token expires: {}",
            common::format_millis(credentials.as_ref().and_then(|c| c.expires_at))
        );
    }

    let transport = ReqwestTransport::new().context("Failed to create HTTP client")?;
    let prober = Prober::new(transport).with_pacing(config.probe.pacing());
    let progress: Option<ProgressCallback> = match cli.format {
        OutputFormat::Text => Some(Box::new(print_progress) as ProgressCallback),
        OutputFormat::Json => None,
    };

    let results = prober.run(refresh_token, progress).await?;
    let summary = ProbeSummary::from_results(&results);

    probe::save_results(&config.probe.results_path, &results)
        .context("Failed to save probe results")?;

    match cli.format {
        OutputFormat::Text => {
            print_summary(&summary);
            println!();
            println!(
                "Detailed results saved to: {}",
                config.probe.results_path.display()
            );
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "summary": summary,
                    "recommendations": summary.recommendations(),
                    "results_path": config.probe.results_path.display().to_string(),
                })
            );
        }
    }

    Ok(())
}

/// The probe run needs a non-empty refresh token; without one the binary
/// exits non-zero before sending anything.
fn required_refresh_token<'a>(
    credentials: Option<&'a Credentials>,
    store: &CredentialStore,
) -> Result<&'a str> {
    credentials
        .and_then(|creds| creds.usable_refresh_token())
        .with_context(|| {
            format!(
                "No refresh token found. Please set the {} environment variable or ensure {} exists.",
                ENV_REFRESH_TOKEN,
                store.path().display()
            )
        })
}

fn print_progress(event: ProbeProgress<'_>) {
    match event {
        ProbeProgress::Started {
            index,
            total,
            endpoint,
            identity,
        } => {
            println!();
            println!(
                "[{}/{}] Testing: {} with {}",
                index + 1,
                total,
                endpoint.name,
                identity.label()
            );
        }
        ProbeProgress::Finished { result, .. } => {
            if result.status > 0 {
                println!("   Status: {}", result.status);
            }
            match &result.error {
                None => {
                    let expires_in = result
                        .data
                        .as_ref()
                        .and_then(|d| d.get("expires_in"))
                        .map(|v| format!("{} seconds", v))
                        .unwrap_or_else(|| "unknown".to_string());
                    println!("   SUCCESS! Got access token");
                    println!("   Token expires: {}", expires_in);
                }
                Some(err) => println!("   {}", err),
            }
        }
    }
}

fn print_summary(summary: &ProbeSummary) {
    println!();
    println!("SUMMARY:");
    println!("{}", "=".repeat(60));
    println!("Successful:         {}", summary.successful);
    println!("Cloudflare blocked: {}", summary.challenged);
    println!("Not found:          {}", summary.not_found);
    println!("Other errors:       {}", summary.other_errors);

    if !summary.working.is_empty() {
        println!();
        println!("WORKING COMBINATIONS:");
        for combo in &summary.working {
            println!("   - {} + {}", combo.endpoint, combo.identity);
        }
    }

    let recommendations = summary.recommendations();
    if !recommendations.is_empty() {
        println!();
        println!("RECOMMENDATIONS:");
        for line in recommendations {
            println!("   - {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CredentialStore {
        CredentialStore::new("/nonexistent/.credentials.json")
    }

    #[test]
    fn test_missing_credentials_are_an_error() {
        let err = required_refresh_token(None, &store()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains(ENV_REFRESH_TOKEN));
        assert!(message.contains("/nonexistent/.credentials.json"));
    }

    #[test]
    fn test_empty_refresh_token_is_an_error() {
        let creds = Credentials {
            access_token: Some("A".to_string()),
            refresh_token: Some(String::new()),
            expires_at: None,
        };
        assert!(required_refresh_token(Some(&creds), &store()).is_err());
        assert!(required_refresh_token(Some(&Credentials::default()), &store()).is_err());
    }

    #[test]
    fn test_refresh_token_is_used() {
        let creds = Credentials {
            refresh_token: Some("R".to_string()),
            ..Credentials::default()
        };
        assert_eq!(required_refresh_token(Some(&creds), &store()).unwrap(), "R");
    }

    #[test]
    fn test_cli_rejects_zero_timeout() {
        assert!(Cli::try_parse_from(["test-refresh-endpoints", "--timeout-secs", "0"]).is_err());
        let cli = Cli::try_parse_from(["test-refresh-endpoints", "--timeout-secs", "5"]).unwrap();
        assert_eq!(cli.timeout_secs, Some(5));
    }
}
