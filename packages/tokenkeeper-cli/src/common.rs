//! Plumbing shared by the tokenkeeper binaries: output format, logging and
//! configuration display.

use clap::ValueEnum;
use tokenkeeper_core::auth::{ENV_ACCESS_TOKEN, ENV_EXPIRES_AT, ENV_REFRESH_TOKEN};
use tokenkeeper_core::config::{self, RuntimeConfig, ENV_CREDENTIALS_PATH, ENV_REFRESH_URL};

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Initialize logging on stderr so stdout stays clean for JSON output.
pub fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "refresh_oauth_token={0},test_refresh_endpoints={0},tokenkeeper_core={0}",
                    log_level
                )
                .into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Render a millisecond timestamp as RFC 3339, or "unknown".
pub fn format_millis(millis: Option<i64>) -> String {
    millis
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn print_config(config: &RuntimeConfig, format: OutputFormat) {
    let config_path = config::get_config_file_path_string();

    match format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("Config source:    {}", config.source);
            println!("Refresh URL:      {}", config.refresh_url);
            println!("User agent:       {}", config.user_agent);
            println!("Credentials file: {}", config.credentials_path.display());
            println!("Probe delay:      {} ms", config.probe.delay.as_millis());
            println!("Probe timeout:    {} s", config.probe.timeout.as_secs());
            println!("Probe results:    {}", config.probe.results_path.display());
            println!();
            println!("Environment variables:");
            println!("  {} - Override refresh endpoint", ENV_REFRESH_URL);
            println!("  {} - Override credentials file", ENV_CREDENTIALS_PATH);
            println!(
                "  {}, {}, {} - Credentials for test-refresh-endpoints",
                ENV_REFRESH_TOKEN, ENV_ACCESS_TOKEN, ENV_EXPIRES_AT
            );
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "source": config.source.to_string(),
                    "refresh_url": config.refresh_url,
                    "user_agent": config.user_agent,
                    "credentials_path": config.credentials_path.display().to_string(),
                    "probe_delay_ms": config.probe.delay.as_millis() as u64,
                    "probe_timeout_secs": config.probe.timeout.as_secs(),
                    "probe_results_path": config.probe.results_path.display().to_string(),
                })
            );
        }
    }
}
