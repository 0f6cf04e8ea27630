use crate::auth::{CredentialStore, DEFAULT_REFRESH_URL, DEFAULT_USER_AGENT};
use crate::probe::Pacing;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the refresh endpoint URL
pub const ENV_REFRESH_URL: &str = "TOKENKEEPER_REFRESH_URL";

/// Environment variable overriding the credentials file path
pub const ENV_CREDENTIALS_PATH: &str = "TOKENKEEPER_CREDENTIALS";

/// Default pause between probe trials
pub const DEFAULT_PROBE_DELAY_MS: u64 = 1_000;

/// Default bound for one probe trial
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

/// Default probe report location (relative to the working directory)
pub const DEFAULT_RESULTS_PATH: &str = "refresh-test-results.json";

/// `config.toml`, every key optional
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    refresh: Option<RefreshSection>,
    probe: Option<ProbeSection>,
}

#[derive(Debug, Deserialize, Default)]
struct RefreshSection {
    /// Refresh endpoint URL (e.g., "https://claude.ai/api/auth/refresh")
    url: Option<String>,
    user_agent: Option<String>,
    /// Credentials file, `~/` is expanded
    credentials_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeSection {
    delay_ms: Option<u64>,
    timeout_secs: Option<u64>,
    results_path: Option<String>,
}

/// Probe pacing and output settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub delay: Duration,
    pub timeout: Duration,
    pub results_path: PathBuf,
}

impl ProbeSettings {
    pub fn pacing(&self) -> Pacing {
        Pacing {
            delay: self.delay,
            timeout: self.timeout,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_PROBE_DELAY_MS),
            timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            results_path: PathBuf::from(DEFAULT_RESULTS_PATH),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub refresh_url: String,
    pub user_agent: String,
    pub credentials_path: PathBuf,
    pub probe: ProbeSettings,
    /// Highest-priority source that contributed a value (for display)
    pub source: ConfigSource,
}

/// Highest-priority layer that set a value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigSource {
    Default,
    Environment,
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("tokenkeeper").join("config.toml"))
}

/// Missing or broken files are ignored, with a warning for the latter.
fn load_config_file(path: &Path) -> Option<ConfigFile> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

fn default_credentials_path() -> PathBuf {
    CredentialStore::default_location().unwrap_or_else(|e| {
        tracing::warn!("{}, using a path relative to the working directory", e);
        PathBuf::from(".claude").join(".credentials.json")
    })
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load runtime configuration with priority:
/// 1. Environment variables (TOKENKEEPER_REFRESH_URL, TOKENKEEPER_CREDENTIALS)
/// 2. Config file (~/.config/tokenkeeper/config.toml)
/// 3. Default values
pub fn load_config() -> RuntimeConfig {
    let file = get_config_file_path().and_then(|p| load_config_file(&p));
    resolve_config(file, |key| std::env::var(key).ok())
}

fn resolve_config<F>(file: Option<ConfigFile>, lookup: F) -> RuntimeConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut source = if file.is_some() {
        ConfigSource::ConfigFile
    } else {
        ConfigSource::Default
    };

    let file = file.unwrap_or_default();
    let refresh = file.refresh.unwrap_or_default();
    let probe = file.probe.unwrap_or_default();

    let mut refresh_url = non_empty(refresh.url)
        .unwrap_or_else(|| DEFAULT_REFRESH_URL.to_string());
    let mut credentials_path = non_empty(refresh.credentials_path)
        .map(|p| expand_home(&p))
        .unwrap_or_else(default_credentials_path);

    if let Some(url) = non_empty(lookup(ENV_REFRESH_URL)) {
        tracing::info!("Using refresh URL from environment variable: {}", url);
        refresh_url = url;
        source = ConfigSource::Environment;
    }

    if let Some(path) = non_empty(lookup(ENV_CREDENTIALS_PATH)) {
        tracing::info!("Using credentials path from environment variable: {}", path);
        credentials_path = expand_home(&path);
        source = ConfigSource::Environment;
    }

    let defaults = ProbeSettings::default();
    let probe = ProbeSettings {
        delay: probe.delay_ms.map(Duration::from_millis).unwrap_or(defaults.delay),
        timeout: probe
            .timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout),
        results_path: non_empty(probe.results_path)
            .map(|p| expand_home(&p))
            .unwrap_or(defaults.results_path),
    };

    RuntimeConfig {
        refresh_url: refresh_url.trim_end_matches('/').to_string(),
        user_agent: non_empty(refresh.user_agent)
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        credentials_path,
        probe,
        source,
    }
}

/// Config file location as shown by `--show-config`
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/tokenkeeper/config.toml".to_string())
}

/// Commented `config.toml` listing every key with its default
pub fn generate_example_config() -> String {
    r#"# Tokenkeeper Configuration
# Place this file at: ~/.config/tokenkeeper/config.toml

[refresh]
# Refresh endpoint used by refresh-oauth-token
# Default: https://claude.ai/api/auth/refresh
# url = "https://claude.ai/api/auth/refresh"
# user_agent = "Claude-GitHub-Action/1.0"

# Credentials file (default: ~/.claude/.credentials.json)
# credentials_path = "~/.claude/.credentials.json"

[probe]
# Pause between trials and per-trial timeout
# delay_ms = 1000
# timeout_secs = 10

# Where test-refresh-endpoints writes its results
# results_path = "refresh-test-results.json"
"#
    .to_string()
}
