use crate::utils::path_utils::expand_tilde_path_buf as expand_tilde;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    /// Overrides `$SHELL` for interactive terminals.
    pub default_shell: Option<String>,
    pub log_level: String,
    /// Resolved git executable; `None` when git is not installed.
    pub git_path: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub audit_log_enabled: bool,
    pub audit_log_file: PathBuf,
    pub audit_log_max_size_bytes: u64,
    /// How long an exited process may keep flushing output before its exit event is sent.
    pub output_drain_grace: Duration,
}

const DEFAULT_DRAIN_GRACE_MS: u64 = 250;
const DEFAULT_AUDIT_LOG_MAX_MB: u64 = 10;

impl Default for Config {
    fn default() -> Self {
        let log_dir = std::env::temp_dir().join("ide-host-logs");
        Self {
            default_shell: None,
            log_level: "info".to_string(),
            git_path: which::which("git").ok(),
            audit_log_file: log_dir.join("bridge_calls.log"),
            log_dir,
            audit_log_enabled: false,
            audit_log_max_size_bytes: DEFAULT_AUDIT_LOG_MAX_MB * 1024 * 1024,
            output_drain_grace: Duration::from_millis(DEFAULT_DRAIN_GRACE_MS),
        }
    }
}

fn megabytes_to_bytes(mb: u64) -> Result<u64> {
    mb.checked_mul(1024 * 1024)
        .with_context(|| format!("AUDIT_LOG_MAX_SIZE_MB is too large: {}", mb))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let default_shell = std::env::var("DEFAULT_SHELL").ok().filter(|s| !s.is_empty());

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let git_path = match std::env::var("GIT_PATH").ok().filter(|s| !s.is_empty()) {
            Some(explicit) => {
                let path = expand_tilde(&explicit);
                if !path.exists() {
                    anyhow::bail!("GIT_PATH does not exist: {}", path.display());
                }
                Some(path)
            }
            None => match which::which("git") {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %e, "git not found in PATH; git channels will fail");
                    None
                }
            },
        };

        let log_dir = std::env::var("HOST_LOG_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| expand_tilde(&s))
            .unwrap_or_else(|| expand_tilde("~/.ide-host/logs"));

        let audit_log_enabled = std::env::var("AUDIT_LOG_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .context("Invalid AUDIT_LOG_ENABLED (expected true or false)")?;

        let audit_log_file = log_dir.join("bridge_calls.log");
        let audit_log_max_size_bytes = std::env::var("AUDIT_LOG_MAX_SIZE_MB")
            .ok()
            .and_then(|mb| mb.parse::<u64>().ok())
            .map(megabytes_to_bytes)
            .unwrap_or(Ok(DEFAULT_AUDIT_LOG_MAX_MB * 1024 * 1024))?;

        let output_drain_grace = std::env::var("OUTPUT_DRAIN_GRACE_MS")
            .unwrap_or_else(|_| DEFAULT_DRAIN_GRACE_MS.to_string())
            .parse::<u64>()
            .map(Duration::from_millis)
            .context("Invalid OUTPUT_DRAIN_GRACE_MS")?;

        Ok(Config {
            default_shell,
            log_level,
            git_path,
            log_dir,
            audit_log_enabled,
            audit_log_file,
            audit_log_max_size_bytes,
            output_drain_grace,
        })
    }
}
