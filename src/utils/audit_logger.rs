use crate::config::Config;
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as TokioMutex;
use tracing::error;

const MAX_LOGGED_STRING_LEN: usize = 1024;

/// Appends one line per bridge call to the audit file.
pub struct AuditLogger {
    enabled: bool,
    log_file_path: PathBuf,
    max_size_bytes: u64,
    // Serializes rotate + append so concurrent calls never interleave a rename.
    write_lock: TokioMutex<()>,
}

impl AuditLogger {
    pub fn new(config: &Config) -> Self {
        if config.audit_log_enabled {
            if let Some(parent_dir) = config.audit_log_file.parent() {
                if !parent_dir.exists() {
                    if let Err(e) = std::fs::create_dir_all(parent_dir) {
                        error!(path = %parent_dir.display(), error = %e, "Failed to create audit log directory");
                    }
                }
            }
        }
        Self {
            enabled: config.audit_log_enabled,
            log_file_path: config.audit_log_file.clone(),
            max_size_bytes: config.audit_log_max_size_bytes,
            write_lock: TokioMutex::new(()),
        }
    }

    async fn rotate_log_if_needed(&self) -> Result<()> {
        if !self.log_file_path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(&self.log_file_path).await?;
        if metadata.len() >= self.max_size_bytes {
            let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S%.3f").to_string();
            let file_stem = self
                .log_file_path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy();
            let extension = self
                .log_file_path
                .extension()
                .unwrap_or_default()
                .to_string_lossy();

            let backup_file_name = format!("{}_{}.{}", file_stem, timestamp, extension);
            let backup_path = self.log_file_path.with_file_name(backup_file_name);

            fs::rename(&self.log_file_path, backup_path).await?;
        }
        Ok(())
    }

    pub async fn log_call(&self, channel: &str, arguments: &Value) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.try_log_call(channel, arguments).await {
            error!(channel = %channel, error = %e, "Failed to write audit log");
        }
    }

    async fn try_log_call(&self, channel: &str, arguments: &Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.rotate_log_if_needed().await?;

        let timestamp = Utc::now().to_rfc3339();
        let args_string = serde_json::to_string(&sanitize_arguments(arguments))?;
        let log_entry = format!("{} | {:<20} | Arguments: {}\n", timestamp, channel, args_string);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .await?;

        file.write_all(log_entry.as_bytes()).await?;
        Ok(())
    }
}

/// Replaces oversized string arguments (file contents, replacement text) with a marker.
fn sanitize_arguments(arguments: &Value) -> Value {
    let mut sanitized = arguments.clone();
    if let Some(obj) = sanitized.as_object_mut() {
        for (key, value) in obj.iter_mut() {
            if value.as_str().is_some_and(|s| s.len() > MAX_LOGGED_STRING_LEN) {
                *value = Value::String(format!("<{} truncated for log>", key));
            }
        }
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path, enabled: bool, max_size_bytes: u64) -> Config {
        Config {
            audit_log_enabled: enabled,
            audit_log_file: dir.join("bridge_calls.log"),
            audit_log_max_size_bytes: max_size_bytes,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn writes_sanitized_entries() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(&config_in(dir.path(), true, 1024 * 1024));
        let big = "x".repeat(MAX_LOGGED_STRING_LEN + 1);
        logger.log_call("write-file", &json!({"path": "/tmp/a", "content": big})).await;

        let text = std::fs::read_to_string(dir.path().join("bridge_calls.log")).unwrap();
        assert!(text.contains("write-file"));
        assert!(text.contains("/tmp/a"));
        assert!(text.contains("<content truncated for log>"));
    }

    #[tokio::test]
    async fn disabled_logger_writes_nothing() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(&config_in(dir.path(), false, 1024));
        logger.log_call("read-file", &json!({"path": "/tmp/a"})).await;
        assert!(!dir.path().join("bridge_calls.log").exists());
    }

    #[tokio::test]
    async fn rotates_when_file_exceeds_limit() {
        let dir = tempdir().unwrap();
        let logger = AuditLogger::new(&config_in(dir.path(), true, 10));
        logger.log_call("git-status", &json!({"cwd": "/repo"})).await;
        logger.log_call("git-pull", &json!({"cwd": "/repo"})).await;

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 2);
        let current = std::fs::read_to_string(dir.path().join("bridge_calls.log")).unwrap();
        assert!(current.contains("git-pull"));
        assert!(!current.contains("git-status"));
    }
}
