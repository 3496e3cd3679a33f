use crate::error::AppError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio as StdProcessStdio;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, instrument};

/// Asks the user for a directory. `Ok(None)` means the dialog was cancelled.
#[async_trait]
pub trait FolderPicker: Send + Sync {
    async fn pick_folder(&self) -> Result<Option<PathBuf>, AppError>;
}

/// Shells out to the platform's native folder chooser.
#[derive(Debug, Default)]
pub struct SystemFolderPicker;

const DIALOG_TITLE: &str = "Open Folder";

impl SystemFolderPicker {
    fn command(&self) -> Result<TokioCommand, AppError> {
        if cfg!(target_os = "macos") {
            let mut cmd = TokioCommand::new("osascript");
            cmd.arg("-e")
                .arg(format!("POSIX path of (choose folder with prompt \"{}\")", DIALOG_TITLE));
            Ok(cmd)
        } else if cfg!(windows) {
            let mut cmd = TokioCommand::new("powershell.exe");
            cmd.args([
                "-NoProfile",
                "-Command",
                "Add-Type -AssemblyName System.Windows.Forms; \
                 $d = New-Object System.Windows.Forms.FolderBrowserDialog; \
                 if ($d.ShowDialog() -eq 'OK') { $d.SelectedPath }",
            ]);
            Ok(cmd)
        } else if let Ok(zenity) = which::which("zenity") {
            let mut cmd = TokioCommand::new(zenity);
            cmd.args(["--file-selection", "--directory", "--title", DIALOG_TITLE]);
            Ok(cmd)
        } else if let Ok(kdialog) = which::which("kdialog") {
            let mut cmd = TokioCommand::new(kdialog);
            cmd.args(["--getexistingdirectory", ".", "--title", DIALOG_TITLE]);
            Ok(cmd)
        } else {
            Err(AppError::DialogError(
                "No folder picker available (install zenity or kdialog)".to_string(),
            ))
        }
    }
}

#[async_trait]
impl FolderPicker for SystemFolderPicker {
    async fn pick_folder(&self) -> Result<Option<PathBuf>, AppError> {
        let output = self
            .command()?
            .stdin(StdProcessStdio::null())
            .output()
            .await
            .map_err(|e| AppError::DialogError(format!("Failed to launch folder picker: {}", e)))?;

        // Every supported picker exits non-zero on cancel.
        if !output.status.success() {
            debug!(code = ?output.status.code(), "Folder picker cancelled");
            return Ok(None);
        }
        let chosen = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!chosen.is_empty()).then(|| PathBuf::from(chosen)))
    }
}

/// Runs the picker and returns the canonical chosen path.
#[instrument(skip(picker))]
pub async fn open_folder_dialog(picker: &dyn FolderPicker) -> Result<String, AppError> {
    let chosen = picker.pick_folder().await?.ok_or(AppError::NoFolderSelected)?;
    let canonical = dunce::canonicalize(&chosen)?;
    info!(path = %canonical.display(), "Folder selected");
    Ok(canonical.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPicker(Option<PathBuf>);

    #[async_trait]
    impl FolderPicker for FixedPicker {
        async fn pick_folder(&self) -> Result<Option<PathBuf>, AppError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn cancelled_dialog_is_no_folder_selected() {
        let err = open_folder_dialog(&FixedPicker(None)).await.unwrap_err();
        assert_eq!(err.to_string(), "No folder selected");
    }

    #[tokio::test]
    async fn chosen_folder_is_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let dotted = dir.path().join(".");
        let chosen = open_folder_dialog(&FixedPicker(Some(dotted))).await.unwrap();
        assert_eq!(PathBuf::from(chosen), dunce::canonicalize(dir.path()).unwrap());
    }
}
