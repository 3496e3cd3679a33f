use crate::error::AppError;
use std::path::PathBuf;
use tracing::debug;

/// Expands a leading tilde (~) to the user's home directory.
pub fn expand_tilde_path_buf(path_str: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path_str).as_ref())
}

fn requested_dir(requested: Option<&str>) -> Option<PathBuf> {
    requested
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(expand_tilde_path_buf)
}

/// The user's home directory as reported by the environment.
pub fn home_dir_from_env() -> Option<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Working directory for an interactive terminal: the requested directory,
/// else `home`, else the Host's own current directory.
///
/// A requested directory that does not exist is an error; `home` is taken as-is.
pub fn terminal_working_dir(requested: Option<&str>, home: Option<PathBuf>) -> Result<PathBuf, AppError> {
    if let Some(dir) = requested_dir(requested) {
        if !dir.is_dir() {
            return Err(AppError::InvalidPath(format!(
                "Working directory does not exist: {}",
                dir.display()
            )));
        }
        return Ok(dir);
    }
    if let Some(home) = home {
        debug!(home = %home.display(), "Terminal cwd defaulting to home directory");
        return Ok(home);
    }
    Ok(std::env::current_dir()?)
}

/// Working directory for a one-shot command: the requested directory, else the
/// Host's current directory. Existence is left to the spawn call.
pub fn runner_working_dir(requested: Option<&str>) -> Result<PathBuf, AppError> {
    match requested_dir(requested) {
        Some(dir) => Ok(dir),
        None => Ok(std::env::current_dir()?),
    }
}

/// Turns a UI-supplied path into an absolute path, rejecting empty input.
pub fn absolute_path(path_str: &str) -> Result<PathBuf, AppError> {
    if path_str.trim().is_empty() {
        return Err(AppError::InvalidPath("Path must not be empty".to_string()));
    }
    let expanded = expand_tilde_path_buf(path_str);
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(std::env::current_dir()?.join(expanded))
    }
}

/// First command-line argument naming an existing file by absolute path.
/// The program name and anything flag-like are skipped.
pub fn launch_file_from_args<I>(args: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .skip(1)
        .filter(|arg| !arg.starts_with('-'))
        .map(PathBuf::from)
        .find(|path| path.is_absolute() && path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn terminal_cwd_prefers_existing_request() {
        let dir = tempdir().unwrap();
        let requested = dir.path().to_string_lossy().into_owned();
        let cwd = terminal_working_dir(Some(&requested), Some(PathBuf::from("/home/u"))).unwrap();
        assert_eq!(cwd, dir.path());
    }

    #[test]
    fn terminal_cwd_rejects_missing_request() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope").to_string_lossy().into_owned();
        assert!(matches!(
            terminal_working_dir(Some(&missing), None),
            Err(AppError::InvalidPath(_))
        ));
    }

    #[test]
    fn terminal_cwd_falls_back_to_home_then_current_dir() {
        assert_eq!(
            terminal_working_dir(None, Some(PathBuf::from("/home/u"))).unwrap(),
            PathBuf::from("/home/u")
        );
        assert_eq!(
            terminal_working_dir(Some("  "), Some(PathBuf::from("/home/u"))).unwrap(),
            PathBuf::from("/home/u")
        );
        assert_eq!(terminal_working_dir(None, None).unwrap(), std::env::current_dir().unwrap());
    }

    #[test]
    fn runner_cwd_defaults_to_current_dir() {
        assert_eq!(runner_working_dir(None).unwrap(), std::env::current_dir().unwrap());
        assert_eq!(runner_working_dir(Some("/tmp")).unwrap(), PathBuf::from("/tmp"));
    }

    #[test]
    fn absolute_path_rejects_empty() {
        assert!(absolute_path("").is_err());
        assert!(absolute_path("relative/file.txt").unwrap().is_absolute());
    }

    #[test]
    fn launch_file_must_be_an_existing_absolute_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("readme.md");
        std::fs::write(&file, "# hi").unwrap();
        let file_arg = file.to_string_lossy().into_owned();
        let dir_arg = dir.path().to_string_lossy().into_owned();
        let gone_arg = dir.path().join("gone.md").to_string_lossy().into_owned();

        let args = |rest: &[&str]| {
            std::iter::once("ide-host".to_string())
                .chain(rest.iter().map(|s| s.to_string()))
                .collect::<Vec<String>>()
        };
        assert_eq!(
            launch_file_from_args(args(&["--verbose", dir_arg.as_str(), "readme.md", file_arg.as_str()])),
            Some(file.clone())
        );
        assert_eq!(launch_file_from_args(args(&[dir_arg.as_str()])), None);
        assert_eq!(launch_file_from_args(args(&[gone_arg.as_str()])), None);
        assert_eq!(launch_file_from_args(vec![file_arg]), None);
    }
}
