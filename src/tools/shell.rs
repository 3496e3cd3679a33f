use std::path::Path;

pub const FALLBACK_SHELL: &str = "/bin/bash";
pub const LAST_RESORT_SHELL: &str = "/bin/sh";

/// Program and arguments used to start a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellSpec {
    fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Login shell for an interactive terminal on a POSIX host.
///
/// Order: configured override, then `$SHELL`, then `/bin/bash` when it exists,
/// else `/bin/sh`. `exists` is injected so the fallback can be tested.
pub fn resolve_posix_login_shell(
    configured: Option<&str>,
    env_shell: Option<&str>,
    exists: impl Fn(&Path) -> bool,
) -> ShellSpec {
    let chosen = configured
        .filter(|s| !s.trim().is_empty())
        .or_else(|| env_shell.filter(|s| !s.trim().is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| {
            if exists(Path::new(FALLBACK_SHELL)) {
                FALLBACK_SHELL.to_string()
            } else {
                LAST_RESORT_SHELL.to_string()
            }
        });
    ShellSpec::new(chosen, &["-l"])
}

/// Shell for an interactive terminal on this host.
pub fn terminal_shell(configured: Option<&str>) -> ShellSpec {
    if cfg!(windows) {
        match configured.filter(|s| !s.trim().is_empty()) {
            Some(program) => ShellSpec::new(program, &[]),
            None => ShellSpec::new("powershell.exe", &["-NoLogo"]),
        }
    } else {
        let env_shell = std::env::var("SHELL").ok();
        resolve_posix_login_shell(configured, env_shell.as_deref(), Path::exists)
    }
}

/// Non-login, non-interactive invocation of `command`.
pub fn runner_shell(command: &str) -> ShellSpec {
    if cfg!(windows) {
        ShellSpec::new("powershell.exe", &["-NoProfile", "-Command", command])
    } else {
        ShellSpec::new(LAST_RESORT_SHELL, &["-c", command])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_shell_wins() {
        let spec = resolve_posix_login_shell(Some("/usr/bin/fish"), Some("/bin/zsh"), |_| true);
        assert_eq!(spec, ShellSpec::new("/usr/bin/fish", &["-l"]));
    }

    #[test]
    fn env_shell_used_without_override() {
        let spec = resolve_posix_login_shell(None, Some("/bin/zsh"), |_| true);
        assert_eq!(spec.program, "/bin/zsh");
        assert_eq!(spec.args, vec!["-l".to_string()]);
    }

    #[test]
    fn falls_back_to_bash_then_sh() {
        assert_eq!(resolve_posix_login_shell(None, None, |_| true).program, FALLBACK_SHELL);
        assert_eq!(resolve_posix_login_shell(None, Some(""), |_| false).program, LAST_RESORT_SHELL);
    }

    #[cfg(unix)]
    #[test]
    fn runner_uses_sh_dash_c() {
        let spec = runner_shell("echo hi");
        assert_eq!(spec.program, "/bin/sh");
        assert_eq!(spec.args, vec!["-c".to_string(), "echo hi".to_string()]);
    }
}
