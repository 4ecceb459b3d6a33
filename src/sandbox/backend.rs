//! Isolation backends and their flag sets.
//!
//! Selection is a pure function of a [`BackendProbe`]: bubblewrap is
//! preferred, then firejail, and when neither is installed the command
//! runs directly (it has already passed the allowlist). Flags that do not
//! apply are omitted, never left as empty tokens.

use std::path::{Path, PathBuf};

use crate::config::SandboxConfig;

pub const BUBBLEWRAP: &str = "bwrap";
pub const FIREJAIL: &str = "firejail";

/// System directories bound read-only inside bubblewrap.
const READ_ONLY_BINDS: [&str; 4] = ["/usr", "/bin", "/lib", "/lib64"];

/// End-of-options marker placed before the user command.
const END_OF_OPTIONS: &str = "--";

/// Locates isolation tools on the host.
pub trait BackendProbe: Send + Sync {
    fn locate(&self, tool: &str) -> Option<PathBuf>;
}

/// Probes the directories listed in `$PATH`.
pub struct PathProbe;

impl BackendProbe for PathProbe {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(tool))
            .find(|candidate| is_executable(candidate))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationBackend {
    /// No isolation tool available; run the command as-is
    Direct,
    Bubblewrap(PathBuf),
    Firejail(PathBuf),
}

impl IsolationBackend {
    /// Picks the best available backend. Not cached: availability is
    /// re-probed on every call.
    pub fn select(probe: &dyn BackendProbe) -> Self {
        if let Some(path) = probe.locate(BUBBLEWRAP) {
            return IsolationBackend::Bubblewrap(path);
        }
        if let Some(path) = probe.locate(FIREJAIL) {
            return IsolationBackend::Firejail(path);
        }
        IsolationBackend::Direct
    }

    pub fn name(&self) -> &'static str {
        match self {
            IsolationBackend::Direct => "direct",
            IsolationBackend::Bubblewrap(_) => BUBBLEWRAP,
            IsolationBackend::Firejail(_) => FIREJAIL,
        }
    }

    /// Wraps an already-validated command.
    pub fn wrap(&self, config: &SandboxConfig, command: &[String]) -> Vec<String> {
        let mut argv = match self {
            IsolationBackend::Direct => Vec::with_capacity(command.len()),
            IsolationBackend::Bubblewrap(bin) => bubblewrap_flags(bin, config),
            IsolationBackend::Firejail(bin) => firejail_flags(bin, config),
        };
        argv.extend(command.iter().cloned());
        argv
    }
}

fn path_token(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn bubblewrap_flags(bin: &Path, config: &SandboxConfig) -> Vec<String> {
    let workdir = path_token(&config.base_workdir);
    let mut flags = vec![path_token(bin)];

    if !config.allow_network {
        flags.push("--unshare-net".to_string());
    }
    for dir in READ_ONLY_BINDS {
        flags.extend(["--ro-bind".to_string(), dir.to_string(), dir.to_string()]);
    }
    flags.extend([
        "--dir".to_string(),
        workdir.clone(),
        "--chdir".to_string(),
        workdir,
        "--die-with-parent".to_string(),
        "--new-session".to_string(),
        END_OF_OPTIONS.to_string(),
    ]);
    flags
}

fn firejail_flags(bin: &Path, config: &SandboxConfig) -> Vec<String> {
    let mut flags = vec![
        path_token(bin),
        "--quiet".to_string(),
        "--private".to_string(),
        "--private-tmp".to_string(),
    ];
    if !config.allow_network {
        flags.push("--net=none".to_string());
    }
    flags.extend([
        format!("--cpu={}", config.cpu_shares),
        format!("--rlimit-as={}M", config.memory_limit_mb),
        END_OF_OPTIONS.to_string(),
    ]);
    flags
}
