//! Execution sandbox.
//!
//! Every command goes through the same gate before it can reach the OS:
//!
//! 1. Allowlist: the basename of argv[0] must be in `allowed_binaries`.
//!    Rejection happens before any probing or argument construction.
//! 2. Isolation: bubblewrap, else firejail, else a direct invocation.
//! 3. Execution: minimal environment, base working directory, bounded
//!    by the configured timeout.
//!
//! Policy violations are errors. What the child process does afterwards
//! (including failing) is reported as an [`ExecutionOutcome`].

pub mod backend;
pub mod launcher;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SandboxConfig;

pub use backend::{BackendProbe, IsolationBackend, PathProbe};
pub use launcher::{LaunchSpec, ProcessLauncher, TokioLauncher};

/// `PATH` exposed to sandboxed commands.
pub const SAFE_PATH: &str = "/usr/bin:/bin";

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("command `{executable}` is not allowlisted")]
    PolicyViolation { executable: String },

    #[error("command must contain at least one token")]
    MalformedCommand,

    #[error("command timed out after {}s and was killed", .after.as_secs())]
    ExecutionTimeout { after: Duration },

    #[error("cannot prepare sandbox directory {}: {source}", .path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while waiting for command: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of one `run` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Read-only snapshot of the active constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxPolicy {
    pub base_workdir: PathBuf,
    /// Sorted
    pub allowed_binaries: Vec<String>,
    pub allow_network: bool,
    pub memory_limit_mb: u64,
    pub cpu_shares: u32,
    pub timeout_secs: u64,
    /// Backend that would be used right now
    pub isolation: &'static str,
}

/// Validates, wraps and runs translated commands.
///
/// Holds only read-only configuration, so `run` may be called
/// concurrently. Concurrent runs share `base_workdir`; callers that need
/// separation should use per-call subdirectories.
pub struct ExecutorSandbox {
    config: SandboxConfig,
    probe: Box<dyn BackendProbe>,
    launcher: Box<dyn ProcessLauncher>,
}

impl ExecutorSandbox {
    /// Creates a sandbox probing `$PATH` and spawning through tokio.
    ///
    /// Ensures `base_workdir` exists; failure to create it is fatal.
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        Self::with_parts(config, Box::new(PathProbe), Box::new(TokioLauncher))
    }

    pub fn with_parts(
        config: SandboxConfig,
        probe: Box<dyn BackendProbe>,
        launcher: Box<dyn ProcessLauncher>,
    ) -> Result<Self, SandboxError> {
        ensure_dir(&config.base_workdir)?;
        Ok(Self {
            config,
            probe,
            launcher,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Backend selected by probing the host right now.
    pub fn backend(&self) -> IsolationBackend {
        IsolationBackend::select(self.probe.as_ref())
    }

    /// Validates a command and returns the argv that would be spawned.
    ///
    /// Never executes anything.
    pub fn build_command(&self, command: &[String]) -> Result<Vec<String>, SandboxError> {
        self.check_allowed(command)?;

        let backend = self.backend();
        let wrapped = backend.wrap(&self.config, command);
        debug!(
            "Wrapped {} with {} ({} tokens)",
            command[0],
            backend.name(),
            wrapped.len()
        );
        Ok(wrapped)
    }

    /// Runs a command under the sandbox policy.
    ///
    /// `environment` overlays the minimal `PATH`-only environment. A
    /// non-zero exit is returned as an outcome, not an error.
    pub async fn run(
        &self,
        command: &[String],
        environment: Option<&HashMap<String, String>>,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let argv = self.build_command(command)?;

        let mut env = HashMap::from([("PATH".to_string(), SAFE_PATH.to_string())]);
        if let Some(overrides) = environment {
            env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let run_id = Uuid::new_v4();
        info!(%run_id, "Running `{}` in {}", command.join(" "), self.config.base_workdir.display());

        let outcome = self
            .launcher
            .launch(LaunchSpec {
                argv: &argv,
                cwd: &self.config.base_workdir,
                env: &env,
                timeout: Duration::from_secs(self.config.timeout_secs),
                max_output_bytes: self.config.max_output_bytes,
            })
            .await?;

        info!(%run_id, "`{}` exited with {}", command[0], outcome.exit_code);
        Ok(outcome)
    }

    pub fn describe(&self) -> SandboxPolicy {
        SandboxPolicy {
            base_workdir: self.config.base_workdir.clone(),
            allowed_binaries: self.config.allowed_binaries.iter().cloned().collect(),
            allow_network: self.config.allow_network,
            memory_limit_mb: self.config.memory_limit_mb,
            cpu_shares: self.config.cpu_shares,
            timeout_secs: self.config.timeout_secs,
            isolation: self.backend().name(),
        }
    }

    fn check_allowed(&self, command: &[String]) -> Result<(), SandboxError> {
        let program = command.first().ok_or(SandboxError::MalformedCommand)?;
        let executable = Path::new(program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if executable.is_empty() || !self.config.allowed_binaries.contains(&executable) {
            warn!("Rejected `{program}`: not allowlisted");
            return Err(SandboxError::PolicyViolation {
                executable: program.clone(),
            });
        }
        Ok(())
    }
}

fn ensure_dir(path: &Path) -> Result<(), SandboxError> {
    std::fs::create_dir_all(path).map_err(|source| SandboxError::Setup {
        path: path.to_path_buf(),
        source,
    })
}
