//! Child process execution.
//!
//! Runs a fully-wrapped argv with a cleared environment, captures both
//! streams, and kills the child if it outlives the timeout. Failures of
//! the child itself (non-zero exit, missing binary) come back as an
//! [`ExecutionOutcome`], not as an error.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ExecutionOutcome, SandboxError};

/// Shell convention for "command not found".
pub const EXIT_NOT_FOUND: i32 = 127;

/// Shell convention for "found but not executable".
pub const EXIT_CANNOT_EXECUTE: i32 = 126;

/// Everything a launcher needs to run one command.
#[derive(Debug)]
pub struct LaunchSpec<'a> {
    pub argv: &'a [String],
    pub cwd: &'a Path,
    pub env: &'a HashMap<String, String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

/// Spawns processes for the sandbox.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec<'_>) -> Result<ExecutionOutcome, SandboxError>;
}

/// Launcher backed by `tokio::process`.
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, spec: LaunchSpec<'_>) -> Result<ExecutionOutcome, SandboxError> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or(SandboxError::MalformedCommand)?;

        // A vanished cwd also spawns with NotFound; keep it apart from a missing binary
        if !spec.cwd.is_dir() {
            warn!("Working directory {} is missing", spec.cwd.display());
            return Err(SandboxError::Setup {
                path: spec.cwd.to_path_buf(),
                source: std::io::Error::new(ErrorKind::NotFound, "working directory is missing"),
            });
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(spec.cwd)
            .env_clear()
            .envs(spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                debug!("Spawn of {program} failed: {err}");
                return Ok(spawn_failure(program, &err));
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("{program} exceeded {}s, killed", spec.timeout.as_secs());
                return Err(SandboxError::ExecutionTimeout {
                    after: spec.timeout,
                });
            }
        };

        let (stdout, stdout_truncated) = truncate_bytes(&output.stdout, spec.max_output_bytes);
        let (stderr, stderr_truncated) = truncate_bytes(&output.stderr, spec.max_output_bytes);

        Ok(ExecutionOutcome {
            exit_code: exit_code(output.status),
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
        })
    }
}

fn spawn_failure(program: &str, err: &std::io::Error) -> ExecutionOutcome {
    let (exit_code, stderr) = match err.kind() {
        ErrorKind::NotFound => (EXIT_NOT_FOUND, format!("{program}: command not found\n")),
        _ => (EXIT_CANNOT_EXECUTE, format!("{program}: {err}\n")),
    };
    ExecutionOutcome {
        exit_code,
        stdout: String::new(),
        stderr,
        stdout_truncated: false,
        stderr_truncated: false,
    }
}

/// Exit code, or 128 + signal number for a signalled child.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

fn truncate_bytes(bytes: &[u8], max: usize) -> (String, bool) {
    if bytes.len() <= max {
        return (String::from_utf8_lossy(bytes).into_owned(), false);
    }

    let mut out = String::from_utf8_lossy(&bytes[..max]).into_owned();
    out.push_str("\n[truncated]\n");
    (out, true)
}
