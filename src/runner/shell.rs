//! Local CLI backend (llama.cpp and similar).
//!
//! Spawns `command [--model <path>]` in the model working directory and
//! writes `{"prompt": "..."}` on stdin. The whole exchange is bounded by
//! `timeout_secs`; the child is killed when the bound is hit.

use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{BackendError, PromptBackend};
use crate::config::ModelRunnerConfig;

pub struct ShellRunner {
    config: ModelRunnerConfig,
}

impl ShellRunner {
    pub fn new(config: ModelRunnerConfig) -> Self {
        Self { config }
    }

    /// Creates the working directory used for model caches and prompts.
    pub async fn ensure_workdir(&self) -> Result<(), BackendError> {
        tokio::fs::create_dir_all(&self.config.working_directory).await?;
        Ok(())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.command);
        if let Some(model_path) = &self.config.model_path {
            cmd.arg("--model").arg(model_path);
        }
        cmd.current_dir(&self.config.working_directory)
            .envs(&self.config.extra_env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl PromptBackend for ShellRunner {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let payload = serde_json::to_vec(&json!({ "prompt": prompt }))?;
        let timeout = Duration::from_secs(self.config.timeout_secs);

        debug!(
            "Executing local model {} ({} byte prompt)",
            self.config.command,
            prompt.len()
        );

        let mut child = self.command().spawn()?;
        let stdin = child.stdin.take();

        // Feed stdin while draining output, the CLI may exit without reading
        let write = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(&payload).await {
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                        debug!("Model runner closed stdin early");
                    }
                    other => other?,
                }
                // Dropping stdin closes the pipe so the CLI sees EOF
            }
            Ok::<(), std::io::Error>(())
        };
        let exchange = async move { tokio::join!(write, child.wait_with_output()) };

        let (written, output) = match tokio::time::timeout(timeout, exchange).await {
            Ok((written, output)) => (written, output?),
            Err(_) => {
                warn!("Model runner {} timed out", self.config.command);
                return Err(BackendError::Timeout(timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            warn!(
                "Model runner exited non-zero ({:?}): {stderr}",
                output.status.code()
            );
            return Err(BackendError::NonZeroExit {
                code: output.status.code(),
                stderr,
            });
        }
        written?;

        if stdout.is_empty() {
            Ok(stderr)
        } else {
            Ok(stdout)
        }
    }

    fn identifier(&self) -> String {
        format!("shell ({})", self.config.command)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn runner(command: &str, workdir: &Path) -> ShellRunner {
        ShellRunner::new(ModelRunnerConfig {
            command: command.to_string(),
            working_directory: workdir.to_path_buf(),
            timeout_secs: 5,
            ..Default::default()
        })
    }

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_prompt_sent_as_json_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let out = runner("cat", dir.path()).generate("list my files").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["prompt"], "list my files");
    }

    #[tokio::test]
    async fn test_model_path_flag() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "args.sh", "cat > /dev/null; echo \"$@\"");
        let runner = ShellRunner::new(ModelRunnerConfig {
            command: cmd,
            model_path: Some("/models/tiny.gguf".into()),
            working_directory: dir.path().to_path_buf(),
            ..Default::default()
        });
        assert_eq!(runner.generate("hi").await.unwrap(), "--model /models/tiny.gguf");
    }

    #[tokio::test]
    async fn test_falls_back_to_stderr_when_stdout_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "err.sh", "cat > /dev/null; echo 'from stderr' >&2");
        let out = runner(&cmd, dir.path()).generate("x").await.unwrap();
        assert_eq!(out, "from stderr");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "fail.sh", "cat > /dev/null; echo 'no model' >&2; exit 3");
        let err = runner(&cmd, dir.path()).generate("x").await.unwrap_err();
        match err {
            BackendError::NonZeroExit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "no model");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_zero_exit_without_reading_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "early.sh", "echo 'model file missing' >&2; exit 3");
        // Larger than any pipe buffer, so the write cannot complete
        let prompt = "x".repeat(256 * 1024);
        let err = runner(&cmd, dir.path()).generate(&prompt).await.unwrap_err();
        match err {
            BackendError::NonZeroExit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "model file missing");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_large_prompt_fully_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "count.sh", "wc -c");
        let prompt = "x".repeat(256 * 1024);
        let out = runner(&cmd, dir.path()).generate(&prompt).await.unwrap();
        let expected = serde_json::to_vec(&json!({ "prompt": prompt })).unwrap().len();
        assert_eq!(out.trim().parse::<usize>().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "slow.sh", "sleep 10");
        let mut runner = runner(&cmd, dir.path());
        runner.config.timeout_secs = 1;
        let err = runner.generate("x").await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(d) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner("/nonexistent/llama-cli", dir.path())
            .generate("x")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Io(_)));
    }

    #[tokio::test]
    async fn test_extra_env_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = script(dir.path(), "env.sh", "cat > /dev/null; echo \"$AETHER_MODEL_THREADS\"");
        let mut runner = runner(&cmd, dir.path());
        runner
            .config
            .extra_env
            .insert("AETHER_MODEL_THREADS".to_string(), "4".to_string());
        assert_eq!(runner.generate("x").await.unwrap(), "4");
    }

    #[tokio::test]
    async fn test_extra_env_keeps_inherited_environment() {
        let dir = tempfile::tempdir().unwrap();
        let body = "cat > /dev/null; echo \"$AETHER_MODEL_THREADS $PATH\"";
        let cmd = script(dir.path(), "path.sh", body);
        let mut runner = runner(&cmd, dir.path());
        runner
            .config
            .extra_env
            .insert("AETHER_MODEL_THREADS".to_string(), "4".to_string());
        let inherited = std::env::var("PATH").unwrap();
        assert_eq!(runner.generate("x").await.unwrap(), format!("4 {inherited}"));
    }

    #[tokio::test]
    async fn test_ensure_workdir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("models").join("cache");
        let runner = runner("cat", &nested);
        runner.ensure_workdir().await.unwrap();
        runner.ensure_workdir().await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_ensure_workdir_propagates_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, "not a directory").unwrap();
        let runner = runner("cat", &file.join("models"));
        assert!(matches!(runner.ensure_workdir().await, Err(BackendError::Io(_))));
    }
}
