//! Prompt backends ("model runners").
//!
//! A backend turns a prompt into text. Two transports are provided: a
//! local CLI fed JSON on stdin, and an HTTP endpoint receiving a JSON
//! POST. The `[model] runner` config field picks one.

pub mod http;
pub mod shell;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ModelRunnerConfig;

pub use http::HttpRunner;
pub use shell::ShellRunner;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("model backend timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("model backend exited with {}: {stderr}", exit_label(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("model backend returned HTTP {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("model backend transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model backend payload error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid model runner config: {0}")]
    InvalidConfig(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Abstraction over prompt backends.
#[async_trait]
pub trait PromptBackend: Send + Sync {
    /// Sends a prompt and returns the generated text.
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;

    /// Human-readable identifier, e.g. `"shell (llama.cpp)"`.
    ///
    /// Reported as `used_model` on translation results.
    fn identifier(&self) -> String;
}

/// Builds the backend selected by `config.runner`.
pub fn from_config(config: &ModelRunnerConfig) -> Result<Box<dyn PromptBackend>, BackendError> {
    match config.runner.as_str() {
        "shell" => Ok(Box::new(ShellRunner::new(config.clone()))),
        "http" => Ok(Box::new(HttpRunner::new(config.clone())?)),
        other => Err(BackendError::InvalidConfig(format!(
            "unsupported runner: {other}"
        ))),
    }
}
