//! HTTP backend.
//!
//! POSTs `{"prompt": "..."}` to the configured endpoint. A JSON object
//! reply carrying a `completion` field yields that field; any other 2xx
//! body is returned as-is. Non-2xx statuses are errors, never text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::{BackendError, PromptBackend};
use crate::config::ModelRunnerConfig;

pub struct HttpRunner {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpRunner {
    pub fn new(config: ModelRunnerConfig) -> Result<Self, BackendError> {
        let raw = config.endpoint.as_deref().ok_or_else(|| {
            BackendError::InvalidConfig("HTTP model runner requires an endpoint".to_string())
        })?;
        let endpoint = Url::parse(raw)
            .map_err(|e| BackendError::InvalidConfig(format!("invalid endpoint {raw}: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(BackendError::InvalidConfig(format!(
                "endpoint must use http or https: {raw}"
            )));
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }
}

#[async_trait]
impl PromptBackend for HttpRunner {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        debug!("Calling model endpoint {}", self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_transport(e))?;

        if !status.is_success() {
            warn!("Model endpoint returned {status}");
            return Err(BackendError::HttpStatus { status, body });
        }

        Ok(extract_completion(&body).unwrap_or(body))
    }

    fn identifier(&self) -> String {
        format!("http ({})", self.endpoint)
    }
}

impl HttpRunner {
    fn map_transport(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Transport(err)
        }
    }
}

/// Pulls `completion` out of a JSON object reply.
fn extract_completion(body: &str) -> Option<String> {
    match serde_json::from_str::<Value>(body).ok()? {
        Value::Object(mut map) => match map.remove("completion")? {
            Value::String(text) => Some(text),
            other => Some(other.to_string()),
        },
        _ => None,
    }
}
