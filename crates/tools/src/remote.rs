//! Remote executor — delegates code execution to an HTTP sandbox service.
//!
//! Wire contract: `POST {url}` with `{code, timeoutMs, capabilities}` and a
//! bearer credential; the sandbox answers `{success, output, error?}`.

use async_trait::async_trait;
use agentloom_core::error::ExecutorError;
use agentloom_core::tool::{CodeExecutor, ExecutionRequest, ToolResult};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Slack added to the execution timeout for the HTTP round trip.
const TRANSPORT_GRACE: Duration = Duration::from_secs(5);

pub struct RemoteExecutor {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteExecutor {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RemoteResponse {
    success: bool,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl CodeExecutor for RemoteExecutor {
    fn name(&self) -> &str {
        "remote"
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ToolResult, ExecutorError> {
        let timeout = Duration::from_millis(request.timeout_ms) + TRANSPORT_GRACE;
        debug!(url = %self.url, timeout_ms = request.timeout_ms, "Sending code to sandbox");

        let mut builder = self.client.post(&self.url).timeout(timeout).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ExecutorError::Timeout {
                    timeout_ms: request.timeout_ms,
                }
            } else {
                ExecutorError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Sandbox returned error");
            return Err(ExecutorError::Unreachable(format!(
                "sandbox returned {}: {body}",
                status.as_u16()
            )));
        }

        let parsed: RemoteResponse = response
            .json()
            .await
            .map_err(|e| ExecutorError::Unreachable(format!("invalid sandbox response: {e}")))?;

        Ok(if parsed.success {
            ToolResult::ok(parsed.output)
        } else {
            ToolResult::failed(
                parsed.error.unwrap_or_else(|| "execution failed".into()),
                parsed.output,
            )
        })
    }
}
