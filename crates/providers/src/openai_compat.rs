//! OpenAI-compatible model gateway client.
//!
//! Works with any endpoint exposing `/chat/completions`: OpenAI, OpenRouter,
//! LiteLLM and similar proxies, Ollama, vLLM. The bearer header is sent only
//! when an API key is configured, so keyless local servers work as-is.
//!
//! The code-execution loop offers at most one tool per call, so only the
//! first tool call of a response is surfaced.

use async_trait::async_trait;
use agentloom_config::GatewayConfig;
use agentloom_core::error::GatewayError;
use agentloom_core::gateway::{Completion, CompletionRequest, ModelGateway, ToolSchema, Usage};
use agentloom_core::message::{Message, Role};
use agentloom_core::tool::ToolCall;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Argument name used when the model calls a tool that was never offered.
const FALLBACK_ARGUMENT: &str = "input";

/// An OpenAI-compatible gateway client.
pub struct OpenAiCompatGateway {
    name: String,
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiCompatGateway {
    /// Create a new client. A missing base URL is not an error here; it
    /// surfaces as [`GatewayError::Unavailable`] on the first call.
    pub fn new(
        name: impl Into<String>,
        base_url: Option<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout_secs,
            client,
        }
    }

    /// Build from the `[gateway]` config section.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            "openai-compat",
            config.base_url.clone(),
            config.api_key.clone(),
            config.request_timeout_secs,
        )
    }

    fn base_url(&self) -> Result<&str, GatewayError> {
        self.base_url
            .as_deref()
            .ok_or_else(|| GatewayError::Unavailable("no gateway base_url configured".into()))
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: None,
            })
            .collect()
    }

    /// Convert the offered tool to OpenAI API format.
    fn to_api_tool(tool: &ToolSchema) -> ApiToolDefinition {
        ApiToolDefinition {
            r#type: "function".into(),
            function: ApiToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }

    fn build_body(request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        });

        if let Some(tool) = &request.tool {
            body["tools"] = serde_json::json!([Self::to_api_tool(tool)]);
        }

        body
    }
}

/// Parse a tool call's argument payload.
///
/// A payload that is not a JSON object degrades to
/// `{primary_argument: raw}` so the turn still carries the model's intent.
fn parse_arguments(raw: &str, primary_argument: &str) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => map,
        Ok(serde_json::Value::String(s)) => {
            let mut map = serde_json::Map::new();
            map.insert(primary_argument.to_string(), serde_json::Value::String(s));
            map
        }
        _ => {
            debug!(primary_argument, "Tool arguments are not a JSON object, using raw text");
            let mut map = serde_json::Map::new();
            map.insert(
                primary_argument.to_string(),
                serde_json::Value::String(raw.to_string()),
            );
            map
        }
    }
}

#[async_trait]
impl ModelGateway for OpenAiCompatGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError> {
        let base_url = self.base_url()?;
        let url = format!("{base_url}/chat/completions");
        let body = Self::build_body(&request);

        debug!(
            gateway = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            with_tool = request.tool.is_some(),
            "Sending completion request"
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }
        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout_secs)
                } else {
                    GatewayError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gateway returned error");
            return Err(GatewayError::RequestFailed {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        // Some proxies report failures as 200 with an error object
        if let Some(error) = api_response.error {
            return Err(GatewayError::RequestFailed {
                status_code: status,
                message: error.message,
            });
        }

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::InvalidResponse("No choices in response".into()))?;

        let primary_argument = request
            .tool
            .as_ref()
            .map(|t| t.primary_argument.as_str())
            .unwrap_or(FALLBACK_ARGUMENT);

        let tool_call = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|tc| ToolCall {
                id: tc.id,
                args: parse_arguments(&tc.function.arguments, primary_argument),
                name: tc.function.name,
            });

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            tool_call,
            finish_reason: choice.finish_reason,
            usage,
        })
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(default)]
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode},
        routing::post,
    };
    use std::sync::{Arc, Mutex};

    type Captured = Arc<Mutex<Option<serde_json::Value>>>;

    /// Serve one canned `/chat/completions` response on an ephemeral port.
    async fn stub(status: StatusCode, reply: serde_json::Value) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(
                "/chat/completions",
                post(
                    move |State(seen): State<Captured>, Json(body): Json<serde_json::Value>| {
                        let reply = reply.clone();
                        async move {
                            *seen.lock().unwrap() = Some(body);
                            (status, Json(reply))
                        }
                    },
                ),
            )
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), captured)
    }

    fn request_with_tool() -> CompletionRequest {
        CompletionRequest {
            model: "test-model".into(),
            messages: vec![Message::system("sys"), Message::user("list files")],
            tool: Some(ToolSchema {
                name: "execute_code".into(),
                description: "Run code".into(),
                parameters: serde_json::json!({"type": "object"}),
                primary_argument: "code".into(),
            }),
            max_tokens: 256,
            temperature: 0.0,
        }
    }

    fn tool_reply(arguments: &str) -> serde_json::Value {
        serde_json::json!({
            "model": "test-model",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "execute_code", "arguments": arguments}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    }

    #[tokio::test]
    async fn missing_base_url_is_unavailable() {
        let gateway = OpenAiCompatGateway::new("t", None, Some("sk".into()), 5);
        let err = gateway.complete(request_with_tool()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }

    type SeenAuth = Arc<Mutex<Vec<Option<String>>>>;

    /// Record the Authorization header of every request.
    async fn auth_stub() -> (String, SeenAuth) {
        let seen: SeenAuth = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/chat/completions",
                post(|State(seen): State<SeenAuth>, headers: HeaderMap| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    seen.lock().unwrap().push(auth);
                    Json(serde_json::json!({
                        "choices": [{"message": {"role": "assistant", "content": "hi"}}]
                    }))
                }),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    #[tokio::test]
    async fn keyless_endpoint_gets_no_authorization_header() {
        let (url, seen) = auth_stub().await;

        let keyless = OpenAiCompatGateway::new("t", Some(url.clone()), None, 5);
        assert_eq!(keyless.complete(request_with_tool()).await.unwrap().text, "hi");

        let keyed = OpenAiCompatGateway::new("t", Some(url), Some("sk-test".into()), 5);
        keyed.complete(request_with_tool()).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![None, Some("Bearer sk-test".to_string())]);
    }

    #[tokio::test]
    async fn parses_text_answer_and_sends_single_tool() {
        let (url, captured) = stub(
            StatusCode::OK,
            serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "All done."}, "finish_reason": "stop"}]
            }),
        )
        .await;
        let gateway = OpenAiCompatGateway::new("t", Some(url), Some("sk".into()), 5);

        let completion = gateway.complete(request_with_tool()).await.unwrap();
        assert_eq!(completion.text, "All done.");
        assert!(completion.tool_call.is_none());
        assert!(completion.is_final_answer());

        let body = captured.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["tools"].as_array().unwrap().len(), 1);
        assert_eq!(body["tools"][0]["function"]["name"], "execute_code");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[tokio::test]
    async fn parses_tool_call_and_usage() {
        let (url, _) = stub(StatusCode::OK, tool_reply(r#"{"code":"ls -la"}"#)).await;
        let gateway = OpenAiCompatGateway::new("t", Some(url), Some("sk".into()), 5);

        let completion = gateway.complete(request_with_tool()).await.unwrap();
        let call = completion.tool_call.unwrap();
        assert_eq!(call.name, "execute_code");
        assert_eq!(call.str_arg("code"), Some("ls -la"));
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn malformed_arguments_fall_back_to_primary_argument() {
        let (url, _) = stub(StatusCode::OK, tool_reply("print('hi'")).await;
        let gateway = OpenAiCompatGateway::new("t", Some(url), Some("sk".into()), 5);

        let completion = gateway.complete(request_with_tool()).await.unwrap();
        let call = completion.tool_call.unwrap();
        assert_eq!(call.str_arg("code"), Some("print('hi'"));
    }

    #[tokio::test]
    async fn non_success_status_is_request_failed() {
        let (url, _) = stub(
            StatusCode::BAD_GATEWAY,
            serde_json::json!({"error": {"message": "upstream down"}}),
        )
        .await;
        let gateway = OpenAiCompatGateway::new("t", Some(url), Some("sk".into()), 5);

        let err = gateway.complete(request_with_tool()).await.unwrap_err();
        assert!(matches!(err, GatewayError::RequestFailed { status_code: 502, .. }));
    }

    #[tokio::test]
    async fn error_payload_with_ok_status_is_request_failed() {
        let (url, _) = stub(
            StatusCode::OK,
            serde_json::json!({"error": {"message": "model not found"}}),
        )
        .await;
        let gateway = OpenAiCompatGateway::new("t", Some(url), Some("sk".into()), 5);

        let err = gateway.complete(request_with_tool()).await.unwrap_err();
        match err {
            GatewayError::RequestFailed { message, .. } => assert_eq!(message, "model not found"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_arguments_variants() {
        let obj = parse_arguments(r#"{"code":"x"}"#, "code");
        assert_eq!(obj["code"], "x");

        let quoted = parse_arguments(r#""echo hi""#, "code");
        assert_eq!(quoted["code"], "echo hi");

        let raw = parse_arguments("echo hi", "code");
        assert_eq!(raw["code"], "echo hi");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatGateway::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let gateway =
            OpenAiCompatGateway::new("t", Some("http://proxy/v1/".into()), Some("k".into()), 5);
        assert_eq!(gateway.base_url.as_deref(), Some("http://proxy/v1"));
    }
}
