//! Shared test doubles for the controller and supervisor tests.

use agentloom_core::error::{ExecutorError, GatewayError};
use agentloom_core::gateway::{Completion, CompletionRequest, ModelGateway, Usage};
use agentloom_core::tool::{CodeExecutor, EXECUTE_CODE, ExecutionRequest, ToolCall, ToolResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A gateway that plays back scripted responses.
///
/// Each call pops the next scripted response; once the script is empty the
/// `repeat` response (if any) is returned forever. Panics when neither is left.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<Completion, GatewayError>>>,
    repeat: Option<Completion>,
    delay: Option<Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<Completion, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Return `completion` on every call.
    pub fn repeating(completion: Completion) -> Self {
        let mut gateway = Self::new(vec![]);
        gateway.repeat = Some(completion);
        gateway
    }

    /// Sleep before answering (use with paused time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => match &self.repeat {
                Some(completion) => Ok(completion.clone()),
                None => panic!("ScriptedGateway: no more responses (call #{call})"),
            },
        }
    }
}

/// A gateway that panics on every call.
pub struct PanickingGateway;

#[async_trait::async_trait]
impl ModelGateway for PanickingGateway {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<Completion, GatewayError> {
        panic!("gateway exploded");
    }
}

/// An executor that returns the same outcome for every request.
pub struct ScriptedExecutor {
    outcome: Result<ToolResult, ExecutorError>,
    delay: Option<Duration>,
    calls: Mutex<Vec<ExecutionRequest>>,
}

impl ScriptedExecutor {
    pub fn always(result: ToolResult) -> Self {
        Self {
            outcome: Ok(result),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn erroring(error: ExecutorError) -> Self {
        Self {
            outcome: Err(error),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ExecutionRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CodeExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ToolResult, ExecutorError> {
        self.calls.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

/// A response asking to execute `code`, with no accompanying text.
pub fn code_call(code: &str) -> Completion {
    let mut args = serde_json::Map::new();
    args.insert("code".into(), serde_json::Value::String(code.into()));
    let mut completion = Completion::with_tool_call("", ToolCall::new(EXECUTE_CODE, args));
    completion.usage = Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    });
    completion
}

/// A plain final answer.
pub fn answer(text: &str) -> Completion {
    let mut completion = Completion::text(text);
    completion.usage = Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    });
    completion
}
