//! Local process executor — runs code through a configured interpreter.
//!
//! The code is appended as the last argument of the interpreter argv
//! (`sh -c <code>` by default) and runs in the workspace directory. On unix
//! the child leads its own process group, and the whole group is killed when
//! the execution ends or its future is dropped, so background jobs the code
//! forked cannot keep writing to the workspace afterwards.

use async_trait::async_trait;
use agentloom_core::error::ExecutorError;
use agentloom_core::tool::{CodeExecutor, ExecutionRequest, ToolResult};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable listing the capabilities the code may call.
pub const CAPABILITIES_ENV: &str = "AGENTLOOM_CAPABILITIES";

/// Execute code as a local child process.
pub struct ProcessExecutor {
    interpreter: Vec<String>,
    workspace_dir: Option<PathBuf>,
}

impl ProcessExecutor {
    pub fn new(interpreter: Vec<String>, workspace_dir: Option<PathBuf>) -> Self {
        Self {
            interpreter,
            workspace_dir,
        }
    }

    /// `sh -c` with no fixed working directory.
    pub fn shell() -> Self {
        Self::new(vec!["sh".into(), "-c".into()], None)
    }

    fn command(&self, request: &ExecutionRequest) -> Result<Command, ExecutorError> {
        let (program, args) = self
            .interpreter
            .split_first()
            .ok_or_else(|| ExecutorError::InvalidRequest("empty interpreter".into()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(&request.code)
            .env(CAPABILITIES_ENV, request.capabilities.join(","))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        if let Some(dir) = &self.workspace_dir {
            command.current_dir(dir);
        }
        Ok(command)
    }
}

/// Kills a child's process group on drop.
struct ProcessGroup {
    leader: Option<u32>,
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(leader) = self.leader {
            kill_group(leader);
        }
    }
}

#[cfg(unix)]
fn kill_group(leader: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(leader) else {
        return;
    };
    // ESRCH: every member already exited
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_leader: u32) {}

#[async_trait]
impl CodeExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ToolResult, ExecutorError> {
        if request.code.trim().is_empty() {
            return Err(ExecutorError::InvalidRequest("no code to execute".into()));
        }

        if let Some(dir) = &self.workspace_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| ExecutorError::Spawn(format!("workspace {}: {e}", dir.display())))?;
        }

        let mut command = self.command(&request)?;
        debug!(timeout_ms = request.timeout_ms, "Executing code");

        let child = command
            .spawn()
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;
        let _group = ProcessGroup { leader: child.id() };

        let output = match tokio::time::timeout(
            Duration::from_millis(request.timeout_ms),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ExecutorError::Spawn(e.to_string())),
            Err(_) => {
                // Dropping the wait future and the group guard kills everything
                warn!(timeout_ms = request.timeout_ms, "Execution timed out");
                return Ok(ToolResult::failed(
                    format!("Execution timed out after {}ms", request.timeout_ms),
                    "",
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            let text = if stderr.trim().is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            };
            Ok(ToolResult::ok(text.trim()))
        } else {
            let code = output.status.code().unwrap_or(-1);
            debug!(exit_code = code, "Code exited with failure");
            let text = format!("{stdout}\n{stderr}");
            Ok(ToolResult::failed(format!("exit code: {code}"), text.trim()))
        }
    }
}
