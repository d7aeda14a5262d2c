//! Prompt text the loop feeds back to the model.

use agentloom_core::tool::ToolResult;

/// Default system prompt for the code-execution loop.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous coding agent working inside a sandboxed workspace.\n\
You have exactly one tool, `execute_code`: it runs the code you pass and returns its output. \
Use it to inspect files, run commands, and call the capability modules you were given.\n\
Work in small steps and check the output of each one. When a step fails, read the error and fix it.\n\
When the task is done, reply with your final answer as plain text and do not call the tool.";

/// Marker introducing the code of a tool call in the assistant turn.
pub const TOOL_CALL_MARKER: &str = "[called execute_code]";

/// Re-prompt sent after a response with neither text nor a tool call.
pub const EMPTY_RESPONSE_REPROMPT: &str = "Your last response was empty. \
Either call execute_code to make progress or reply with your final answer.";

const CONTINUE_INSTRUCTION: &str = "Continue with the next step, or reply with your final answer if the task is complete.";

/// Cut `text` to at most `max_chars` characters on a char boundary.
///
/// Deterministic: the same input always yields the same output.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            format!("{}\n... [truncated {dropped} chars]", &text[..cut])
        }
    }
}

/// The assistant turn recorded for a tool call: the model's own text (if
/// any) followed by the code it asked to run.
pub fn assistant_turn(text: &str, code: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        format!("{TOOL_CALL_MARKER}\n{code}")
    } else {
        format!("{text}\n\n{TOOL_CALL_MARKER}\n{code}")
    }
}

/// The user-role message reporting one execution back to the model.
pub fn tool_feedback(result: &ToolResult, max_output_chars: usize) -> String {
    let output = truncate(&result.output, max_output_chars);
    let body = if result.success {
        format!("[execute_code result]\n{output}")
    } else {
        let error = result.error.as_deref().unwrap_or("execution failed");
        if output.is_empty() {
            format!("[execute_code error]\n{error}")
        } else {
            format!("[execute_code error]\n{error}\n{output}")
        }
    };
    format!("{body}\n\n{CONTINUE_INSTRUCTION}")
}

/// The user-role message that restarts a thread from a checkpoint.
pub fn continuation(next_task: &str, pending_action: Option<&str>, iteration: u32) -> String {
    let mut text = format!(
        "[resumed from checkpoint, iteration {iteration}]\n\
         The previous run was interrupted before it finished. Remaining work:\n{next_task}"
    );
    if let Some(code) = pending_action {
        text.push_str(
            "\n\nThis code was executing when the run was interrupted and its outcome is unknown. \
             Check whether it took effect and run it again if needed:\n",
        );
        text.push_str(code);
    }
    text.push_str("\n\n");
    text.push_str(CONTINUE_INSTRUCTION);
    text
}
