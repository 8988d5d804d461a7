use super::cli_check::engine_binary;
use super::proc_util::{CancelKiller, spawn_read_to_string};
use super::{EventSink, RunTurnRequest, SendOutcome};
use crate::error::AdapterError;
use std::io::{BufRead as _, BufReader, Write as _};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tiller_domain::{
    AccessMode, CommandExecutionStatus, EngineKind, ErrorMessage, FileUpdateChange,
    PatchApplyStatus, PatchChangeKind, PlanStep, ThreadEvent, ThreadItem, TokenUsage,
    ToolCallStatus,
};

/// Raw wire shapes of `codex exec --json`. Normalization into the internal
/// event model happens in `normalize_codex_event`, nowhere else.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
enum CodexRawEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },
    #[serde(rename = "turn.started")]
    TurnStarted,
    #[serde(rename = "turn.completed")]
    TurnCompleted { usage: CodexRawUsage },
    #[serde(rename = "turn.failed")]
    TurnFailed { error: CodexRawError },
    #[serde(rename = "item.started")]
    ItemStarted { item: CodexRawItem },
    #[serde(rename = "item.updated")]
    ItemUpdated { item: CodexRawItem },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: CodexRawItem },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, serde::Deserialize)]
struct CodexRawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    cached_input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, serde::Deserialize)]
struct CodexRawError {
    message: String,
}

#[derive(Debug, serde::Deserialize)]
struct CodexRawTodoItem {
    text: String,
    #[serde(default)]
    completed: bool,
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
enum CodexRawItem {
    #[serde(rename = "agent_message")]
    AgentMessage { id: String, text: String },
    #[serde(rename = "reasoning")]
    Reasoning { id: String, text: String },
    #[serde(rename = "command_execution")]
    CommandExecution {
        id: String,
        #[serde(default)]
        command: String,
        #[serde(default)]
        aggregated_output: String,
        #[serde(default)]
        exit_code: Option<i32>,
        status: String,
    },
    #[serde(rename = "file_change")]
    FileChange {
        id: String,
        #[serde(default)]
        changes: Vec<CodexRawFileChange>,
        status: String,
    },
    #[serde(rename = "mcp_tool_call")]
    McpToolCall {
        id: String,
        #[serde(default)]
        server: String,
        #[serde(default)]
        tool: String,
        #[serde(default)]
        arguments: serde_json::Value,
        result: Option<serde_json::Value>,
        error: Option<CodexRawError>,
        status: String,
    },
    #[serde(rename = "web_search")]
    WebSearch {
        id: String,
        #[serde(default)]
        query: String,
    },
    #[serde(rename = "todo_list")]
    TodoList {
        id: String,
        items: Vec<CodexRawTodoItem>,
    },
    #[serde(rename = "error")]
    Error { id: String, message: String },
}

#[derive(Debug, serde::Deserialize)]
struct CodexRawFileChange {
    path: String,
    kind: String,
}

fn command_status(raw: &str) -> CommandExecutionStatus {
    match raw {
        "completed" => CommandExecutionStatus::Completed,
        "failed" => CommandExecutionStatus::Failed,
        _ => CommandExecutionStatus::InProgress,
    }
}

fn patch_status(raw: &str) -> PatchApplyStatus {
    match raw {
        "completed" => PatchApplyStatus::Completed,
        "failed" => PatchApplyStatus::Failed,
        _ => PatchApplyStatus::InProgress,
    }
}

fn tool_status(raw: &str) -> ToolCallStatus {
    match raw {
        "completed" => ToolCallStatus::Completed,
        "failed" => ToolCallStatus::Failed,
        _ => ToolCallStatus::InProgress,
    }
}

fn normalize_codex_item(item: CodexRawItem) -> ThreadItem {
    match item {
        CodexRawItem::AgentMessage { id, text } => ThreadItem::AgentMessage { id, text },
        CodexRawItem::Reasoning { id, text } => ThreadItem::Reasoning { id, text },
        CodexRawItem::CommandExecution {
            id,
            command,
            aggregated_output,
            exit_code,
            status,
        } => ThreadItem::CommandExecution {
            id,
            command,
            aggregated_output,
            exit_code,
            status: command_status(&status),
        },
        CodexRawItem::FileChange {
            id,
            changes,
            status,
        } => ThreadItem::FileChange {
            id,
            changes: changes
                .into_iter()
                .map(|change| FileUpdateChange {
                    path: change.path,
                    kind: match change.kind.as_str() {
                        "add" => PatchChangeKind::Add,
                        "delete" => PatchChangeKind::Delete,
                        _ => PatchChangeKind::Update,
                    },
                })
                .collect(),
            status: patch_status(&status),
        },
        CodexRawItem::McpToolCall {
            id,
            server,
            tool,
            arguments,
            result,
            error,
            status,
        } => ThreadItem::ToolCall {
            id,
            server,
            tool,
            arguments,
            result,
            error: error.map(|e| ErrorMessage { message: e.message }),
            status: tool_status(&status),
        },
        CodexRawItem::WebSearch { id, query } => ThreadItem::WebSearch { id, query },
        CodexRawItem::TodoList { id, items } => ThreadItem::Plan {
            id,
            steps: items
                .into_iter()
                .map(|item| PlanStep {
                    text: item.text,
                    completed: item.completed,
                })
                .collect(),
        },
        CodexRawItem::Error { id, message } => ThreadItem::Error { id, message },
    }
}

fn normalize_codex_event(event: CodexRawEvent, turn_id: &str) -> Vec<ThreadEvent> {
    match event {
        CodexRawEvent::ThreadStarted { thread_id } => vec![ThreadEvent::SessionIdAssigned {
            session_id: thread_id,
            engine_hint: Some(EngineKind::Codex.as_str().to_owned()),
        }],
        CodexRawEvent::TurnStarted => vec![ThreadEvent::TurnStarted {
            turn_id: turn_id.to_owned(),
        }],
        CodexRawEvent::TurnCompleted { usage } => vec![ThreadEvent::TurnCompleted {
            usage: Some(TokenUsage {
                input_tokens: usage.input_tokens,
                cached_input_tokens: usage.cached_input_tokens,
                output_tokens: usage.output_tokens,
            }),
        }],
        CodexRawEvent::TurnFailed { error } => vec![ThreadEvent::TurnError {
            message: error.message,
            will_retry: false,
        }],
        CodexRawEvent::ItemStarted { item } => vec![ThreadEvent::ItemStarted {
            item: normalize_codex_item(item),
        }],
        CodexRawEvent::ItemUpdated { item } => vec![ThreadEvent::ItemUpdated {
            item: normalize_codex_item(item),
        }],
        CodexRawEvent::ItemCompleted { item } => vec![ThreadEvent::ItemCompleted {
            item: normalize_codex_item(item),
        }],
        CodexRawEvent::Error { message } => {
            let will_retry = message.contains("retrying") || message.contains("Retrying");
            vec![ThreadEvent::TurnError {
                message,
                will_retry,
            }]
        }
    }
}

enum CodexStdoutLine {
    Event(Box<CodexRawEvent>),
    Ignored { message: String },
    Noise { message: String },
}

fn parse_codex_stdout_line(line: &str) -> CodexStdoutLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return CodexStdoutLine::Noise {
            message: String::new(),
        };
    }
    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return CodexStdoutLine::Noise {
            message: trimmed.to_owned(),
        };
    }
    match serde_json::from_str::<CodexRawEvent>(trimmed) {
        Ok(event) => CodexStdoutLine::Event(Box::new(event)),
        Err(_) => {
            let type_name = serde_json::from_str::<serde_json::Value>(trimmed)
                .ok()
                .and_then(|value| {
                    value
                        .get("type")
                        .and_then(|v| v.as_str())
                        .map(ToOwned::to_owned)
                });
            match type_name {
                Some(type_name) => CodexStdoutLine::Ignored {
                    message: format!("ignored codex event: {type_name}"),
                },
                None => CodexStdoutLine::Noise {
                    message: trimmed.to_owned(),
                },
            }
        }
    }
}

fn sandbox_flag(access_mode: AccessMode) -> &'static str {
    match access_mode {
        AccessMode::ReadOnly => "read-only",
        AccessMode::Edits => "workspace-write",
        AccessMode::FullAccess => "danger-full-access",
    }
}

pub(super) fn start_codex_turn(
    request: &RunTurnRequest,
    cancel: Arc<AtomicBool>,
    on_event: EventSink,
) -> Result<SendOutcome, AdapterError> {
    let codex = engine_binary(EngineKind::Codex);

    let mut command = Command::new(&codex);
    command
        .arg("--sandbox")
        .arg(sandbox_flag(request.access_mode))
        .arg("--ask-for-approval")
        .arg("never")
        .arg("exec")
        .arg("--json")
        .arg("-C")
        .arg(&request.workspace_root);

    if !request.attachment_paths.is_empty() {
        command.arg("--image");
        for path in &request.attachment_paths {
            command.arg(path);
        }
    }
    if let Some(model) = &request.model {
        command.arg("--model").arg(model);
    }
    if let Some(effort) = &request.effort {
        command
            .arg("-c")
            .arg(format!("model_reasoning_effort=\"{effort}\""));
    }

    if let Some(session_id) = request.session_id.as_deref().filter(|_| request.continue_session) {
        command.arg("resume").arg(session_id).arg("-");
    } else {
        command.arg("-");
    }

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AdapterError::Transport(format!(
                    "missing codex executable ({}): install Codex CLI and ensure it is available on PATH",
                    codex.display()
                ))
            } else {
                AdapterError::transport(format!("failed to spawn codex: {err}"))
            }
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AdapterError::transport("missing codex stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AdapterError::transport("missing codex stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AdapterError::transport("missing codex stderr"))?;

    let turn_id = format!("codex_turn_{}", child.id());
    let prompt = request.prompt.clone();
    let child = Arc::new(std::sync::Mutex::new(child));
    let killer = CancelKiller::spawn(child.clone(), cancel.clone());

    {
        let turn_id = turn_id.clone();
        let thread_id = request.thread_id.clone();
        std::thread::spawn(move || {
            let _ = stdin.write_all(prompt.as_bytes());
            drop(stdin);

            let stderr_handle = spawn_read_to_string(stderr);
            let mut stdout_noise: Vec<String> = Vec::new();
            let reader = BufReader::new(stdout);
            let mut saw_terminal = false;
            for line in reader.lines() {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(line) = line else { break };
                match parse_codex_stdout_line(&line) {
                    CodexStdoutLine::Event(event) => {
                        for normalized in normalize_codex_event(*event, &turn_id) {
                            if matches!(
                                normalized,
                                ThreadEvent::TurnCompleted { .. }
                                    | ThreadEvent::TurnError {
                                        will_retry: false,
                                        ..
                                    }
                            ) {
                                saw_terminal = true;
                            }
                            on_event(normalized);
                        }
                    }
                    CodexStdoutLine::Ignored { message } | CodexStdoutLine::Noise { message } => {
                        if !message.is_empty() && stdout_noise.len() < 64 {
                            stdout_noise.push(message);
                        }
                    }
                }
            }

            let status = child.lock().ok().and_then(|mut child| child.wait().ok());
            killer.finish();
            let stderr_text = stderr_handle.join().unwrap_or_default();

            if cancel.load(Ordering::SeqCst) {
                return;
            }
            let exited_cleanly = status.is_some_and(|status| status.success());
            if !exited_cleanly && !saw_terminal {
                let mut message = format!("codex failed:\n{}", stderr_text.trim());
                if !stdout_noise.is_empty() {
                    message.push_str("\nstdout (non-protocol):\n");
                    message.push_str(&stdout_noise.join("\n"));
                }
                tracing::warn!(thread = %thread_id, "codex turn failed");
                on_event(ThreadEvent::TurnError {
                    message,
                    will_retry: false,
                });
            } else if !saw_terminal {
                on_event(ThreadEvent::TurnCompleted { usage: None });
            }
        });
    }

    // Codex reports the turn through the stream; nothing is known
    // synchronously.
    Ok(SendOutcome::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codex_stdout_parsing_accepts_events() {
        let parsed = parse_codex_stdout_line("{\"type\":\"turn.started\"}");
        assert!(matches!(
            parsed,
            CodexStdoutLine::Event(event) if matches!(*event, CodexRawEvent::TurnStarted)
        ));
    }

    #[test]
    fn codex_stdout_parsing_ignores_unknown_events() {
        let parsed = parse_codex_stdout_line("{\"type\":\"turn.reconnect\",\"detail\":\"x\"}");
        assert!(matches!(parsed, CodexStdoutLine::Ignored { .. }));
    }

    #[test]
    fn codex_stdout_parsing_treats_plain_text_as_noise() {
        let parsed = parse_codex_stdout_line("retry/reconnect");
        assert!(matches!(parsed, CodexStdoutLine::Noise { .. }));
    }

    #[test]
    fn thread_started_normalizes_to_session_assignment_with_hint() {
        let events = normalize_codex_event(
            CodexRawEvent::ThreadStarted {
                thread_id: "ses_1".to_owned(),
            },
            "codex_turn_1",
        );
        assert!(matches!(
            &events[..],
            [ThreadEvent::SessionIdAssigned { session_id, engine_hint: Some(hint) }]
                if session_id == "ses_1" && hint == "codex"
        ));
    }

    #[test]
    fn todo_list_items_normalize_to_plan_steps() {
        let payload = r#"{"type":"item.completed","item":{"type":"todo_list","id":"todo_1","items":[{"text":"write tests","completed":false}]}}"#;
        let CodexStdoutLine::Event(event) = parse_codex_stdout_line(payload) else {
            panic!("expected event");
        };
        let events = normalize_codex_event(*event, "codex_turn_1");
        assert!(matches!(
            &events[..],
            [ThreadEvent::ItemCompleted {
                item: ThreadItem::Plan { steps, .. }
            }] if steps.len() == 1 && !steps[0].completed
        ));
    }

    #[test]
    fn retrying_errors_are_marked_non_terminal() {
        let events = normalize_codex_event(
            CodexRawEvent::Error {
                message: "stream disconnected; retrying in 2s".to_owned(),
            },
            "codex_turn_1",
        );
        assert!(matches!(
            &events[..],
            [ThreadEvent::TurnError {
                will_retry: true,
                ..
            }]
        ));
    }
}
