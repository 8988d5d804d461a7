use super::cli_check::engine_binary;
use super::proc_util::{CancelKiller, spawn_read_to_string};
use super::{EventSink, RunTurnRequest, SendOutcome};
use crate::error::AdapterError;
use serde_json::Value;
use std::io::{BufRead as _, BufReader};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tiller_domain::{
    CommandExecutionStatus, EngineKind, ThreadEvent, ThreadItem, TokenUsage, ToolCallStatus,
};

/// Per-turn parser state for `opencode run --format json` output: the
/// session id is reported once and every part carries its own id.
#[derive(Default)]
struct OpencodeStreamState {
    reported_session: bool,
    saw_turn_started: bool,
}

/// Normalize one opencode output line. The only place raw opencode JSON is
/// interpreted.
fn parse_opencode_line(
    state: &mut OpencodeStreamState,
    turn_id: &str,
    line: &str,
) -> Vec<ThreadEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return Vec::new();
    }
    let payload: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };

    let mut out = Vec::new();

    if !state.reported_session
        && let Some(session_id) = payload
            .get("sessionID")
            .or_else(|| payload.get("session_id"))
            .and_then(|v| v.as_str())
    {
        state.reported_session = true;
        out.push(ThreadEvent::SessionIdAssigned {
            session_id: session_id.to_owned(),
            engine_hint: Some(EngineKind::Opencode.as_str().to_owned()),
        });
    }

    let part_type = payload
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let part_id = payload
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_owned();

    match part_type.as_str() {
        "step-start" => {
            if !state.saw_turn_started {
                state.saw_turn_started = true;
                out.push(ThreadEvent::TurnStarted {
                    turn_id: turn_id.to_owned(),
                });
            }
        }
        "text" => {
            let text = payload.get("text").and_then(|v| v.as_str()).unwrap_or("");
            if !text.is_empty() && !part_id.is_empty() {
                out.push(ThreadEvent::ItemUpdated {
                    item: ThreadItem::AgentMessage {
                        id: part_id,
                        text: text.to_owned(),
                    },
                });
            }
        }
        "reasoning" => {
            let text = payload.get("text").and_then(|v| v.as_str()).unwrap_or("");
            if !text.is_empty() && !part_id.is_empty() {
                out.push(ThreadEvent::ItemUpdated {
                    item: ThreadItem::Reasoning {
                        id: part_id,
                        text: text.to_owned(),
                    },
                });
            }
        }
        "tool" => {
            if part_id.is_empty() {
                return out;
            }
            let tool = payload.get("tool").and_then(|v| v.as_str()).unwrap_or("");
            let tool_state = payload.get("state").cloned().unwrap_or(Value::Null);
            let status_raw = tool_state
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("running");
            let input = tool_state.get("input").cloned().unwrap_or(Value::Null);
            let output = tool_state.get("output").cloned();

            if tool == "bash" {
                let command = input
                    .get("command")
                    .and_then(|v| v.as_str())
                    .unwrap_or("bash")
                    .to_owned();
                let status = match status_raw {
                    "completed" => CommandExecutionStatus::Completed,
                    "error" => CommandExecutionStatus::Failed,
                    _ => CommandExecutionStatus::InProgress,
                };
                out.push(ThreadEvent::ItemUpdated {
                    item: ThreadItem::CommandExecution {
                        id: part_id,
                        command,
                        aggregated_output: output
                            .as_ref()
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_owned(),
                        exit_code: None,
                        status,
                    },
                });
            } else {
                let status = match status_raw {
                    "completed" => ToolCallStatus::Completed,
                    "error" => ToolCallStatus::Failed,
                    _ => ToolCallStatus::InProgress,
                };
                out.push(ThreadEvent::ItemUpdated {
                    item: ThreadItem::ToolCall {
                        id: part_id,
                        server: String::new(),
                        tool: tool.to_owned(),
                        arguments: input,
                        result: output,
                        error: None,
                        status,
                    },
                });
            }
        }
        "step-finish" => {
            if let Some(tokens) = payload.get("tokens") {
                out.push(ThreadEvent::TokenUsageUpdated {
                    usage: TokenUsage {
                        input_tokens: tokens
                            .get("input")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0),
                        cached_input_tokens: tokens
                            .get("cache")
                            .and_then(|c| c.get("read"))
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0),
                        output_tokens: tokens
                            .get("output")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0),
                    },
                });
            }
        }
        "error" => {
            let message = payload
                .get("message")
                .or_else(|| payload.get("error"))
                .and_then(|v| v.as_str())
                .unwrap_or("opencode error")
                .to_owned();
            out.push(ThreadEvent::TurnError {
                message,
                will_retry: false,
            });
        }
        _ => {}
    }
    out
}

pub(super) fn start_opencode_turn(
    request: &RunTurnRequest,
    cancel: Arc<AtomicBool>,
    on_event: EventSink,
) -> Result<SendOutcome, AdapterError> {
    let opencode = engine_binary(EngineKind::Opencode);

    let mut command = Command::new(&opencode);
    command.current_dir(&request.workspace_root);
    command.arg("run").arg("--format").arg("json");
    if let Some(model) = &request.model {
        command.arg("--model").arg(model);
    }
    if let Some(session_id) = request
        .session_id
        .as_deref()
        .filter(|_| request.continue_session)
    {
        command.arg("--session").arg(session_id);
    }
    command.arg(&request.prompt);

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AdapterError::Transport(format!(
                    "missing opencode executable ({}): install opencode and ensure it is available on PATH",
                    opencode.display()
                ))
            } else {
                AdapterError::transport(format!("failed to spawn opencode: {err}"))
            }
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AdapterError::transport("missing opencode stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AdapterError::transport("missing opencode stderr"))?;

    let turn_id = format!("opencode_turn_{}", child.id());
    let child = Arc::new(std::sync::Mutex::new(child));
    let killer = CancelKiller::spawn(child.clone(), cancel.clone());

    {
        let thread_id = request.thread_id.clone();
        std::thread::spawn(move || {
            let stderr_handle = spawn_read_to_string(stderr);
            let mut state = OpencodeStreamState::default();
            let mut saw_terminal = false;
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(line) = line else { break };
                for event in parse_opencode_line(&mut state, &turn_id, &line) {
                    if matches!(
                        event,
                        ThreadEvent::TurnError {
                            will_retry: false,
                            ..
                        }
                    ) {
                        saw_terminal = true;
                    }
                    on_event(event);
                }
            }

            let status = child.lock().ok().and_then(|mut child| child.wait().ok());
            killer.finish();
            let stderr_text = stderr_handle.join().unwrap_or_default();

            if cancel.load(Ordering::SeqCst) || saw_terminal {
                return;
            }
            if status.is_some_and(|status| status.success()) {
                on_event(ThreadEvent::TurnCompleted { usage: None });
            } else {
                tracing::warn!(thread = %thread_id, "opencode turn failed");
                on_event(ThreadEvent::TurnError {
                    message: format!("opencode failed:\n{}", stderr_text.trim()),
                    will_retry: false,
                });
            }
        });
    }

    Ok(SendOutcome::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_part_reports_the_session_id_once() {
        let mut state = OpencodeStreamState::default();
        let events = parse_opencode_line(
            &mut state,
            "opencode_turn_1",
            r#"{"id":"prt_1","sessionID":"ses_1","type":"step-start"}"#,
        );
        assert!(matches!(
            &events[..],
            [
                ThreadEvent::SessionIdAssigned { session_id, .. },
                ThreadEvent::TurnStarted { .. }
            ] if session_id == "ses_1"
        ));

        let events = parse_opencode_line(
            &mut state,
            "opencode_turn_1",
            r#"{"id":"prt_2","sessionID":"ses_1","type":"text","text":"hi"}"#,
        );
        assert!(matches!(
            &events[..],
            [ThreadEvent::ItemUpdated {
                item: ThreadItem::AgentMessage { .. }
            }]
        ));
    }

    #[test]
    fn bash_tool_parts_normalize_to_command_execution() {
        let mut state = OpencodeStreamState::default();
        state.reported_session = true;
        let events = parse_opencode_line(
            &mut state,
            "opencode_turn_1",
            r#"{"id":"prt_3","type":"tool","tool":"bash","state":{"status":"completed","input":{"command":"ls"},"output":"src"}}"#,
        );
        assert!(matches!(
            &events[..],
            [ThreadEvent::ItemUpdated {
                item: ThreadItem::CommandExecution {
                    status: CommandExecutionStatus::Completed,
                    ..
                }
            }]
        ));
    }

    #[test]
    fn step_finish_reports_token_usage() {
        let mut state = OpencodeStreamState::default();
        state.reported_session = true;
        let events = parse_opencode_line(
            &mut state,
            "opencode_turn_1",
            r#"{"id":"prt_4","type":"step-finish","tokens":{"input":100,"output":20,"cache":{"read":40,"write":0}}}"#,
        );
        assert!(matches!(
            &events[..],
            [ThreadEvent::TokenUsageUpdated { usage }]
                if usage.input_tokens == 100 && usage.cached_input_tokens == 40
        ));
    }

    #[test]
    fn non_json_lines_are_skipped() {
        let mut state = OpencodeStreamState::default();
        assert!(parse_opencode_line(&mut state, "opencode_turn_1", "warming up...").is_empty());
    }
}
