use super::cli_check::engine_binary;
use super::proc_util::spawn_read_to_string;
use super::{EventSink, RunTurnRequest, SendOutcome};
use crate::error::AdapterError;
use anyhow::{Context as _, anyhow};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::{BufRead as _, BufReader, BufWriter, Write as _};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tiller_domain::{
    AccessMode, CommandExecutionStatus, EngineKind, FileUpdateChange, PatchApplyStatus,
    PatchChangeKind, ThreadEvent, ThreadItem, TokenUsage, ToolCallStatus, UserInputQuestion,
};

/// Parser state for one turn of claude's stream-json output. Text and
/// thinking deltas accumulate into a single growing item each.
#[derive(Default)]
struct ClaudeStreamState {
    turn_id: String,
    agent_message: String,
    reasoning: String,
    tools: HashMap<String, ClaudeToolUse>,
}

impl ClaudeStreamState {
    fn reset_for_turn(&mut self, turn_id: &str) {
        self.turn_id = turn_id.to_owned();
        self.agent_message.clear();
        self.reasoning.clear();
        self.tools.clear();
    }

    fn agent_message_id(&self) -> String {
        format!("{}_msg", self.turn_id)
    }

    fn reasoning_id(&self) -> String {
        format!("{}_reasoning", self.turn_id)
    }
}

#[derive(Clone, Debug)]
struct ClaudeToolUse {
    kind: ClaudeToolKind,
    command: String,
    changes: Vec<(String, String)>,
    query: String,
    name: String,
    input: Value,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ClaudeToolKind {
    CommandExecution,
    FileChange,
    WebSearch,
    Other,
}

fn tool_name_key(name: &str) -> String {
    name.rsplit("__")
        .next()
        .unwrap_or(name)
        .to_ascii_lowercase()
}

fn extract_string_field(input: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| input.get(key).and_then(|v| v.as_str()))
        .map(ToOwned::to_owned)
}

fn classify_tool_use(name: &str, input: &Value) -> ClaudeToolUse {
    let key = tool_name_key(name);
    if key == "bash" {
        return ClaudeToolUse {
            kind: ClaudeToolKind::CommandExecution,
            command: extract_string_field(input, &["command", "cmd"])
                .unwrap_or_else(|| "bash".to_owned()),
            changes: Vec::new(),
            query: String::new(),
            name: name.to_owned(),
            input: input.clone(),
        };
    }
    if key == "web_search" || key == "websearch" {
        return ClaudeToolUse {
            kind: ClaudeToolKind::WebSearch,
            command: String::new(),
            changes: Vec::new(),
            query: extract_string_field(input, &["query", "q"]).unwrap_or_default(),
            name: name.to_owned(),
            input: input.clone(),
        };
    }
    if matches!(
        key.as_str(),
        "edit" | "write" | "edit_file" | "create_file" | "write_file" | "notebookedit"
    ) {
        let path = extract_string_field(input, &["path", "file_path", "filename"])
            .unwrap_or_default();
        let kind = if key == "create_file" || key == "write" {
            "add"
        } else {
            "update"
        };
        let changes = if path.is_empty() {
            Vec::new()
        } else {
            vec![(path, kind.to_owned())]
        };
        return ClaudeToolUse {
            kind: ClaudeToolKind::FileChange,
            command: String::new(),
            changes,
            query: String::new(),
            name: name.to_owned(),
            input: input.clone(),
        };
    }
    ClaudeToolUse {
        kind: ClaudeToolKind::Other,
        command: String::new(),
        changes: Vec::new(),
        query: String::new(),
        name: name.to_owned(),
        input: input.clone(),
    }
}

fn tool_item(id: &str, tool: &ClaudeToolUse, status: ToolCallStatus, result: Option<Value>) -> ThreadItem {
    match tool.kind {
        ClaudeToolKind::CommandExecution => ThreadItem::CommandExecution {
            id: id.to_owned(),
            command: tool.command.clone(),
            aggregated_output: result
                .as_ref()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned(),
            exit_code: None,
            status: match status {
                ToolCallStatus::InProgress => CommandExecutionStatus::InProgress,
                ToolCallStatus::Completed => CommandExecutionStatus::Completed,
                ToolCallStatus::Failed => CommandExecutionStatus::Failed,
            },
        },
        ClaudeToolKind::FileChange => ThreadItem::FileChange {
            id: id.to_owned(),
            changes: tool
                .changes
                .iter()
                .map(|(path, kind)| FileUpdateChange {
                    path: path.clone(),
                    kind: if kind == "add" {
                        PatchChangeKind::Add
                    } else {
                        PatchChangeKind::Update
                    },
                })
                .collect(),
            status: match status {
                ToolCallStatus::InProgress => PatchApplyStatus::InProgress,
                ToolCallStatus::Completed => PatchApplyStatus::Completed,
                ToolCallStatus::Failed => PatchApplyStatus::Failed,
            },
        },
        ClaudeToolKind::WebSearch => ThreadItem::WebSearch {
            id: id.to_owned(),
            query: tool.query.clone(),
        },
        ClaudeToolKind::Other => ThreadItem::ToolCall {
            id: id.to_owned(),
            server: String::new(),
            tool: tool.name.clone(),
            arguments: tool.input.clone(),
            result,
            error: None,
            status,
        },
    }
}

fn approval_command_text(tool_name: &str, input: &Value) -> String {
    if tool_name_key(tool_name) == "bash" {
        if let Some(command) = extract_string_field(input, &["command", "cmd"]) {
            return command;
        }
    }
    format!("{tool_name} {input}")
}

/// Normalize one stream-json line. This is the only place raw claude output
/// is interpreted.
fn parse_claude_stream_line(state: &mut ClaudeStreamState, line: &str) -> Vec<ThreadEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let payload: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };
    let type_name = payload
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut out = Vec::new();

    match type_name.as_str() {
        "system" => {
            let subtype = payload
                .get("subtype")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if subtype == "init" {
                out.push(ThreadEvent::ThreadStarted);
            }
            if subtype == "compact_boundary" {
                out.push(ThreadEvent::ContextCompacted);
            }
            out
        }
        "assistant" => {
            let content = payload
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default();
            for item in content {
                let item_type = item
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_ascii_lowercase();
                match item_type.as_str() {
                    "text" => {
                        let text = item.get("text").and_then(|v| v.as_str()).unwrap_or("");
                        if text.is_empty() {
                            continue;
                        }
                        let was_empty = state.agent_message.is_empty();
                        state.agent_message.push_str(text);
                        let event_item = ThreadItem::AgentMessage {
                            id: state.agent_message_id(),
                            text: state.agent_message.clone(),
                        };
                        out.push(if was_empty {
                            ThreadEvent::ItemStarted { item: event_item }
                        } else {
                            ThreadEvent::ItemUpdated { item: event_item }
                        });
                    }
                    "thinking" => {
                        let thinking = item
                            .get("thinking")
                            .or_else(|| item.get("text"))
                            .and_then(|v| v.as_str())
                            .unwrap_or("");
                        if thinking.is_empty() {
                            continue;
                        }
                        let was_empty = state.reasoning.is_empty();
                        state.reasoning.push_str(thinking);
                        let event_item = ThreadItem::Reasoning {
                            id: state.reasoning_id(),
                            text: state.reasoning.clone(),
                        };
                        out.push(if was_empty {
                            ThreadEvent::ItemStarted { item: event_item }
                        } else {
                            ThreadEvent::ItemUpdated { item: event_item }
                        });
                    }
                    "tool_use" => {
                        let id = item.get("id").and_then(|v| v.as_str()).unwrap_or("");
                        let name = item.get("name").and_then(|v| v.as_str()).unwrap_or("");
                        if id.is_empty() {
                            continue;
                        }
                        let input = item.get("input").cloned().unwrap_or(Value::Null);
                        let tool = classify_tool_use(name, &input);
                        out.push(ThreadEvent::ItemStarted {
                            item: tool_item(id, &tool, ToolCallStatus::InProgress, None),
                        });
                        state.tools.insert(id.to_owned(), tool);
                    }
                    _ => {}
                }
            }
            out
        }
        "user" => {
            let content = payload
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
                .cloned()
                .unwrap_or_default();
            for item in content {
                let item_type = item
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if item_type != "tool_result" {
                    continue;
                }
                let id = item
                    .get("tool_use_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let Some(tool) = state.tools.get(id) else {
                    continue;
                };
                let is_error = item
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let status = if is_error {
                    ToolCallStatus::Failed
                } else {
                    ToolCallStatus::Completed
                };
                let result = item.get("content").cloned();
                out.push(ThreadEvent::ItemCompleted {
                    item: tool_item(id, tool, status, result),
                });
            }
            out
        }
        "result" => {
            let usage = payload.get("usage").map(|usage| TokenUsage {
                input_tokens: usage
                    .get("input_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                cached_input_tokens: usage
                    .get("cache_read_input_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
                output_tokens: usage
                    .get("output_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
            });
            if let Some(usage) = usage.clone() {
                out.push(ThreadEvent::TokenUsageUpdated { usage });
            }
            let is_error = payload
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if is_error {
                let message = payload
                    .get("result")
                    .and_then(|v| v.as_str())
                    .unwrap_or("turn failed")
                    .to_owned();
                out.push(ThreadEvent::TurnError {
                    message,
                    will_retry: false,
                });
            } else {
                out.push(ThreadEvent::TurnCompleted { usage });
            }
            out
        }
        "control_request" => {
            let request_id = payload
                .get("request_id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_owned();
            let request = payload.get("request").cloned().unwrap_or(Value::Null);
            let subtype = request
                .get("subtype")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if subtype != "can_use_tool" || request_id.is_empty() {
                return Vec::new();
            }
            let tool_name = request
                .get("tool_name")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let input = request.get("input").cloned().unwrap_or(Value::Null);

            if tool_name_key(tool_name) == "askuserquestion" {
                let questions = input
                    .get("questions")
                    .and_then(|v| v.as_array())
                    .map(|questions| {
                        questions
                            .iter()
                            .map(|q| UserInputQuestion {
                                key: q
                                    .get("header")
                                    .or_else(|| q.get("question"))
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("question")
                                    .to_owned(),
                                prompt: q
                                    .get("question")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("")
                                    .to_owned(),
                                options: q
                                    .get("options")
                                    .and_then(|v| v.as_array())
                                    .map(|options| {
                                        options
                                            .iter()
                                            .filter_map(|o| {
                                                o.get("label")
                                                    .or(Some(o))
                                                    .and_then(|v| v.as_str())
                                                    .map(ToOwned::to_owned)
                                            })
                                            .collect()
                                    })
                                    .unwrap_or_default(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                out.push(ThreadEvent::UserInputRequested {
                    request_id,
                    questions,
                });
                return out;
            }

            out.push(ThreadEvent::ApprovalRequested {
                request_id,
                command: approval_command_text(tool_name, &input),
            });
            out
        }
        _ => Vec::new(),
    }
}

struct ClaudeThreadProcess {
    child: Arc<Mutex<Child>>,
    stdin: Mutex<BufWriter<ChildStdin>>,
    sink: Arc<Mutex<Option<EventSink>>>,
    state: Arc<Mutex<ClaudeStreamState>>,
}

impl ClaudeThreadProcess {
    fn spawn(request: &RunTurnRequest) -> anyhow::Result<Self> {
        let claude = engine_binary(EngineKind::Claude);
        let mut command = Command::new(&claude);
        command.current_dir(&request.workspace_root);
        command.args([
            "--print",
            "--output-format",
            "stream-json",
            "--input-format",
            "stream-json",
            "--verbose",
            "--include-partial-messages",
        ]);
        match request.access_mode {
            AccessMode::ReadOnly => {
                command.args(["--permission-mode", "plan"]);
            }
            AccessMode::Edits => {
                command.args(["--permission-mode", "default"]);
            }
            AccessMode::FullAccess => {
                command.args(["--permission-mode", "bypassPermissions"]);
            }
        }
        if let Some(model) = &request.model {
            command.arg("--model").arg(model);
        }
        if let Some(session_id) = &request.session_id {
            if request.continue_session {
                command.arg("--resume").arg(session_id);
            } else {
                command.arg("--session-id").arg(session_id);
            }
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    anyhow!(
                        "missing claude executable ({}): install Claude Code and ensure it is available on PATH",
                        claude.display()
                    )
                } else {
                    anyhow!(err).context("failed to spawn claude")
                }
            })?;

        let stdin = child.stdin.take().context("missing claude stdin")?;
        let stdout = child.stdout.take().context("missing claude stdout")?;
        if let Some(stderr) = child.stderr.take() {
            let _ = spawn_read_to_string(stderr);
        }

        let process = Self {
            child: Arc::new(Mutex::new(child)),
            stdin: Mutex::new(BufWriter::new(stdin)),
            sink: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(ClaudeStreamState::default())),
        };
        process.spawn_reader(stdout);
        Ok(process)
    }

    fn spawn_reader(&self, stdout: std::process::ChildStdout) {
        let sink = self.sink.clone();
        let state = self.state.clone();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                let events = {
                    let Ok(mut state) = state.lock() else { break };
                    parse_claude_stream_line(&mut state, &line)
                };
                if events.is_empty() {
                    continue;
                }
                let current = {
                    let Ok(guard) = sink.lock() else { break };
                    guard.clone()
                };
                if let Some(sink) = current {
                    for event in events {
                        sink(event);
                    }
                }
            }
            // Stdout closed: the process died or was released. Whatever turn
            // was outstanding will not complete on its own.
            let current = sink.lock().ok().and_then(|guard| guard.clone());
            if let Some(sink) = current {
                sink(ThreadEvent::TurnError {
                    message: "claude process exited".to_owned(),
                    will_retry: false,
                });
            }
        });
    }

    fn write_line(&self, value: &Value) -> anyhow::Result<()> {
        let mut stdin = self.stdin.lock().map_err(|_| anyhow!("stdin poisoned"))?;
        serde_json::to_writer(&mut *stdin, value).context("failed to encode message")?;
        stdin.write_all(b"\n").context("failed to write message")?;
        stdin.flush().context("failed to flush message")?;
        Ok(())
    }

    fn kill(&self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }
}

pub(super) struct ClaudeProcessManager {
    processes: Mutex<HashMap<(u64, String), Arc<ClaudeThreadProcess>>>,
    /// Control requests awaiting a user decision, keyed by request id. The
    /// decision has to find its way back to the process that asked.
    shared_pending: Arc<Mutex<HashMap<String, (u64, String)>>>,
    turn_counter: AtomicU64,
}

impl ClaudeProcessManager {
    pub(super) fn new() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            shared_pending: Arc::new(Mutex::new(HashMap::new())),
            turn_counter: AtomicU64::new(1),
        }
    }

    fn process_for(
        &self,
        request: &RunTurnRequest,
    ) -> anyhow::Result<Arc<ClaudeThreadProcess>> {
        let key = (request.workspace_id, request.thread_id.clone());
        let mut processes = self
            .processes
            .lock()
            .map_err(|_| anyhow!("claude process table poisoned"))?;
        if let Some(process) = processes.get(&key) {
            return Ok(process.clone());
        }
        let process = Arc::new(ClaudeThreadProcess::spawn(request)?);
        processes.insert(key, process.clone());
        Ok(process)
    }

    pub(super) fn start_turn(
        &self,
        request: &RunTurnRequest,
        cancel: Arc<AtomicBool>,
        on_event: EventSink,
    ) -> Result<SendOutcome, AdapterError> {
        let process = self
            .process_for(request)
            .map_err(|err| AdapterError::transport(format!("{err:#}")))?;

        let turn_id = format!(
            "claude_turn_{}",
            self.turn_counter.fetch_add(1, Ordering::SeqCst)
        );
        if !request.steering {
            let mut state = process
                .state
                .lock()
                .map_err(|_| AdapterError::transport("claude stream state poisoned"))?;
            state.reset_for_turn(&turn_id);
        }

        // Route this turn's events to the caller, registering control
        // requests so approval decisions can find their process again.
        let key = (request.workspace_id, request.thread_id.clone());
        let sink = self.wrap_sink(key, cancel, on_event);
        *process.sink.lock().map_err(|_| AdapterError::transport("claude sink poisoned"))? =
            Some(sink);

        let mut text = request.prompt.clone();
        if !request.attachment_paths.is_empty() {
            text.push_str("\n\nAttached files:");
            for path in &request.attachment_paths {
                text.push_str(&format!("\n{}", path.display()));
            }
        }
        let message = json!({
            "type": "user",
            "message": { "role": "user", "content": [{ "type": "text", "text": text }] },
        });
        process
            .write_line(&message)
            .map_err(|err| AdapterError::transport(format!("{err:#}")))?;

        Ok(SendOutcome {
            turn_id: Some(turn_id),
            error: None,
        })
    }

    fn wrap_sink(
        &self,
        key: (u64, String),
        cancel: Arc<AtomicBool>,
        on_event: EventSink,
    ) -> EventSink {
        let pending_map = self.shared_pending.clone();
        Arc::new(move |event: ThreadEvent| {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            match &event {
                ThreadEvent::ApprovalRequested { request_id, .. }
                | ThreadEvent::UserInputRequested { request_id, .. } => {
                    if let Ok(mut pending) = pending_map.lock() {
                        pending.insert(request_id.clone(), key.clone());
                    }
                }
                _ => {}
            }
            on_event(event);
        })
    }

    pub(super) fn respond_approval(
        &self,
        workspace_id: u64,
        request_id: &str,
        accept: bool,
    ) -> anyhow::Result<()> {
        let key = self
            .take_pending(request_id)
            .with_context(|| format!("unknown approval request {request_id}"))?;
        if key.0 != workspace_id {
            return Err(anyhow!("approval request {request_id} belongs to another workspace"));
        }
        let behavior = if accept { "allow" } else { "deny" };
        let response = json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": { "behavior": behavior },
            },
        });
        self.write_to(&key, &response)
    }

    pub(super) fn respond_user_input(
        &self,
        workspace_id: u64,
        request_id: &str,
        answers: HashMap<String, Vec<String>>,
    ) -> anyhow::Result<()> {
        let key = self
            .take_pending(request_id)
            .with_context(|| format!("unknown user-input request {request_id}"))?;
        if key.0 != workspace_id {
            return Err(anyhow!("user-input request {request_id} belongs to another workspace"));
        }
        let response = json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": {
                    "behavior": "allow",
                    "updatedInput": { "answers": answers },
                },
            },
        });
        self.write_to(&key, &response)
    }

    pub(super) fn interrupt(&self, workspace_id: u64, thread_id: &str) {
        let key = (workspace_id, thread_id.to_owned());
        let process = self
            .processes
            .lock()
            .ok()
            .and_then(|processes| processes.get(&key).cloned());
        if let Some(process) = process {
            let request = json!({
                "type": "control_request",
                "request_id": format!(
                    "int_{}",
                    self.turn_counter.fetch_add(1, Ordering::SeqCst)
                ),
                "request": { "subtype": "interrupt" },
            });
            let _ = process.write_line(&request);
        }
    }

    pub(super) fn release(&self, workspace_id: u64, thread_id: &str) {
        let key = (workspace_id, thread_id.to_owned());
        let process = self
            .processes
            .lock()
            .ok()
            .and_then(|mut processes| processes.remove(&key));
        if let Some(process) = process {
            process.kill();
        }
    }

    fn take_pending(&self, request_id: &str) -> Option<(u64, String)> {
        self.shared_pending.lock().ok()?.remove(request_id)
    }

    fn write_to(&self, key: &(u64, String), value: &Value) -> anyhow::Result<()> {
        let process = self
            .processes
            .lock()
            .map_err(|_| anyhow!("claude process table poisoned"))?
            .get(key)
            .cloned()
            .with_context(|| format!("no running claude process for thread {}", key.1))?;
        process.write_line(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(state: &mut ClaudeStreamState, lines: &[&str]) -> Vec<ThreadEvent> {
        lines
            .iter()
            .flat_map(|line| parse_claude_stream_line(state, line))
            .collect()
    }

    #[test]
    fn text_deltas_accumulate_into_one_growing_item() {
        let mut state = ClaudeStreamState::default();
        state.reset_for_turn("claude_turn_1");
        let events = parse_all(
            &mut state,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hel"}]}}"#,
                r#"{"type":"assistant","message":{"content":[{"type":"text","text":"lo"}]}}"#,
            ],
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            ThreadEvent::ItemStarted { item: ThreadItem::AgentMessage { text, .. } } if text == "Hel"
        ));
        assert!(matches!(
            &events[1],
            ThreadEvent::ItemUpdated { item: ThreadItem::AgentMessage { text, .. } } if text == "Hello"
        ));
    }

    #[test]
    fn bash_tool_use_normalizes_to_command_execution() {
        let mut state = ClaudeStreamState::default();
        state.reset_for_turn("claude_turn_1");
        let events = parse_all(
            &mut state,
            &[
                r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_1","name":"Bash","input":{"command":"cargo check"}}]}}"#,
                r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu_1","content":"ok","is_error":false}]}}"#,
            ],
        );
        assert!(matches!(
            &events[0],
            ThreadEvent::ItemStarted {
                item: ThreadItem::CommandExecution {
                    status: CommandExecutionStatus::InProgress,
                    ..
                }
            }
        ));
        assert!(matches!(
            &events[1],
            ThreadEvent::ItemCompleted {
                item: ThreadItem::CommandExecution {
                    status: CommandExecutionStatus::Completed,
                    ..
                }
            }
        ));
    }

    #[test]
    fn result_line_completes_the_turn_with_usage() {
        let mut state = ClaudeStreamState::default();
        state.reset_for_turn("claude_turn_1");
        let events = parse_all(
            &mut state,
            &[
                r#"{"type":"result","subtype":"success","is_error":false,"usage":{"input_tokens":10,"cache_read_input_tokens":3,"output_tokens":4}}"#,
            ],
        );
        assert!(matches!(events[0], ThreadEvent::TokenUsageUpdated { .. }));
        assert!(matches!(
            &events[1],
            ThreadEvent::TurnCompleted { usage: Some(usage) }
                if usage.input_tokens == 10 && usage.cached_input_tokens == 3
        ));
    }

    #[test]
    fn error_result_normalizes_to_turn_error() {
        let mut state = ClaudeStreamState::default();
        state.reset_for_turn("claude_turn_1");
        let events = parse_all(
            &mut state,
            &[r#"{"type":"result","subtype":"error_during_execution","is_error":true,"result":"budget exceeded"}"#],
        );
        assert!(matches!(
            &events[0],
            ThreadEvent::TurnError { message, will_retry: false } if message == "budget exceeded"
        ));
    }

    #[test]
    fn can_use_tool_control_request_surfaces_an_approval() {
        let mut state = ClaudeStreamState::default();
        state.reset_for_turn("claude_turn_1");
        let events = parse_claude_stream_line(
            &mut state,
            r#"{"type":"control_request","request_id":"req_7","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"rm -rf /tmp/x"}}}"#,
        );
        assert!(matches!(
            &events[0],
            ThreadEvent::ApprovalRequested { request_id, command }
                if request_id == "req_7" && command == "rm -rf /tmp/x"
        ));
    }

    #[test]
    fn ask_user_question_surfaces_a_user_input_request() {
        let mut state = ClaudeStreamState::default();
        state.reset_for_turn("claude_turn_1");
        let events = parse_claude_stream_line(
            &mut state,
            r#"{"type":"control_request","request_id":"req_8","request":{"subtype":"can_use_tool","tool_name":"AskUserQuestion","input":{"questions":[{"header":"scope","question":"Which module?","options":[{"label":"parser"},{"label":"lexer"}]}]}}}"#,
        );
        assert!(matches!(
            &events[0],
            ThreadEvent::UserInputRequested { request_id, questions }
                if request_id == "req_8" && questions.len() == 1 && questions[0].options.len() == 2
        ));
    }

    #[test]
    fn compact_boundary_normalizes_to_context_compacted() {
        let mut state = ClaudeStreamState::default();
        let events = parse_claude_stream_line(
            &mut state,
            r#"{"type":"system","subtype":"compact_boundary","compact_metadata":{"trigger":"auto"}}"#,
        );
        assert!(matches!(events[0], ThreadEvent::ContextCompacted));
    }
}
