#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandExecutionStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchChangeKind {
    Add,
    Delete,
    Update,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FileUpdateChange {
    pub path: String,
    pub kind: PatchChangeKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchApplyStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlanStep {
    pub text: String,
    pub completed: bool,
}

/// One item of a thread's transcript as normalized from a backend stream.
/// Every adapter maps its raw payloads into these shapes in exactly one
/// place; nothing downstream inspects raw engine JSON.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ThreadItem {
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
        status: CommandExecutionStatus,
    },
    #[serde(rename = "file_change")]
    FileChange {
        id: String,
        #[serde(default)]
        changes: Vec<FileUpdateChange>,
        status: PatchApplyStatus,
    },
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        #[serde(default)]
        server: String,
        #[serde(default)]
        tool: String,
        #[serde(default)]
        arguments: serde_json::Value,
        result: Option<serde_json::Value>,
        error: Option<ErrorMessage>,
        status: ToolCallStatus,
    },
    #[serde(rename = "web_search")]
    WebSearch {
        id: String,
        #[serde(default)]
        query: String,
    },
    #[serde(rename = "plan")]
    Plan { id: String, steps: Vec<PlanStep> },
    #[serde(rename = "error")]
    Error { id: String, message: String },
}

impl ThreadItem {
    pub fn id(&self) -> &str {
        match self {
            ThreadItem::AgentMessage { id, .. } => id,
            ThreadItem::Reasoning { id, .. } => id,
            ThreadItem::CommandExecution { id, .. } => id,
            ThreadItem::FileChange { id, .. } => id,
            ThreadItem::ToolCall { id, .. } => id,
            ThreadItem::WebSearch { id, .. } => id,
            ThreadItem::Plan { id, .. } => id,
            ThreadItem::Error { id, .. } => id,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        match self {
            ThreadItem::CommandExecution { status, .. } => {
                *status == CommandExecutionStatus::InProgress
            }
            ThreadItem::FileChange { status, .. } => *status == PatchApplyStatus::InProgress,
            ThreadItem::ToolCall { status, .. } => *status == ToolCallStatus::InProgress,
            _ => false,
        }
    }

    /// Force a still-pending item into a terminal status. Applied when the
    /// owning turn reaches a terminal state with items left in progress.
    pub fn finalize(&mut self, success: bool) {
        match self {
            ThreadItem::CommandExecution { status, .. } => {
                if *status == CommandExecutionStatus::InProgress {
                    *status = if success {
                        CommandExecutionStatus::Completed
                    } else {
                        CommandExecutionStatus::Failed
                    };
                }
            }
            ThreadItem::FileChange { status, .. } => {
                if *status == PatchApplyStatus::InProgress {
                    *status = if success {
                        PatchApplyStatus::Completed
                    } else {
                        PatchApplyStatus::Failed
                    };
                }
            }
            ThreadItem::ToolCall { status, .. } => {
                if *status == ToolCallStatus::InProgress {
                    *status = if success {
                        ToolCallStatus::Completed
                    } else {
                        ToolCallStatus::Failed
                    };
                }
            }
            _ => {}
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UserInputQuestion {
    pub key: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Lifecycle events streamed by a backend adapter, already normalized.
/// Per-thread ordering follows the backend's emit order; the core never
/// reorders or timestamp-deduplicates these.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ThreadEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted,
    #[serde(rename = "session.assigned")]
    SessionIdAssigned {
        session_id: String,
        #[serde(default)]
        engine_hint: Option<String>,
    },
    #[serde(rename = "turn.started")]
    TurnStarted { turn_id: String },
    #[serde(rename = "turn.plan_updated")]
    TurnPlanUpdated { steps: Vec<PlanStep> },
    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    #[serde(rename = "turn.failed")]
    TurnError {
        message: String,
        #[serde(default)]
        will_retry: bool,
    },
    #[serde(rename = "usage.updated")]
    TokenUsageUpdated { usage: TokenUsage },
    #[serde(rename = "context.compacted")]
    ContextCompacted,
    #[serde(rename = "approval.requested")]
    ApprovalRequested {
        request_id: String,
        command: String,
    },
    #[serde(rename = "user_input.requested")]
    UserInputRequested {
        request_id: String,
        questions: Vec<UserInputQuestion>,
    },
    #[serde(rename = "item.started")]
    ItemStarted { item: ThreadItem },
    #[serde(rename = "item.updated")]
    ItemUpdated { item: ThreadItem },
    #[serde(rename = "item.completed")]
    ItemCompleted { item: ThreadItem },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_event_parsing_accepts_partial_command_execution_items() {
        let payload = r#"{"type":"item.started","item":{"type":"command_execution","id":"cmd_1","command":"echo hi","status":"in_progress"}}"#;
        let parsed = serde_json::from_str::<ThreadEvent>(payload)
            .expect("partial command_execution item should deserialize");
        assert!(matches!(
            parsed,
            ThreadEvent::ItemStarted {
                item: ThreadItem::CommandExecution { .. }
            }
        ));
    }

    #[test]
    fn thread_event_parsing_accepts_session_assignment_without_hint() {
        let payload = r#"{"type":"session.assigned","session_id":"ses_1"}"#;
        let parsed = serde_json::from_str::<ThreadEvent>(payload).expect("should deserialize");
        assert!(matches!(
            parsed,
            ThreadEvent::SessionIdAssigned { session_id, engine_hint: None } if session_id == "ses_1"
        ));
    }

    #[test]
    fn finalize_leaves_terminal_items_untouched() {
        let mut item = ThreadItem::CommandExecution {
            id: "cmd_1".to_owned(),
            command: "true".to_owned(),
            aggregated_output: String::new(),
            exit_code: Some(0),
            status: CommandExecutionStatus::Completed,
        };
        item.finalize(false);
        assert!(matches!(
            item,
            ThreadItem::CommandExecution {
                status: CommandExecutionStatus::Completed,
                ..
            }
        ));
    }
}
