use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Claude,
    Codex,
    Opencode,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingEffort {
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    #[default]
    Edits,
    FullAccess,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    #[default]
    Idle,
    Processing,
    Reviewing,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    None,
    Starting,
    Active,
    Completed,
    Errored,
    Interrupted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Text,
    File,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub kind: AttachmentKind,
    pub name: String,
    pub extension: String,
    pub mime: Option<String>,
    pub byte_len: u64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TokenUsageSnapshot {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSnapshot {
    pub rev: u64,
    pub selected_engine: EngineKind,
    pub workspaces: Vec<WorkspaceSnapshot>,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub id: WorkspaceId,
    pub name: String,
    pub root_path: String,
    pub active_thread_id: Option<String>,
    pub threads: Vec<ThreadMeta>,
    #[serde(default)]
    pub approvals: Vec<ApprovalRequestSnapshot>,
    #[serde(default)]
    pub user_inputs: Vec<UserInputRequestSnapshot>,
    #[serde(default)]
    pub review_spec_root: Option<String>,
    #[serde(default)]
    pub review_picker: Option<ReviewPickerSnapshot>,
    #[serde(default)]
    pub import_candidates: Vec<ImportableSessionSnapshot>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadMeta {
    pub thread_id: String,
    pub engine: EngineKind,
    pub title: String,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub pinned_at_unix_ms: Option<u64>,
    pub status: ThreadStatus,
    pub turn: TurnState,
    pub last_activity_at_unix_ms: u64,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub rev: u64,
    pub workspace_id: WorkspaceId,
    pub thread_id: String,
    pub engine: EngineKind,
    pub status: ThreadStatus,
    pub turn: TurnState,
    #[serde(default)]
    pub active_turn_id: Option<String>,
    pub entries: Vec<ThreadEntrySnapshot>,
    #[serde(default)]
    pub usage: Option<TokenUsageSnapshot>,
    #[serde(default)]
    pub queued_prompts: Vec<QueuedPromptSnapshot>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    pub model_id: Option<String>,
    pub effort: ThinkingEffort,
    pub access_mode: AccessMode,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedPromptSnapshot {
    pub id: u64,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadEntrySnapshot {
    UserMessage {
        text: String,
        #[serde(default)]
        attachments: Vec<AttachmentRef>,
    },
    AgentItem {
        item: AgentItemSnapshot,
    },
    TurnUsage {
        usage: Option<TokenUsageSnapshot>,
    },
    SessionStopped,
    TurnError {
        message: String,
    },
    ContextCompacted,
    SystemNote {
        text: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentItemSnapshot {
    pub id: String,
    pub kind: AgentItemKind,
    pub payload: serde_json::Value,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentItemKind {
    AgentMessage,
    Reasoning,
    CommandExecution,
    FileChange,
    ToolCall,
    WebSearch,
    Plan,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequestSnapshot {
    pub thread_id: String,
    pub request_id: String,
    pub command: String,
    pub tokens: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserInputQuestionSnapshot {
    pub key: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserInputRequestSnapshot {
    pub thread_id: String,
    pub request_id: String,
    pub questions: Vec<UserInputQuestionSnapshot>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewPickerSnapshot {
    pub thread_id: Option<String>,
    pub options: Vec<String>,
    pub highlighted: Option<usize>,
    #[serde(default)]
    pub argument_input: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportableSessionSnapshot {
    pub engine: EngineKind,
    pub session_id: String,
    pub title: String,
    pub updated_at_unix_seconds: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickerKey {
    Up,
    Down,
    Enter,
    Escape,
    Backspace,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientMessage {
    Hello {
        protocol_version: u32,
        last_seen_rev: Option<u64>,
    },
    Action {
        request_id: String,
        action: Box<ClientAction>,
    },
    Ping,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerMessage {
    Hello {
        protocol_version: u32,
        current_rev: u64,
    },
    Ack {
        request_id: String,
        rev: u64,
    },
    Event {
        rev: u64,
        event: Box<ServerEvent>,
    },
    Error {
        request_id: Option<String>,
        message: String,
    },
    Pong,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientAction {
    RegisterWorkspace {
        name: String,
        root_path: String,
    },
    SelectEngine {
        engine: EngineKind,
    },
    ActivateThread {
        workspace_id: WorkspaceId,
        thread_id: String,
    },
    StartNewThread {
        workspace_id: WorkspaceId,
    },
    SetThreadName {
        workspace_id: WorkspaceId,
        thread_id: String,
        name: Option<String>,
    },
    SetThreadPinned {
        workspace_id: WorkspaceId,
        thread_id: String,
        pinned: bool,
    },
    SubmitComposer {
        workspace_id: WorkspaceId,
        #[serde(default)]
        thread_id: Option<String>,
        text: String,
        #[serde(default)]
        attachments: Vec<AttachmentRef>,
    },
    InterruptThread {
        workspace_id: WorkspaceId,
        thread_id: String,
    },
    DecideApproval {
        workspace_id: WorkspaceId,
        request_id: String,
        accept: bool,
        #[serde(default)]
        remember_prefix: bool,
    },
    AnswerUserInput {
        workspace_id: WorkspaceId,
        request_id: String,
        answers: HashMap<String, Vec<String>>,
    },
    ReviewPickerKey {
        workspace_id: WorkspaceId,
        key: PickerKey,
    },
    ReviewPickerInput {
        workspace_id: WorkspaceId,
        text: String,
    },
    ImportSession {
        workspace_id: WorkspaceId,
        engine: EngineKind,
        session_id: String,
    },
    ClearError,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    AppChanged {
        rev: u64,
        snapshot: Box<AppSnapshot>,
    },
    ThreadChanged {
        snapshot: Box<ThreadSnapshot>,
    },
    ApprovalRequested {
        workspace_id: WorkspaceId,
        request: ApprovalRequestSnapshot,
    },
    UserInputRequested {
        workspace_id: WorkspaceId,
        request: UserInputRequestSnapshot,
    },
    Toast {
        message: String,
    },
}
