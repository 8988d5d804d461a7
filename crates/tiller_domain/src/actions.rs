use crate::{
    AttachmentRef, EngineKind, EngineStatusReport, ImportableSession, LspResults, McpServerInfo,
    PersistedState, PickerKey, ThreadEvent, WorkspaceId,
};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub enum Action {
    AppStarted,
    PersistedStateLoaded {
        persisted: Box<PersistedState>,
    },
    PersistedStateLoadFailed {
        message: String,
    },

    RegisterWorkspace {
        name: String,
        root_path: PathBuf,
    },
    EngineSelected {
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

    /// A composer submission: either a slash command or a plain message.
    ComposerSubmitted {
        workspace_id: WorkspaceId,
        thread_id: Option<String>,
        text: String,
        attachments: Vec<AttachmentRef>,
    },
    InterruptThread {
        workspace_id: WorkspaceId,
        thread_id: String,
    },

    /// Synchronous outcome of a dispatched send: the adapter's immediate
    /// `{turnId?, error?}` reply.
    SendAcknowledged {
        workspace_id: WorkspaceId,
        thread_id: String,
        seq: u64,
        turn_id: Option<String>,
        error: Option<String>,
    },
    /// The adapter call itself failed (process or transport).
    SendFailed {
        workspace_id: WorkspaceId,
        thread_id: String,
        seq: u64,
        message: String,
    },
    ThreadEventReceived {
        workspace_id: WorkspaceId,
        thread_id: String,
        seq: u64,
        event: ThreadEvent,
    },

    ApprovalDecided {
        workspace_id: WorkspaceId,
        request_id: String,
        accept: bool,
        remember_prefix: bool,
    },
    UserInputAnswered {
        workspace_id: WorkspaceId,
        request_id: String,
        answers: HashMap<String, Vec<String>>,
    },

    ReviewPickerKey {
        workspace_id: WorkspaceId,
        key: PickerKey,
    },

    ImportSessionsLoaded {
        workspace_id: WorkspaceId,
        sessions: Vec<ImportableSession>,
    },
    ImportSessionsLoadFailed {
        workspace_id: WorkspaceId,
        message: String,
    },
    ImportSession {
        workspace_id: WorkspaceId,
        engine: EngineKind,
        session_id: String,
    },

    ThreadsRefreshFinished {
        workspace_id: WorkspaceId,
        sessions: Vec<ImportableSession>,
        error: Option<String>,
    },

    EngineStatusLoaded {
        workspace_id: WorkspaceId,
        reports: Vec<EngineStatusReport>,
    },
    McpServersLoaded {
        workspace_id: WorkspaceId,
        engine: EngineKind,
        servers: Vec<McpServerInfo>,
    },
    LspResultsLoaded {
        workspace_id: WorkspaceId,
        results: LspResults,
    },
    QueryFailed {
        workspace_id: WorkspaceId,
        message: String,
    },

    ClearError,
}
