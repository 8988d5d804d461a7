use crate::{
    AttachmentRef, EngineKind, LspQueryKind, ReviewTarget, TurnRunConfig, WorkspaceId,
};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub enum Effect {
    LoadPersistedState,
    PersistWorkspace {
        workspace_id: WorkspaceId,
        name: String,
        root_path: PathBuf,
    },
    PersistSelectedEngine {
        engine: EngineKind,
    },

    /// Dispatch a turn to the engine owning `thread_id`. `seq` is the
    /// single-flight token the reducer compares on every resulting event.
    SendToEngine {
        workspace_id: WorkspaceId,
        thread_id: String,
        engine: EngineKind,
        seq: u64,
        text: String,
        attachments: Vec<AttachmentRef>,
        run_config: TurnRunConfig,
        session_id: Option<String>,
        continue_session: bool,
        /// Deliver into the running turn instead of starting a new one.
        steering: bool,
        review: Option<ReviewTarget>,
    },
    InterruptEngine {
        workspace_id: WorkspaceId,
        engine: EngineKind,
        thread_id: Option<String>,
        turn_id: Option<String>,
    },

    RespondApproval {
        workspace_id: WorkspaceId,
        engine: EngineKind,
        request_id: String,
        accept: bool,
    },
    RespondUserInput {
        workspace_id: WorkspaceId,
        engine: EngineKind,
        request_id: String,
        answers: HashMap<String, Vec<String>>,
    },

    PersistThreadName {
        workspace_id: WorkspaceId,
        thread_id: String,
        name: Option<String>,
    },
    PersistThreadPinned {
        workspace_id: WorkspaceId,
        thread_id: String,
        pinned_at: Option<u64>,
    },
    PersistThreadActivity {
        workspace_id: WorkspaceId,
        thread_id: String,
        at_unix_ms: u64,
    },
    PersistAllowlist {
        workspace_id: WorkspaceId,
        allowlist: Vec<Vec<String>>,
    },
    PersistSpecRoot {
        workspace_id: WorkspaceId,
        spec_root: Option<String>,
    },
    /// Rewrite every persisted row keyed by the old thread id. Propagated
    /// as a rename, never re-derived.
    RenamePersistedThread {
        workspace_id: WorkspaceId,
        old_id: String,
        new_id: String,
    },
    /// Best-effort title propagation; not required for correctness.
    UpdateThreadTitle {
        workspace_id: WorkspaceId,
        thread_id: String,
        title: String,
    },

    RefreshThreads {
        workspace_id: WorkspaceId,
    },
    QueryEngineStatus {
        workspace_id: WorkspaceId,
    },
    QueryMcpServers {
        workspace_id: WorkspaceId,
        engine: EngineKind,
    },
    QueryLsp {
        workspace_id: WorkspaceId,
        kind: LspQueryKind,
        argument: Option<String>,
    },
    ListImportableSessions {
        workspace_id: WorkspaceId,
    },
}
