use crate::{
    AliasRegistry, ApprovalGate, EngineKind, ReviewPicker, UserInputQuestion, default_engine_kind,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

mod thread;
pub use thread::{QueuedPrompt, Thread, ThreadEntry};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(pub(crate) u64);

impl WorkspaceId {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    #[default]
    Idle,
    Processing,
    Reviewing,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
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

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Text,
    File,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub kind: AttachmentKind,
    pub name: String,
    pub extension: String,
    pub mime: Option<String>,
    pub byte_len: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TurnRunConfig {
    pub engine: EngineKind,
    pub model_id: Option<String>,
    pub effort: crate::ThinkingEffort,
    pub access_mode: crate::AccessMode,
}

/// A risky action proposed by a backend, waiting on a user decision.
/// Auto-accepted proposals never become one of these.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApprovalRequest {
    pub workspace_id: WorkspaceId,
    pub thread_id: String,
    pub request_id: String,
    pub command: String,
    pub tokens: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserInputRequest {
    pub workspace_id: WorkspaceId,
    pub thread_id: String,
    pub request_id: String,
    pub questions: Vec<UserInputQuestion>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImportableSession {
    pub engine: EngineKind,
    pub session_id: String,
    pub title: String,
    pub updated_at_unix_seconds: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineStatusReport {
    pub engine: EngineKind,
    pub ok: bool,
    pub version: Option<String>,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct McpServerInfo {
    pub name: String,
    pub transport: String,
    pub connected: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LspSymbol {
    pub name: String,
    pub kind: String,
    pub path: String,
    pub line: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LspDiagnostic {
    pub path: String,
    pub line: u32,
    pub severity: String,
    pub message: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LspResults {
    Symbols(Vec<LspSymbol>),
    Diagnostics(Vec<LspDiagnostic>),
}

#[derive(Clone, Debug)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub root_path: PathBuf,
    pub threads: HashMap<String, Thread>,
    pub active_thread_id: Option<String>,
    pub approvals: VecDeque<ApprovalRequest>,
    pub user_inputs: VecDeque<UserInputRequest>,
    pub review_spec_root: Option<String>,
    pub review_picker: Option<ReviewPicker>,
    pub import_candidates: Vec<ImportableSession>,
    pub threads_refresh_in_flight: bool,
}

impl Workspace {
    pub fn active_thread(&self) -> Option<&Thread> {
        self.active_thread_id
            .as_deref()
            .and_then(|id| self.threads.get(id))
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PersistedWorkspace {
    pub id: u64,
    pub name: String,
    pub root_path: PathBuf,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PersistedState {
    pub workspaces: Vec<PersistedWorkspace>,
    pub selected_engine: Option<String>,
    pub custom_names: HashMap<(u64, String), String>,
    pub pinned_at: HashMap<(u64, String), u64>,
    pub last_activity: HashMap<(u64, String), u64>,
    pub allowlists: HashMap<u64, Vec<Vec<String>>>,
    pub spec_roots: HashMap<u64, String>,
}

/// The authoritative store for every thread, turn, approval, and user-input
/// record. All mutation flows through `AppState::apply`.
#[derive(Clone, Debug)]
pub struct AppState {
    pub(crate) next_workspace_id: u64,
    pub workspaces: Vec<Workspace>,
    pub selected_engine: EngineKind,
    pub approval_gate: ApprovalGate,
    pub aliases: AliasRegistry,
    /// Threads the user interrupted before the backend reported a turn id;
    /// the interrupt fires as soon as the id becomes known.
    pub pending_interrupts: HashSet<(WorkspaceId, String)>,
    pub custom_names: HashMap<(WorkspaceId, String), String>,
    pub pinned_at: HashMap<(WorkspaceId, String), u64>,
    pub last_activity: HashMap<(WorkspaceId, String), u64>,
    pub last_error: Option<String>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            next_workspace_id: 1,
            workspaces: Vec::new(),
            selected_engine: default_engine_kind(),
            approval_gate: ApprovalGate::new(),
            aliases: AliasRegistry::new(),
            pending_interrupts: HashSet::new(),
            custom_names: HashMap::new(),
            pinned_at: HashMap::new(),
            last_activity: HashMap::new(),
            last_error: None,
        }
    }

    pub fn workspace(&self, workspace_id: WorkspaceId) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.id == workspace_id)
    }

    pub fn workspace_mut(&mut self, workspace_id: WorkspaceId) -> Option<&mut Workspace> {
        self.workspaces.iter_mut().find(|w| w.id == workspace_id)
    }

    pub fn thread(&self, workspace_id: WorkspaceId, thread_id: &str) -> Option<&Thread> {
        self.workspace(workspace_id)
            .and_then(|w| w.threads.get(thread_id))
    }

    pub fn thread_mut(&mut self, workspace_id: WorkspaceId, thread_id: &str) -> Option<&mut Thread> {
        self.workspace_mut(workspace_id)
            .and_then(|w| w.threads.get_mut(thread_id))
    }

    pub fn custom_name(&self, workspace_id: WorkspaceId, thread_id: &str) -> Option<&str> {
        self.custom_names
            .get(&(workspace_id, thread_id.to_owned()))
            .map(String::as_str)
    }

    pub fn is_pinned(&self, workspace_id: WorkspaceId, thread_id: &str) -> bool {
        self.pinned_at
            .contains_key(&(workspace_id, thread_id.to_owned()))
    }

    pub(crate) fn insert_workspace(&mut self, name: String, root_path: PathBuf) -> WorkspaceId {
        let id = WorkspaceId(self.next_workspace_id);
        self.next_workspace_id += 1;
        self.workspaces.push(Workspace {
            id,
            name,
            root_path,
            threads: HashMap::new(),
            active_thread_id: None,
            approvals: VecDeque::new(),
            user_inputs: VecDeque::new(),
            review_spec_root: None,
            review_picker: None,
            import_candidates: Vec::new(),
            threads_refresh_in_flight: false,
        });
        id
    }

    pub(crate) fn restore_workspace(&mut self, persisted: &PersistedWorkspace) {
        if self.workspaces.iter().any(|w| w.id.0 == persisted.id) {
            return;
        }
        self.next_workspace_id = self.next_workspace_id.max(persisted.id + 1);
        self.workspaces.push(Workspace {
            id: WorkspaceId(persisted.id),
            name: persisted.name.clone(),
            root_path: persisted.root_path.clone(),
            threads: HashMap::new(),
            active_thread_id: None,
            approvals: VecDeque::new(),
            user_inputs: VecDeque::new(),
            review_spec_root: None,
            review_picker: None,
            import_candidates: Vec::new(),
            threads_refresh_in_flight: false,
        });
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
