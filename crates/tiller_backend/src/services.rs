use crate::sqlite_store::SqliteStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tiller_domain::{
    AccessMode, AttachmentRef, EngineKind, EngineStatusReport, ImportableSession, LspQueryKind,
    LspResults, McpServerInfo, PersistedState, ReviewTarget, ThreadEvent, paths,
};

mod attachments;
mod claude_cli;
mod cli_check;
mod codex_cli;
mod opencode_cli;
mod proc_util;

use claude_cli::ClaudeProcessManager;

/// One dispatched turn, as handed to a backend adapter.
#[derive(Clone, Debug)]
pub struct RunTurnRequest {
    pub workspace_id: u64,
    pub workspace_root: PathBuf,
    pub thread_id: String,
    pub engine: EngineKind,
    pub session_id: Option<String>,
    pub continue_session: bool,
    pub steering: bool,
    pub prompt: String,
    pub attachment_paths: Vec<PathBuf>,
    pub model: Option<String>,
    pub effort: Option<String>,
    pub access_mode: AccessMode,
    pub review: Option<ReviewTarget>,
}

/// The adapter's immediate reply to a send: a synchronously-known turn id,
/// an explicit error payload, or neither when the engine defers to a
/// streamed `turn.started` event.
#[derive(Clone, Debug, Default)]
pub struct SendOutcome {
    pub turn_id: Option<String>,
    pub error: Option<String>,
}

pub type EventSink = Arc<dyn Fn(ThreadEvent) + Send + Sync>;

pub trait WorkspaceAgentService: Send + Sync {
    fn load_persisted_state(&self) -> Result<PersistedState, String>;

    fn persist_workspace(&self, workspace_id: u64, name: String, root_path: PathBuf)
    -> Result<(), String>;

    fn persist_selected_engine(&self, engine: EngineKind) -> Result<(), String>;

    fn persist_thread_name(
        &self,
        workspace_id: u64,
        thread_id: String,
        name: Option<String>,
    ) -> Result<(), String>;

    fn persist_thread_pinned(
        &self,
        workspace_id: u64,
        thread_id: String,
        pinned_at_ms: Option<u64>,
    ) -> Result<(), String>;

    fn persist_thread_activity(
        &self,
        workspace_id: u64,
        thread_id: String,
        at_unix_ms: u64,
    ) -> Result<(), String>;

    fn persist_allowlist(
        &self,
        workspace_id: u64,
        allowlist: Vec<Vec<String>>,
    ) -> Result<(), String>;

    fn persist_spec_root(&self, workspace_id: u64, spec_root: Option<String>)
    -> Result<(), String>;

    /// Rewrite every row keyed by `old_id` to `new_id` in one transaction.
    fn rename_thread(&self, workspace_id: u64, old_id: String, new_id: String)
    -> Result<(), String>;

    fn update_thread_title(
        &self,
        workspace_id: u64,
        thread_id: String,
        title: String,
    ) -> Result<(), String>;

    /// Start a turn. Returns the adapter's synchronous `{turnId?, error?}`
    /// reply; lifecycle events stream through `on_event` until the turn
    /// reaches a terminal state. A flipped `cancel` flag stops delivery.
    fn start_turn(
        &self,
        request: RunTurnRequest,
        cancel: Arc<AtomicBool>,
        on_event: EventSink,
    ) -> Result<SendOutcome, String>;

    /// Engine-specific interrupt delivery beyond the cancel flag. Idempotent:
    /// interrupting a turn that is not running is not an error.
    fn interrupt(
        &self,
        _engine: EngineKind,
        _workspace_id: u64,
        _thread_id: Option<&str>,
        _turn_id: Option<&str>,
    ) -> Result<(), String> {
        Ok(())
    }

    fn respond_approval(
        &self,
        _engine: EngineKind,
        _workspace_id: u64,
        _request_id: &str,
        _accept: bool,
    ) -> Result<(), String> {
        Err("unimplemented".to_owned())
    }

    fn respond_user_input(
        &self,
        _engine: EngineKind,
        _workspace_id: u64,
        _request_id: &str,
        _answers: HashMap<String, Vec<String>>,
    ) -> Result<(), String> {
        Err("unimplemented".to_owned())
    }

    fn engine_status(&self) -> Result<Vec<EngineStatusReport>, String>;

    fn mcp_servers(&self, _engine: EngineKind) -> Result<Vec<McpServerInfo>, String> {
        Err("unimplemented".to_owned())
    }

    fn lsp_query(
        &self,
        _workspace_root: PathBuf,
        _kind: LspQueryKind,
        _argument: Option<String>,
    ) -> Result<LspResults, String> {
        Err("unsupported by the active engine".to_owned())
    }

    fn list_sessions(&self, workspace_id: u64) -> Result<Vec<ImportableSession>, String>;

    fn store_attachment(
        &self,
        bytes: Vec<u8>,
        name: String,
        extension: String,
    ) -> Result<AttachmentRef, String>;

    fn attachment_path(&self, attachment_id: &str) -> Result<PathBuf, String>;

    /// Drop any persistent engine process held for the thread. Called when a
    /// thread is renamed away or its workspace goes away.
    fn release_thread(&self, _workspace_id: u64, _thread_id: &str) {}
}

pub struct CliAgentService {
    data_root: PathBuf,
    store: SqliteStore,
    claude: ClaudeProcessManager,
}

impl CliAgentService {
    pub fn new(data_root: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&data_root)?;
        let store = SqliteStore::open(paths::sqlite_path(&data_root))?;
        Ok(Self {
            data_root,
            store,
            claude: ClaudeProcessManager::new(),
        })
    }

    fn err_string<T>(result: anyhow::Result<T>) -> Result<T, String> {
        result.map_err(|err| format!("{err:#}"))
    }
}

impl WorkspaceAgentService for CliAgentService {
    fn load_persisted_state(&self) -> Result<PersistedState, String> {
        Self::err_string(self.store.load_persisted_state())
    }

    fn persist_workspace(
        &self,
        workspace_id: u64,
        name: String,
        root_path: PathBuf,
    ) -> Result<(), String> {
        Self::err_string(self.store.persist_workspace(workspace_id, &name, &root_path))
    }

    fn persist_selected_engine(&self, engine: EngineKind) -> Result<(), String> {
        Self::err_string(self.store.persist_selected_engine(engine.as_str()))
    }

    fn persist_thread_name(
        &self,
        workspace_id: u64,
        thread_id: String,
        name: Option<String>,
    ) -> Result<(), String> {
        Self::err_string(self.store.persist_thread_name(workspace_id, &thread_id, name.as_deref()))
    }

    fn persist_thread_pinned(
        &self,
        workspace_id: u64,
        thread_id: String,
        pinned_at_ms: Option<u64>,
    ) -> Result<(), String> {
        Self::err_string(
            self.store
                .persist_thread_pinned(workspace_id, &thread_id, pinned_at_ms),
        )
    }

    fn persist_thread_activity(
        &self,
        workspace_id: u64,
        thread_id: String,
        at_unix_ms: u64,
    ) -> Result<(), String> {
        Self::err_string(
            self.store
                .persist_thread_activity(workspace_id, &thread_id, at_unix_ms),
        )
    }

    fn persist_allowlist(
        &self,
        workspace_id: u64,
        allowlist: Vec<Vec<String>>,
    ) -> Result<(), String> {
        Self::err_string(self.store.persist_allowlist(workspace_id, &allowlist))
    }

    fn persist_spec_root(
        &self,
        workspace_id: u64,
        spec_root: Option<String>,
    ) -> Result<(), String> {
        Self::err_string(self.store.persist_spec_root(workspace_id, spec_root.as_deref()))
    }

    fn rename_thread(
        &self,
        workspace_id: u64,
        old_id: String,
        new_id: String,
    ) -> Result<(), String> {
        self.claude.release(workspace_id, &old_id);
        Self::err_string(self.store.rename_thread(workspace_id, &old_id, &new_id))
    }

    fn update_thread_title(
        &self,
        workspace_id: u64,
        thread_id: String,
        title: String,
    ) -> Result<(), String> {
        Self::err_string(self.store.update_thread_title(workspace_id, &thread_id, &title))
    }

    fn start_turn(
        &self,
        request: RunTurnRequest,
        cancel: Arc<AtomicBool>,
        on_event: EventSink,
    ) -> Result<SendOutcome, String> {
        let outcome = match request.engine {
            EngineKind::Claude => self.claude.start_turn(&request, cancel, on_event),
            EngineKind::Codex => codex_cli::start_codex_turn(&request, cancel, on_event),
            EngineKind::Opencode => opencode_cli::start_opencode_turn(&request, cancel, on_event),
        };
        match outcome {
            Ok(outcome) => {
                self.store
                    .record_thread_seen(request.workspace_id, &request.thread_id)
                    .map_err(|err| format!("{err:#}"))?;
                Ok(outcome)
            }
            Err(err) => Err(err.to_string()),
        }
    }

    fn interrupt(
        &self,
        engine: EngineKind,
        workspace_id: u64,
        thread_id: Option<&str>,
        _turn_id: Option<&str>,
    ) -> Result<(), String> {
        // Session-oriented engines run one process per turn; the server's
        // cancel flag kills it. The event-driven engine holds a persistent
        // process and takes an in-band interrupt.
        if engine == EngineKind::Claude
            && let Some(thread_id) = thread_id
        {
            self.claude.interrupt(workspace_id, thread_id);
        }
        Ok(())
    }

    fn respond_approval(
        &self,
        engine: EngineKind,
        workspace_id: u64,
        request_id: &str,
        accept: bool,
    ) -> Result<(), String> {
        match engine {
            EngineKind::Claude => self
                .claude
                .respond_approval(workspace_id, request_id, accept)
                .map_err(|err| format!("{err:#}")),
            // Session engines run with approvals resolved out of band; an
            // auto-accepted or declined proposal has nothing to deliver to.
            EngineKind::Codex | EngineKind::Opencode => Ok(()),
        }
    }

    fn respond_user_input(
        &self,
        engine: EngineKind,
        workspace_id: u64,
        request_id: &str,
        answers: HashMap<String, Vec<String>>,
    ) -> Result<(), String> {
        match engine {
            EngineKind::Claude => self
                .claude
                .respond_user_input(workspace_id, request_id, answers)
                .map_err(|err| format!("{err:#}")),
            EngineKind::Codex | EngineKind::Opencode => Ok(()),
        }
    }

    fn engine_status(&self) -> Result<Vec<EngineStatusReport>, String> {
        Ok(EngineKind::ALL
            .into_iter()
            .map(|engine| {
                let binary = cli_check::engine_binary(engine);
                match cli_check::check_cli_version(&binary, engine.as_str()) {
                    Ok(version) => EngineStatusReport {
                        engine,
                        ok: true,
                        version: Some(version),
                        detail: None,
                    },
                    Err(err) => EngineStatusReport {
                        engine,
                        ok: false,
                        version: None,
                        detail: Some(format!("{err:#}")),
                    },
                }
            })
            .collect())
    }

    fn mcp_servers(&self, engine: EngineKind) -> Result<Vec<McpServerInfo>, String> {
        Self::err_string(cli_check::list_mcp_servers(engine))
    }

    fn list_sessions(&self, workspace_id: u64) -> Result<Vec<ImportableSession>, String> {
        Self::err_string(self.store.list_sessions(workspace_id))
    }

    fn store_attachment(
        &self,
        bytes: Vec<u8>,
        name: String,
        extension: String,
    ) -> Result<AttachmentRef, String> {
        Self::err_string(attachments::store_blob(
            &paths::blobs_root(&self.data_root),
            bytes,
            name,
            extension,
        ))
    }

    fn attachment_path(&self, attachment_id: &str) -> Result<PathBuf, String> {
        Self::err_string(attachments::blob_path(
            &paths::blobs_root(&self.data_root),
            attachment_id,
        ))
    }

    fn release_thread(&self, workspace_id: u64, thread_id: &str) {
        self.claude.release(workspace_id, thread_id);
    }
}
