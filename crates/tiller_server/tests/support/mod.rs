use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tiller_backend::{EventSink, RunTurnRequest, SendOutcome, WorkspaceAgentService};
use tiller_domain::{
    AttachmentRef, EngineKind, EngineStatusReport, ImportableSession, PersistedState, ThreadEvent,
    TokenUsage,
};

/// A deterministic in-memory stand-in for the CLI-backed service: turns
/// complete immediately and persistence is a recorded no-op.
#[derive(Default)]
pub struct MockAgentService {
    pub renames: Mutex<Vec<(u64, String, String)>>,
    pub interrupts: Mutex<Vec<(EngineKind, String)>>,
}

impl WorkspaceAgentService for MockAgentService {
    fn load_persisted_state(&self) -> Result<PersistedState, String> {
        Ok(PersistedState::default())
    }

    fn persist_workspace(&self, _: u64, _: String, _: PathBuf) -> Result<(), String> {
        Ok(())
    }

    fn persist_selected_engine(&self, _: EngineKind) -> Result<(), String> {
        Ok(())
    }

    fn persist_thread_name(&self, _: u64, _: String, _: Option<String>) -> Result<(), String> {
        Ok(())
    }

    fn persist_thread_pinned(&self, _: u64, _: String, _: Option<u64>) -> Result<(), String> {
        Ok(())
    }

    fn persist_thread_activity(&self, _: u64, _: String, _: u64) -> Result<(), String> {
        Ok(())
    }

    fn persist_allowlist(&self, _: u64, _: Vec<Vec<String>>) -> Result<(), String> {
        Ok(())
    }

    fn persist_spec_root(&self, _: u64, _: Option<String>) -> Result<(), String> {
        Ok(())
    }

    fn rename_thread(&self, workspace_id: u64, old_id: String, new_id: String) -> Result<(), String> {
        self.renames
            .lock()
            .expect("renames lock")
            .push((workspace_id, old_id, new_id));
        Ok(())
    }

    fn update_thread_title(&self, _: u64, _: String, _: String) -> Result<(), String> {
        Ok(())
    }

    fn start_turn(
        &self,
        request: RunTurnRequest,
        _cancel: Arc<AtomicBool>,
        on_event: EventSink,
    ) -> Result<SendOutcome, String> {
        // One agent message, then completion, delivered before the ack the
        // way a fast backend would.
        on_event(ThreadEvent::ItemCompleted {
            item: tiller_domain::ThreadItem::AgentMessage {
                id: format!("{}_reply", request.thread_id),
                text: format!("echo: {}", request.prompt),
            },
        });
        on_event(ThreadEvent::TurnCompleted {
            usage: Some(TokenUsage {
                input_tokens: 3,
                cached_input_tokens: 0,
                output_tokens: 5,
            }),
        });
        Ok(SendOutcome {
            turn_id: Some(format!("{}_turn", request.thread_id)),
            error: None,
        })
    }

    fn interrupt(
        &self,
        engine: EngineKind,
        _workspace_id: u64,
        thread_id: Option<&str>,
        _turn_id: Option<&str>,
    ) -> Result<(), String> {
        self.interrupts
            .lock()
            .expect("interrupts lock")
            .push((engine, thread_id.unwrap_or_default().to_owned()));
        Ok(())
    }

    fn respond_approval(&self, _: EngineKind, _: u64, _: &str, _: bool) -> Result<(), String> {
        Ok(())
    }

    fn respond_user_input(
        &self,
        _: EngineKind,
        _: u64,
        _: &str,
        _: HashMap<String, Vec<String>>,
    ) -> Result<(), String> {
        Ok(())
    }

    fn engine_status(&self) -> Result<Vec<EngineStatusReport>, String> {
        Ok(vec![EngineStatusReport {
            engine: EngineKind::Claude,
            ok: true,
            version: Some("claude 2.0.0".to_owned()),
            detail: None,
        }])
    }

    fn list_sessions(&self, _: u64) -> Result<Vec<ImportableSession>, String> {
        Ok(Vec::new())
    }

    fn store_attachment(&self, _: Vec<u8>, _: String, _: String) -> Result<AttachmentRef, String> {
        Err("unimplemented".to_owned())
    }

    fn attachment_path(&self, _: &str) -> Result<PathBuf, String> {
        Err("unimplemented".to_owned())
    }
}

pub async fn start_test_server() -> (SocketAddr, Arc<MockAgentService>) {
    let services = Arc::new(MockAgentService::default());
    let server = tiller_server::start(
        services.clone(),
        "127.0.0.1:0".parse().expect("loopback addr"),
    )
    .await
    .expect("start server");
    (server.addr, services)
}
