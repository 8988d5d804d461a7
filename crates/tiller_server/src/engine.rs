use anyhow::Context as _;
use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tiller_api::{AppSnapshot, ThreadSnapshot, WsServerMessage};
use tiller_backend::{RunTurnRequest, WorkspaceAgentService};
use tiller_domain::{Action, AppState, Effect, ThreadEvent, WorkspaceId, derive_thread_title};
use tokio::sync::{broadcast, mpsc, oneshot};

mod snapshots;

use snapshots::{build_app_snapshot, build_thread_snapshot, convert_client_action};

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn current_rev(&self) -> anyhow::Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::GetRev { reply: tx })
            .await
            .context("engine unavailable")?;
        rx.await.context("engine stopped")
    }

    pub async fn app_snapshot(&self) -> anyhow::Result<AppSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::GetAppSnapshot { reply: tx })
            .await
            .context("engine unavailable")?;
        rx.await.context("engine stopped")
    }

    pub async fn thread_snapshot(
        &self,
        workspace_id: tiller_api::WorkspaceId,
        thread_id: String,
    ) -> anyhow::Result<ThreadSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::GetThreadSnapshot {
                workspace_id,
                thread_id,
                reply: tx,
            })
            .await
            .context("engine unavailable")?;
        rx.await.context("engine stopped")?
    }

    pub async fn apply_client_action(
        &self,
        action: tiller_api::ClientAction,
    ) -> Result<u64, String> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(EngineCommand::ApplyClientAction { action, reply: tx })
            .await
            .is_err()
        {
            return Err("engine unavailable".to_owned());
        }
        rx.await
            .unwrap_or_else(|_| Err("engine stopped".to_owned()))
    }
}

pub enum EngineCommand {
    GetRev {
        reply: oneshot::Sender<u64>,
    },
    GetAppSnapshot {
        reply: oneshot::Sender<AppSnapshot>,
    },
    GetThreadSnapshot {
        workspace_id: tiller_api::WorkspaceId,
        thread_id: String,
        reply: oneshot::Sender<anyhow::Result<ThreadSnapshot>>,
    },
    ApplyClientAction {
        action: tiller_api::ClientAction,
        reply: oneshot::Sender<Result<u64, String>>,
    },
    DispatchAction {
        action: Box<Action>,
    },
}

pub struct Engine {
    state: AppState,
    rev: u64,
    services: Arc<dyn WorkspaceAgentService>,
    events: broadcast::Sender<WsServerMessage>,
    tx: mpsc::Sender<EngineCommand>,
    cancel_flags: HashMap<(WorkspaceId, String), Arc<AtomicBool>>,
}

impl Engine {
    pub fn start(
        services: Arc<dyn WorkspaceAgentService>,
    ) -> (EngineHandle, broadcast::Sender<WsServerMessage>) {
        let (tx, mut rx) = mpsc::channel::<EngineCommand>(256);
        let (events, _) = broadcast::channel::<WsServerMessage>(256);

        let mut engine = Self {
            state: AppState::new(),
            rev: 0,
            services,
            events: events.clone(),
            tx: tx.clone(),
            cancel_flags: HashMap::new(),
        };

        tokio::spawn(async move {
            engine.dispatch(Action::AppStarted);
            while let Some(cmd) = rx.recv().await {
                engine.handle(cmd);
            }
        });

        (EngineHandle { tx }, events)
    }

    fn handle(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::GetRev { reply } => {
                let _ = reply.send(self.rev);
            }
            EngineCommand::GetAppSnapshot { reply } => {
                let _ = reply.send(build_app_snapshot(&self.state, self.rev));
            }
            EngineCommand::GetThreadSnapshot {
                workspace_id,
                thread_id,
                reply,
            } => {
                let _ = reply.send(build_thread_snapshot(
                    &self.state,
                    self.rev,
                    WorkspaceId::from_u64(workspace_id.0),
                    &thread_id,
                ));
            }
            EngineCommand::ApplyClientAction { action, reply } => {
                for action in convert_client_action(action) {
                    self.dispatch(action);
                }
                let _ = reply.send(Ok(self.rev));
            }
            EngineCommand::DispatchAction { action } => {
                self.dispatch(*action);
            }
        }
    }

    fn dispatch(&mut self, action: Action) {
        let touched = touched_thread(&action);
        let prompt_request = match &action {
            Action::ThreadEventReceived {
                workspace_id,
                event: ThreadEvent::ApprovalRequested { request_id, .. },
                ..
            }
            | Action::ThreadEventReceived {
                workspace_id,
                event: ThreadEvent::UserInputRequested { request_id, .. },
                ..
            } => Some((*workspace_id, request_id.clone())),
            _ => None,
        };
        let session_assignment = match &action {
            Action::ThreadEventReceived {
                workspace_id,
                event: ThreadEvent::SessionIdAssigned { session_id, .. },
                ..
            } => Some((*workspace_id, session_id.clone())),
            _ => None,
        };
        let effects = self.state.apply(action);
        self.rev += 1;

        if let Some((workspace_id, session_id)) = session_assignment
            && let Some(workspace) = self.state.workspace(workspace_id)
            && !workspace
                .threads
                .keys()
                .any(|id| id.ends_with(&format!(":{session_id}")))
        {
            tracing::warn!(
                workspace = workspace_id.as_u64(),
                session = %session_id,
                "session assignment could not be resolved to a thread"
            );
        }

        let snapshot = build_app_snapshot(&self.state, self.rev);
        let _ = self.events.send(WsServerMessage::Event {
            rev: self.rev,
            event: Box::new(tiller_api::ServerEvent::AppChanged {
                rev: self.rev,
                snapshot: Box::new(snapshot),
            }),
        });

        if let Some((workspace_id, thread_id)) = touched {
            let resolved = if self.state.thread(workspace_id, &thread_id).is_some() {
                Some(thread_id)
            } else {
                self.state
                    .aliases
                    .resolve(workspace_id, &thread_id)
                    .map(ToOwned::to_owned)
            };
            if let Some(thread_id) = resolved
                && let Ok(snapshot) =
                    build_thread_snapshot(&self.state, self.rev, workspace_id, &thread_id)
            {
                let _ = self.events.send(WsServerMessage::Event {
                    rev: self.rev,
                    event: Box::new(tiller_api::ServerEvent::ThreadChanged {
                        snapshot: Box::new(snapshot),
                    }),
                });
            }
        }

        // Surfaced prompts get their own event; auto-accepted proposals
        // never create a record and stay silent.
        if let Some((workspace_id, request_id)) = prompt_request
            && let Some(workspace) = self.state.workspace(workspace_id)
        {
            if let Some(request) = workspace
                .approvals
                .iter()
                .find(|r| r.request_id == request_id)
            {
                let _ = self.events.send(WsServerMessage::Event {
                    rev: self.rev,
                    event: Box::new(tiller_api::ServerEvent::ApprovalRequested {
                        workspace_id: tiller_api::WorkspaceId(workspace_id.as_u64()),
                        request: tiller_api::ApprovalRequestSnapshot {
                            thread_id: request.thread_id.clone(),
                            request_id: request.request_id.clone(),
                            command: request.command.clone(),
                            tokens: request.tokens.clone(),
                        },
                    }),
                });
            } else if let Some(request) = workspace
                .user_inputs
                .iter()
                .find(|r| r.request_id == request_id)
            {
                let _ = self.events.send(WsServerMessage::Event {
                    rev: self.rev,
                    event: Box::new(tiller_api::ServerEvent::UserInputRequested {
                        workspace_id: tiller_api::WorkspaceId(workspace_id.as_u64()),
                        request: tiller_api::UserInputRequestSnapshot {
                            thread_id: request.thread_id.clone(),
                            request_id: request.request_id.clone(),
                            questions: request
                                .questions
                                .iter()
                                .map(|question| tiller_api::UserInputQuestionSnapshot {
                                    key: question.key.clone(),
                                    prompt: question.prompt.clone(),
                                    options: question.options.clone(),
                                })
                                .collect(),
                        },
                    }),
                });
            }
        }

        for effect in effects {
            self.run_effect(effect);
        }
    }

    fn cancel_flag(&mut self, workspace_id: WorkspaceId, thread_id: &str, fresh: bool) -> Arc<AtomicBool> {
        let key = (workspace_id, thread_id.to_owned());
        if fresh {
            let flag = Arc::new(AtomicBool::new(false));
            self.cancel_flags.insert(key, flag.clone());
            return flag;
        }
        self.cancel_flags
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    fn run_effect(&mut self, effect: Effect) {
        let services = self.services.clone();
        let tx = self.tx.clone();
        match effect {
            Effect::LoadPersistedState => {
                tokio::spawn(async move {
                    let result =
                        tokio::task::spawn_blocking(move || services.load_persisted_state()).await;
                    let action = match result {
                        Ok(Ok(persisted)) => Action::PersistedStateLoaded {
                            persisted: Box::new(persisted),
                        },
                        Ok(Err(message)) => Action::PersistedStateLoadFailed { message },
                        Err(err) => Action::PersistedStateLoadFailed {
                            message: err.to_string(),
                        },
                    };
                    let _ = tx
                        .send(EngineCommand::DispatchAction {
                            action: Box::new(action),
                        })
                        .await;
                });
            }
            Effect::PersistWorkspace {
                workspace_id,
                name,
                root_path,
            } => {
                spawn_fire_and_forget(move || {
                    services.persist_workspace(workspace_id.as_u64(), name, root_path)
                });
            }
            Effect::PersistSelectedEngine { engine } => {
                spawn_fire_and_forget(move || services.persist_selected_engine(engine));
            }
            Effect::SendToEngine {
                workspace_id,
                thread_id,
                engine,
                seq,
                text,
                attachments,
                run_config,
                session_id,
                continue_session,
                steering,
                review,
            } => {
                let workspace_root = self
                    .state
                    .workspace(workspace_id)
                    .map(|w| w.root_path.clone())
                    .unwrap_or_default();
                let cancel = self.cancel_flag(workspace_id, &thread_id, !steering);
                let event_tx = self.tx.clone();
                let event_thread_id = thread_id.clone();

                tokio::spawn(async move {
                    let sink_tx = event_tx.clone();
                    let sink_thread_id = event_thread_id.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        let attachment_paths = attachments
                            .iter()
                            .filter_map(|attachment| {
                                services.attachment_path(&attachment.id).ok()
                            })
                            .collect();
                        let request = RunTurnRequest {
                            workspace_id: workspace_id.as_u64(),
                            workspace_root,
                            thread_id: sink_thread_id.clone(),
                            engine,
                            session_id,
                            continue_session,
                            steering,
                            prompt: text,
                            attachment_paths,
                            model: run_config.model_id.clone(),
                            effort: Some(run_config.effort.as_str().to_owned()),
                            access_mode: run_config.access_mode,
                            review,
                        };
                        let on_event: tiller_backend::EventSink = {
                            let sink_tx = sink_tx.clone();
                            let sink_thread_id = sink_thread_id.clone();
                            Arc::new(move |event: ThreadEvent| {
                                let _ = sink_tx.blocking_send(EngineCommand::DispatchAction {
                                    action: Box::new(Action::ThreadEventReceived {
                                        workspace_id,
                                        thread_id: sink_thread_id.clone(),
                                        seq,
                                        event,
                                    }),
                                });
                            })
                        };
                        services.start_turn(request, cancel, on_event)
                    })
                    .await;

                    let action = match result {
                        Ok(Ok(outcome)) => Action::SendAcknowledged {
                            workspace_id,
                            thread_id: event_thread_id,
                            seq,
                            turn_id: outcome.turn_id,
                            error: outcome.error,
                        },
                        Ok(Err(message)) => Action::SendFailed {
                            workspace_id,
                            thread_id: event_thread_id,
                            seq,
                            message,
                        },
                        Err(err) => Action::SendFailed {
                            workspace_id,
                            thread_id: event_thread_id,
                            seq,
                            message: err.to_string(),
                        },
                    };
                    let _ = event_tx
                        .send(EngineCommand::DispatchAction {
                            action: Box::new(action),
                        })
                        .await;
                });
            }
            Effect::InterruptEngine {
                workspace_id,
                engine,
                thread_id,
                turn_id,
            } => {
                if let Some(thread_id) = &thread_id
                    && let Some(flag) = self
                        .cancel_flags
                        .get(&(workspace_id, thread_id.clone()))
                {
                    flag.store(true, Ordering::SeqCst);
                }
                spawn_fire_and_forget(move || {
                    services.interrupt(
                        engine,
                        workspace_id.as_u64(),
                        thread_id.as_deref(),
                        turn_id.as_deref(),
                    )
                });
            }
            Effect::RespondApproval {
                workspace_id,
                engine,
                request_id,
                accept,
            } => {
                spawn_fire_and_forget(move || {
                    services.respond_approval(engine, workspace_id.as_u64(), &request_id, accept)
                });
            }
            Effect::RespondUserInput {
                workspace_id,
                engine,
                request_id,
                answers,
            } => {
                spawn_fire_and_forget(move || {
                    services.respond_user_input(
                        engine,
                        workspace_id.as_u64(),
                        &request_id,
                        answers,
                    )
                });
            }
            Effect::PersistThreadName {
                workspace_id,
                thread_id,
                name,
            } => {
                spawn_fire_and_forget(move || {
                    services.persist_thread_name(workspace_id.as_u64(), thread_id, name)
                });
            }
            Effect::PersistThreadPinned {
                workspace_id,
                thread_id,
                pinned_at,
            } => {
                spawn_fire_and_forget(move || {
                    services.persist_thread_pinned(workspace_id.as_u64(), thread_id, pinned_at)
                });
            }
            Effect::PersistThreadActivity {
                workspace_id,
                thread_id,
                at_unix_ms,
            } => {
                spawn_fire_and_forget(move || {
                    services.persist_thread_activity(workspace_id.as_u64(), thread_id, at_unix_ms)
                });
            }
            Effect::PersistAllowlist {
                workspace_id,
                allowlist,
            } => {
                spawn_fire_and_forget(move || {
                    services.persist_allowlist(workspace_id.as_u64(), allowlist)
                });
            }
            Effect::PersistSpecRoot {
                workspace_id,
                spec_root,
            } => {
                spawn_fire_and_forget(move || {
                    services.persist_spec_root(workspace_id.as_u64(), spec_root)
                });
            }
            Effect::RenamePersistedThread {
                workspace_id,
                old_id,
                new_id,
            } => {
                // The cancel flag follows the thread through the rename so a
                // late interrupt still reaches the running turn.
                if let Some(flag) = self.cancel_flags.remove(&(workspace_id, old_id.clone())) {
                    self.cancel_flags
                        .insert((workspace_id, new_id.clone()), flag);
                }
                spawn_fire_and_forget(move || {
                    services.rename_thread(workspace_id.as_u64(), old_id, new_id)
                });
            }
            Effect::UpdateThreadTitle {
                workspace_id,
                thread_id,
                title,
            } => {
                spawn_fire_and_forget(move || {
                    services.update_thread_title(workspace_id.as_u64(), thread_id, title)
                });
            }
            Effect::RefreshThreads { workspace_id } => {
                tokio::spawn(async move {
                    let result = tokio::task::spawn_blocking(move || {
                        services.list_sessions(workspace_id.as_u64())
                    })
                    .await;
                    let action = match result {
                        Ok(Ok(sessions)) => Action::ThreadsRefreshFinished {
                            workspace_id,
                            sessions,
                            error: None,
                        },
                        Ok(Err(message)) => Action::ThreadsRefreshFinished {
                            workspace_id,
                            sessions: Vec::new(),
                            error: Some(message),
                        },
                        Err(err) => Action::ThreadsRefreshFinished {
                            workspace_id,
                            sessions: Vec::new(),
                            error: Some(err.to_string()),
                        },
                    };
                    let _ = tx
                        .send(EngineCommand::DispatchAction {
                            action: Box::new(action),
                        })
                        .await;
                });
            }
            Effect::QueryEngineStatus { workspace_id } => {
                tokio::spawn(async move {
                    let result =
                        tokio::task::spawn_blocking(move || services.engine_status()).await;
                    let action = match flatten(result) {
                        Ok(reports) => Action::EngineStatusLoaded {
                            workspace_id,
                            reports,
                        },
                        Err(message) => Action::QueryFailed {
                            workspace_id,
                            message,
                        },
                    };
                    let _ = tx
                        .send(EngineCommand::DispatchAction {
                            action: Box::new(action),
                        })
                        .await;
                });
            }
            Effect::QueryMcpServers {
                workspace_id,
                engine,
            } => {
                tokio::spawn(async move {
                    let result =
                        tokio::task::spawn_blocking(move || services.mcp_servers(engine)).await;
                    let action = match flatten(result) {
                        Ok(servers) => Action::McpServersLoaded {
                            workspace_id,
                            engine,
                            servers,
                        },
                        Err(message) => Action::QueryFailed {
                            workspace_id,
                            message,
                        },
                    };
                    let _ = tx
                        .send(EngineCommand::DispatchAction {
                            action: Box::new(action),
                        })
                        .await;
                });
            }
            Effect::QueryLsp {
                workspace_id,
                kind,
                argument,
            } => {
                let workspace_root = self
                    .state
                    .workspace(workspace_id)
                    .map(|w| w.root_path.clone())
                    .unwrap_or_default();
                tokio::spawn(async move {
                    let result = tokio::task::spawn_blocking(move || {
                        services.lsp_query(workspace_root, kind, argument)
                    })
                    .await;
                    let action = match flatten(result) {
                        Ok(results) => Action::LspResultsLoaded {
                            workspace_id,
                            results,
                        },
                        Err(message) => Action::QueryFailed {
                            workspace_id,
                            message,
                        },
                    };
                    let _ = tx
                        .send(EngineCommand::DispatchAction {
                            action: Box::new(action),
                        })
                        .await;
                });
            }
            Effect::ListImportableSessions { workspace_id } => {
                tokio::spawn(async move {
                    let result = tokio::task::spawn_blocking(move || {
                        services.list_sessions(workspace_id.as_u64())
                    })
                    .await;
                    let action = match flatten(result) {
                        Ok(sessions) => Action::ImportSessionsLoaded {
                            workspace_id,
                            sessions,
                        },
                        Err(message) => Action::ImportSessionsLoadFailed {
                            workspace_id,
                            message,
                        },
                    };
                    let _ = tx
                        .send(EngineCommand::DispatchAction {
                            action: Box::new(action),
                        })
                        .await;
                });
            }
        }
    }
}

fn flatten<T>(result: Result<Result<T, String>, tokio::task::JoinError>) -> Result<T, String> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(err.to_string()),
    }
}

fn spawn_fire_and_forget(
    job: impl FnOnce() -> Result<(), String> + Send + 'static,
) {
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(job).await;
        match result {
            Ok(Err(message)) => tracing::warn!(%message, "persistence call failed"),
            Err(err) => tracing::warn!(error = %err, "persistence task panicked"),
            Ok(Ok(())) => {}
        }
    });
}

/// The thread an action most plausibly affects, for targeted change events.
fn touched_thread(action: &Action) -> Option<(WorkspaceId, String)> {
    match action {
        Action::ActivateThread {
            workspace_id,
            thread_id,
        }
        | Action::SetThreadName {
            workspace_id,
            thread_id,
            ..
        }
        | Action::SetThreadPinned {
            workspace_id,
            thread_id,
            ..
        }
        | Action::InterruptThread {
            workspace_id,
            thread_id,
        }
        | Action::SendAcknowledged {
            workspace_id,
            thread_id,
            ..
        }
        | Action::SendFailed {
            workspace_id,
            thread_id,
            ..
        }
        | Action::ThreadEventReceived {
            workspace_id,
            thread_id,
            ..
        } => Some((*workspace_id, thread_id.clone())),
        _ => None,
    }
}

/// Fallback title for a thread without a custom name.
pub(crate) fn thread_title(
    state: &AppState,
    workspace_id: WorkspaceId,
    thread: &tiller_domain::Thread,
) -> String {
    if let Some(name) = state.custom_name(workspace_id, &thread.id) {
        return name.to_owned();
    }
    for entry in &thread.entries {
        if let tiller_domain::ThreadEntry::UserMessage { text, .. } = entry {
            let title = derive_thread_title(text);
            if !title.is_empty() {
                return title;
            }
        }
    }
    thread.id.clone()
}
