use crate::{
    Action, AppState, ApprovalRequest, AttachmentRef, Effect, EngineKind, EngineStatusReport,
    ImportableSession, LspResults, McpServerInfo, PickerOutcome, QueuedPrompt, ReviewPicker,
    ReviewTarget, SlashCommand, Thread, ThreadEntry, ThreadEvent, TurnState, UserInputRequest,
    Workspace, WorkspaceId, approvals, durable_thread_id, engine_for_session_assignment,
    engine_of_id, is_provisional_id, mint_bare_thread_id, mint_provisional_id, parse_engine_kind,
    parse_slash_command, router, session_id_of,
};

pub const THREAD_TITLE_MAX_CHARS: usize = 40;

fn now_unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

/// Title derived from the first message of a thread; propagated to the
/// persistence collaborator best-effort.
pub fn derive_thread_title(text: &str) -> String {
    let mut title = String::new();
    for word in text.split_whitespace() {
        if title.is_empty() {
            title.push_str(word);
        } else if title.chars().count() + 1 + word.chars().count() > THREAD_TITLE_MAX_CHARS {
            break;
        } else {
            title.push(' ');
            title.push_str(word);
        }
    }
    if title.chars().count() > THREAD_TITLE_MAX_CHARS {
        title = title.chars().take(THREAD_TITLE_MAX_CHARS).collect();
    }
    title
}

fn review_request_text(target: &ReviewTarget, spec_root: Option<&str>) -> String {
    let mut text = match target {
        ReviewTarget::BaseBranch { branch } => format!("Review the changes against {branch}"),
        ReviewTarget::Commit { sha } => format!("Review commit {sha}"),
        ReviewTarget::CustomInstructions { instructions } => instructions.clone(),
        ReviewTarget::UncommittedChanges => "Review the uncommitted changes".to_owned(),
    };
    if let Some(root) = spec_root {
        text.push_str(&format!(" (specs under {root})"));
    }
    text
}

fn format_status_note(reports: &[EngineStatusReport]) -> String {
    let mut lines = vec!["Engine status:".to_owned()];
    for report in reports {
        let state = if report.ok { "ok" } else { "unavailable" };
        let mut line = format!("  {}: {state}", report.engine.as_str());
        if let Some(version) = &report.version {
            line.push_str(&format!(" ({version})"));
        }
        if let Some(detail) = &report.detail {
            line.push_str(&format!(" - {detail}"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn format_mcp_note(engine: EngineKind, servers: &[McpServerInfo]) -> String {
    if servers.is_empty() {
        return format!("No MCP servers configured for {}", engine.as_str());
    }
    let mut lines = vec![format!("MCP servers ({}):", engine.as_str())];
    for server in servers {
        let state = if server.connected {
            "connected"
        } else {
            "disconnected"
        };
        lines.push(format!("  {} [{}] {state}", server.name, server.transport));
    }
    lines.join("\n")
}

fn format_lsp_note(results: &LspResults) -> String {
    match results {
        LspResults::Symbols(symbols) => {
            if symbols.is_empty() {
                return "No symbols found".to_owned();
            }
            let mut lines = vec!["Symbols:".to_owned()];
            for symbol in symbols {
                lines.push(format!(
                    "  {} ({}) {}:{}",
                    symbol.name, symbol.kind, symbol.path, symbol.line
                ));
            }
            lines.join("\n")
        }
        LspResults::Diagnostics(diagnostics) => {
            if diagnostics.is_empty() {
                return "No diagnostics".to_owned();
            }
            let mut lines = vec!["Diagnostics:".to_owned()];
            for diagnostic in diagnostics {
                lines.push(format!(
                    "  {}:{} {}: {}",
                    diagnostic.path, diagnostic.line, diagnostic.severity, diagnostic.message
                ));
            }
            lines.join("\n")
        }
    }
}

fn format_import_note(sessions: &[ImportableSession]) -> String {
    if sessions.is_empty() {
        return "No importable sessions found".to_owned();
    }
    let mut lines = vec!["Importable sessions:".to_owned()];
    for session in sessions {
        lines.push(format!(
            "  {}:{} - {}",
            session.engine.as_str(),
            session.session_id,
            session.title
        ));
    }
    lines.join("\n")
}

impl AppState {
    pub fn apply(&mut self, action: Action) -> Vec<Effect> {
        match action {
            Action::AppStarted => vec![Effect::LoadPersistedState],

            Action::PersistedStateLoaded { persisted } => {
                for workspace in &persisted.workspaces {
                    self.restore_workspace(workspace);
                }
                if let Some(engine) = persisted
                    .selected_engine
                    .as_deref()
                    .and_then(parse_engine_kind)
                {
                    self.selected_engine = engine;
                }
                for ((workspace_id, thread_id), name) in &persisted.custom_names {
                    self.custom_names
                        .insert((WorkspaceId::from_u64(*workspace_id), thread_id.clone()), name.clone());
                }
                for ((workspace_id, thread_id), at) in &persisted.pinned_at {
                    self.pinned_at
                        .insert((WorkspaceId::from_u64(*workspace_id), thread_id.clone()), *at);
                }
                for ((workspace_id, thread_id), at) in &persisted.last_activity {
                    self.last_activity
                        .insert((WorkspaceId::from_u64(*workspace_id), thread_id.clone()), *at);
                }
                for (workspace_id, allowlist) in &persisted.allowlists {
                    self.approval_gate
                        .replace_allowlist(WorkspaceId::from_u64(*workspace_id), allowlist.clone());
                }
                for (workspace_id, spec_root) in &persisted.spec_roots {
                    if let Some(workspace) = self.workspace_mut(WorkspaceId::from_u64(*workspace_id))
                    {
                        workspace.review_spec_root = Some(spec_root.clone());
                    }
                }

                let workspace_ids: Vec<WorkspaceId> =
                    self.workspaces.iter().map(|w| w.id).collect();
                workspace_ids
                    .into_iter()
                    .filter_map(|id| self.request_threads_refresh(id))
                    .collect()
            }
            Action::PersistedStateLoadFailed { message } => {
                self.last_error = Some(message);
                Vec::new()
            }

            Action::RegisterWorkspace { name, root_path } => {
                if let Some(existing) = self.workspaces.iter().find(|w| w.root_path == root_path) {
                    let id = existing.id;
                    return self.request_threads_refresh(id).into_iter().collect();
                }
                let workspace_id = self.insert_workspace(name.clone(), root_path.clone());
                let mut effects = vec![Effect::PersistWorkspace {
                    workspace_id,
                    name,
                    root_path,
                }];
                effects.extend(self.request_threads_refresh(workspace_id));
                effects
            }

            Action::EngineSelected { engine } => {
                if self.selected_engine == engine {
                    return Vec::new();
                }
                self.selected_engine = engine;
                vec![Effect::PersistSelectedEngine { engine }]
            }

            Action::ActivateThread {
                workspace_id,
                thread_id,
            } => {
                if let Some(workspace) = self.workspace_mut(workspace_id)
                    && workspace.threads.contains_key(&thread_id)
                {
                    workspace.active_thread_id = Some(thread_id);
                }
                Vec::new()
            }
            Action::StartNewThread { workspace_id } => {
                if let Some(workspace) = self.workspace_mut(workspace_id) {
                    workspace.active_thread_id = None;
                }
                Vec::new()
            }

            Action::SetThreadName {
                workspace_id,
                thread_id,
                name,
            } => {
                match &name {
                    Some(name) => {
                        self.custom_names
                            .insert((workspace_id, thread_id.clone()), name.clone());
                    }
                    None => {
                        self.custom_names.remove(&(workspace_id, thread_id.clone()));
                    }
                }
                vec![Effect::PersistThreadName {
                    workspace_id,
                    thread_id,
                    name,
                }]
            }
            Action::SetThreadPinned {
                workspace_id,
                thread_id,
                pinned,
            } => {
                let pinned_at = if pinned {
                    let at = now_unix_ms();
                    self.pinned_at.insert((workspace_id, thread_id.clone()), at);
                    Some(at)
                } else {
                    self.pinned_at.remove(&(workspace_id, thread_id.clone()));
                    None
                };
                vec![Effect::PersistThreadPinned {
                    workspace_id,
                    thread_id,
                    pinned_at,
                }]
            }

            Action::ComposerSubmitted {
                workspace_id,
                thread_id,
                text,
                attachments,
            } => match parse_slash_command(&text) {
                Some(command) => self.handle_slash_command(workspace_id, thread_id, command),
                None => self.handle_send(workspace_id, thread_id, text, attachments, None),
            },

            Action::InterruptThread {
                workspace_id,
                thread_id,
            } => self.handle_interrupt(workspace_id, thread_id),

            Action::SendAcknowledged {
                workspace_id,
                thread_id,
                seq,
                turn_id,
                error,
            } => {
                let Some(target) = self.event_target_id(workspace_id, &thread_id) else {
                    return Vec::new();
                };
                let Some(thread) = self.thread_mut(workspace_id, &target) else {
                    return Vec::new();
                };
                if thread.active_seq != Some(seq) {
                    return Vec::new();
                }
                if let Some(message) = error {
                    return self.fail_turn_to_start(workspace_id, &target, message);
                }
                match turn_id {
                    Some(turn_id) => self.handle_turn_started(workspace_id, &target, seq, turn_id),
                    None => {
                        let engine = self
                            .thread(workspace_id, &target)
                            .map(|t| t.engine)
                            .unwrap_or(self.selected_engine);
                        if engine.acks_turn_id_on_send() {
                            self.fail_turn_to_start(
                                workspace_id,
                                &target,
                                "turn failed to start".to_owned(),
                            )
                        } else {
                            // Session-oriented engines defer to a streamed
                            // turn.started event.
                            Vec::new()
                        }
                    }
                }
            }
            Action::SendFailed {
                workspace_id,
                thread_id,
                seq,
                message,
            } => {
                let Some(target) = self.event_target_id(workspace_id, &thread_id) else {
                    return Vec::new();
                };
                let Some(thread) = self.thread_mut(workspace_id, &target) else {
                    return Vec::new();
                };
                if thread.active_seq != Some(seq) {
                    return Vec::new();
                }
                self.fail_turn_to_start(workspace_id, &target, message)
            }

            Action::ThreadEventReceived {
                workspace_id,
                thread_id,
                seq,
                event,
            } => self.handle_thread_event(workspace_id, thread_id, seq, event),

            Action::ApprovalDecided {
                workspace_id,
                request_id,
                accept,
                remember_prefix,
            } => self.handle_approval_decision(workspace_id, request_id, accept, remember_prefix),

            Action::UserInputAnswered {
                workspace_id,
                request_id,
                answers,
            } => {
                let Some(workspace) = self.workspace_mut(workspace_id) else {
                    return Vec::new();
                };
                let Some(position) = workspace
                    .user_inputs
                    .iter()
                    .position(|r| r.request_id == request_id)
                else {
                    return Vec::new();
                };
                let Some(request) = workspace.user_inputs.remove(position) else {
                    return Vec::new();
                };
                let engine = self.engine_for_request(workspace_id, &request.thread_id);
                vec![Effect::RespondUserInput {
                    workspace_id,
                    engine,
                    request_id: request.request_id,
                    answers,
                }]
            }

            Action::ReviewPickerKey { workspace_id, key } => {
                let Some(workspace) = self.workspace_mut(workspace_id) else {
                    return Vec::new();
                };
                let Some(picker) = workspace.review_picker.as_mut() else {
                    return Vec::new();
                };
                match picker.handle_key(key) {
                    PickerOutcome::Pending => Vec::new(),
                    PickerOutcome::Closed => {
                        workspace.review_picker = None;
                        Vec::new()
                    }
                    PickerOutcome::Confirmed(target) => {
                        let thread_id = picker.thread_id.clone();
                        workspace.review_picker = None;
                        self.start_review(workspace_id, thread_id, target)
                    }
                }
            }

            Action::ImportSessionsLoaded {
                workspace_id,
                sessions,
            } => {
                let note = format_import_note(&sessions);
                let Some(workspace) = self.workspace_mut(workspace_id) else {
                    return Vec::new();
                };
                workspace.import_candidates = sessions;
                self.push_note_to_active_thread(workspace_id, note);
                Vec::new()
            }
            Action::ImportSessionsLoadFailed {
                workspace_id: _,
                message,
            } => {
                self.last_error = Some(message);
                Vec::new()
            }
            Action::ImportSession {
                workspace_id,
                engine,
                session_id,
            } => self.attach_durable_thread(workspace_id, engine, &session_id),

            Action::ThreadsRefreshFinished {
                workspace_id,
                sessions,
                error,
            } => {
                if let Some(workspace) = self.workspace_mut(workspace_id) {
                    workspace.threads_refresh_in_flight = false;
                }
                if let Some(message) = error {
                    self.last_error = Some(message);
                    return Vec::new();
                }
                self.merge_refreshed_threads(workspace_id, sessions);
                Vec::new()
            }

            Action::EngineStatusLoaded {
                workspace_id,
                reports,
            } => {
                self.push_note_to_active_thread(workspace_id, format_status_note(&reports));
                Vec::new()
            }
            Action::McpServersLoaded {
                workspace_id,
                engine,
                servers,
            } => {
                self.push_note_to_active_thread(workspace_id, format_mcp_note(engine, &servers));
                Vec::new()
            }
            Action::LspResultsLoaded {
                workspace_id,
                results,
            } => {
                self.push_note_to_active_thread(workspace_id, format_lsp_note(&results));
                Vec::new()
            }
            Action::QueryFailed {
                workspace_id: _,
                message,
            } => {
                self.last_error = Some(message);
                Vec::new()
            }

            Action::ClearError => {
                self.last_error = None;
                Vec::new()
            }
        }
    }

    fn request_threads_refresh(&mut self, workspace_id: WorkspaceId) -> Option<Effect> {
        let workspace = self.workspace_mut(workspace_id)?;
        if workspace.threads_refresh_in_flight {
            return None;
        }
        workspace.threads_refresh_in_flight = true;
        Some(Effect::RefreshThreads { workspace_id })
    }

    /// The id an inbound backend event should be applied to: the literal id
    /// when that thread still exists, else its alias resolution.
    fn event_target_id(&self, workspace_id: WorkspaceId, literal: &str) -> Option<String> {
        let workspace = self.workspace(workspace_id)?;
        if workspace.threads.contains_key(literal) {
            return Some(literal.to_owned());
        }
        let resolved = self.aliases.resolve(workspace_id, literal)?;
        if workspace.threads.contains_key(resolved) {
            return Some(resolved.to_owned());
        }
        None
    }

    /// Every id a terminal event must be applied to: the literal id and its
    /// alias resolution, so neither record is left stuck non-terminal.
    fn terminal_target_ids(&self, workspace_id: WorkspaceId, literal: &str) -> Vec<String> {
        let Some(workspace) = self.workspace(workspace_id) else {
            return Vec::new();
        };
        let mut targets = Vec::new();
        if workspace.threads.contains_key(literal) {
            targets.push(literal.to_owned());
        }
        if let Some(resolved) = self.aliases.resolve(workspace_id, literal)
            && resolved != literal
            && workspace.threads.contains_key(resolved)
        {
            targets.push(resolved.to_owned());
        }
        targets
    }

    fn engine_for_request(&self, workspace_id: WorkspaceId, thread_id: &str) -> EngineKind {
        let recorded = self
            .thread(workspace_id, thread_id)
            .map(|t| t.engine)
            .or_else(|| {
                self.aliases
                    .resolve(workspace_id, thread_id)
                    .and_then(|resolved| self.thread(workspace_id, resolved))
                    .map(|t| t.engine)
            });
        router::effective_engine(recorded, Some(thread_id), self.selected_engine)
    }

    fn push_note_to_active_thread(&mut self, workspace_id: WorkspaceId, text: String) {
        if let Some(workspace) = self.workspace_mut(workspace_id)
            && let Some(active_id) = workspace.active_thread_id.clone()
            && let Some(thread) = workspace.threads.get_mut(&active_id)
        {
            thread.push_entry(ThreadEntry::SystemNote { text });
        }
    }

    fn handle_slash_command(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: Option<String>,
        command: SlashCommand,
    ) -> Vec<Effect> {
        match command {
            SlashCommand::Review { target: None } => {
                let Some(workspace) = self.workspace_mut(workspace_id) else {
                    return Vec::new();
                };
                let picker_thread = thread_id.or_else(|| workspace.active_thread_id.clone());
                workspace.review_picker = Some(ReviewPicker::new(picker_thread));
                Vec::new()
            }
            SlashCommand::Review {
                target: Some(target),
            } => self.start_review(workspace_id, thread_id, target),
            SlashCommand::Status => vec![Effect::QueryEngineStatus { workspace_id }],
            SlashCommand::Mcp => {
                let engine = self
                    .workspace(workspace_id)
                    .and_then(Workspace::active_thread)
                    .map(|t| t.engine)
                    .unwrap_or(self.selected_engine);
                vec![Effect::QueryMcpServers {
                    workspace_id,
                    engine,
                }]
            }
            SlashCommand::Lsp { query } => vec![Effect::QueryLsp {
                workspace_id,
                kind: query.kind,
                argument: query.argument,
            }],
            SlashCommand::Import => vec![Effect::ListImportableSessions { workspace_id }],
            SlashCommand::Resume { id: Some(raw) } => {
                let (engine, session_id) = match engine_of_id(&raw) {
                    Some(engine) => (engine, session_id_of(&raw).unwrap_or(raw)),
                    None => (self.selected_engine, raw),
                };
                self.attach_durable_thread(workspace_id, engine, &session_id)
            }
            SlashCommand::Resume { id: None } => {
                vec![Effect::ListImportableSessions { workspace_id }]
            }
            SlashCommand::Fork => self.fork_active_thread(workspace_id),
            SlashCommand::SpecRoot { path } => {
                let Some(workspace) = self.workspace_mut(workspace_id) else {
                    return Vec::new();
                };
                workspace.review_spec_root = path.clone();
                vec![Effect::PersistSpecRoot {
                    workspace_id,
                    spec_root: path,
                }]
            }
        }
    }

    /// `/resume <id>` and session import bypass normal thread resolution and
    /// attach a durable thread directly.
    fn attach_durable_thread(
        &mut self,
        workspace_id: WorkspaceId,
        engine: EngineKind,
        session_id: &str,
    ) -> Vec<Effect> {
        let id = durable_thread_id(engine, session_id);
        let activity = self
            .last_activity
            .get(&(workspace_id, id.clone()))
            .copied()
            .unwrap_or_else(now_unix_ms);
        let Some(workspace) = self.workspace_mut(workspace_id) else {
            return Vec::new();
        };
        workspace.threads.entry(id.clone()).or_insert_with(|| {
            let mut thread = Thread::new(id.clone(), workspace_id, engine);
            thread.engine_confirmed = true;
            thread.last_activity_at_unix_ms = activity;
            thread
        });
        workspace.active_thread_id = Some(id);
        self.request_threads_refresh(workspace_id)
            .into_iter()
            .collect()
    }

    fn fork_active_thread(&mut self, workspace_id: WorkspaceId) -> Vec<Effect> {
        let Some(workspace) = self.workspace_mut(workspace_id) else {
            return Vec::new();
        };
        let Some(parent_id) = workspace.active_thread_id.clone() else {
            return Vec::new();
        };
        let Some(parent) = workspace.threads.get(&parent_id) else {
            return Vec::new();
        };

        let engine = parent.engine;
        let child_id = if engine.is_session_oriented() {
            mint_provisional_id(engine)
        } else {
            mint_bare_thread_id()
        };
        let mut child = Thread::new(child_id.clone(), workspace_id, engine);
        child.parent_id = Some(parent_id.clone());
        child.model_id = parent.model_id.clone();
        child.effort = parent.effort;
        child.access_mode = parent.access_mode;
        child.last_activity_at_unix_ms = now_unix_ms();

        workspace.threads.insert(child_id.clone(), child);
        if let Some(parent) = workspace.threads.get_mut(&parent_id) {
            parent.child_ids.push(child_id.clone());
        }
        workspace.active_thread_id = Some(child_id);
        Vec::new()
    }

    fn start_review(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: Option<String>,
        target: ReviewTarget,
    ) -> Vec<Effect> {
        let spec_root = self
            .workspace(workspace_id)
            .and_then(|w| w.review_spec_root.clone());
        let text = review_request_text(&target, spec_root.as_deref());
        self.handle_send(workspace_id, thread_id, text, Vec::new(), Some(target))
    }

    fn handle_send(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: Option<String>,
        text: String,
        attachments: Vec<AttachmentRef>,
        review: Option<ReviewTarget>,
    ) -> Vec<Effect> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Vec::new();
        }
        let selected = self.selected_engine;
        let Some(workspace) = self.workspace_mut(workspace_id) else {
            return Vec::new();
        };

        // Resolve the target thread. A send into the active thread while a
        // different engine is selected starts a fresh thread instead.
        let explicit = thread_id.is_some();
        let mut target_id = thread_id.or_else(|| workspace.active_thread_id.clone());
        if !explicit
            && let Some(id) = &target_id
            && let Some(thread) = workspace.threads.get(id)
            && !router::send_reuses_active_thread(thread.engine, selected)
        {
            target_id = None;
        }

        let now = now_unix_ms();
        let target_id = match target_id {
            Some(id) if workspace.threads.contains_key(&id) => id,
            _ => {
                let engine = selected;
                let id = if engine.is_session_oriented() {
                    mint_provisional_id(engine)
                } else {
                    mint_bare_thread_id()
                };
                let mut thread = Thread::new(id.clone(), workspace_id, engine);
                thread.last_activity_at_unix_ms = now;
                workspace.threads.insert(id.clone(), thread);
                id
            }
        };
        workspace.active_thread_id = Some(target_id.clone());

        let Some(thread) = workspace.threads.get_mut(&target_id) else {
            return Vec::new();
        };

        // Steering: a turn is already mid-flight on this thread. The message
        // is echoed immediately; delivery rides the active turn when the
        // engine supports it and queues otherwise.
        if thread.is_turn_in_flight() {
            thread.push_entry(ThreadEntry::UserMessage {
                text: text.clone(),
                attachments: attachments.clone(),
            });
            thread.last_activity_at_unix_ms = now;
            if thread.engine.supports_steering()
                && let Some(seq) = thread.active_seq
            {
                let run_config = thread.run_config();
                let session_id = session_id_of(&target_id).or_else(|| {
                    if engine_of_id(&target_id).is_none() {
                        Some(target_id.clone())
                    } else {
                        None
                    }
                });
                return vec![Effect::SendToEngine {
                    workspace_id,
                    thread_id: target_id,
                    engine: run_config.engine,
                    seq,
                    text,
                    attachments,
                    run_config,
                    session_id,
                    continue_session: true,
                    steering: true,
                    review: None,
                }];
            }
            let run_config = thread.run_config();
            let id = thread.allocate_queued_prompt_id();
            thread.queued_prompts.push_back(QueuedPrompt {
                id,
                text,
                attachments,
                run_config,
            });
            return Vec::new();
        }

        let first_message = !thread
            .entries
            .iter()
            .any(|entry| matches!(entry, ThreadEntry::UserMessage { .. }));
        let continue_session = !first_message;
        let title = if first_message {
            Some(derive_thread_title(&text))
        } else {
            None
        };

        let effects = self.dispatch_turn(
            workspace_id,
            &target_id,
            text,
            attachments,
            review,
            continue_session,
            true,
        );
        let mut out = effects;
        if let Some(title) = title
            && !title.is_empty()
        {
            out.push(Effect::UpdateThreadTitle {
                workspace_id,
                thread_id: target_id,
                title,
            });
        }
        out
    }

    fn dispatch_turn(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: &str,
        text: String,
        attachments: Vec<AttachmentRef>,
        review: Option<ReviewTarget>,
        continue_session: bool,
        echo_user_message: bool,
    ) -> Vec<Effect> {
        let now = now_unix_ms();
        let Some(thread) = self.thread_mut(workspace_id, thread_id) else {
            return Vec::new();
        };
        let seq = thread.allocate_seq();
        thread.begin_turn(seq, review.is_some(), now);
        if echo_user_message {
            thread.push_entry(ThreadEntry::UserMessage {
                text: text.clone(),
                attachments: attachments.clone(),
            });
        }
        let run_config = thread.run_config();
        let engine = run_config.engine;
        let session_id = session_id_of(thread_id).or_else(|| {
            if engine_of_id(thread_id).is_none() {
                Some(thread_id.to_owned())
            } else {
                None
            }
        });
        self.last_activity
            .insert((workspace_id, thread_id.to_owned()), now);

        vec![
            Effect::SendToEngine {
                workspace_id,
                thread_id: thread_id.to_owned(),
                engine,
                seq,
                text,
                attachments,
                run_config,
                session_id,
                continue_session,
                steering: false,
                review,
            },
            Effect::PersistThreadActivity {
                workspace_id,
                thread_id: thread_id.to_owned(),
                at_unix_ms: now,
            },
        ]
    }

    fn fail_turn_to_start(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: &str,
        message: String,
    ) -> Vec<Effect> {
        let Some(thread) = self.thread_mut(workspace_id, thread_id) else {
            return Vec::new();
        };
        thread.push_entry(ThreadEntry::TurnError {
            message: message.clone(),
        });
        thread.finalize_pending_items(false);
        thread.end_turn(TurnState::Errored);
        self.last_error = Some(message);
        Vec::new()
    }

    fn handle_turn_started(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: &str,
        seq: u64,
        turn_id: String,
    ) -> Vec<Effect> {
        if self
            .pending_interrupts
            .remove(&(workspace_id, thread_id.to_owned()))
        {
            // The user interrupted before the turn id was known; deliver the
            // interrupt now and leave the thread idle.
            let Some(thread) = self.thread(workspace_id, thread_id) else {
                return Vec::new();
            };
            let engines = router::interrupt_engines(thread.engine, thread.turn_engine);
            return engines
                .into_iter()
                .map(|engine| Effect::InterruptEngine {
                    workspace_id,
                    engine,
                    thread_id: Some(thread_id.to_owned()),
                    turn_id: Some(turn_id.clone()),
                })
                .collect();
        }

        let Some(thread) = self.thread_mut(workspace_id, thread_id) else {
            return Vec::new();
        };
        if thread.active_seq != Some(seq) {
            return Vec::new();
        }
        thread.turn = TurnState::Active;
        thread.active_turn_id = Some(turn_id);
        Vec::new()
    }

    fn handle_interrupt(&mut self, workspace_id: WorkspaceId, thread_id: String) -> Vec<Effect> {
        let Some(target) = self.event_target_id(workspace_id, &thread_id) else {
            return Vec::new();
        };
        let Some(thread) = self.thread_mut(workspace_id, &target) else {
            return Vec::new();
        };
        if !thread.is_turn_in_flight() {
            return Vec::new();
        }

        // Optimistic: stopped message and idle state before the backend
        // confirms anything.
        thread.push_entry(ThreadEntry::SessionStopped);
        thread.interrupted_by_user = true;
        thread.finalize_pending_items(false);
        let turn_id = thread.active_turn_id.clone();
        let engines = router::interrupt_engines(thread.engine, thread.turn_engine);
        thread.end_turn(TurnState::Interrupted);
        thread.queued_prompts.clear();

        match turn_id {
            None => {
                self.pending_interrupts.insert((workspace_id, target));
                Vec::new()
            }
            Some(turn_id) => engines
                .into_iter()
                .map(|engine| Effect::InterruptEngine {
                    workspace_id,
                    engine,
                    thread_id: Some(target.clone()),
                    turn_id: Some(turn_id.clone()),
                })
                .collect(),
        }
    }

    fn handle_thread_event(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: String,
        seq: u64,
        event: ThreadEvent,
    ) -> Vec<Effect> {
        match event {
            ThreadEvent::ThreadStarted => Vec::new(),
            ThreadEvent::SessionIdAssigned {
                session_id,
                engine_hint,
            } => self.handle_session_assigned(workspace_id, &thread_id, session_id, engine_hint),
            ThreadEvent::TurnStarted { turn_id } => {
                let Some(target) = self.event_target_id(workspace_id, &thread_id) else {
                    return Vec::new();
                };
                self.handle_turn_started(workspace_id, &target, seq, turn_id)
            }
            ThreadEvent::TurnPlanUpdated { steps } => {
                if let Some(target) = self.event_target_id(workspace_id, &thread_id)
                    && let Some(thread) = self.thread_mut(workspace_id, &target)
                    && thread.active_seq == Some(seq)
                {
                    thread.upsert_item(crate::ThreadItem::Plan {
                        id: "turn_plan".to_owned(),
                        steps,
                    });
                }
                Vec::new()
            }
            ThreadEvent::TurnCompleted { usage } => {
                self.apply_terminal_event(workspace_id, &thread_id, seq, TerminalKind::Completed {
                    usage,
                })
            }
            ThreadEvent::TurnError {
                message,
                will_retry,
            } => {
                if will_retry {
                    // The backend re-emits after its own retry; not terminal.
                    return Vec::new();
                }
                self.apply_terminal_event(workspace_id, &thread_id, seq, TerminalKind::Errored {
                    message,
                })
            }
            ThreadEvent::TokenUsageUpdated { usage } => {
                if let Some(target) = self.event_target_id(workspace_id, &thread_id)
                    && let Some(thread) = self.thread_mut(workspace_id, &target)
                    && thread.active_seq == Some(seq)
                {
                    thread.usage = Some(usage);
                }
                Vec::new()
            }
            ThreadEvent::ContextCompacted => {
                if let Some(target) = self.event_target_id(workspace_id, &thread_id)
                    && let Some(thread) = self.thread_mut(workspace_id, &target)
                {
                    thread.push_entry(ThreadEntry::ContextCompacted);
                }
                Vec::new()
            }
            ThreadEvent::ApprovalRequested {
                request_id,
                command,
            } => self.handle_approval_requested(workspace_id, thread_id, request_id, command),
            ThreadEvent::UserInputRequested {
                request_id,
                questions,
            } => {
                let target = self
                    .event_target_id(workspace_id, &thread_id)
                    .unwrap_or(thread_id);
                let Some(workspace) = self.workspace_mut(workspace_id) else {
                    return Vec::new();
                };
                workspace.user_inputs.push_back(UserInputRequest {
                    workspace_id,
                    thread_id: target,
                    request_id,
                    questions,
                });
                Vec::new()
            }
            ThreadEvent::ItemStarted { item }
            | ThreadEvent::ItemUpdated { item }
            | ThreadEvent::ItemCompleted { item } => {
                if let Some(target) = self.event_target_id(workspace_id, &thread_id)
                    && let Some(thread) = self.thread_mut(workspace_id, &target)
                    && thread.active_seq == Some(seq)
                {
                    thread.upsert_item(item);
                }
                Vec::new()
            }
        }
    }

    fn apply_terminal_event(
        &mut self,
        workspace_id: WorkspaceId,
        literal_id: &str,
        seq: u64,
        kind: TerminalKind,
    ) -> Vec<Effect> {
        let targets = self.terminal_target_ids(workspace_id, literal_id);
        let mut effects = Vec::new();
        let mut applied_via_alias = false;
        for target in &targets {
            let now = now_unix_ms();
            let applied = {
                let Some(thread) = self.thread_mut(workspace_id, target) else {
                    continue;
                };
                if thread.active_seq != Some(seq) {
                    continue;
                }
                match &kind {
                    TerminalKind::Completed { usage } => {
                        if let Some(usage) = usage {
                            thread.usage = Some(usage.clone());
                            thread.push_entry(ThreadEntry::TurnUsage {
                                usage: Some(usage.clone()),
                            });
                        }
                        thread.finalize_pending_items(true);
                        thread.end_turn(TurnState::Completed);
                        thread.last_activity_at_unix_ms = now;
                        TerminalApplied::Completed
                    }
                    TerminalKind::Errored { message } => {
                        let suppressed = thread.interrupted_by_user;
                        if !suppressed {
                            thread.push_entry(ThreadEntry::TurnError {
                                message: message.clone(),
                            });
                        }
                        thread.finalize_pending_items(false);
                        thread.end_turn(TurnState::Errored);
                        if suppressed {
                            TerminalApplied::ErroredSuppressed
                        } else {
                            TerminalApplied::Errored
                        }
                    }
                }
            };
            if target != literal_id {
                applied_via_alias = true;
            }
            match applied {
                TerminalApplied::Completed => {
                    self.last_activity
                        .insert((workspace_id, target.clone()), now);
                    effects.push(Effect::PersistThreadActivity {
                        workspace_id,
                        thread_id: target.clone(),
                        at_unix_ms: now,
                    });
                    effects.extend(self.start_next_queued_prompt(workspace_id, target));
                }
                TerminalApplied::Errored => {
                    if let TerminalKind::Errored { message } = &kind {
                        self.last_error = Some(message.clone());
                    }
                }
                TerminalApplied::ErroredSuppressed => {}
            }
        }
        if applied_via_alias {
            // The turn dispatched under the provisional id has finished; no
            // live reference to the old id remains.
            let resolved = self
                .aliases
                .resolve(workspace_id, literal_id)
                .map(ToOwned::to_owned);
            if let Some(resolved) = resolved {
                self.aliases.retire_by_durable(workspace_id, &resolved);
            }
        }
        effects
    }

    fn start_next_queued_prompt(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: &str,
    ) -> Vec<Effect> {
        let Some(thread) = self.thread_mut(workspace_id, thread_id) else {
            return Vec::new();
        };
        let Some(prompt) = thread.queued_prompts.pop_front() else {
            return Vec::new();
        };
        self.dispatch_turn(
            workspace_id,
            thread_id,
            prompt.text,
            prompt.attachments,
            None,
            true,
            false,
        )
    }

    fn handle_approval_requested(
        &mut self,
        workspace_id: WorkspaceId,
        thread_id: String,
        request_id: String,
        command: String,
    ) -> Vec<Effect> {
        let target = self
            .event_target_id(workspace_id, &thread_id)
            .unwrap_or(thread_id);
        let tokens = approvals::tokenize_command(&command)
            .unwrap_or_else(|| command.split_whitespace().map(ToOwned::to_owned).collect());

        if self.approval_gate.should_auto_accept(workspace_id, &tokens) {
            let engine = self.engine_for_request(workspace_id, &target);
            return vec![Effect::RespondApproval {
                workspace_id,
                engine,
                request_id,
                accept: true,
            }];
        }

        let Some(workspace) = self.workspace_mut(workspace_id) else {
            return Vec::new();
        };
        workspace.approvals.push_back(ApprovalRequest {
            workspace_id,
            thread_id: target,
            request_id,
            command,
            tokens,
        });
        Vec::new()
    }

    fn handle_approval_decision(
        &mut self,
        workspace_id: WorkspaceId,
        request_id: String,
        accept: bool,
        remember_prefix: bool,
    ) -> Vec<Effect> {
        let Some(workspace) = self.workspace_mut(workspace_id) else {
            return Vec::new();
        };
        let Some(position) = workspace
            .approvals
            .iter()
            .position(|r| r.request_id == request_id)
        else {
            return Vec::new();
        };
        let Some(request) = workspace.approvals.remove(position) else {
            return Vec::new();
        };
        let engine = self.engine_for_request(workspace_id, &request.thread_id);

        let mut effects = vec![Effect::RespondApproval {
            workspace_id,
            engine,
            request_id: request.request_id,
            accept,
        }];
        if accept
            && remember_prefix
            && self
                .approval_gate
                .remember_prefix(workspace_id, request.tokens.clone())
        {
            effects.push(Effect::PersistAllowlist {
                workspace_id,
                allowlist: self.approval_gate.allowlist(workspace_id).to_vec(),
            });
        }
        effects
    }

    fn handle_session_assigned(
        &mut self,
        workspace_id: WorkspaceId,
        current_id: &str,
        session_id: String,
        engine_hint: Option<String>,
    ) -> Vec<Effect> {
        let Some(workspace) = self.workspace(workspace_id) else {
            return Vec::new();
        };

        let engine = engine_for_session_assignment(current_id, engine_hint.as_deref())
            .or_else(|| {
                // Last resort: the single currently-pending provisional
                // thread for this workspace, when unambiguous.
                let mut pending = workspace
                    .threads
                    .keys()
                    .filter(|id| is_provisional_id(id));
                let first = pending.next()?;
                if pending.next().is_some() {
                    return None;
                }
                engine_of_id(first)
            });
        let Some(engine) = engine else {
            return Vec::new();
        };

        // The event may name a thread that no longer exists (or a bare id);
        // fall back to the unique pending provisional thread for the engine.
        let current_matches = workspace.threads.get(current_id).is_some_and(|thread| {
            !thread.engine_confirmed || thread.engine == engine
        });
        let old_id = if current_matches {
            current_id.to_owned()
        } else {
            let mut pending = workspace
                .threads
                .keys()
                .filter(|id| engine_of_id(id) == Some(engine) && is_provisional_id(id));
            let Some(first) = pending.next() else {
                return Vec::new();
            };
            if pending.next().is_some() {
                return Vec::new();
            }
            first.clone()
        };

        let new_id = durable_thread_id(engine, &session_id);
        if new_id == old_id {
            // Already renamed; the assignment is idempotent.
            return Vec::new();
        }
        self.rename_thread(workspace_id, &old_id, &new_id, engine)
    }

    fn rename_thread(
        &mut self,
        workspace_id: WorkspaceId,
        old_id: &str,
        new_id: &str,
        engine: EngineKind,
    ) -> Vec<Effect> {
        let Some(workspace) = self.workspace_mut(workspace_id) else {
            return Vec::new();
        };
        let Some(mut thread) = workspace.threads.remove(old_id) else {
            return Vec::new();
        };
        thread.id = new_id.to_owned();
        thread.engine = engine;
        thread.engine_confirmed = true;

        let title = thread.entries.iter().find_map(|entry| match entry {
            ThreadEntry::UserMessage { text, .. } => Some(derive_thread_title(text)),
            _ => None,
        });
        workspace.threads.insert(new_id.to_owned(), thread);

        if workspace.active_thread_id.as_deref() == Some(old_id) {
            workspace.active_thread_id = Some(new_id.to_owned());
        }
        for request in workspace.approvals.iter_mut() {
            if request.thread_id == old_id {
                request.thread_id = new_id.to_owned();
            }
        }
        for request in workspace.user_inputs.iter_mut() {
            if request.thread_id == old_id {
                request.thread_id = new_id.to_owned();
            }
        }
        if let Some(picker) = workspace.review_picker.as_mut()
            && picker.thread_id.as_deref() == Some(old_id)
        {
            picker.thread_id = Some(new_id.to_owned());
        }
        let lineage_ids: Vec<String> = workspace.threads.keys().cloned().collect();
        for id in lineage_ids {
            if let Some(other) = workspace.threads.get_mut(&id) {
                if other.parent_id.as_deref() == Some(old_id) {
                    other.parent_id = Some(new_id.to_owned());
                }
                for child in other.child_ids.iter_mut() {
                    if child == old_id {
                        *child = new_id.to_owned();
                    }
                }
            }
        }

        // Decoration indices move by rename, never by re-derivation.
        if let Some(name) = self
            .custom_names
            .remove(&(workspace_id, old_id.to_owned()))
        {
            self.custom_names
                .insert((workspace_id, new_id.to_owned()), name);
        }
        if let Some(at) = self.pinned_at.remove(&(workspace_id, old_id.to_owned())) {
            self.pinned_at.insert((workspace_id, new_id.to_owned()), at);
        }
        if let Some(at) = self
            .last_activity
            .remove(&(workspace_id, old_id.to_owned()))
        {
            self.last_activity
                .insert((workspace_id, new_id.to_owned()), at);
        }
        if self
            .pending_interrupts
            .remove(&(workspace_id, old_id.to_owned()))
        {
            self.pending_interrupts
                .insert((workspace_id, new_id.to_owned()));
        }

        self.aliases
            .insert(workspace_id, old_id.to_owned(), new_id.to_owned());

        let mut effects = vec![Effect::RenamePersistedThread {
            workspace_id,
            old_id: old_id.to_owned(),
            new_id: new_id.to_owned(),
        }];
        if let Some(title) = title
            && !title.is_empty()
        {
            effects.push(Effect::UpdateThreadTitle {
                workspace_id,
                thread_id: new_id.to_owned(),
                title,
            });
        }
        effects
    }

    fn merge_refreshed_threads(
        &mut self,
        workspace_id: WorkspaceId,
        sessions: Vec<ImportableSession>,
    ) {
        let activity: Vec<(String, u64)> = sessions
            .iter()
            .map(|session| {
                let id = durable_thread_id(session.engine, &session.session_id);
                let at = self
                    .last_activity
                    .get(&(workspace_id, id.clone()))
                    .copied()
                    .unwrap_or(session.updated_at_unix_seconds.saturating_mul(1000));
                (id, at)
            })
            .collect();
        let Some(workspace) = self.workspace_mut(workspace_id) else {
            return;
        };
        for (session, (id, at)) in sessions.iter().zip(activity) {
            // Known threads keep their in-memory state, including anything
            // mid-flight.
            workspace.threads.entry(id.clone()).or_insert_with(|| {
                let mut thread = Thread::new(id.clone(), workspace_id, session.engine);
                thread.engine_confirmed = true;
                thread.last_activity_at_unix_ms = at;
                thread
            });
        }
    }
}

enum TerminalKind {
    Completed {
        usage: Option<crate::TokenUsage>,
    },
    Errored {
        message: String,
    },
}

enum TerminalApplied {
    Completed,
    Errored,
    ErroredSuppressed,
}

#[cfg(test)]
mod tests;
