use super::thread_title;
use anyhow::anyhow;
use tiller_api as api;
use tiller_domain::{
    Action, AppState, EngineKind, ReviewPickerLevel, ReviewPickerOption, Thread, ThreadEntry,
    ThreadItem, ThreadStatus, ThinkingEffort, TokenUsage, TurnState, Workspace, WorkspaceId,
};

fn api_engine(engine: EngineKind) -> api::EngineKind {
    match engine {
        EngineKind::Claude => api::EngineKind::Claude,
        EngineKind::Codex => api::EngineKind::Codex,
        EngineKind::Opencode => api::EngineKind::Opencode,
    }
}

fn domain_engine(engine: api::EngineKind) -> EngineKind {
    match engine {
        api::EngineKind::Claude => EngineKind::Claude,
        api::EngineKind::Codex => EngineKind::Codex,
        api::EngineKind::Opencode => EngineKind::Opencode,
    }
}

fn api_status(status: ThreadStatus) -> api::ThreadStatus {
    match status {
        ThreadStatus::Idle => api::ThreadStatus::Idle,
        ThreadStatus::Processing => api::ThreadStatus::Processing,
        ThreadStatus::Reviewing => api::ThreadStatus::Reviewing,
    }
}

fn api_turn(turn: TurnState) -> api::TurnState {
    match turn {
        TurnState::None => api::TurnState::None,
        TurnState::Starting => api::TurnState::Starting,
        TurnState::Active => api::TurnState::Active,
        TurnState::Completed => api::TurnState::Completed,
        TurnState::Errored => api::TurnState::Errored,
        TurnState::Interrupted => api::TurnState::Interrupted,
    }
}

fn api_effort(effort: ThinkingEffort) -> api::ThinkingEffort {
    match effort {
        ThinkingEffort::Minimal => api::ThinkingEffort::Minimal,
        ThinkingEffort::Low => api::ThinkingEffort::Low,
        ThinkingEffort::Medium => api::ThinkingEffort::Medium,
        ThinkingEffort::High => api::ThinkingEffort::High,
        ThinkingEffort::XHigh => api::ThinkingEffort::XHigh,
    }
}

fn api_access(access: tiller_domain::AccessMode) -> api::AccessMode {
    match access {
        tiller_domain::AccessMode::ReadOnly => api::AccessMode::ReadOnly,
        tiller_domain::AccessMode::Edits => api::AccessMode::Edits,
        tiller_domain::AccessMode::FullAccess => api::AccessMode::FullAccess,
    }
}

fn api_usage(usage: &TokenUsage) -> api::TokenUsageSnapshot {
    api::TokenUsageSnapshot {
        input_tokens: usage.input_tokens,
        cached_input_tokens: usage.cached_input_tokens,
        output_tokens: usage.output_tokens,
    }
}

fn api_attachment(attachment: &tiller_domain::AttachmentRef) -> api::AttachmentRef {
    api::AttachmentRef {
        id: attachment.id.clone(),
        kind: match attachment.kind {
            tiller_domain::AttachmentKind::Image => api::AttachmentKind::Image,
            tiller_domain::AttachmentKind::Text => api::AttachmentKind::Text,
            tiller_domain::AttachmentKind::File => api::AttachmentKind::File,
        },
        name: attachment.name.clone(),
        extension: attachment.extension.clone(),
        mime: attachment.mime.clone(),
        byte_len: attachment.byte_len,
    }
}

fn domain_attachment(attachment: api::AttachmentRef) -> tiller_domain::AttachmentRef {
    tiller_domain::AttachmentRef {
        id: attachment.id,
        kind: match attachment.kind {
            api::AttachmentKind::Image => tiller_domain::AttachmentKind::Image,
            api::AttachmentKind::Text => tiller_domain::AttachmentKind::Text,
            api::AttachmentKind::File => tiller_domain::AttachmentKind::File,
        },
        name: attachment.name,
        extension: attachment.extension,
        mime: attachment.mime,
        byte_len: attachment.byte_len,
    }
}

fn item_kind(item: &ThreadItem) -> api::AgentItemKind {
    match item {
        ThreadItem::AgentMessage { .. } => api::AgentItemKind::AgentMessage,
        ThreadItem::Reasoning { .. } => api::AgentItemKind::Reasoning,
        ThreadItem::CommandExecution { .. } => api::AgentItemKind::CommandExecution,
        ThreadItem::FileChange { .. } => api::AgentItemKind::FileChange,
        ThreadItem::ToolCall { .. } => api::AgentItemKind::ToolCall,
        ThreadItem::WebSearch { .. } => api::AgentItemKind::WebSearch,
        ThreadItem::Plan { .. } => api::AgentItemKind::Plan,
        ThreadItem::Error { .. } => api::AgentItemKind::Error,
    }
}

fn api_entry(entry: &ThreadEntry) -> api::ThreadEntrySnapshot {
    match entry {
        ThreadEntry::UserMessage { text, attachments } => api::ThreadEntrySnapshot::UserMessage {
            text: text.clone(),
            attachments: attachments.iter().map(api_attachment).collect(),
        },
        ThreadEntry::AgentItem { item } => api::ThreadEntrySnapshot::AgentItem {
            item: api::AgentItemSnapshot {
                id: item.id().to_owned(),
                kind: item_kind(item),
                payload: serde_json::to_value(item.as_ref()).unwrap_or_default(),
            },
        },
        ThreadEntry::TurnUsage { usage } => api::ThreadEntrySnapshot::TurnUsage {
            usage: usage.as_ref().map(api_usage),
        },
        ThreadEntry::SessionStopped => api::ThreadEntrySnapshot::SessionStopped,
        ThreadEntry::TurnError { message } => api::ThreadEntrySnapshot::TurnError {
            message: message.clone(),
        },
        ThreadEntry::ContextCompacted => api::ThreadEntrySnapshot::ContextCompacted,
        ThreadEntry::SystemNote { text } => api::ThreadEntrySnapshot::SystemNote {
            text: text.clone(),
        },
    }
}

fn thread_meta(state: &AppState, workspace_id: WorkspaceId, thread: &Thread) -> api::ThreadMeta {
    api::ThreadMeta {
        thread_id: thread.id.clone(),
        engine: api_engine(thread.engine),
        title: thread_title(state, workspace_id, thread),
        custom_name: state
            .custom_name(workspace_id, &thread.id)
            .map(ToOwned::to_owned),
        pinned_at_unix_ms: state
            .pinned_at
            .get(&(workspace_id, thread.id.clone()))
            .copied(),
        status: api_status(thread.status),
        turn: api_turn(thread.turn),
        last_activity_at_unix_ms: thread.last_activity_at_unix_ms,
        parent_id: thread.parent_id.clone(),
    }
}

fn workspace_snapshot(state: &AppState, workspace: &Workspace) -> api::WorkspaceSnapshot {
    let mut threads: Vec<api::ThreadMeta> = workspace
        .threads
        .values()
        .map(|thread| thread_meta(state, workspace.id, thread))
        .collect();
    // Pinned threads first (most recently pinned on top), then by activity.
    threads.sort_by(|a, b| match (b.pinned_at_unix_ms, a.pinned_at_unix_ms) {
        (Some(b_pin), Some(a_pin)) => b_pin.cmp(&a_pin),
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (None, None) => b.last_activity_at_unix_ms.cmp(&a.last_activity_at_unix_ms),
    });

    let review_picker = workspace.review_picker.as_ref().map(|picker| {
        let (highlighted, argument_input) = match &picker.level {
            ReviewPickerLevel::Root { highlighted } => (Some(*highlighted), None),
            ReviewPickerLevel::Argument { input, .. } => (None, Some(input.clone())),
        };
        api::ReviewPickerSnapshot {
            thread_id: picker.thread_id.clone(),
            options: ReviewPickerOption::ALL
                .iter()
                .map(|option| option.label().to_owned())
                .collect(),
            highlighted,
            argument_input,
        }
    });

    api::WorkspaceSnapshot {
        id: api::WorkspaceId(workspace.id.as_u64()),
        name: workspace.name.clone(),
        root_path: workspace.root_path.to_string_lossy().into_owned(),
        active_thread_id: workspace.active_thread_id.clone(),
        threads,
        approvals: workspace
            .approvals
            .iter()
            .map(|request| api::ApprovalRequestSnapshot {
                thread_id: request.thread_id.clone(),
                request_id: request.request_id.clone(),
                command: request.command.clone(),
                tokens: request.tokens.clone(),
            })
            .collect(),
        user_inputs: workspace
            .user_inputs
            .iter()
            .map(|request| api::UserInputRequestSnapshot {
                thread_id: request.thread_id.clone(),
                request_id: request.request_id.clone(),
                questions: request
                    .questions
                    .iter()
                    .map(|question| api::UserInputQuestionSnapshot {
                        key: question.key.clone(),
                        prompt: question.prompt.clone(),
                        options: question.options.clone(),
                    })
                    .collect(),
            })
            .collect(),
        review_spec_root: workspace.review_spec_root.clone(),
        review_picker,
        import_candidates: workspace
            .import_candidates
            .iter()
            .map(|session| api::ImportableSessionSnapshot {
                engine: api_engine(session.engine),
                session_id: session.session_id.clone(),
                title: session.title.clone(),
                updated_at_unix_seconds: session.updated_at_unix_seconds,
            })
            .collect(),
    }
}

pub(super) fn build_app_snapshot(state: &AppState, rev: u64) -> api::AppSnapshot {
    api::AppSnapshot {
        rev,
        selected_engine: api_engine(state.selected_engine),
        workspaces: state
            .workspaces
            .iter()
            .map(|workspace| workspace_snapshot(state, workspace))
            .collect(),
        last_error: state.last_error.clone(),
    }
}

pub(super) fn build_thread_snapshot(
    state: &AppState,
    rev: u64,
    workspace_id: WorkspaceId,
    thread_id: &str,
) -> anyhow::Result<api::ThreadSnapshot> {
    let thread = state
        .thread(workspace_id, thread_id)
        .ok_or_else(|| anyhow!("unknown thread {thread_id}"))?;
    Ok(api::ThreadSnapshot {
        rev,
        workspace_id: api::WorkspaceId(workspace_id.as_u64()),
        thread_id: thread.id.clone(),
        engine: api_engine(thread.engine),
        status: api_status(thread.status),
        turn: api_turn(thread.turn),
        active_turn_id: thread.active_turn_id.clone(),
        entries: thread.entries.iter().map(api_entry).collect(),
        usage: thread.usage.as_ref().map(api_usage),
        queued_prompts: thread
            .queued_prompts
            .iter()
            .map(|prompt| api::QueuedPromptSnapshot {
                id: prompt.id,
                text: prompt.text.clone(),
                attachments: prompt.attachments.iter().map(api_attachment).collect(),
            })
            .collect(),
        parent_id: thread.parent_id.clone(),
        child_ids: thread.child_ids.clone(),
        model_id: thread.model_id.clone(),
        effort: api_effort(thread.effort),
        access_mode: api_access(thread.access_mode),
    })
}

fn domain_picker_key(key: api::PickerKey) -> tiller_domain::PickerKey {
    match key {
        api::PickerKey::Up => tiller_domain::PickerKey::Up,
        api::PickerKey::Down => tiller_domain::PickerKey::Down,
        api::PickerKey::Enter => tiller_domain::PickerKey::Enter,
        api::PickerKey::Escape => tiller_domain::PickerKey::Escape,
        api::PickerKey::Backspace => tiller_domain::PickerKey::Backspace,
    }
}

pub(super) fn convert_client_action(action: api::ClientAction) -> Vec<Action> {
    match action {
        api::ClientAction::RegisterWorkspace { name, root_path } => {
            vec![Action::RegisterWorkspace {
                name,
                root_path: root_path.into(),
            }]
        }
        api::ClientAction::SelectEngine { engine } => vec![Action::EngineSelected {
            engine: domain_engine(engine),
        }],
        api::ClientAction::ActivateThread {
            workspace_id,
            thread_id,
        } => vec![Action::ActivateThread {
            workspace_id: WorkspaceId::from_u64(workspace_id.0),
            thread_id,
        }],
        api::ClientAction::StartNewThread { workspace_id } => vec![Action::StartNewThread {
            workspace_id: WorkspaceId::from_u64(workspace_id.0),
        }],
        api::ClientAction::SetThreadName {
            workspace_id,
            thread_id,
            name,
        } => vec![Action::SetThreadName {
            workspace_id: WorkspaceId::from_u64(workspace_id.0),
            thread_id,
            name,
        }],
        api::ClientAction::SetThreadPinned {
            workspace_id,
            thread_id,
            pinned,
        } => vec![Action::SetThreadPinned {
            workspace_id: WorkspaceId::from_u64(workspace_id.0),
            thread_id,
            pinned,
        }],
        api::ClientAction::SubmitComposer {
            workspace_id,
            thread_id,
            text,
            attachments,
        } => vec![Action::ComposerSubmitted {
            workspace_id: WorkspaceId::from_u64(workspace_id.0),
            thread_id,
            text,
            attachments: attachments.into_iter().map(domain_attachment).collect(),
        }],
        api::ClientAction::InterruptThread {
            workspace_id,
            thread_id,
        } => vec![Action::InterruptThread {
            workspace_id: WorkspaceId::from_u64(workspace_id.0),
            thread_id,
        }],
        api::ClientAction::DecideApproval {
            workspace_id,
            request_id,
            accept,
            remember_prefix,
        } => vec![Action::ApprovalDecided {
            workspace_id: WorkspaceId::from_u64(workspace_id.0),
            request_id,
            accept,
            remember_prefix,
        }],
        api::ClientAction::AnswerUserInput {
            workspace_id,
            request_id,
            answers,
        } => vec![Action::UserInputAnswered {
            workspace_id: WorkspaceId::from_u64(workspace_id.0),
            request_id,
            answers,
        }],
        api::ClientAction::ReviewPickerKey { workspace_id, key } => {
            vec![Action::ReviewPickerKey {
                workspace_id: WorkspaceId::from_u64(workspace_id.0),
                key: domain_picker_key(key),
            }]
        }
        api::ClientAction::ReviewPickerInput { workspace_id, text } => {
            let workspace_id = WorkspaceId::from_u64(workspace_id.0);
            text.chars()
                .map(|c| Action::ReviewPickerKey {
                    workspace_id,
                    key: tiller_domain::PickerKey::Char(c),
                })
                .collect()
        }
        api::ClientAction::ImportSession {
            workspace_id,
            engine,
            session_id,
        } => vec![Action::ImportSession {
            workspace_id: WorkspaceId::from_u64(workspace_id.0),
            engine: domain_engine(engine),
            session_id,
        }],
        api::ClientAction::ClearError => vec![Action::ClearError],
    }
}
