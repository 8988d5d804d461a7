use crate::*;
use std::path::PathBuf;

fn state_with_workspace() -> (AppState, WorkspaceId) {
    let mut state = AppState::new();
    state.apply(Action::RegisterWorkspace {
        name: "main".to_owned(),
        root_path: PathBuf::from("/tmp/project"),
    });
    let workspace_id = state.workspaces[0].id;
    (state, workspace_id)
}

fn submit(state: &mut AppState, workspace_id: WorkspaceId, text: &str) -> Vec<Effect> {
    state.apply(Action::ComposerSubmitted {
        workspace_id,
        thread_id: None,
        text: text.to_owned(),
        attachments: Vec::new(),
    })
}

fn active_thread_id(state: &AppState, workspace_id: WorkspaceId) -> String {
    state
        .workspace(workspace_id)
        .and_then(|w| w.active_thread_id.clone())
        .expect("active thread")
}

fn sent_turn(effects: &[Effect]) -> (String, u64) {
    effects
        .iter()
        .find_map(|effect| match effect {
            Effect::SendToEngine { thread_id, seq, .. } => Some((thread_id.clone(), *seq)),
            _ => None,
        })
        .expect("SendToEngine effect")
}

fn thread_event(
    state: &mut AppState,
    workspace_id: WorkspaceId,
    thread_id: &str,
    seq: u64,
    event: ThreadEvent,
) -> Vec<Effect> {
    state.apply(Action::ThreadEventReceived {
        workspace_id,
        thread_id: thread_id.to_owned(),
        seq,
        event,
    })
}

#[test]
fn send_with_empty_text_and_no_attachments_is_a_no_op() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "   ");
    assert!(effects.is_empty());
    assert!(
        state
            .workspace(workspace_id)
            .expect("workspace")
            .threads
            .is_empty()
    );
}

#[test]
fn send_mints_provisional_thread_for_session_engine() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Opencode,
    });

    let effects = submit(&mut state, workspace_id, "hello");
    let (thread_id, _seq) = sent_turn(&effects);

    assert!(thread_id.starts_with("opencode-pending-"));
    assert_eq!(active_thread_id(&state, workspace_id), thread_id);

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Processing);
    assert_eq!(thread.turn, TurnState::Starting);
    assert_eq!(thread.engine, EngineKind::Opencode);
    assert!(matches!(
        thread.entries.first(),
        Some(ThreadEntry::UserMessage { text, .. }) if text == "hello"
    ));
}

#[test]
fn send_mints_bare_thread_for_event_driven_engine() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hello");
    let (thread_id, _) = sent_turn(&effects);

    assert_eq!(engine_of_id(&thread_id), None);
    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.engine, EngineKind::Claude);
}

#[test]
fn session_assignment_renames_thread_and_moves_decorations() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Opencode,
    });
    let effects = submit(&mut state, workspace_id, "hello");
    let (provisional_id, _) = sent_turn(&effects);

    state.apply(Action::SetThreadName {
        workspace_id,
        thread_id: provisional_id.clone(),
        name: Some("my thread".to_owned()),
    });
    state.apply(Action::SetThreadPinned {
        workspace_id,
        thread_id: provisional_id.clone(),
        pinned: true,
    });

    let effects = thread_event(
        &mut state,
        workspace_id,
        &provisional_id,
        1,
        ThreadEvent::SessionIdAssigned {
            session_id: "ses_1".to_owned(),
            engine_hint: None,
        },
    );

    let durable_id = "opencode:ses_1";
    assert!(state.thread(workspace_id, &provisional_id).is_none());
    let thread = state.thread(workspace_id, durable_id).expect("renamed thread");
    assert_eq!(thread.status, ThreadStatus::Processing);
    assert!(thread.engine_confirmed);
    assert_eq!(active_thread_id(&state, workspace_id), durable_id);
    assert_eq!(state.custom_name(workspace_id, durable_id), Some("my thread"));
    assert!(state.is_pinned(workspace_id, durable_id));
    assert!(!state.is_pinned(workspace_id, &provisional_id));
    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::RenamePersistedThread { old_id, new_id, .. }
            if old_id == &provisional_id && new_id == durable_id
    )));
}

#[test]
fn session_assignment_is_idempotent() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    });
    let effects = submit(&mut state, workspace_id, "hi");
    let (provisional_id, _) = sent_turn(&effects);

    let first = thread_event(
        &mut state,
        workspace_id,
        &provisional_id,
        1,
        ThreadEvent::SessionIdAssigned {
            session_id: "xyz".to_owned(),
            engine_hint: None,
        },
    );
    assert!(!first.is_empty());

    let second = thread_event(
        &mut state,
        workspace_id,
        "codex:xyz",
        1,
        ThreadEvent::SessionIdAssigned {
            session_id: "xyz".to_owned(),
            engine_hint: None,
        },
    );
    assert!(second.is_empty());
    assert!(state.thread(workspace_id, "codex:xyz").is_some());
}

#[test]
fn session_assignment_without_prefix_or_hint_uses_unique_pending_thread() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    });
    let effects = submit(&mut state, workspace_id, "hi");
    let (provisional_id, _) = sent_turn(&effects);

    // The event names neither an engine-prefixed id nor a hint.
    thread_event(
        &mut state,
        workspace_id,
        "unrelated-tag",
        1,
        ThreadEvent::SessionIdAssigned {
            session_id: "ses_9".to_owned(),
            engine_hint: None,
        },
    );

    assert!(state.thread(workspace_id, &provisional_id).is_none());
    assert!(state.thread(workspace_id, "codex:ses_9").is_some());
}

#[test]
fn session_assignment_is_dropped_when_two_engines_have_pending_threads() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    });
    submit(&mut state, workspace_id, "one");
    state.apply(Action::StartNewThread { workspace_id });
    state.apply(Action::EngineSelected {
        engine: EngineKind::Opencode,
    });
    submit(&mut state, workspace_id, "two");

    let effects = thread_event(
        &mut state,
        workspace_id,
        "unrelated-tag",
        1,
        ThreadEvent::SessionIdAssigned {
            session_id: "ses_1".to_owned(),
            engine_hint: None,
        },
    );
    assert!(effects.is_empty());
    assert!(state.thread(workspace_id, "codex:ses_1").is_none());
    assert!(state.thread(workspace_id, "opencode:ses_1").is_none());
}

#[test]
fn late_turn_completed_under_provisional_id_lands_on_renamed_thread() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    });
    let effects = submit(&mut state, workspace_id, "hi");
    let (provisional_id, seq) = sent_turn(&effects);

    thread_event(
        &mut state,
        workspace_id,
        &provisional_id,
        seq,
        ThreadEvent::SessionIdAssigned {
            session_id: "xyz".to_owned(),
            engine_hint: None,
        },
    );
    thread_event(
        &mut state,
        workspace_id,
        &provisional_id,
        seq,
        ThreadEvent::TurnStarted {
            turn_id: "turn_1".to_owned(),
        },
    );

    // Terminal event still tagged with the pre-rename id.
    thread_event(
        &mut state,
        workspace_id,
        &provisional_id,
        seq,
        ThreadEvent::TurnCompleted { usage: None },
    );

    let thread = state.thread(workspace_id, "codex:xyz").expect("thread");
    assert_eq!(thread.status, ThreadStatus::Idle);
    assert_eq!(thread.turn, TurnState::Completed);
    assert_eq!(thread.active_turn_id, None);
    assert!(state.aliases.is_empty());
}

#[test]
fn turn_error_with_will_retry_is_ignored() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);
    state.apply(Action::SendAcknowledged {
        workspace_id,
        thread_id: thread_id.clone(),
        seq,
        turn_id: Some("turn_1".to_owned()),
        error: None,
    });

    thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::TurnError {
            message: "transient".to_owned(),
            will_retry: true,
        },
    );

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Processing);
    assert_eq!(thread.turn, TurnState::Active);
    assert!(state.last_error.is_none());
}

#[test]
fn terminal_turn_error_is_surfaced_and_resets_thread() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);
    state.apply(Action::SendAcknowledged {
        workspace_id,
        thread_id: thread_id.clone(),
        seq,
        turn_id: Some("turn_1".to_owned()),
        error: None,
    });

    thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::TurnError {
            message: "model overloaded".to_owned(),
            will_retry: false,
        },
    );

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Idle);
    assert_eq!(thread.turn, TurnState::Errored);
    assert!(thread.entries.iter().any(|entry| matches!(
        entry,
        ThreadEntry::TurnError { message } if message == "model overloaded"
    )));
    assert_eq!(state.last_error.as_deref(), Some("model overloaded"));
}

#[test]
fn interrupt_posts_stopped_message_and_suppresses_later_error() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);
    state.apply(Action::SendAcknowledged {
        workspace_id,
        thread_id: thread_id.clone(),
        seq,
        turn_id: Some("turn_1".to_owned()),
        error: None,
    });

    let effects = state.apply(Action::InterruptThread {
        workspace_id,
        thread_id: thread_id.clone(),
    });
    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::InterruptEngine { turn_id: Some(id), .. } if id == "turn_1"
    )));

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Idle);
    assert_eq!(thread.turn, TurnState::Interrupted);
    assert!(thread
        .entries
        .iter()
        .any(|entry| matches!(entry, ThreadEntry::SessionStopped)));

    // The backend's own terminal error for the canceled turn is swallowed.
    thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::TurnError {
            message: "canceled".to_owned(),
            will_retry: false,
        },
    );
    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.turn, TurnState::Interrupted);
    assert!(!thread
        .entries
        .iter()
        .any(|entry| matches!(entry, ThreadEntry::TurnError { .. })));
    assert!(state.last_error.is_none());
}

#[test]
fn interrupt_before_turn_id_fires_once_turn_started_arrives() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    });
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);

    // No turn id yet: the interrupt is recorded, not delivered.
    let effects = state.apply(Action::InterruptThread {
        workspace_id,
        thread_id: thread_id.clone(),
    });
    assert!(effects.is_empty());
    assert!(
        state
            .pending_interrupts
            .contains(&(workspace_id, thread_id.clone()))
    );
    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Idle);

    let effects = thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::TurnStarted {
            turn_id: "turn_7".to_owned(),
        },
    );
    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::InterruptEngine { engine: EngineKind::Codex, turn_id: Some(id), .. } if id == "turn_7"
    )));

    // The thread never transitions back to processing.
    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Idle);
    assert_eq!(thread.turn, TurnState::Interrupted);
    assert!(state.pending_interrupts.is_empty());
}

#[test]
fn interrupt_uses_thread_engine_not_global_selection() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Opencode,
    });
    submit(&mut state, workspace_id, "/resume opencode:session-1");
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);
    assert_eq!(thread_id, "opencode:session-1");
    thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::TurnStarted {
            turn_id: "turn-9".to_owned(),
        },
    );

    state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    });
    let effects = state.apply(Action::InterruptThread {
        workspace_id,
        thread_id: thread_id.clone(),
    });

    let engines: Vec<EngineKind> = effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::InterruptEngine { engine, .. } => Some(*engine),
            _ => None,
        })
        .collect();
    assert_eq!(engines, vec![EngineKind::Opencode]);
}

#[test]
fn interrupt_fires_both_engines_when_turn_is_stale() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Opencode,
    });
    submit(&mut state, workspace_id, "/resume opencode:ses_1");
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);
    thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::TurnStarted {
            turn_id: "turn_1".to_owned(),
        },
    );
    // An engine switch left the outstanding turn owned by another engine.
    state
        .thread_mut(workspace_id, &thread_id)
        .expect("thread")
        .turn_engine = Some(EngineKind::Codex);

    let effects = state.apply(Action::InterruptThread {
        workspace_id,
        thread_id: thread_id.clone(),
    });
    let engines: Vec<EngineKind> = effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::InterruptEngine { engine, .. } => Some(*engine),
            _ => None,
        })
        .collect();
    assert_eq!(engines, vec![EngineKind::Codex, EngineKind::Opencode]);
}

#[test]
fn send_under_newly_selected_engine_starts_fresh_thread() {
    let (mut state, workspace_id) = state_with_workspace();
    submit(&mut state, workspace_id, "/resume codex:ses_1");
    state.apply(Action::EngineSelected {
        engine: EngineKind::Opencode,
    });

    let effects = submit(&mut state, workspace_id, "hello");
    let (thread_id, _) = sent_turn(&effects);

    assert!(thread_id.starts_with("opencode-pending-"));
    let old = state.thread(workspace_id, "codex:ses_1").expect("old thread");
    assert_eq!(old.status, ThreadStatus::Idle);
    assert!(old.entries.is_empty());
}

#[test]
fn sync_protocol_error_resets_thread_with_visible_error() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);

    state.apply(Action::SendAcknowledged {
        workspace_id,
        thread_id: thread_id.clone(),
        seq,
        turn_id: None,
        error: Some("backend rejected request".to_owned()),
    });

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Idle);
    assert_eq!(thread.turn, TurnState::Errored);
    assert!(thread.entries.iter().any(|entry| matches!(
        entry,
        ThreadEntry::TurnError { message } if message == "backend rejected request"
    )));
}

#[test]
fn missing_turn_id_from_event_driven_engine_fails_the_turn() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);

    state.apply(Action::SendAcknowledged {
        workspace_id,
        thread_id: thread_id.clone(),
        seq,
        turn_id: None,
        error: None,
    });

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.turn, TurnState::Errored);
    assert!(thread.entries.iter().any(|entry| matches!(
        entry,
        ThreadEntry::TurnError { message } if message == "turn failed to start"
    )));
}

#[test]
fn missing_turn_id_is_fine_for_session_engines() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    });
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);

    state.apply(Action::SendAcknowledged {
        workspace_id,
        thread_id: thread_id.clone(),
        seq,
        turn_id: None,
        error: None,
    });

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Processing);
    assert_eq!(thread.turn, TurnState::Starting);
}

#[test]
fn transport_failure_resets_thread_and_surfaces_message() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);

    state.apply(Action::SendFailed {
        workspace_id,
        thread_id: thread_id.clone(),
        seq,
        message: "failed to spawn claude".to_owned(),
    });

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Idle);
    assert_eq!(thread.turn, TurnState::Errored);
    assert_eq!(state.last_error.as_deref(), Some("failed to spawn claude"));
}

#[test]
fn approval_with_no_matching_prefix_is_surfaced() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);

    let effects = thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::ApprovalRequested {
            request_id: "req_1".to_owned(),
            command: "rm -rf /tmp/x".to_owned(),
        },
    );
    assert!(effects.is_empty());

    let workspace = state.workspace(workspace_id).expect("workspace");
    assert_eq!(workspace.approvals.len(), 1);
    assert_eq!(
        workspace.approvals[0].tokens,
        vec!["rm".to_owned(), "-rf".to_owned(), "/tmp/x".to_owned()]
    );
}

#[test]
fn remembered_prefix_auto_accepts_identical_future_proposal() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);

    state
        .approval_gate
        .remember_prefix(workspace_id, vec!["rm".to_owned(), "-rf".to_owned()]);

    let effects = thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::ApprovalRequested {
            request_id: "req_2".to_owned(),
            command: "rm -rf /tmp/x".to_owned(),
        },
    );

    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::RespondApproval { request_id, accept: true, .. } if request_id == "req_2"
    )));
    let workspace = state.workspace(workspace_id).expect("workspace");
    assert!(workspace.approvals.is_empty());
}

#[test]
fn approval_decision_remembers_prefix_once() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);

    thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::ApprovalRequested {
            request_id: "req_1".to_owned(),
            command: "git push origin main".to_owned(),
        },
    );

    let effects = state.apply(Action::ApprovalDecided {
        workspace_id,
        request_id: "req_1".to_owned(),
        accept: true,
        remember_prefix: true,
    });
    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::RespondApproval { accept: true, .. }
    )));
    assert!(effects
        .iter()
        .any(|effect| matches!(effect, Effect::PersistAllowlist { .. })));

    // An identical proposal now auto-accepts without a record.
    let effects = thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::ApprovalRequested {
            request_id: "req_2".to_owned(),
            command: "git push origin main".to_owned(),
        },
    );
    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::RespondApproval { accept: true, .. }
    )));
    assert!(
        state
            .workspace(workspace_id)
            .expect("workspace")
            .approvals
            .is_empty()
    );
}

#[test]
fn steering_message_queues_for_session_engines() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    });
    let effects = submit(&mut state, workspace_id, "first");
    let (thread_id, seq) = sent_turn(&effects);

    let effects = submit(&mut state, workspace_id, "second");
    assert!(effects.is_empty());

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.queued_prompts.len(), 1);
    // The message is echoed immediately, before any backend acknowledgment.
    assert!(thread.entries.iter().any(|entry| matches!(
        entry,
        ThreadEntry::UserMessage { text, .. } if text == "second"
    )));

    // Turn completion drains the queue into a new dispatch.
    let effects = thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::TurnCompleted { usage: None },
    );
    let (sent_thread, _) = sent_turn(&effects);
    assert_eq!(sent_thread, thread_id);
    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert!(thread.queued_prompts.is_empty());
    assert_eq!(thread.status, ThreadStatus::Processing);
    let second_count = thread
        .entries
        .iter()
        .filter(|entry| matches!(entry, ThreadEntry::UserMessage { text, .. } if text == "second"))
        .count();
    assert_eq!(second_count, 1);
}

#[test]
fn steering_rides_the_active_turn_for_event_driven_engine() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "first");
    let (thread_id, seq) = sent_turn(&effects);

    let effects = submit(&mut state, workspace_id, "also do this");
    let steering = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::SendToEngine {
                seq: s, steering, ..
            } => Some((*s, *steering)),
            _ => None,
        })
        .expect("steering send");
    assert_eq!(steering, (seq, true));

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert!(thread.queued_prompts.is_empty());
}

#[test]
fn review_picker_confirm_marks_thread_reviewing() {
    let (mut state, workspace_id) = state_with_workspace();
    submit(&mut state, workspace_id, "/review");
    assert!(
        state
            .workspace(workspace_id)
            .expect("workspace")
            .review_picker
            .is_some()
    );

    for _ in 0..3 {
        state.apply(Action::ReviewPickerKey {
            workspace_id,
            key: PickerKey::Down,
        });
    }
    let effects = state.apply(Action::ReviewPickerKey {
        workspace_id,
        key: PickerKey::Enter,
    });

    let review = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::SendToEngine {
                thread_id, review, ..
            } => Some((thread_id.clone(), review.clone())),
            _ => None,
        })
        .expect("review send");
    assert_eq!(review.1, Some(ReviewTarget::UncommittedChanges));

    let thread = state.thread(workspace_id, &review.0).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Reviewing);
    assert!(
        state
            .workspace(workspace_id)
            .expect("workspace")
            .review_picker
            .is_none()
    );
}

#[test]
fn review_picker_escape_closes_without_sending() {
    let (mut state, workspace_id) = state_with_workspace();
    submit(&mut state, workspace_id, "/review");
    let effects = state.apply(Action::ReviewPickerKey {
        workspace_id,
        key: PickerKey::Escape,
    });
    assert!(effects.is_empty());
    assert!(
        state
            .workspace(workspace_id)
            .expect("workspace")
            .review_picker
            .is_none()
    );
}

#[test]
fn spec_root_is_persisted_and_folded_into_review_requests() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "/spec-root docs/specs");
    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::PersistSpecRoot { spec_root: Some(root), .. } if root == "docs/specs"
    )));

    let effects = submit(&mut state, workspace_id, "/review base main");
    let text = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::SendToEngine { text, .. } => Some(text.clone()),
            _ => None,
        })
        .expect("review send");
    assert!(text.contains("main"));
    assert!(text.contains("docs/specs"));
}

#[test]
fn slash_resume_attaches_durable_thread_directly() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "/resume codex:ses_99");

    let thread = state.thread(workspace_id, "codex:ses_99").expect("thread");
    assert_eq!(thread.engine, EngineKind::Codex);
    assert!(thread.engine_confirmed);
    assert_eq!(active_thread_id(&state, workspace_id), "codex:ses_99");
    assert!(effects
        .iter()
        .any(|effect| matches!(effect, Effect::RefreshThreads { .. })));
}

#[test]
fn slash_resume_without_prefix_uses_selected_engine() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Opencode,
    });
    submit(&mut state, workspace_id, "/resume ses_5");
    assert!(state.thread(workspace_id, "opencode:ses_5").is_some());
}

#[test]
fn unknown_slash_text_takes_the_normal_send_path() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "/unknown do something");
    let (thread_id, _) = sent_turn(&effects);
    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Processing);
}

#[test]
fn fork_starts_child_thread_with_lineage() {
    let (mut state, workspace_id) = state_with_workspace();
    submit(&mut state, workspace_id, "/resume codex:ses_1");
    submit(&mut state, workspace_id, "/fork");

    let child_id = active_thread_id(&state, workspace_id);
    assert_ne!(child_id, "codex:ses_1");
    let child = state.thread(workspace_id, &child_id).expect("child");
    assert_eq!(child.parent_id.as_deref(), Some("codex:ses_1"));
    assert_eq!(child.engine, EngineKind::Codex);
    let parent = state.thread(workspace_id, "codex:ses_1").expect("parent");
    assert_eq!(parent.child_ids, vec![child_id]);
}

#[test]
fn threads_refresh_is_single_flight_per_workspace() {
    let (mut state, workspace_id) = state_with_workspace();
    // Registration left a refresh in flight; re-registering the same root
    // does not start another one.
    let effects = state.apply(Action::RegisterWorkspace {
        name: "main".to_owned(),
        root_path: PathBuf::from("/tmp/project"),
    });
    assert!(!effects
        .iter()
        .any(|effect| matches!(effect, Effect::RefreshThreads { .. })));

    state.apply(Action::ThreadsRefreshFinished {
        workspace_id,
        sessions: Vec::new(),
        error: None,
    });
    let effects = state.apply(Action::RegisterWorkspace {
        name: "main".to_owned(),
        root_path: PathBuf::from("/tmp/project"),
    });
    assert!(effects
        .iter()
        .any(|effect| matches!(effect, Effect::RefreshThreads { .. })));
}

#[test]
fn threads_refresh_merge_keeps_inflight_state() {
    let (mut state, workspace_id) = state_with_workspace();
    state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    });
    let effects = submit(&mut state, workspace_id, "hi");
    let (provisional_id, seq) = sent_turn(&effects);
    thread_event(
        &mut state,
        workspace_id,
        &provisional_id,
        seq,
        ThreadEvent::SessionIdAssigned {
            session_id: "ses_1".to_owned(),
            engine_hint: None,
        },
    );

    state.apply(Action::ThreadsRefreshFinished {
        workspace_id,
        sessions: vec![
            ImportableSession {
                engine: EngineKind::Codex,
                session_id: "ses_1".to_owned(),
                title: "current".to_owned(),
                updated_at_unix_seconds: 1,
            },
            ImportableSession {
                engine: EngineKind::Codex,
                session_id: "ses_2".to_owned(),
                title: "older".to_owned(),
                updated_at_unix_seconds: 2,
            },
        ],
        error: None,
    });

    let current = state.thread(workspace_id, "codex:ses_1").expect("thread");
    assert_eq!(current.status, ThreadStatus::Processing);
    assert!(!current.entries.is_empty());
    let merged = state.thread(workspace_id, "codex:ses_2").expect("thread");
    assert_eq!(merged.status, ThreadStatus::Idle);
}

#[test]
fn queries_post_notes_into_the_active_thread() {
    let (mut state, workspace_id) = state_with_workspace();
    submit(&mut state, workspace_id, "/resume codex:ses_1");

    state.apply(Action::EngineStatusLoaded {
        workspace_id,
        reports: vec![EngineStatusReport {
            engine: EngineKind::Codex,
            ok: true,
            version: Some("codex 1.2.3".to_owned()),
            detail: None,
        }],
    });

    let thread = state.thread(workspace_id, "codex:ses_1").expect("thread");
    assert!(thread.entries.iter().any(|entry| matches!(
        entry,
        ThreadEntry::SystemNote { text } if text.contains("codex 1.2.3")
    )));
}

#[test]
fn user_input_request_resolves_with_answers() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);

    thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::UserInputRequested {
            request_id: "q_1".to_owned(),
            questions: vec![UserInputQuestion {
                key: "scope".to_owned(),
                prompt: "Which module?".to_owned(),
                options: Vec::new(),
            }],
        },
    );
    assert_eq!(
        state
            .workspace(workspace_id)
            .expect("workspace")
            .user_inputs
            .len(),
        1
    );

    let mut answers = std::collections::HashMap::new();
    answers.insert("scope".to_owned(), vec!["parser".to_owned()]);
    let effects = state.apply(Action::UserInputAnswered {
        workspace_id,
        request_id: "q_1".to_owned(),
        answers,
    });
    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::RespondUserInput { request_id, .. } if request_id == "q_1"
    )));
    assert!(
        state
            .workspace(workspace_id)
            .expect("workspace")
            .user_inputs
            .is_empty()
    );
}

#[test]
fn items_stream_into_entries_and_finalize_on_completion() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);
    state.apply(Action::SendAcknowledged {
        workspace_id,
        thread_id: thread_id.clone(),
        seq,
        turn_id: Some("turn_1".to_owned()),
        error: None,
    });

    thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::ItemStarted {
            item: ThreadItem::CommandExecution {
                id: "cmd_1".to_owned(),
                command: "cargo test".to_owned(),
                aggregated_output: String::new(),
                exit_code: None,
                status: CommandExecutionStatus::InProgress,
            },
        },
    );
    thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq,
        ThreadEvent::TurnCompleted { usage: None },
    );

    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    let finalized = thread.entries.iter().any(|entry| matches!(
        entry,
        ThreadEntry::AgentItem { item } if matches!(
            item.as_ref(),
            ThreadItem::CommandExecution { status: CommandExecutionStatus::Completed, .. }
        )
    ));
    assert!(finalized);
}

#[test]
fn stale_seq_events_are_dropped() {
    let (mut state, workspace_id) = state_with_workspace();
    let effects = submit(&mut state, workspace_id, "hi");
    let (thread_id, seq) = sent_turn(&effects);

    thread_event(
        &mut state,
        workspace_id,
        &thread_id,
        seq + 10,
        ThreadEvent::TurnCompleted { usage: None },
    );
    let thread = state.thread(workspace_id, &thread_id).expect("thread");
    assert_eq!(thread.status, ThreadStatus::Processing);
    assert_eq!(thread.turn, TurnState::Starting);
}

#[test]
fn engine_selection_is_persisted() {
    let (mut state, _workspace_id) = state_with_workspace();
    let effects = state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    });
    assert!(effects.iter().any(|effect| matches!(
        effect,
        Effect::PersistSelectedEngine {
            engine: EngineKind::Codex
        }
    )));
    assert!(state.apply(Action::EngineSelected {
        engine: EngineKind::Codex,
    })
    .is_empty());
}

#[test]
fn persisted_state_restores_decorations_and_allowlists() {
    let mut state = AppState::new();
    state.apply(Action::AppStarted);

    let mut persisted = PersistedState::default();
    persisted.workspaces.push(PersistedWorkspace {
        id: 3,
        name: "main".to_owned(),
        root_path: PathBuf::from("/tmp/project"),
    });
    persisted.selected_engine = Some("opencode".to_owned());
    persisted
        .custom_names
        .insert((3, "codex:ses_1".to_owned()), "release prep".to_owned());
    persisted.pinned_at.insert((3, "codex:ses_1".to_owned()), 42);
    persisted
        .allowlists
        .insert(3, vec![vec!["git".to_owned(), "status".to_owned()]]);
    persisted.spec_roots.insert(3, "docs".to_owned());

    let effects = state.apply(Action::PersistedStateLoaded {
        persisted: Box::new(persisted),
    });

    let workspace_id = WorkspaceId::from_u64(3);
    assert_eq!(state.selected_engine, EngineKind::Opencode);
    assert_eq!(
        state.custom_name(workspace_id, "codex:ses_1"),
        Some("release prep")
    );
    assert!(state.is_pinned(workspace_id, "codex:ses_1"));
    assert!(state.approval_gate.should_auto_accept(
        workspace_id,
        &["git".to_owned(), "status".to_owned(), "-s".to_owned()]
    ));
    assert_eq!(
        state
            .workspace(workspace_id)
            .expect("workspace")
            .review_spec_root
            .as_deref(),
        Some("docs")
    );
    assert!(effects
        .iter()
        .any(|effect| matches!(effect, Effect::RefreshThreads { .. })));
}
