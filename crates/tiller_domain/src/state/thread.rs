use super::{ThreadStatus, TurnRunConfig, TurnState, WorkspaceId};
use crate::{AccessMode, AttachmentRef, EngineKind, ThinkingEffort, ThreadItem, TokenUsage};
use std::collections::{HashSet, VecDeque};

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadEntry {
    UserMessage {
        text: String,
        #[serde(default)]
        attachments: Vec<AttachmentRef>,
    },
    AgentItem {
        item: Box<ThreadItem>,
    },
    TurnUsage {
        usage: Option<TokenUsage>,
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

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueuedPrompt {
    pub id: u64,
    pub text: String,
    pub attachments: Vec<AttachmentRef>,
    pub run_config: TurnRunConfig,
}

#[derive(Clone, Debug)]
pub struct Thread {
    pub id: String,
    pub workspace_id: WorkspaceId,
    pub engine: EngineKind,
    /// Set once the engine tag came from a backend-confirmed session; the
    /// tag is immutable from then on.
    pub engine_confirmed: bool,
    pub status: ThreadStatus,
    pub turn: TurnState,
    pub active_turn_id: Option<String>,
    /// Engine the in-flight turn was dispatched to. Normally equals
    /// `engine`; can differ when an engine switch left a stale turn behind.
    pub turn_engine: Option<EngineKind>,
    /// Single-flight token: events carry the seq captured at dispatch and
    /// stale ones are dropped on comparison.
    pub active_seq: Option<u64>,
    pub next_seq: u64,
    pub turn_started_at_unix_ms: Option<u64>,
    pub interrupted_by_user: bool,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub entries: Vec<ThreadEntry>,
    pub item_ids: HashSet<String>,
    pub pending_item_ids: HashSet<String>,
    pub usage: Option<TokenUsage>,
    pub model_id: Option<String>,
    pub effort: ThinkingEffort,
    pub access_mode: AccessMode,
    pub queued_prompts: VecDeque<QueuedPrompt>,
    pub next_queued_prompt_id: u64,
    pub last_activity_at_unix_ms: u64,
}

impl Thread {
    pub fn new(id: String, workspace_id: WorkspaceId, engine: EngineKind) -> Self {
        Self {
            id,
            workspace_id,
            engine,
            engine_confirmed: false,
            status: ThreadStatus::Idle,
            turn: TurnState::None,
            active_turn_id: None,
            turn_engine: None,
            active_seq: None,
            next_seq: 1,
            turn_started_at_unix_ms: None,
            interrupted_by_user: false,
            parent_id: None,
            child_ids: Vec::new(),
            entries: Vec::new(),
            item_ids: HashSet::new(),
            pending_item_ids: HashSet::new(),
            usage: None,
            model_id: None,
            effort: crate::default_thinking_effort(),
            access_mode: AccessMode::default(),
            queued_prompts: VecDeque::new(),
            next_queued_prompt_id: 1,
            last_activity_at_unix_ms: 0,
        }
    }

    pub fn run_config(&self) -> TurnRunConfig {
        TurnRunConfig {
            engine: self.engine,
            model_id: self.model_id.clone(),
            effort: self.effort,
            access_mode: self.access_mode,
        }
    }

    pub fn is_turn_in_flight(&self) -> bool {
        matches!(self.turn, TurnState::Starting | TurnState::Active)
    }

    pub fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        seq
    }

    pub fn push_entry(&mut self, entry: ThreadEntry) {
        if let ThreadEntry::AgentItem { item } = &entry {
            self.item_ids.insert(item.id().to_owned());
        }
        self.entries.push(entry);
    }

    /// Insert a streamed item, replacing a prior entry with the same item
    /// id in place. Streaming engines re-emit items as their content grows.
    pub fn upsert_item(&mut self, item: ThreadItem) {
        let id = item.id().to_owned();
        if item.is_in_progress() {
            self.pending_item_ids.insert(id.clone());
        } else {
            self.pending_item_ids.remove(&id);
        }

        if self.item_ids.contains(&id) {
            for entry in self.entries.iter_mut().rev() {
                if let ThreadEntry::AgentItem { item: existing } = entry
                    && existing.id() == id
                {
                    *existing = Box::new(item);
                    return;
                }
            }
        }
        self.item_ids.insert(id);
        self.entries.push(ThreadEntry::AgentItem {
            item: Box::new(item),
        });
    }

    /// Force items that never saw a terminal update into a terminal status.
    /// Runs when the turn itself ends.
    pub fn finalize_pending_items(&mut self, success: bool) {
        if self.pending_item_ids.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_item_ids);
        for entry in self.entries.iter_mut() {
            if let ThreadEntry::AgentItem { item } = entry
                && pending.contains(item.id())
            {
                item.finalize(success);
            }
        }
    }

    pub(crate) fn begin_turn(&mut self, seq: u64, reviewing: bool, now_unix_ms: u64) {
        self.status = if reviewing {
            ThreadStatus::Reviewing
        } else {
            ThreadStatus::Processing
        };
        self.turn = TurnState::Starting;
        self.active_turn_id = None;
        self.turn_engine = Some(self.engine);
        self.active_seq = Some(seq);
        self.turn_started_at_unix_ms = Some(now_unix_ms);
        self.interrupted_by_user = false;
        self.last_activity_at_unix_ms = now_unix_ms;
    }

    pub(crate) fn end_turn(&mut self, terminal: TurnState) {
        self.turn = terminal;
        self.status = ThreadStatus::Idle;
        self.active_turn_id = None;
        self.turn_engine = None;
        self.active_seq = None;
        self.turn_started_at_unix_ms = None;
    }

    pub fn allocate_queued_prompt_id(&mut self) -> u64 {
        let id = self.next_queued_prompt_id;
        self.next_queued_prompt_id = self.next_queued_prompt_id.saturating_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CommandExecutionStatus;

    fn thread() -> Thread {
        Thread::new("codex:ses_1".to_owned(), WorkspaceId::from_u64(1), EngineKind::Codex)
    }

    #[test]
    fn upsert_item_replaces_in_place_by_id() {
        let mut thread = thread();
        thread.upsert_item(ThreadItem::AgentMessage {
            id: "msg_1".to_owned(),
            text: "hel".to_owned(),
        });
        thread.upsert_item(ThreadItem::AgentMessage {
            id: "msg_1".to_owned(),
            text: "hello".to_owned(),
        });

        assert_eq!(thread.entries.len(), 1);
        match &thread.entries[0] {
            ThreadEntry::AgentItem { item } => match item.as_ref() {
                ThreadItem::AgentMessage { text, .. } => assert_eq!(text, "hello"),
                other => panic!("expected agent message, got {other:?}"),
            },
            other => panic!("expected agent item entry, got {other:?}"),
        }
    }

    #[test]
    fn finalize_pending_items_fails_unfinished_tool_calls() {
        let mut thread = thread();
        thread.upsert_item(ThreadItem::CommandExecution {
            id: "cmd_1".to_owned(),
            command: "sleep 100".to_owned(),
            aggregated_output: String::new(),
            exit_code: None,
            status: CommandExecutionStatus::InProgress,
        });
        assert!(thread.pending_item_ids.contains("cmd_1"));

        thread.finalize_pending_items(false);
        assert!(thread.pending_item_ids.is_empty());
        match &thread.entries[0] {
            ThreadEntry::AgentItem { item } => assert!(matches!(
                item.as_ref(),
                ThreadItem::CommandExecution {
                    status: CommandExecutionStatus::Failed,
                    ..
                }
            )),
            other => panic!("expected agent item entry, got {other:?}"),
        }
    }

    #[test]
    fn begin_and_end_turn_reset_flight_state() {
        let mut thread = thread();
        let seq = thread.allocate_seq();
        thread.begin_turn(seq, false, 1_000);
        assert_eq!(thread.status, ThreadStatus::Processing);
        assert_eq!(thread.turn, TurnState::Starting);
        assert_eq!(thread.active_seq, Some(seq));
        assert_eq!(thread.turn_engine, Some(EngineKind::Codex));

        thread.end_turn(TurnState::Completed);
        assert_eq!(thread.status, ThreadStatus::Idle);
        assert_eq!(thread.turn, TurnState::Completed);
        assert_eq!(thread.active_seq, None);
        assert_eq!(thread.active_turn_id, None);
    }
}
