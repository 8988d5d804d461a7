mod engines;
pub use engines::{
    AccessMode, EngineKind, ThinkingEffort, default_engine_kind, default_thinking_effort,
    parse_engine_kind, parse_thinking_effort,
};

mod thread_id;
pub use thread_id::{
    ThreadIdForm, durable_thread_id, engine_for_session_assignment, engine_of_id,
    is_provisional_id, mint_bare_thread_id, mint_provisional_id, parse_thread_id, session_id_of,
};

mod events;
pub use events::{
    CommandExecutionStatus, ErrorMessage, FileUpdateChange, PatchApplyStatus, PatchChangeKind,
    PlanStep, ThreadEvent, ThreadItem, TokenUsage, ToolCallStatus, UserInputQuestion,
};

mod alias;
pub use alias::{AliasRecord, AliasRegistry};

pub mod approvals;
pub use approvals::{ApprovalGate, matches_command_prefix, tokenize_command};

mod commands;
pub use commands::{
    LspQuery, LspQueryKind, PickerKey, PickerOutcome, ReviewPicker, ReviewPickerLevel,
    ReviewPickerOption, ReviewTarget, SlashCommand, parse_slash_command,
};

pub mod paths;
pub mod router;

mod state;
pub use state::*;

mod actions;
pub use actions::Action;
mod effects;
pub use effects::Effect;

mod reducer;
pub use reducer::{THREAD_TITLE_MAX_CHARS, derive_thread_title};
