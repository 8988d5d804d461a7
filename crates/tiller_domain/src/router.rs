//! Per-operation engine resolution.
//!
//! A thread keeps talking to the engine that created it even after the user
//! switches the globally-selected engine. Resolution order for any single
//! operation: the thread's recorded engine tag, then the id's own prefix,
//! then the global selection.

use crate::{EngineKind, engine_of_id};

pub fn effective_engine(
    recorded: Option<EngineKind>,
    thread_id: Option<&str>,
    selected: EngineKind,
) -> EngineKind {
    if let Some(engine) = recorded {
        return engine;
    }
    if let Some(id) = thread_id
        && let Some(engine) = engine_of_id(id)
    {
        return engine;
    }
    selected
}

/// Engines an interrupt must be delivered to. After an engine switch a
/// stale turn can be outstanding on an engine other than the thread's
/// current owner; only one of the two has a live turn to cancel and the
/// adapter-side interrupt is idempotent, so both are fired.
pub fn interrupt_engines(
    thread_engine: EngineKind,
    turn_engine: Option<EngineKind>,
) -> Vec<EngineKind> {
    match turn_engine {
        Some(engine) if engine != thread_engine => vec![engine, thread_engine],
        _ => vec![thread_engine],
    }
}

/// A new message reuses the active thread only when that thread belongs to
/// the currently-selected engine; otherwise a fresh thread is started and
/// the old one is left untouched.
pub fn send_reuses_active_thread(active_thread_engine: EngineKind, selected: EngineKind) -> bool {
    active_thread_engine == selected
}
