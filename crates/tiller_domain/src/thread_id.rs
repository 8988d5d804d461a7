//! Thread identifier grammar.
//!
//! A thread id is one of:
//! - durable: `"<engine>:<sessionId>"`, assigned once the backend has a
//!   session for the thread;
//! - provisional: `"<engine>-pending-<token>"`, minted locally before any
//!   backend session exists;
//! - bare: anything else, owned by the default event-driven engine.

use crate::{EngineKind, parse_engine_kind};
use bip39::Language;
use rand::{Rng as _, rngs::OsRng};

const PENDING_INFIX: &str = "-pending-";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ThreadIdForm {
    Durable {
        engine: EngineKind,
        session_id: String,
    },
    Provisional {
        engine: EngineKind,
        token: String,
    },
    Bare,
}

pub fn parse_thread_id(id: &str) -> ThreadIdForm {
    for engine in EngineKind::ALL {
        let name = engine.as_str();
        if let Some(rest) = id.strip_prefix(name) {
            if let Some(token) = rest.strip_prefix(PENDING_INFIX)
                && !token.is_empty()
            {
                return ThreadIdForm::Provisional {
                    engine,
                    token: token.to_owned(),
                };
            }
            if let Some(session_id) = rest.strip_prefix(':')
                && !session_id.is_empty()
            {
                return ThreadIdForm::Durable {
                    engine,
                    session_id: session_id.to_owned(),
                };
            }
        }
    }
    ThreadIdForm::Bare
}

/// The engine an id names on its own, without consulting thread state.
/// Bare ids resolve to no engine; callers fall back per the router rules.
pub fn engine_of_id(id: &str) -> Option<EngineKind> {
    match parse_thread_id(id) {
        ThreadIdForm::Durable { engine, .. } | ThreadIdForm::Provisional { engine, .. } => {
            Some(engine)
        }
        ThreadIdForm::Bare => None,
    }
}

pub fn durable_thread_id(engine: EngineKind, session_id: &str) -> String {
    format!("{}:{session_id}", engine.as_str())
}

pub fn is_provisional_id(id: &str) -> bool {
    matches!(parse_thread_id(id), ThreadIdForm::Provisional { .. })
}

pub fn session_id_of(id: &str) -> Option<String> {
    match parse_thread_id(id) {
        ThreadIdForm::Durable { session_id, .. } => Some(session_id),
        _ => None,
    }
}

/// Mint a provisional id for a session-oriented engine. The token is two
/// BIP-39 words, enough entropy for ids that only need to be unique within
/// one workspace for the session-assignment window.
pub fn mint_provisional_id(engine: EngineKind) -> String {
    let words = Language::English.word_list();
    let mut rng = OsRng;
    let len = words.len();
    let w1 = words[rng.gen_range(0..len)];
    let w2 = words[rng.gen_range(0..len)];
    format!("{}{PENDING_INFIX}{w1}-{w2}", engine.as_str())
}

/// Mint a bare id for the event-driven engine. Bare ids double as the
/// engine-side session identifier, so no session-assignment rename ever
/// applies to them.
pub fn mint_bare_thread_id() -> String {
    let words = Language::English.word_list();
    let mut rng = OsRng;
    let len = words.len();
    let w1 = words[rng.gen_range(0..len)];
    let w2 = words[rng.gen_range(0..len)];
    let suffix: u16 = rng.gen_range(0..10_000);
    format!("{w1}-{w2}-{suffix:04}")
}

/// Resolve the engine a `sessionIdAssigned` event belongs to: the id's own
/// prefix wins, then the event's hint. Callers try the unique-pending-thread
/// fallback themselves since it needs registry state.
pub fn engine_for_session_assignment(
    current_id: &str,
    engine_hint: Option<&str>,
) -> Option<EngineKind> {
    engine_of_id(current_id).or_else(|| engine_hint.and_then(parse_engine_kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_thread_id_recognizes_durable_ids() {
        assert_eq!(
            parse_thread_id("codex:ses_123"),
            ThreadIdForm::Durable {
                engine: EngineKind::Codex,
                session_id: "ses_123".to_owned(),
            }
        );
        assert_eq!(
            parse_thread_id("opencode:abc"),
            ThreadIdForm::Durable {
                engine: EngineKind::Opencode,
                session_id: "abc".to_owned(),
            }
        );
    }

    #[test]
    fn parse_thread_id_recognizes_provisional_ids() {
        assert_eq!(
            parse_thread_id("opencode-pending-abandon-ability"),
            ThreadIdForm::Provisional {
                engine: EngineKind::Opencode,
                token: "abandon-ability".to_owned(),
            }
        );
    }

    #[test]
    fn parse_thread_id_treats_unknown_prefixes_as_bare() {
        assert_eq!(parse_thread_id("droid:ses_1"), ThreadIdForm::Bare);
        assert_eq!(parse_thread_id("turn_42"), ThreadIdForm::Bare);
        assert_eq!(parse_thread_id("codex"), ThreadIdForm::Bare);
        assert_eq!(parse_thread_id("codex-pending-"), ThreadIdForm::Bare);
    }

    #[test]
    fn minted_provisional_ids_round_trip() {
        let id = mint_provisional_id(EngineKind::Codex);
        assert!(is_provisional_id(&id));
        assert_eq!(engine_of_id(&id), Some(EngineKind::Codex));
    }

    #[test]
    fn engine_for_session_assignment_prefers_id_prefix_over_hint() {
        assert_eq!(
            engine_for_session_assignment("codex-pending-x", Some("opencode")),
            Some(EngineKind::Codex)
        );
        assert_eq!(
            engine_for_session_assignment("thread-7", Some("opencode")),
            Some(EngineKind::Opencode)
        );
        assert_eq!(engine_for_session_assignment("thread-7", None), None);
    }
}
