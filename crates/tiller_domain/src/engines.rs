#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingEffort {
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

impl ThinkingEffort {
    pub const ALL: [ThinkingEffort; 5] = [
        ThinkingEffort::Minimal,
        ThinkingEffort::Low,
        ThinkingEffort::Medium,
        ThinkingEffort::High,
        ThinkingEffort::XHigh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ThinkingEffort::Minimal => "minimal",
            ThinkingEffort::Low => "low",
            ThinkingEffort::Medium => "medium",
            ThinkingEffort::High => "high",
            ThinkingEffort::XHigh => "xhigh",
        }
    }
}

pub fn parse_thinking_effort(value: &str) -> Option<ThinkingEffort> {
    let value = value.trim();
    ThinkingEffort::ALL
        .into_iter()
        .find(|effort| value.eq_ignore_ascii_case(effort.as_str()))
}

pub fn default_thinking_effort() -> ThinkingEffort {
    ThinkingEffort::Medium
}

/// How much of the workspace the backend may touch during a turn.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    #[default]
    Edits,
    FullAccess,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "read_only",
            AccessMode::Edits => "edits",
            AccessMode::FullAccess => "full_access",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Claude,
    Codex,
    Opencode,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [EngineKind::Claude, EngineKind::Codex, EngineKind::Opencode];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Claude => "claude",
            EngineKind::Codex => "codex",
            EngineKind::Opencode => "opencode",
        }
    }

    /// Session-oriented engines start threads under a provisional id and
    /// report the durable session id through the event stream. The
    /// event-driven engine acknowledges a turn id on send and never goes
    /// through the provisional phase.
    pub fn is_session_oriented(self) -> bool {
        match self {
            EngineKind::Claude => false,
            EngineKind::Codex | EngineKind::Opencode => true,
        }
    }

    pub fn acks_turn_id_on_send(self) -> bool {
        !self.is_session_oriented()
    }

    /// Whether a message sent mid-turn can be delivered into the running
    /// turn instead of waiting for it to finish.
    pub fn supports_steering(self) -> bool {
        matches!(self, EngineKind::Claude)
    }
}

pub fn parse_engine_kind(value: &str) -> Option<EngineKind> {
    let value = value.trim();
    EngineKind::ALL
        .into_iter()
        .find(|engine| value.eq_ignore_ascii_case(engine.as_str()))
}

pub fn default_engine_kind() -> EngineKind {
    EngineKind::Claude
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_engine_kind_is_case_insensitive_and_trimmed() {
        assert_eq!(parse_engine_kind(" codex "), Some(EngineKind::Codex));
        assert_eq!(parse_engine_kind("OpenCode"), Some(EngineKind::Opencode));
        assert_eq!(parse_engine_kind("claude"), Some(EngineKind::Claude));
        assert_eq!(parse_engine_kind("droid"), None);
    }

    #[test]
    fn session_orientation_matches_ack_behavior() {
        for engine in EngineKind::ALL {
            assert_eq!(engine.acks_turn_id_on_send(), !engine.is_session_oriented());
        }
    }
}
