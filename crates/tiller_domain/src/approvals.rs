//! Remembered-prefix approval gating.
//!
//! Backends propose risky commands before running them. The gate tokenizes
//! each proposal shell-style and auto-accepts it when a remembered prefix
//! from the workspace's allow-list matches token-for-token; everything else
//! is surfaced to the user as an approval request. The allow-list is owned
//! by the gate value inside `AppState` and injected where needed, never
//! read from ambient global state.

use crate::WorkspaceId;
use std::collections::HashMap;

/// Tokenize a proposed command the way a POSIX shell splits words:
/// whitespace separates, quotes group, backslash escapes. Returns `None`
/// for input with unbalanced quoting.
pub fn tokenize_command(command: &str) -> Option<Vec<String>> {
    shlex::split(command)
}

/// True iff some remembered prefix is a token-wise prefix of `tokens`.
/// Comparison is exact and case-sensitive; no globbing.
pub fn matches_command_prefix(tokens: &[String], allowlist: &[Vec<String>]) -> bool {
    allowlist.iter().any(|prefix| {
        !prefix.is_empty()
            && prefix.len() <= tokens.len()
            && prefix.iter().zip(tokens.iter()).all(|(a, b)| a == b)
    })
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalGate {
    allowlists: HashMap<WorkspaceId, Vec<Vec<String>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allowlist(&self, workspace_id: WorkspaceId) -> &[Vec<String>] {
        self.allowlists
            .get(&workspace_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn should_auto_accept(&self, workspace_id: WorkspaceId, tokens: &[String]) -> bool {
        matches_command_prefix(tokens, self.allowlist(workspace_id))
    }

    /// Remember `tokens` as an allowed prefix. Set semantics: re-remembering
    /// an identical prefix changes nothing. Returns whether the list grew.
    pub fn remember_prefix(&mut self, workspace_id: WorkspaceId, tokens: Vec<String>) -> bool {
        if tokens.is_empty() {
            return false;
        }
        let list = self.allowlists.entry(workspace_id).or_default();
        if list.iter().any(|existing| *existing == tokens) {
            return false;
        }
        list.push(tokens);
        true
    }

    pub fn replace_allowlist(&mut self, workspace_id: WorkspaceId, prefixes: Vec<Vec<String>>) {
        self.allowlists.insert(workspace_id, prefixes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|t| (*t).to_owned()).collect()
    }

    #[test]
    fn tokenize_command_honors_quotes_and_escapes() {
        assert_eq!(
            tokenize_command(r#"git commit -m "fix the bug""#),
            Some(tokens(&["git", "commit", "-m", "fix the bug"]))
        );
        assert_eq!(
            tokenize_command(r"echo hello\ world"),
            Some(tokens(&["echo", "hello world"]))
        );
        assert_eq!(
            tokenize_command("rm -rf '/tmp/x y'"),
            Some(tokens(&["rm", "-rf", "/tmp/x y"]))
        );
        assert_eq!(tokenize_command("echo \"unterminated"), None);
    }

    #[test]
    fn prefix_matches_longer_command_but_not_partial_tokens() {
        let allowlist = vec![tokens(&["git", "status"])];
        assert!(matches_command_prefix(
            &tokens(&["git", "status", "--short"]),
            &allowlist
        ));
        assert!(matches_command_prefix(&tokens(&["git", "status"]), &allowlist));
        assert!(!matches_command_prefix(&tokens(&["git", "stat"]), &allowlist));
        assert!(!matches_command_prefix(
            &tokens(&["sudo", "git", "status"]),
            &allowlist
        ));
    }

    #[test]
    fn prefix_matching_is_case_sensitive() {
        let allowlist = vec![tokens(&["Git", "Status"])];
        assert!(!matches_command_prefix(
            &tokens(&["git", "status"]),
            &allowlist
        ));
    }

    #[test]
    fn empty_prefixes_never_match() {
        let allowlist = vec![Vec::new()];
        assert!(!matches_command_prefix(&tokens(&["anything"]), &allowlist));
    }

    #[test]
    fn remember_prefix_uses_set_semantics_per_workspace() {
        let workspace_id = WorkspaceId::from_u64(7);
        let mut gate = ApprovalGate::new();

        assert!(gate.remember_prefix(workspace_id, tokens(&["rm", "-rf"])));
        assert!(!gate.remember_prefix(workspace_id, tokens(&["rm", "-rf"])));
        assert_eq!(gate.allowlist(workspace_id).len(), 1);

        assert!(gate.should_auto_accept(workspace_id, &tokens(&["rm", "-rf", "/tmp/x"])));
        assert!(!gate.should_auto_accept(WorkspaceId::from_u64(8), &tokens(&["rm", "-rf", "/tmp/x"])));
    }
}
