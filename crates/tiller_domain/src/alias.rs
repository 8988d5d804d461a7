//! Provisional-to-durable id aliasing.
//!
//! A session-oriented engine starts a thread under a locally minted
//! provisional id and reports the durable session id later. Events that were
//! dispatched before the rename keep arriving tagged with the provisional
//! id, so the rename leaves a short-lived alias record behind. The record is
//! consulted on every inbound event and discarded once the renamed thread's
//! turn has reached a terminal state, at which point no live reference to
//! the old id remains.

use crate::WorkspaceId;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AliasRecord {
    pub workspace_id: WorkspaceId,
    pub provisional_id: String,
    pub durable_id: String,
}

#[derive(Clone, Debug, Default)]
pub struct AliasRegistry {
    records: Vec<AliasRecord>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, workspace_id: WorkspaceId, provisional_id: String, durable_id: String) {
        if self
            .records
            .iter()
            .any(|r| r.workspace_id == workspace_id && r.provisional_id == provisional_id)
        {
            return;
        }
        self.records.push(AliasRecord {
            workspace_id,
            provisional_id,
            durable_id,
        });
    }

    /// Map a possibly-stale id to its current durable id. Ids that were
    /// never renamed resolve to themselves (returns `None`).
    pub fn resolve(&self, workspace_id: WorkspaceId, id: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.workspace_id == workspace_id && r.provisional_id == id)
            .map(|r| r.durable_id.as_str())
    }

    /// Drop the alias that resolves to `durable_id`, once the last in-flight
    /// reference to the provisional id has been applied.
    pub fn retire_by_durable(&mut self, workspace_id: WorkspaceId, durable_id: &str) {
        self.records
            .retain(|r| !(r.workspace_id == workspace_id && r.durable_id == durable_id));
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_maps_provisional_to_durable_per_workspace() {
        let mut aliases = AliasRegistry::new();
        aliases.insert(
            WorkspaceId::from_u64(1),
            "codex-pending-abc".to_owned(),
            "codex:xyz".to_owned(),
        );

        assert_eq!(
            aliases.resolve(WorkspaceId::from_u64(1), "codex-pending-abc"),
            Some("codex:xyz")
        );
        assert_eq!(
            aliases.resolve(WorkspaceId::from_u64(2), "codex-pending-abc"),
            None
        );
        assert_eq!(aliases.resolve(WorkspaceId::from_u64(1), "codex:xyz"), None);
    }

    #[test]
    fn insert_is_idempotent_and_retire_clears_the_record() {
        let workspace_id = WorkspaceId::from_u64(1);
        let mut aliases = AliasRegistry::new();
        aliases.insert(
            workspace_id,
            "opencode-pending-a".to_owned(),
            "opencode:s1".to_owned(),
        );
        aliases.insert(
            workspace_id,
            "opencode-pending-a".to_owned(),
            "opencode:s2".to_owned(),
        );
        assert_eq!(
            aliases.resolve(workspace_id, "opencode-pending-a"),
            Some("opencode:s1")
        );

        aliases.retire_by_durable(workspace_id, "opencode:s1");
        assert!(aliases.is_empty());
    }
}
