//! Poll/Blocking Gate.
//!
//! A pure read over the branch set of a parent. Nothing is cached: each call
//! lists the children from the store and recomputes the counts, so it is safe
//! to poll at a fixed interval indefinitely.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::registry::BranchRegistry;
use super::types::{BranchReport, BranchStatusEntry};
use crate::error::BranchError;

#[derive(Clone)]
pub struct BranchGate {
    registry: BranchRegistry,
}

impl BranchGate {
    pub fn new(registry: BranchRegistry) -> Self {
        Self { registry }
    }

    /// Branch statuses of `parent_id`, on behalf of `caller`.
    ///
    /// `NotFound` when the parent does not exist, `Forbidden` when `caller`
    /// does not own it.
    pub async fn branch_status(
        &self,
        caller: &str,
        parent_id: &str,
    ) -> Result<BranchReport, BranchError> {
        let parent = self.registry.get(parent_id).await?;
        if parent.owner_id != caller {
            tracing::warn!(parent_id, caller, "Branch status denied");
            return Err(BranchError::Forbidden {
                id: parent_id.to_string(),
            });
        }
        self.report(parent_id).await
    }

    /// Branch statuses without the ownership check, for internal callers.
    pub async fn report(&self, parent_id: &str) -> Result<BranchReport, BranchError> {
        let children = self.registry.children_of(parent_id).await?;
        let entries = children.iter().map(BranchStatusEntry::from_child).collect();
        Ok(BranchReport::new(parent_id.to_string(), entries))
    }

    /// Poll every `interval` until `parent_id` is no longer blocked.
    ///
    /// Returns the first unblocked report, or `None` if `cancel` fires first.
    pub async fn wait_until_resolved(
        &self,
        caller: &str,
        parent_id: &str,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<BranchReport>, BranchError> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                _ = ticker.tick() => {}
            }

            let report = self.branch_status(caller, parent_id).await?;
            if !report.is_blocked() {
                return Ok(Some(report));
            }
            tracing::debug!(
                parent_id,
                active = report.active_count,
                resolved = report.resolved_count(),
                "Parent still blocked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{BranchStatus, ContentPart, Conversation, ReturnValue};
    use crate::store::MemoryStore;

    async fn parent_with_children(n: usize) -> (BranchRegistry, Conversation, Vec<Conversation>) {
        let registry = BranchRegistry::new(Arc::new(MemoryStore::new()));
        let root = registry.create_root("alice", "story-1").await.unwrap();
        let parent = registry.promote_to_orchestrator(&root).await.unwrap();
        let mut children = Vec::new();
        for i in 0..n {
            children.push(
                registry
                    .create_child(&parent, &format!("Scene {i}"), vec![ContentPart::text("t")])
                    .await
                    .unwrap(),
            );
        }
        (registry, parent, children)
    }

    #[tokio::test]
    async fn status_lists_every_child_in_spawn_order() {
        let (registry, parent, children) = parent_with_children(3).await;
        let gate = BranchGate::new(registry);

        let report = gate.branch_status("alice", &parent.id).await.unwrap();
        assert_eq!(report.branches.len(), 3);
        assert_eq!(report.active_count, 3);
        assert!(report.is_blocked());
        let ids: Vec<_> = report.branches.iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids, children.iter().map(|c| c.id.clone()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unknown_parent_and_foreign_caller() {
        let (registry, parent, _) = parent_with_children(1).await;
        let gate = BranchGate::new(registry);

        assert!(matches!(
            gate.branch_status("alice", "missing").await.unwrap_err(),
            BranchError::NotFound { .. }
        ));
        assert!(matches!(
            gate.branch_status("mallory", &parent.id).await.unwrap_err(),
            BranchError::Forbidden { .. }
        ));
    }

    #[tokio::test]
    async fn active_count_is_zero_iff_all_resolved() {
        let (registry, parent, children) = parent_with_children(2).await;
        let gate = BranchGate::new(registry.clone());

        registry
            .record_return(&children[0], ReturnValue::default())
            .await
            .unwrap();
        let report = gate.report(&parent.id).await.unwrap();
        assert_eq!(report.active_count, 1);
        assert!(!report.all_resolved());

        let returned = registry
            .record_return(&children[1], ReturnValue::default())
            .await
            .unwrap();
        registry.finalize(&returned).await.unwrap();
        let report = gate.report(&parent.id).await.unwrap();
        assert_eq!(report.active_count, 0);
        assert_eq!(report.returned_count, 1);
        assert_eq!(report.finalized_count, 1);
        assert!(report.all_resolved());
    }

    #[tokio::test]
    async fn wait_returns_once_children_resolve() {
        let (registry, parent, children) = parent_with_children(1).await;
        let gate = BranchGate::new(registry.clone());

        let child = children[0].clone();
        let returner = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            registry
                .record_return(&child, ReturnValue::default())
                .await
                .unwrap();
        });

        let cancel = CancellationToken::new();
        let report = gate
            .wait_until_resolved("alice", &parent.id, Duration::from_millis(10), &cancel)
            .await
            .unwrap()
            .expect("resolved");
        assert_eq!(report.branches[0].status, BranchStatus::Returned);
        returner.await.unwrap();
    }

    #[tokio::test]
    async fn wait_stops_on_cancel() {
        let (registry, parent, _) = parent_with_children(1).await;
        let gate = BranchGate::new(registry);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = gate
            .wait_until_resolved("alice", &parent.id, Duration::from_millis(10), &cancel)
            .await
            .unwrap();
        assert!(report.is_none());
    }
}
