//! Return Aggregator.
//!
//! Records a sub-agent's result exactly once and announces it so observers of
//! the child can navigate back to the parent. Also hosts the explicit
//! `returned -> finalized` step.

use super::registry::BranchRegistry;
use super::types::{BranchEvent, EventSink, ReturnReceipt};
use crate::error::BranchError;
use crate::model::{AssetId, Conversation, ReturnValue};

#[derive(Clone)]
pub struct ReturnAggregator {
    registry: BranchRegistry,
    events: EventSink,
}

impl ReturnAggregator {
    pub fn new(registry: BranchRegistry, events: EventSink) -> Self {
        Self { registry, events }
    }

    /// Record `child_id`'s result and mark it `returned`.
    ///
    /// Fails with `NotFound` for an unknown id, `InvalidOperation` for a
    /// conversation that is not a sub-agent, and `AlreadyReturned` when a
    /// result was already recorded (the first value is kept).
    pub async fn return_to_parent(
        &self,
        child_id: &str,
        asset_ids: Vec<AssetId>,
        summary: Option<String>,
    ) -> Result<ReturnReceipt, BranchError> {
        let child = self.registry.get(child_id).await?;

        let value = ReturnValue {
            assets: asset_ids,
            summary: summary.filter(|s| !s.trim().is_empty()),
        };
        let returned = self.registry.record_return(&child, value).await?;

        tracing::info!(
            child_id,
            parent_id = returned.parent_id.as_deref().unwrap_or("-"),
            assets = returned.return_value.as_ref().map_or(0, |v| v.assets.len()),
            "Branch returned to parent"
        );

        self.events.emit(BranchEvent::BranchReturned {
            child_id: child_id.to_string(),
            navigate_to: returned.parent_id.clone(),
        });

        Ok(ReturnReceipt {
            parent_id: returned.parent_id,
        })
    }

    /// Mark a returned branch as consumed. Fails with `InvalidOperation` on an
    /// `active` or already `finalized` branch.
    pub async fn finalize(&self, child_id: &str) -> Result<Conversation, BranchError> {
        let child = self.registry.get(child_id).await?;
        let finalized = self.registry.finalize(&child).await?;

        tracing::info!(child_id, "Branch finalized");
        self.events.emit(BranchEvent::BranchFinalized {
            child_id: child_id.to_string(),
        });
        Ok(finalized)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{BranchStatus, ContentPart};
    use crate::store::MemoryStore;

    async fn setup() -> (ReturnAggregator, BranchRegistry, Conversation, Conversation) {
        let registry = BranchRegistry::new(Arc::new(MemoryStore::new()));
        let root = registry.create_root("owner", "story-1").await.unwrap();
        let parent = registry.promote_to_orchestrator(&root).await.unwrap();
        let child = registry
            .create_child(&parent, "Scene 1", vec![ContentPart::text("brief")])
            .await
            .unwrap();
        let aggregator = ReturnAggregator::new(registry.clone(), EventSink::default());
        (aggregator, registry, parent, child)
    }

    #[tokio::test]
    async fn return_records_value_and_reports_parent() {
        let (agg, registry, parent, child) = setup().await;

        let receipt = agg
            .return_to_parent(&child.id, vec!["a1".into()], Some("done".into()))
            .await
            .unwrap();
        assert_eq!(receipt.parent_id.as_deref(), Some(parent.id.as_str()));

        let stored = registry.get(&child.id).await.unwrap();
        assert_eq!(stored.status, Some(BranchStatus::Returned));
        assert_eq!(
            stored.return_value,
            Some(ReturnValue {
                assets: vec!["a1".into()],
                summary: Some("done".into()),
            })
        );
    }

    #[tokio::test]
    async fn second_return_is_rejected_and_value_kept() {
        let (agg, registry, _parent, child) = setup().await;

        agg.return_to_parent(&child.id, vec!["a1".into()], Some("first".into()))
            .await
            .unwrap();
        let err = agg
            .return_to_parent(&child.id, vec!["a9".into()], Some("second".into()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BranchError::AlreadyReturned {
                status: BranchStatus::Returned,
                ..
            }
        ));

        let stored = registry.get(&child.id).await.unwrap();
        let value = stored.return_value.unwrap();
        assert_eq!(value.assets, vec!["a1".to_string()]);
        assert_eq!(value.summary.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn return_from_non_sub_agent_is_invalid() {
        let (agg, _registry, parent, _child) = setup().await;
        let err = agg
            .return_to_parent(&parent.id, vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, BranchError::InvalidOperation(msg) if msg.contains("can only return from a sub-agent")));
    }

    #[tokio::test]
    async fn blank_summary_is_dropped() {
        let (agg, registry, _parent, child) = setup().await;
        agg.return_to_parent(&child.id, vec![], Some("  ".into()))
            .await
            .unwrap();
        let stored = registry.get(&child.id).await.unwrap();
        assert_eq!(stored.return_value.unwrap().summary, None);
    }

    #[tokio::test]
    async fn return_emits_navigation_hint() {
        let registry = BranchRegistry::new(Arc::new(MemoryStore::new()));
        let root = registry.create_root("owner", "p").await.unwrap();
        let parent = registry.promote_to_orchestrator(&root).await.unwrap();
        let child = registry
            .create_child(&parent, "c", vec![ContentPart::text("t")])
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let agg = ReturnAggregator::new(registry, EventSink::new(Some(tx)));
        agg.return_to_parent(&child.id, vec![], None).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(BranchEvent::BranchReturned {
                child_id: child.id.clone(),
                navigate_to: Some(parent.id.clone()),
            })
        );
    }

    #[tokio::test]
    async fn finalize_only_after_return() {
        let (agg, _registry, _parent, child) = setup().await;

        assert!(matches!(
            agg.finalize(&child.id).await.unwrap_err(),
            BranchError::InvalidOperation(_)
        ));
        agg.return_to_parent(&child.id, vec![], None).await.unwrap();
        let finalized = agg.finalize(&child.id).await.unwrap();
        assert_eq!(finalized.status, Some(BranchStatus::Finalized));
        assert!(matches!(
            agg.finalize(&child.id).await.unwrap_err(),
            BranchError::InvalidOperation(_)
        ));
    }
}
