//! Spawn Coordinator.
//!
//! Validates a spawn request, promotes the parent, creates every child (row +
//! seed message) and only then dispatches each child as an independent run.
//! Because all children are persisted before the first dispatch, a poll right
//! after spawn never misses a child, and no child can return before its
//! siblings exist.

use super::dispatch::{BranchDispatcher, BranchJob};
use super::registry::BranchRegistry;
use super::types::{BranchEvent, BranchSettings, Brief, EventSink, MAX_BRIEFS, SpawnedChild};
use crate::error::BranchError;
use crate::model::{ContentPart, ConversationKind};

#[derive(Clone)]
pub struct SpawnCoordinator {
    registry: BranchRegistry,
    dispatcher: BranchDispatcher,
    events: EventSink,
    settings: BranchSettings,
}

impl SpawnCoordinator {
    pub fn new(
        registry: BranchRegistry,
        dispatcher: BranchDispatcher,
        events: EventSink,
        settings: BranchSettings,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            events,
            settings,
        }
    }

    /// Create one sub-agent per brief under `parent_id` and dispatch them.
    ///
    /// Returns as soon as the children exist and their runs are scheduled.
    /// If persisting a child fails after at least one sibling was created, the
    /// created children are still dispatched and reported through
    /// `PartialSpawnFailure`. If no child was created, a promotion made by
    /// this call is undone.
    pub async fn spawn(
        &self,
        parent_id: &str,
        briefs: Vec<Brief>,
    ) -> Result<Vec<SpawnedChild>, BranchError> {
        validate_briefs(&briefs)?;

        let parent = self.registry.get(parent_id).await?;
        let newly_promoted = parent.kind == ConversationKind::Standalone;
        let parent = self.registry.promote_to_orchestrator(&parent).await?;

        let parent_context = if self.settings.carry_parent_context {
            Some(self.registry.transcript(&parent.id).await?)
        } else {
            None
        };

        let mut created = Vec::with_capacity(briefs.len());
        let mut failure = None;
        for brief in &briefs {
            match self
                .registry
                .create_child(&parent, &brief.name, seed_parts(brief))
                .await
            {
                Ok(child) => created.push(SpawnedChild {
                    id: child.id,
                    name: brief.name.clone(),
                }),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        for child in &created {
            let job = BranchJob::new(&child.id).with_parent_context(parent_context.clone());
            if let Err(e) = self.dispatcher.dispatch(job) {
                tracing::warn!(child_id = %child.id, error = %e, "Branch created but not dispatched");
            }
        }

        if !created.is_empty() {
            self.events.emit(BranchEvent::Spawned {
                parent_id: parent.id.clone(),
                children: created.clone(),
            });
        }

        match failure {
            None => {
                tracing::info!(
                    parent_id = %parent.id,
                    children = created.len(),
                    "Spawned sub-agents"
                );
                Ok(created)
            }
            Some(e) if created.is_empty() => {
                if newly_promoted {
                    if let Err(revert) = self.registry.revert_promotion(&parent.id).await {
                        tracing::warn!(parent_id = %parent.id, error = %revert, "Could not revert promotion");
                    }
                }
                Err(e)
            }
            Some(e) => {
                tracing::error!(
                    parent_id = %parent.id,
                    created = created.len(),
                    requested = briefs.len(),
                    error = %e,
                    "Spawn partially failed"
                );
                Err(BranchError::PartialSpawnFailure {
                    created,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn validate_briefs(briefs: &[Brief]) -> Result<(), BranchError> {
    if briefs.is_empty() {
        return Err(BranchError::InvalidInput(
            "at least one brief is required".to_string(),
        ));
    }
    if briefs.len() > MAX_BRIEFS {
        return Err(BranchError::InvalidInput(format!(
            "at most {MAX_BRIEFS} briefs per spawn, got {}",
            briefs.len()
        )));
    }
    for (i, brief) in briefs.iter().enumerate() {
        if brief.name.trim().is_empty() {
            return Err(BranchError::InvalidInput(format!("brief {i} has an empty name")));
        }
        if brief.task.trim().is_empty() {
            return Err(BranchError::InvalidInput(format!(
                "brief '{}' has an empty task",
                brief.name
            )));
        }
    }
    Ok(())
}

/// The brief text, then one attachment per reference asset.
fn seed_parts(brief: &Brief) -> Vec<ContentPart> {
    std::iter::once(ContentPart::text(brief.task.clone()))
        .chain(
            brief
                .reference_asset_ids
                .iter()
                .map(|id| ContentPart::Attachment { asset_id: id.clone() }),
        )
        .collect()
}
