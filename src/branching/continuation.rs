//! Continuation Trigger.
//!
//! Once no branch of a parent is `active`, folds every child's return value
//! into one user message on the parent and dispatches the parent's next run.
//! Children are not finalized here; that stays an explicit operation.

use super::dispatch::{BranchDispatcher, BranchJob};
use super::registry::BranchRegistry;
use super::types::{BranchEvent, BranchReport, BranchStatusEntry, EventSink};
use crate::agent::tools::{SpawnPhase, SpawnSubAgentsOutput, SpawnedAgentOutput};
use crate::error::BranchError;
use crate::model::{ContentPart, ConversationKind, Message, Role};

/// Result of a successful continue.
#[derive(Clone, Debug)]
pub struct Continuation {
    /// The synthesis message appended to the parent.
    pub message: Message,
    /// The merged branch results in `spawnSubAgents` output form.
    pub results: SpawnSubAgentsOutput,
}

#[derive(Clone)]
pub struct ContinuationTrigger {
    registry: BranchRegistry,
    dispatcher: BranchDispatcher,
    events: EventSink,
}

impl ContinuationTrigger {
    pub fn new(registry: BranchRegistry, dispatcher: BranchDispatcher, events: EventSink) -> Self {
        Self {
            registry,
            dispatcher,
            events,
        }
    }

    /// Resume `parent_id` with the merged results of its branches.
    ///
    /// `tool_call_id` identifies the `spawnSubAgents` call being answered.
    /// Fails with `Blocked` while any branch is still `active`, and with
    /// `RunInFlight` while the parent's own run has not finished persisting
    /// its turn.
    pub async fn continue_parent(
        &self,
        parent_id: &str,
        tool_call_id: &str,
    ) -> Result<Continuation, BranchError> {
        if tool_call_id.trim().is_empty() {
            return Err(BranchError::InvalidInput(
                "toolCallId must not be empty".to_string(),
            ));
        }

        let parent = self.registry.get(parent_id).await?;
        if parent.kind != ConversationKind::Orchestrator {
            return Err(BranchError::InvalidOperation(format!(
                "conversation {parent_id} has no branches to continue from"
            )));
        }

        // Held until the resumed run ends, so nothing else appends to the
        // parent in between.
        let claim = self.dispatcher.claim(parent_id)?;

        let children = self.registry.children_of(parent_id).await?;
        if children.is_empty() {
            return Err(BranchError::InvalidOperation(format!(
                "conversation {parent_id} has no branches to continue from"
            )));
        }
        let report = BranchReport::new(
            parent_id.to_string(),
            children.iter().map(BranchStatusEntry::from_child).collect(),
        );
        if report.is_blocked() {
            return Err(BranchError::Blocked {
                parent_id: parent_id.to_string(),
                active: report.active_count,
            });
        }

        let text = render_synthesis(&report.branches);
        let message = self
            .registry
            .append_message(parent_id, Role::User, vec![ContentPart::text(text)])
            .await?;

        tracing::info!(
            parent_id,
            tool_call_id,
            children = report.branches.len(),
            "Parent resumed with branch results"
        );
        self.events.emit(BranchEvent::ParentResumed {
            parent_id: parent_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
        });

        self.dispatcher
            .dispatch_claimed(claim, BranchJob::new(parent_id))?;

        Ok(Continuation {
            message,
            results: completion_output(&report.branches),
        })
    }
}

/// Human-readable aggregation of every branch's return value.
pub fn render_synthesis(branches: &[BranchStatusEntry]) -> String {
    let lines: Vec<String> = branches
        .iter()
        .map(|branch| {
            let (summary, assets) = match &branch.return_value {
                Some(value) => (value.summary.as_deref(), value.assets.as_slice()),
                None => (None, &[][..]),
            };
            let assets = if assets.is_empty() {
                "No assets".to_string()
            } else {
                format!("Assets: {}", assets.join(", "))
            };
            format!(
                "- {}: {} ({assets})",
                branch.name,
                summary.unwrap_or("Task completed")
            )
        })
        .collect();

    format!(
        "All sub-agents have completed their work. Here are the results:\n\n{}\n\nPlease continue with the next steps.",
        lines.join("\n")
    )
}

fn completion_output(branches: &[BranchStatusEntry]) -> SpawnSubAgentsOutput {
    SpawnSubAgentsOutput {
        status: SpawnPhase::Complete,
        agents: branches
            .iter()
            .map(|branch| SpawnedAgentOutput {
                id: branch.id.clone(),
                name: branch.name.clone(),
                returned_assets: branch.return_value.as_ref().map(|v| v.assets.clone()),
                summary: branch.return_value.as_ref().and_then(|v| v.summary.clone()),
            })
            .collect(),
    }
}
