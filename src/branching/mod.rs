//! Sub-agent branching engine.
//!
//! [`Orchestrator`] wires the components together from explicitly injected
//! collaborators (store, task executor, media backend) and exposes the
//! operations used by the CLI and any API layer:
//!
//! | Operation | Component |
//! |---|---|
//! | `spawn` | [`spawn::SpawnCoordinator`] |
//! | background runs | [`dispatch::BranchDispatcher`] |
//! | `return_to_parent`, `finalize_branch` | [`returns::ReturnAggregator`] |
//! | `branch_status`, `wait_until_resolved` | [`gate::BranchGate`] |
//! | `continue_parent` | [`continuation::ContinuationTrigger`] |
//! | stall detection | [`monitor::StallMonitor`] |

pub mod continuation;
pub mod dispatch;
pub mod gate;
pub mod monitor;
pub mod registry;
pub mod returns;
pub mod spawn;
pub mod types;

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agent::executor::TaskExecutor;
use crate::error::BranchError;
use crate::media::MediaBackend;
use crate::model::{AssetId, ContentPart, Conversation, ConversationKind, Message, Role};
use crate::store::ConversationStore;

pub use continuation::{Continuation, ContinuationTrigger};
pub use dispatch::{BranchDispatcher, BranchJob};
pub use gate::BranchGate;
pub use monitor::{StallMonitor, StalledBranch};
pub use registry::BranchRegistry;
pub use returns::ReturnAggregator;
pub use spawn::SpawnCoordinator;
pub use types::{
    BranchEvent, BranchReport, BranchSettings, BranchStatusEntry, Brief, EventSink, ReturnReceipt,
    SpawnedChild,
};

#[derive(Clone)]
pub struct Orchestrator {
    registry: BranchRegistry,
    dispatcher: BranchDispatcher,
    spawner: SpawnCoordinator,
    returns: ReturnAggregator,
    gate: BranchGate,
    continuation: ContinuationTrigger,
    events: EventSink,
    settings: BranchSettings,
}

impl Orchestrator {
    /// Wire every component. `cancel` is the root token for all runs.
    pub fn new(
        store: Arc<dyn ConversationStore>,
        executor: Arc<dyn TaskExecutor>,
        media: Arc<dyn MediaBackend>,
        settings: BranchSettings,
        event_tx: Option<UnboundedSender<BranchEvent>>,
        cancel: CancellationToken,
    ) -> Self {
        let events = EventSink::new(event_tx);
        let registry = BranchRegistry::new(store);
        let dispatcher = BranchDispatcher::new(
            registry.clone(),
            executor,
            media,
            events.clone(),
            settings.clone(),
            cancel,
        );
        Self {
            spawner: SpawnCoordinator::new(
                registry.clone(),
                dispatcher.clone(),
                events.clone(),
                settings.clone(),
            ),
            returns: ReturnAggregator::new(registry.clone(), events.clone()),
            gate: BranchGate::new(registry.clone()),
            continuation: ContinuationTrigger::new(
                registry.clone(),
                dispatcher.clone(),
                events.clone(),
            ),
            registry,
            dispatcher,
            events,
            settings,
        }
    }

    pub fn registry(&self) -> &BranchRegistry {
        &self.registry
    }

    /// Create a root conversation seeded with the user's first message.
    /// No run is dispatched; call [`Orchestrator::run_conversation`].
    pub async fn start_conversation(
        &self,
        owner_id: &str,
        title: &str,
        prompt: &str,
    ) -> Result<Conversation, BranchError> {
        if prompt.trim().is_empty() {
            return Err(BranchError::InvalidInput("prompt must not be empty".to_string()));
        }
        let conversation = self.registry.create_root(owner_id, title).await?;
        self.registry
            .append_message(&conversation.id, Role::User, vec![ContentPart::text(prompt)])
            .await?;
        Ok(conversation)
    }

    /// Append a user message and dispatch a run for the conversation.
    ///
    /// Rejected with `Blocked` while the conversation has active branches and
    /// with `RunInFlight` while its previous run is still going. A rejected
    /// call appends nothing.
    pub async fn post_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<Message, BranchError> {
        if text.trim().is_empty() {
            return Err(BranchError::InvalidInput("message must not be empty".to_string()));
        }
        let conversation = self.registry.get(conversation_id).await?;
        let claim = self.dispatcher.claim(&conversation.id)?;
        self.ensure_unblocked(&conversation).await?;

        let message = self
            .registry
            .append_message(&conversation.id, Role::User, vec![ContentPart::text(text)])
            .await?;
        let job = self.job_for(&conversation).await?;
        self.dispatcher.dispatch_claimed(claim, job)?;
        Ok(message)
    }

    /// Dispatch a background run for the conversation's next turn.
    ///
    /// An orchestrator with active branches stays blocked; resume it with
    /// [`Orchestrator::continue_parent`].
    pub async fn run_conversation(&self, conversation_id: &str) -> Result<String, BranchError> {
        let conversation = self.registry.get(conversation_id).await?;
        let claim = self.dispatcher.claim(&conversation.id)?;
        self.ensure_unblocked(&conversation).await?;
        let job = self.job_for(&conversation).await?;
        self.dispatcher.dispatch_claimed(claim, job)
    }

    async fn ensure_unblocked(&self, conversation: &Conversation) -> Result<(), BranchError> {
        if conversation.kind != ConversationKind::Orchestrator {
            return Ok(());
        }
        let report = self.gate.report(&conversation.id).await?;
        if report.is_blocked() {
            tracing::info!(
                parent_id = %conversation.id,
                active = report.active_count,
                "Parent is blocked on its branches"
            );
            return Err(BranchError::Blocked {
                parent_id: conversation.id.clone(),
                active: report.active_count,
            });
        }
        Ok(())
    }

    async fn job_for(&self, conversation: &Conversation) -> Result<BranchJob, BranchError> {
        let mut job = BranchJob::new(&conversation.id);
        if self.settings.carry_parent_context {
            if let Some(parent_id) = conversation.parent_id.as_deref() {
                job = job.with_parent_context(Some(self.registry.transcript(parent_id).await?));
            }
        }
        Ok(job)
    }

    pub async fn spawn(
        &self,
        parent_id: &str,
        briefs: Vec<Brief>,
    ) -> Result<Vec<SpawnedChild>, BranchError> {
        self.spawner.spawn(parent_id, briefs).await
    }

    pub async fn return_to_parent(
        &self,
        child_id: &str,
        asset_ids: Vec<AssetId>,
        summary: Option<String>,
    ) -> Result<ReturnReceipt, BranchError> {
        self.returns.return_to_parent(child_id, asset_ids, summary).await
    }

    pub async fn branch_status(
        &self,
        caller: &str,
        parent_id: &str,
    ) -> Result<BranchReport, BranchError> {
        self.gate.branch_status(caller, parent_id).await
    }

    /// Poll the gate every `poll_interval` until the parent is unblocked.
    pub async fn wait_until_resolved(
        &self,
        caller: &str,
        parent_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<BranchReport>, BranchError> {
        self.gate
            .wait_until_resolved(caller, parent_id, self.settings.poll_interval, cancel)
            .await
    }

    pub async fn continue_parent(
        &self,
        parent_id: &str,
        tool_call_id: &str,
    ) -> Result<Continuation, BranchError> {
        self.continuation.continue_parent(parent_id, tool_call_id).await
    }

    pub async fn finalize_branch(&self, child_id: &str) -> Result<Conversation, BranchError> {
        self.returns.finalize(child_id).await
    }

    pub async fn conversation(&self, id: &str) -> Result<Conversation, BranchError> {
        self.registry.get(id).await
    }

    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, BranchError> {
        self.registry.messages(conversation_id).await
    }

    /// A stall monitor over this orchestrator's store, scanning every poll
    /// interval.
    pub fn stall_monitor(&self) -> StallMonitor {
        StallMonitor::new(
            self.registry.clone(),
            self.events.clone(),
            self.settings.stall_after,
            self.settings.poll_interval,
        )
    }

    /// Wait until no run is scheduled or executing.
    pub async fn join_all(&self) {
        self.dispatcher.join_all().await;
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown_all().await;
    }
}
