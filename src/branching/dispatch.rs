//! Background Executor Adapter.
//!
//! [`BranchDispatcher`] turns "run this conversation to completion" into a
//! supervised tokio task. Every run:
//!
//! - waits for a permit from a shared [`Semaphore`] (global cap on concurrent
//!   runs across all branches);
//! - gets a child [`CancellationToken`] of the dispatcher's root token, so
//!   cancelling the root cascades to every run;
//! - is optionally raced against a wall-clock timeout;
//! - has its terminal error logged and emitted as an event at the task
//!   boundary. Nothing propagates back to whoever dispatched it.
//!
//! JoinHandles are kept in a registry keyed by run id so callers can wait for
//! quiescence ([`BranchDispatcher::join_all`]) or shut everything down
//! ([`BranchDispatcher::shutdown_all`]).
//!
//! A conversation has at most one run at a time. [`BranchDispatcher::claim`]
//! reserves the conversation before anything is appended to it; the
//! [`RunClaim`] travels into the task and releases the conversation when the
//! task ends, however it ends.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::registry::BranchRegistry;
use super::spawn::SpawnCoordinator;
use super::types::{BranchEvent, BranchSettings, EventSink};
use crate::agent::executor::{StopReason, TaskExecutor, TurnOutcome, TurnRequest};
use crate::agent::host::BranchToolHost;
use crate::agent::prompts::system_prompt;
use crate::error::BranchError;
use crate::media::MediaBackend;
use crate::model::{ContentPart, ConversationId, Role, new_id};

/// A unit of background work: run one conversation's next turn.
#[derive(Clone, Debug)]
pub struct BranchJob {
    pub conversation_id: ConversationId,
    /// Parent transcript appended to a sub-agent's system prompt.
    pub parent_context: Option<String>,
}

impl BranchJob {
    pub fn new(conversation_id: impl Into<ConversationId>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            parent_context: None,
        }
    }

    pub fn with_parent_context(mut self, context: Option<String>) -> Self {
        self.parent_context = context;
        self
    }
}

/// Collaborators every run needs. Shared by all clones of the dispatcher.
struct RunContext {
    registry: BranchRegistry,
    executor: Arc<dyn TaskExecutor>,
    media: Arc<dyn MediaBackend>,
    events: EventSink,
    settings: BranchSettings,
}

struct RunHandle {
    conversation_id: ConversationId,
    handle: JoinHandle<()>,
}

/// Exclusive right to run one conversation. Dropping it releases the
/// conversation.
#[must_use = "dropping a claim releases the conversation"]
pub struct RunClaim {
    conversation_id: ConversationId,
    busy: Arc<Mutex<HashSet<ConversationId>>>,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.conversation_id);
    }
}

/// How a supervised run ended.
enum RunEnd {
    Finished(TurnOutcome),
    Failed(BranchError),
    TimedOut(Duration),
    Cancelled,
}

#[derive(Clone)]
pub struct BranchDispatcher {
    ctx: Arc<RunContext>,
    runs: Arc<Mutex<HashMap<String, RunHandle>>>,
    busy: Arc<Mutex<HashSet<ConversationId>>>,
    permits: Arc<Semaphore>,
    root_cancel_token: CancellationToken,
}

impl BranchDispatcher {
    pub fn new(
        registry: BranchRegistry,
        executor: Arc<dyn TaskExecutor>,
        media: Arc<dyn MediaBackend>,
        events: EventSink,
        settings: BranchSettings,
        root_cancel_token: CancellationToken,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_runs.max(1)));
        Self {
            ctx: Arc::new(RunContext {
                registry,
                executor,
                media,
                events,
                settings,
            }),
            runs: Arc::new(Mutex::new(HashMap::new())),
            busy: Arc::new(Mutex::new(HashSet::new())),
            permits,
            root_cancel_token,
        }
    }

    /// Schedule `job` and return its run id without waiting for it.
    ///
    /// Fails when the dispatcher has been shut down or the conversation
    /// already has a run in flight.
    pub fn dispatch(&self, job: BranchJob) -> Result<String, BranchError> {
        let claim = self.claim(&job.conversation_id)?;
        self.dispatch_claimed(claim, job)
    }

    /// Reserve `conversation_id` for a run that will be dispatched with
    /// [`BranchDispatcher::dispatch_claimed`].
    pub fn claim(&self, conversation_id: &str) -> Result<RunClaim, BranchError> {
        self.ensure_open(conversation_id)?;
        if !self.lock_busy().insert(conversation_id.to_string()) {
            tracing::debug!(%conversation_id, "Run rejected: conversation is busy");
            return Err(BranchError::RunInFlight {
                id: conversation_id.to_string(),
            });
        }
        Ok(RunClaim {
            conversation_id: conversation_id.to_string(),
            busy: self.busy.clone(),
        })
    }

    /// Schedule `job` under a claim taken for the same conversation.
    pub fn dispatch_claimed(&self, claim: RunClaim, job: BranchJob) -> Result<String, BranchError> {
        if claim.conversation_id != job.conversation_id {
            return Err(BranchError::InvalidOperation(format!(
                "claim for {} cannot run {}",
                claim.conversation_id, job.conversation_id
            )));
        }
        self.ensure_open(&job.conversation_id)?;

        let run_id = new_id();
        let token = self.root_cancel_token.child_token();
        let conversation_id = job.conversation_id.clone();

        // Hold the registry lock across spawn + insert so the task's own
        // removal always finds its entry.
        let mut runs = self.lock_runs();
        let dispatcher = self.clone();
        let task_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            let _claim = claim;
            dispatcher.supervise(&task_run_id, job, token).await;
            dispatcher.lock_runs().remove(&task_run_id);
        });
        runs.insert(
            run_id.clone(),
            RunHandle {
                conversation_id: conversation_id.clone(),
                handle,
            },
        );
        drop(runs);

        tracing::debug!(%run_id, %conversation_id, "Run dispatched");
        Ok(run_id)
    }

    /// Whether `conversation_id` is claimed or has a run scheduled or
    /// executing.
    pub fn is_running(&self, conversation_id: &str) -> bool {
        self.lock_busy().contains(conversation_id)
    }

    /// Number of runs scheduled or executing.
    pub fn in_flight(&self) -> usize {
        self.lock_runs().len()
    }

    /// Wait until no run is scheduled or executing, including runs
    /// dispatched while waiting (a parent's spawn, a continuation).
    pub async fn join_all(&self) {
        loop {
            let pending: Vec<(String, RunHandle)> = self.lock_runs().drain().collect();
            if pending.is_empty() {
                return;
            }

            let results = futures::future::join_all(pending.into_iter().map(
                |(run_id, run)| async move { (run_id, run.conversation_id, run.handle.await) },
            ))
            .await;

            for (run_id, conversation_id, result) in results {
                if let Err(e) = result {
                    tracing::error!(%run_id, %conversation_id, error = %e, "Run task panicked");
                    self.ctx.events.emit(BranchEvent::RunFailed {
                        conversation_id,
                        error: format!("run task panicked: {e}"),
                    });
                }
            }
        }
    }

    /// Cancel every run, then await each handle with a 5 second timeout.
    pub async fn shutdown_all(&self) {
        self.root_cancel_token.cancel();

        let handles: Vec<(String, RunHandle)> = self.lock_runs().drain().collect();
        for (run_id, run) in handles {
            if tokio::time::timeout(Duration::from_secs(5), run.handle)
                .await
                .is_err()
            {
                tracing::warn!(%run_id, conversation_id = %run.conversation_id, "Run did not stop within 5s");
            }
        }
    }

    async fn supervise(&self, run_id: &str, job: BranchJob, token: CancellationToken) {
        let conversation_id = job.conversation_id.clone();

        let _permit = tokio::select! {
            _ = token.cancelled() => {
                tracing::info!(%run_id, %conversation_id, "Run cancelled before start");
                return;
            }
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let run = self.run_to_completion(job);
        let end = tokio::select! {
            _ = token.cancelled() => RunEnd::Cancelled,
            end = async {
                match self.ctx.settings.run_timeout {
                    Some(limit) => match tokio::time::timeout(limit, run).await {
                        Ok(result) => result.map_or_else(RunEnd::Failed, RunEnd::Finished),
                        Err(_) => RunEnd::TimedOut(limit),
                    },
                    None => run.await.map_or_else(RunEnd::Failed, RunEnd::Finished),
                }
            } => end,
        };

        match end {
            RunEnd::Finished(outcome) => {
                self.ctx.events.emit(BranchEvent::RunFinished {
                    conversation_id,
                    tool_calls: outcome.exchanges.len(),
                });
            }
            RunEnd::Failed(e) => {
                tracing::error!(%run_id, %conversation_id, error = %e, "Run failed");
                self.ctx.events.emit(BranchEvent::RunFailed {
                    conversation_id,
                    error: e.to_string(),
                });
            }
            RunEnd::TimedOut(limit) => {
                tracing::warn!(%run_id, %conversation_id, timeout_secs = limit.as_secs(), "Run timed out; branch is stalled");
                self.ctx.events.emit(BranchEvent::BranchStalled {
                    conversation_id,
                    reason: format!("run exceeded {}s", limit.as_secs()),
                });
            }
            RunEnd::Cancelled => {
                tracing::info!(%run_id, %conversation_id, "Run cancelled");
            }
        }
    }

    /// Load history, run one turn through the executor and persist the
    /// normalized assistant message.
    async fn run_to_completion(&self, job: BranchJob) -> Result<TurnOutcome, BranchError> {
        let ctx = &self.ctx;
        let conversation = ctx.registry.get(&job.conversation_id).await?;
        let history = ctx.registry.messages(&conversation.id).await?;

        let mut host = BranchToolHost::new(
            conversation.clone(),
            ctx.registry.clone(),
            ctx.media.clone(),
            ctx.events.clone(),
        );
        if !conversation.is_sub_agent() {
            host = host.with_spawner(SpawnCoordinator::new(
                ctx.registry.clone(),
                self.clone(),
                ctx.events.clone(),
                ctx.settings.clone(),
            ));
        }

        let request = TurnRequest {
            system_prompt: system_prompt(conversation.kind, job.parent_context.as_deref()),
            conversation,
            history,
            step_budget: ctx.settings.step_budget,
        };
        let conversation_id = request.conversation.id.clone();

        tracing::info!(%conversation_id, history = request.history.len(), "Run started");
        let outcome = ctx.executor.run_turn(request, &host).await?;

        let parts = assistant_parts(&outcome);
        if !parts.is_empty() {
            ctx.registry
                .append_message(&conversation_id, Role::Assistant, parts)
                .await?;
        }

        if outcome.stop == StopReason::StepBudgetExhausted {
            tracing::warn!(%conversation_id, rounds = outcome.steps, "Step budget exhausted");
        }
        tracing::info!(
            %conversation_id,
            rounds = outcome.steps,
            tool_calls = outcome.exchanges.len(),
            "Run finished"
        );
        Ok(outcome)
    }

    fn ensure_open(&self, conversation_id: &str) -> Result<(), BranchError> {
        if self.root_cancel_token.is_cancelled() {
            tracing::warn!(%conversation_id, "Dispatch dropped: dispatcher is shut down");
            return Err(BranchError::InvalidOperation(
                "dispatcher is shut down".to_string(),
            ));
        }
        Ok(())
    }

    fn lock_busy(&self) -> MutexGuard<'_, HashSet<ConversationId>> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_runs(&self) -> MutexGuard<'_, HashMap<String, RunHandle>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One tool-invocation part per exchange, in call order, then the final text.
fn assistant_parts(outcome: &TurnOutcome) -> Vec<ContentPart> {
    let mut parts: Vec<ContentPart> = outcome
        .exchanges
        .iter()
        .map(|exchange| ContentPart::ToolInvocation {
            tool_call_id: exchange.call_id.clone(),
            call: exchange.call.clone(),
            output: Some(exchange.output.clone()),
        })
        .collect();
    if let Some(text) = outcome.text.as_deref().filter(|t| !t.trim().is_empty()) {
        parts.push(ContentPart::text(text));
    }
    parts
}
