//! Stall detection.
//!
//! A branch that never calls `returnToParent` stays `active` forever. The
//! monitor periodically lists active sub-agents and reports each one older
//! than the configured bound exactly once, as a warning and a
//! [`BranchEvent::BranchStalled`]. It never changes any state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::registry::BranchRegistry;
use super::types::{BranchEvent, EventSink};
use crate::error::BranchError;
use crate::model::ConversationId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StalledBranch {
    pub conversation_id: ConversationId,
    pub parent_id: Option<ConversationId>,
    pub title: String,
    pub active_for: Duration,
}

#[derive(Clone)]
pub struct StallMonitor {
    registry: BranchRegistry,
    events: EventSink,
    stall_after: Duration,
    interval: Duration,
    reported: Arc<Mutex<HashSet<ConversationId>>>,
}

impl StallMonitor {
    pub fn new(
        registry: BranchRegistry,
        events: EventSink,
        stall_after: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            events,
            stall_after,
            interval,
            reported: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Report branches that became stalled as of `now`.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<Vec<StalledBranch>, BranchError> {
        let active = self.registry.active_branches().await?;

        let mut reported = self.reported.lock().unwrap_or_else(PoisonError::into_inner);
        // Forget branches that resolved since the last scan.
        reported.retain(|id| active.iter().any(|c| &c.id == id));

        let mut stalled = Vec::new();
        for conversation in active {
            let Ok(age) = (now - conversation.created_at).to_std() else {
                continue;
            };
            if age < self.stall_after || !reported.insert(conversation.id.clone()) {
                continue;
            }

            tracing::warn!(
                conversation_id = %conversation.id,
                parent_id = conversation.parent_id.as_deref().unwrap_or("-"),
                active_secs = age.as_secs(),
                "Branch stalled"
            );
            self.events.emit(BranchEvent::BranchStalled {
                conversation_id: conversation.id.clone(),
                reason: format!("active for {}s without returning", age.as_secs()),
            });
            stalled.push(StalledBranch {
                conversation_id: conversation.id,
                parent_id: conversation.parent_id,
                title: conversation.title,
                active_for: age,
            });
        }
        Ok(stalled)
    }

    /// Scan every interval until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.scan(Utc::now()).await {
                        tracing::warn!(error = %e, "Stall scan failed");
                    }
                }
            }
        }
        tracing::debug!("Stall monitor stopped");
    }
}
