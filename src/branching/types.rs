//! Vocabulary shared by the spawn, return, gate and continuation components.
//!
//! Everything here is a value type: snapshots of store rows, requests and
//! receipts. The authoritative state always lives in the
//! [`crate::store::ConversationStore`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::agent::tools::BriefInput;
use crate::model::{AssetId, AssetKind, BranchStatus, Conversation, ConversationId, ReturnValue};

/// Upper bound on briefs per spawn call.
pub const MAX_BRIEFS: usize = 10;

/// One sub-task handed to a new sub-agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brief {
    pub name: String,
    pub task: String,
    #[serde(default)]
    pub reference_asset_ids: Vec<AssetId>,
}

impl Brief {
    pub fn new(name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: task.into(),
            reference_asset_ids: Vec::new(),
        }
    }

    pub fn with_references(mut self, ids: Vec<AssetId>) -> Self {
        self.reference_asset_ids = ids;
        self
    }
}

impl From<BriefInput> for Brief {
    fn from(input: BriefInput) -> Self {
        Self {
            name: input.name,
            task: input.brief,
            reference_asset_ids: input.reference_assets.unwrap_or_default(),
        }
    }
}

/// A child created by a spawn, as reported to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnedChild {
    pub id: ConversationId,
    pub name: String,
}

/// Receipt for a successful return.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnReceipt {
    pub parent_id: Option<ConversationId>,
}

/// One row of a branch status poll. Deliberately small: no transcripts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStatusEntry {
    pub id: ConversationId,
    pub name: String,
    pub status: BranchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<ReturnValue>,
    pub spawned_at: DateTime<Utc>,
}

impl BranchStatusEntry {
    pub(crate) fn from_child(child: &Conversation) -> Self {
        Self {
            id: child.id.clone(),
            name: child.title.clone(),
            // Children are always sub-agents; a missing status is treated as active.
            status: child.status.unwrap_or(BranchStatus::Active),
            return_value: child.return_value.clone(),
            spawned_at: child.created_at,
        }
    }
}

/// Aggregate status of a parent's branch set, computed fresh on every poll.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchReport {
    pub parent_id: ConversationId,
    pub branches: Vec<BranchStatusEntry>,
    pub active_count: usize,
    pub returned_count: usize,
    pub finalized_count: usize,
}

impl BranchReport {
    pub fn new(parent_id: ConversationId, branches: Vec<BranchStatusEntry>) -> Self {
        let count = |s: BranchStatus| branches.iter().filter(|b| b.status == s).count();
        let active_count = count(BranchStatus::Active);
        let returned_count = count(BranchStatus::Returned);
        let finalized_count = count(BranchStatus::Finalized);
        Self {
            parent_id,
            branches,
            active_count,
            returned_count,
            finalized_count,
        }
    }

    /// The parent cannot productively continue.
    pub fn is_blocked(&self) -> bool {
        self.active_count > 0
    }

    /// There is at least one branch and none is active.
    pub fn all_resolved(&self) -> bool {
        !self.branches.is_empty() && self.active_count == 0
    }

    /// Branches no longer active (`returned` or `finalized`).
    pub fn resolved_count(&self) -> usize {
        self.returned_count + self.finalized_count
    }
}

/// Observable events: navigation hints for UIs plus lifecycle notices.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BranchEvent {
    Spawned {
        parent_id: ConversationId,
        children: Vec<SpawnedChild>,
    },
    AssetCreated {
        conversation_id: ConversationId,
        asset_id: AssetId,
        kind: AssetKind,
        uri: String,
    },
    /// Observers of the child may redirect to `navigate_to`.
    BranchReturned {
        child_id: ConversationId,
        navigate_to: Option<ConversationId>,
    },
    BranchFinalized {
        child_id: ConversationId,
    },
    RunFinished {
        conversation_id: ConversationId,
        tool_calls: usize,
    },
    RunFailed {
        conversation_id: ConversationId,
        error: String,
    },
    BranchStalled {
        conversation_id: ConversationId,
        reason: String,
    },
    ParentResumed {
        parent_id: ConversationId,
        tool_call_id: String,
    },
}

/// Optional event channel shared by every component. Send failures (no
/// receiver) are ignored.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<BranchEvent>>,
}

impl EventSink {
    pub fn new(tx: Option<UnboundedSender<BranchEvent>>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: BranchEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Runtime knobs for the branching engine, resolved from config.
#[derive(Clone, Debug)]
pub struct BranchSettings {
    /// Maximum model/tool rounds per run.
    pub step_budget: usize,
    /// Concurrent runs across all branches.
    pub max_concurrent_runs: usize,
    /// Wall-clock limit for one run; `None` means unbounded.
    pub run_timeout: Option<Duration>,
    pub poll_interval: Duration,
    /// Age after which an `active` branch is reported as stalled.
    pub stall_after: Duration,
    /// Append the parent transcript to each sub-agent's system prompt.
    pub carry_parent_context: bool,
}

impl Default for BranchSettings {
    fn default() -> Self {
        Self {
            step_budget: 5,
            max_concurrent_runs: 4,
            run_timeout: None,
            poll_interval: Duration::from_millis(2000),
            stall_after: Duration::from_secs(600),
            carry_parent_context: true,
        }
    }
}
