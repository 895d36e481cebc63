//! Persistent records shared by the store, the branching engine and the
//! executors.
//!
//! A [`Conversation`] points at its parent by id only; the branch set of a
//! conversation is always a lookup (`children of X`), never an owned tree.
//! Messages are append-only and ordered by creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::tools::{ToolCall, ToolOutput};

/// Unique identifier for a conversation (UUID v4 string).
pub type ConversationId = String;

/// Unique identifier for a message (UUID v4 string).
pub type MessageId = String;

/// Unique identifier for a generated asset (UUID v4 string).
pub type AssetId = String;

/// Generate a fresh UUID v4 string id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// What role a conversation plays in the branch hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationKind {
    /// A plain conversation that has never spawned children.
    Standalone,
    /// A conversation that has spawned at least one sub-agent.
    Orchestrator,
    /// A child conversation created by a spawn. Never changes kind.
    SubAgent,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Standalone => "standalone",
            ConversationKind::Orchestrator => "orchestrator",
            ConversationKind::SubAgent => "sub-agent",
        }
    }
}

/// Lifecycle of a sub-agent conversation.
///
/// Only moves forward: `active -> returned -> finalized`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    /// Still working.
    Active,
    /// Result recorded, not yet consumed by the parent.
    Returned,
    /// Result consumed; immutable.
    Finalized,
}

impl BranchStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, BranchStatus::Active)
    }

    /// Whether `self -> next` is a legal single step of the lifecycle.
    pub fn can_advance_to(&self, next: BranchStatus) -> bool {
        matches!(
            (self, next),
            (BranchStatus::Active, BranchStatus::Returned)
                | (BranchStatus::Returned, BranchStatus::Finalized)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BranchStatus::Active => "active",
            BranchStatus::Returned => "returned",
            BranchStatus::Finalized => "finalized",
        }
    }
}

impl std::fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload a sub-agent hands back to its parent. Set exactly once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnValue {
    pub assets: Vec<AssetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// A conversation row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub parent_id: Option<ConversationId>,
    pub kind: ConversationKind,
    /// `Some` only for sub-agents.
    pub status: Option<BranchStatus>,
    pub return_value: Option<ReturnValue>,
    pub title: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A new root conversation of kind `standalone`.
    pub fn root(owner_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            parent_id: None,
            kind: ConversationKind::Standalone,
            status: None,
            return_value: None,
            title: title.into(),
            owner_id: owner_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A new `active` sub-agent under `parent`, inheriting its owner.
    pub fn sub_agent(parent: &Conversation, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            parent_id: Some(parent.id.clone()),
            kind: ConversationKind::SubAgent,
            status: Some(BranchStatus::Active),
            return_value: None,
            title: title.into(),
            owner_id: parent.owner_id.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_sub_agent(&self) -> bool {
        self.kind == ConversationKind::SubAgent
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One part of a message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// A tool call made during a run, with its result once available.
    ToolInvocation {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        call: ToolCall,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<ToolOutput>,
    },
    Attachment {
        #[serde(rename = "assetId")]
        asset_id: AssetId,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// An immutable message in a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub parts: Vec<ContentPart>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(conversation_id: impl Into<String>, role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            id: new_id(),
            conversation_id: conversation_id.into(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    /// Concatenated text parts, in order, separated by newlines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::Video => "video",
        }
    }
}

/// An artifact produced by a generation tool. Opaque to the branching core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: AssetId,
    pub conversation_id: ConversationId,
    pub kind: AssetKind,
    pub uri: String,
    pub created_at: DateTime<Utc>,
}
