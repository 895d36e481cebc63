//! Conversation Store interface.
//!
//! The branching engine only talks to persistence through
//! [`ConversationStore`]. Durable backends live outside this crate;
//! [`memory::MemoryStore`] is the in-process implementation used by the CLI
//! and the tests.

pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{
    Asset, AssetId, BranchStatus, Conversation, ConversationKind, Message, ReturnValue,
};

pub use memory::MemoryStore;

/// Outcome of [`ConversationStore::compare_and_set_status`].
#[derive(Clone, Debug, PartialEq)]
pub enum StatusUpdate {
    /// The expected status matched; the returned row is the new state.
    Applied(Conversation),
    /// The current status did not match; the returned row is unchanged.
    Conflict(Conversation),
}

/// Read/write operations the branching core needs from persistence.
///
/// Every call reflects the latest committed state; implementations must make
/// each method atomic with respect to the others.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert a new conversation. Fails with `AlreadyExists` on id collision
    /// and `NotFound` if `parent_id` references a missing row.
    async fn insert_conversation(&self, conversation: Conversation) -> Result<(), StoreError>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Overwrite `kind`, returning the updated row.
    async fn set_kind(&self, id: &str, kind: ConversationKind) -> Result<Conversation, StoreError>;

    /// Children of `parent_id`, in creation order.
    async fn list_children(&self, parent_id: &str) -> Result<Vec<Conversation>, StoreError>;

    /// All sub-agent conversations currently in `status`.
    async fn list_by_status(&self, status: BranchStatus) -> Result<Vec<Conversation>, StoreError>;

    /// Atomically move `id` from `expected` to `next`, setting `return_value`
    /// when one is given. The row is left untouched on a mismatch.
    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: BranchStatus,
        next: BranchStatus,
        return_value: Option<ReturnValue>,
    ) -> Result<StatusUpdate, StoreError>;

    async fn append_message(&self, message: Message) -> Result<(), StoreError>;

    /// Messages of a conversation in creation order.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;

    async fn insert_asset(&self, asset: Asset) -> Result<(), StoreError>;

    async fn list_assets(&self, conversation_id: &str) -> Result<Vec<Asset>, StoreError>;

    /// Assets matching `ids`, in the order requested. Unknown ids are skipped.
    async fn get_assets(&self, ids: &[AssetId]) -> Result<Vec<Asset>, StoreError>;
}
