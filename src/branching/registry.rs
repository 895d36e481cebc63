//! Branch Registry: the data-model authority for the parent/child hierarchy.
//!
//! [`BranchRegistry`] wraps a [`ConversationStore`] and is the only component
//! that creates conversations or moves a branch through its lifecycle. It
//! enforces the hierarchy invariants on top of the raw store:
//!
//! - a child's parent exists and is (or becomes) an `orchestrator`;
//! - a `sub-agent` never changes kind;
//! - status only moves forward, and `returnValue` is written exactly once.
//!
//! Parents and children are independent rows linked by `parent_id`; the branch
//! set is always a query, never an in-memory graph.

use std::sync::Arc;

use crate::agent::prompts::render_transcript;
use crate::error::BranchError;
use crate::model::{
    Asset, AssetId, BranchStatus, ContentPart, Conversation, ConversationKind, Message,
    ReturnValue, Role,
};
use crate::store::{ConversationStore, StatusUpdate};

#[derive(Clone)]
pub struct BranchRegistry {
    store: Arc<dyn ConversationStore>,
}

impl BranchRegistry {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Create a `standalone` root conversation.
    pub async fn create_root(
        &self,
        owner_id: &str,
        title: &str,
    ) -> Result<Conversation, BranchError> {
        let conversation = Conversation::root(owner_id, title);
        self.store.insert_conversation(conversation.clone()).await?;
        tracing::info!(conversation_id = %conversation.id, title, "Created root conversation");
        Ok(conversation)
    }

    /// Fetch a conversation or fail with `NotFound`.
    pub async fn get(&self, id: &str) -> Result<Conversation, BranchError> {
        self.store
            .get_conversation(id)
            .await?
            .ok_or_else(|| BranchError::NotFound { id: id.to_string() })
    }

    /// Mark `parent` as an orchestrator ahead of creating children.
    ///
    /// Idempotent for conversations that already are orchestrators. A
    /// sub-agent cannot become a parent.
    pub async fn promote_to_orchestrator(
        &self,
        parent: &Conversation,
    ) -> Result<Conversation, BranchError> {
        match parent.kind {
            ConversationKind::Orchestrator => Ok(parent.clone()),
            ConversationKind::SubAgent => Err(BranchError::InvalidOperation(format!(
                "sub-agent {} cannot spawn branches",
                parent.id
            ))),
            ConversationKind::Standalone => {
                let updated = self
                    .store
                    .set_kind(&parent.id, ConversationKind::Orchestrator)
                    .await?;
                tracing::info!(conversation_id = %parent.id, "Conversation promoted to orchestrator");
                Ok(updated)
            }
        }
    }

    /// Undo a promotion that produced no children. Leaves the conversation
    /// alone once any branch exists under it.
    pub async fn revert_promotion(&self, parent_id: &str) -> Result<(), BranchError> {
        if !self.store.list_children(parent_id).await?.is_empty() {
            return Ok(());
        }
        self.store
            .set_kind(parent_id, ConversationKind::Standalone)
            .await?;
        tracing::info!(conversation_id = %parent_id, "Promotion reverted, no branches were created");
        Ok(())
    }

    /// Create one `active` sub-agent under `parent` and seed it with a single
    /// user message made of `seed`.
    ///
    /// The conversation row and its seed message are written before this
    /// returns, so any poll that can see the child can also see its brief.
    pub async fn create_child(
        &self,
        parent: &Conversation,
        title: &str,
        seed: Vec<ContentPart>,
    ) -> Result<Conversation, BranchError> {
        if parent.kind != ConversationKind::Orchestrator {
            return Err(BranchError::InvalidOperation(format!(
                "conversation {} must be an orchestrator to own branches",
                parent.id
            )));
        }

        let child = Conversation::sub_agent(parent, title);
        self.store.insert_conversation(child.clone()).await?;
        self.store
            .append_message(Message::new(&child.id, Role::User, seed))
            .await?;
        Ok(child)
    }

    /// Children of `parent_id`, in creation order.
    pub async fn children_of(&self, parent_id: &str) -> Result<Vec<Conversation>, BranchError> {
        Ok(self.store.list_children(parent_id).await?)
    }

    /// All sub-agents currently `active`, across every parent.
    pub async fn active_branches(&self) -> Result<Vec<Conversation>, BranchError> {
        Ok(self.store.list_by_status(BranchStatus::Active).await?)
    }

    /// Move a sub-agent `active -> returned`, recording `value` once.
    ///
    /// A branch already `returned` or `finalized` is rejected with
    /// `AlreadyReturned` and keeps its original value.
    pub async fn record_return(
        &self,
        child: &Conversation,
        value: ReturnValue,
    ) -> Result<Conversation, BranchError> {
        Self::require_sub_agent(child, "can only return from a sub-agent")?;

        match self
            .store
            .compare_and_set_status(
                &child.id,
                BranchStatus::Active,
                BranchStatus::Returned,
                Some(value),
            )
            .await?
        {
            StatusUpdate::Applied(updated) => Ok(updated),
            StatusUpdate::Conflict(current) => Err(BranchError::AlreadyReturned {
                id: current.id,
                status: current.status.unwrap_or(BranchStatus::Active),
            }),
        }
    }

    /// Move a sub-agent `returned -> finalized`.
    pub async fn finalize(&self, child: &Conversation) -> Result<Conversation, BranchError> {
        Self::require_sub_agent(child, "only sub-agent branches can be finalized")?;

        match self
            .store
            .compare_and_set_status(
                &child.id,
                BranchStatus::Returned,
                BranchStatus::Finalized,
                None,
            )
            .await?
        {
            StatusUpdate::Applied(updated) => Ok(updated),
            StatusUpdate::Conflict(current) => Err(BranchError::InvalidOperation(format!(
                "branch {} cannot be finalized while {}",
                current.id,
                current.status.unwrap_or(BranchStatus::Active)
            ))),
        }
    }

    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        parts: Vec<ContentPart>,
    ) -> Result<Message, BranchError> {
        let message = Message::new(conversation_id, role, parts);
        self.store.append_message(message.clone()).await?;
        Ok(message)
    }

    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, BranchError> {
        Ok(self.store.list_messages(conversation_id).await?)
    }

    /// Text transcript of a conversation, as handed to sub-agents for context.
    pub async fn transcript(&self, conversation_id: &str) -> Result<String, BranchError> {
        let messages = self.messages(conversation_id).await?;
        Ok(render_transcript(&messages))
    }

    pub async fn record_asset(&self, asset: Asset) -> Result<(), BranchError> {
        Ok(self.store.insert_asset(asset).await?)
    }

    pub async fn assets(&self, ids: &[AssetId]) -> Result<Vec<Asset>, BranchError> {
        Ok(self.store.get_assets(ids).await?)
    }

    fn require_sub_agent(conversation: &Conversation, message: &str) -> Result<(), BranchError> {
        if conversation.is_sub_agent() {
            Ok(())
        } else {
            Err(BranchError::InvalidOperation(format!(
                "{message} (conversation {} is {})",
                conversation.id,
                conversation.kind.as_str()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> BranchRegistry {
        BranchRegistry::new(Arc::new(MemoryStore::new()))
    }

    async fn orchestrator(reg: &BranchRegistry) -> Conversation {
        let root = reg.create_root("owner", "story-1").await.unwrap();
        reg.promote_to_orchestrator(&root).await.unwrap()
    }

    #[tokio::test]
    async fn promote_is_idempotent_and_rejects_sub_agents() {
        let reg = registry();
        let root = reg.create_root("owner", "root").await.unwrap();
        assert_eq!(root.kind, ConversationKind::Standalone);

        let parent = reg.promote_to_orchestrator(&root).await.unwrap();
        assert_eq!(parent.kind, ConversationKind::Orchestrator);
        let again = reg.promote_to_orchestrator(&parent).await.unwrap();
        assert_eq!(again.kind, ConversationKind::Orchestrator);

        let child = reg
            .create_child(&parent, "child", vec![ContentPart::text("brief")])
            .await
            .unwrap();
        let err = reg.promote_to_orchestrator(&child).await.unwrap_err();
        assert!(matches!(err, BranchError::InvalidOperation(_)));
        assert_eq!(reg.get(&child.id).await.unwrap().kind, ConversationKind::SubAgent);
    }

    #[tokio::test]
    async fn create_child_requires_orchestrator_parent() {
        let reg = registry();
        let root = reg.create_root("owner", "root").await.unwrap();
        let err = reg
            .create_child(&root, "child", vec![ContentPart::text("brief")])
            .await
            .unwrap_err();
        assert!(matches!(err, BranchError::InvalidOperation(_)));
        assert!(reg.children_of(&root.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_child_seeds_single_user_message() {
        let reg = registry();
        let parent = orchestrator(&reg).await;
        let child = reg
            .create_child(&parent, "Scene 1", vec![ContentPart::text("Dock at dawn")])
            .await
            .unwrap();

        let messages = reg.messages(&child.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text(), "Dock at dawn");
        assert_eq!(child.status, Some(BranchStatus::Active));
    }

    #[tokio::test]
    async fn record_return_then_finalize() {
        let reg = registry();
        let parent = orchestrator(&reg).await;
        let child = reg
            .create_child(&parent, "c", vec![ContentPart::text("t")])
            .await
            .unwrap();

        let err = reg.finalize(&child).await.unwrap_err();
        assert!(matches!(err, BranchError::InvalidOperation(_)));

        let value = ReturnValue {
            assets: vec!["a1".into()],
            summary: None,
        };
        let returned = reg.record_return(&child, value.clone()).await.unwrap();
        assert_eq!(returned.status, Some(BranchStatus::Returned));
        assert_eq!(returned.return_value, Some(value.clone()));

        let finalized = reg.finalize(&returned).await.unwrap();
        assert_eq!(finalized.status, Some(BranchStatus::Finalized));
        assert_eq!(finalized.return_value, Some(value));

        let err = reg
            .record_return(&finalized, ReturnValue::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BranchError::AlreadyReturned {
                status: BranchStatus::Finalized,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let reg = registry();
        let err = reg.get("nope").await.unwrap_err();
        assert!(matches!(err, BranchError::NotFound { id } if id == "nope"));
    }
}
