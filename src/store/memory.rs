//! In-process [`ConversationStore`].
//!
//! All rows live behind a single `std::sync::Mutex`; no lock is held across an
//! `.await`, so every trait method is atomic with respect to the others.
//! Children are indexed by parent id so "children of X" never scans the table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{ConversationStore, StatusUpdate};
use crate::error::StoreError;
use crate::model::{
    Asset, AssetId, BranchStatus, Conversation, ConversationId, ConversationKind, Message,
    ReturnValue,
};

#[derive(Default)]
struct Tables {
    conversations: HashMap<ConversationId, Conversation>,
    children: HashMap<ConversationId, Vec<ConversationId>>,
    messages: HashMap<ConversationId, Vec<Message>>,
    assets: HashMap<AssetId, Asset>,
    assets_by_conversation: HashMap<ConversationId, Vec<AssetId>>,
}

/// Shared in-memory store. Cloning shares the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn insert_conversation(&self, conversation: Conversation) -> Result<(), StoreError> {
        let mut tables = self.lock();

        if tables.conversations.contains_key(&conversation.id) {
            return Err(StoreError::AlreadyExists(conversation.id));
        }
        if let Some(parent_id) = &conversation.parent_id {
            if !tables.conversations.contains_key(parent_id) {
                return Err(StoreError::NotFound(parent_id.clone()));
            }
            tables
                .children
                .entry(parent_id.clone())
                .or_default()
                .push(conversation.id.clone());
        }

        tables
            .conversations
            .insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        Ok(self.lock().conversations.get(id).cloned())
    }

    async fn set_kind(&self, id: &str, kind: ConversationKind) -> Result<Conversation, StoreError> {
        let mut tables = self.lock();
        let conversation = tables
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if conversation.kind != kind {
            conversation.kind = kind;
            conversation.updated_at = Utc::now();
        }
        Ok(conversation.clone())
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let tables = self.lock();
        let children = tables
            .children
            .get(parent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.conversations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(children)
    }

    async fn list_by_status(&self, status: BranchStatus) -> Result<Vec<Conversation>, StoreError> {
        let tables = self.lock();
        let mut matching: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|c| c.status == Some(status))
            .cloned()
            .collect();
        matching.sort_by_key(|c| c.created_at);
        Ok(matching)
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: BranchStatus,
        next: BranchStatus,
        return_value: Option<ReturnValue>,
    ) -> Result<StatusUpdate, StoreError> {
        let mut tables = self.lock();
        let conversation = tables
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if conversation.status != Some(expected) {
            return Ok(StatusUpdate::Conflict(conversation.clone()));
        }

        conversation.status = Some(next);
        if return_value.is_some() {
            conversation.return_value = return_value;
        }
        conversation.updated_at = Utc::now();
        Ok(StatusUpdate::Applied(conversation.clone()))
    }

    async fn append_message(&self, message: Message) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if !tables.conversations.contains_key(&message.conversation_id) {
            return Err(StoreError::NotFound(message.conversation_id));
        }
        tables
            .messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let tables = self.lock();
        if !tables.conversations.contains_key(conversation_id) {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }
        Ok(tables
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_asset(&self, asset: Asset) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if tables.assets.contains_key(&asset.id) {
            return Err(StoreError::AlreadyExists(asset.id));
        }
        tables
            .assets_by_conversation
            .entry(asset.conversation_id.clone())
            .or_default()
            .push(asset.id.clone());
        tables.assets.insert(asset.id.clone(), asset);
        Ok(())
    }

    async fn list_assets(&self, conversation_id: &str) -> Result<Vec<Asset>, StoreError> {
        let tables = self.lock();
        Ok(tables
            .assets_by_conversation
            .get(conversation_id)
            .map(|ids| ids.iter().filter_map(|id| tables.assets.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    async fn get_assets(&self, ids: &[AssetId]) -> Result<Vec<Asset>, StoreError> {
        let tables = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.assets.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetKind, ContentPart, Role, new_id};

    async fn store_with_parent() -> (MemoryStore, Conversation) {
        let store = MemoryStore::new();
        let parent = Conversation::root("owner", "parent");
        store.insert_conversation(parent.clone()).await.unwrap();
        (store, parent)
    }

    #[tokio::test]
    async fn insert_rejects_missing_parent() {
        let store = MemoryStore::new();
        let ghost = Conversation::root("owner", "ghost");
        let orphan = Conversation::sub_agent(&ghost, "orphan");

        let err = store.insert_conversation(orphan).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == ghost.id));
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_id() {
        let (store, parent) = store_with_parent().await;
        let err = store.insert_conversation(parent).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn list_children_preserves_creation_order() {
        let (store, parent) = store_with_parent().await;
        let mut ids = Vec::new();
        for i in 0..3 {
            let child = Conversation::sub_agent(&parent, format!("child-{i}"));
            ids.push(child.id.clone());
            store.insert_conversation(child).await.unwrap();
        }

        let children = store.list_children(&parent.id).await.unwrap();
        let got: Vec<_> = children.iter().map(|c| c.id.clone()).collect();
        assert_eq!(got, ids);
        assert!(store.list_children(&ids[0]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn compare_and_set_applies_once() {
        let (store, parent) = store_with_parent().await;
        let child = Conversation::sub_agent(&parent, "child");
        store.insert_conversation(child.clone()).await.unwrap();

        let first = ReturnValue {
            assets: vec!["a1".into()],
            summary: Some("first".into()),
        };
        let update = store
            .compare_and_set_status(
                &child.id,
                BranchStatus::Active,
                BranchStatus::Returned,
                Some(first.clone()),
            )
            .await
            .unwrap();
        assert!(matches!(update, StatusUpdate::Applied(ref c) if c.return_value.as_ref() == Some(&first)));

        let second = ReturnValue {
            assets: vec![],
            summary: Some("second".into()),
        };
        let update = store
            .compare_and_set_status(
                &child.id,
                BranchStatus::Active,
                BranchStatus::Returned,
                Some(second),
            )
            .await
            .unwrap();
        match update {
            StatusUpdate::Conflict(current) => {
                assert_eq!(current.status, Some(BranchStatus::Returned));
                assert_eq!(current.return_value, Some(first));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_by_status_only_returns_matching_sub_agents() {
        let (store, parent) = store_with_parent().await;
        let a = Conversation::sub_agent(&parent, "a");
        let b = Conversation::sub_agent(&parent, "b");
        store.insert_conversation(a.clone()).await.unwrap();
        store.insert_conversation(b.clone()).await.unwrap();
        store
            .compare_and_set_status(&b.id, BranchStatus::Active, BranchStatus::Returned, None)
            .await
            .unwrap();

        let active = store.list_by_status(BranchStatus::Active).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
    }

    #[tokio::test]
    async fn messages_are_kept_in_append_order() {
        let (store, parent) = store_with_parent().await;
        for text in ["one", "two", "three"] {
            store
                .append_message(Message::new(&parent.id, Role::User, vec![ContentPart::text(text)]))
                .await
                .unwrap();
        }
        let texts: Vec<String> = store
            .list_messages(&parent.id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.text())
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);

        let err = store
            .append_message(Message::new("missing", Role::User, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_assets_keeps_requested_order_and_skips_unknown() {
        let (store, parent) = store_with_parent().await;
        let mut ids = Vec::new();
        for kind in [AssetKind::Image, AssetKind::Video] {
            let asset = Asset {
                id: new_id(),
                conversation_id: parent.id.clone(),
                kind,
                uri: format!("assets/{}", kind.as_str()),
                created_at: Utc::now(),
            };
            ids.push(asset.id.clone());
            store.insert_asset(asset).await.unwrap();
        }

        let requested = vec![ids[1].clone(), "unknown".to_string(), ids[0].clone()];
        let got = store.get_assets(&requested).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].kind, AssetKind::Video);
        assert_eq!(got[1].kind, AssetKind::Image);
        assert_eq!(store.list_assets(&parent.id).await.unwrap().len(), 2);
    }
}
