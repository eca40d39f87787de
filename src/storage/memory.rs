//! In-Memory Conversation Storage
//!
//! Information Hiding:
//! - HashMap storage structure hidden from users
//! - Thread-safe access via RwLock hidden behind async interface
//! - Suitable for testing and ephemeral deployments

use super::ConversationStore;
use crate::core::conversation::{ConversationId, Message, NewMessage};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    conversations: HashMap<ConversationId, Vec<Message>>,
    message_ids: HashSet<Uuid>,
}

impl State {
    /// Append to a conversation the caller has already checked exists.
    fn push(&mut self, conversation_id: ConversationId, message: NewMessage) -> Result<Message> {
        let id = message.id.unwrap_or_else(Uuid::new_v4);
        if self.message_ids.contains(&id) {
            return Err(GatewayError::Conflict(id));
        }
        let messages = self
            .conversations
            .get_mut(&conversation_id)
            .ok_or(GatewayError::NotFound(conversation_id))?;

        let stored = Message {
            id,
            conversation_id,
            role: message.role,
            content: message.content,
            position: messages.len() as i64 + 1,
            created_at: Utc::now(),
        };
        messages.push(stored.clone());
        self.message_ids.insert(id);

        tracing::debug!(
            "[InMemoryStore] Appended {} message at position {} to '{}'",
            stored.role,
            stored.position,
            conversation_id
        );
        Ok(stored)
    }
}

/// In-memory storage using HashMap.
/// Data is lost when process terminates.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(&self) -> Result<ConversationId> {
        let id = Uuid::new_v4();
        self.state.write().await.conversations.insert(id, Vec::new());
        tracing::debug!("[InMemoryStore] Created conversation '{}'", id);
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
    ) -> Result<Message> {
        let mut state = self.state.write().await;
        if !state.conversations.contains_key(&conversation_id) {
            return Err(GatewayError::NotFound(conversation_id));
        }
        state.push(conversation_id, message)
    }

    async fn start_conversation(
        &self,
        id: Option<ConversationId>,
        first: NewMessage,
    ) -> Result<Message> {
        let conversation_id = id.unwrap_or_else(Uuid::new_v4);
        let mut state = self.state.write().await;

        // Checked before creating so a conflict leaves no empty conversation.
        if let Some(message_id) = first.id {
            if state.message_ids.contains(&message_id) {
                return Err(GatewayError::Conflict(message_id));
            }
        }
        if !state.conversations.contains_key(&conversation_id) {
            state.conversations.insert(conversation_id, Vec::new());
            tracing::debug!("[InMemoryStore] Started conversation '{}'", conversation_id);
        }
        state.push(conversation_id, first)
    }

    async fn load_history(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        let history = state
            .conversations
            .get(&conversation_id)
            .cloned()
            .ok_or(GatewayError::NotFound(conversation_id))?;
        tracing::debug!(
            "[InMemoryStore] Loaded {} messages for conversation '{}'",
            history.len(),
            conversation_id
        );
        Ok(history)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::Role;

    #[tokio::test]
    async fn test_append_and_load() {
        let store = InMemoryStore::new();
        let id = store.create_conversation().await.unwrap();

        let first = store
            .append_message(id, NewMessage::new(Role::User, "hi"))
            .await
            .unwrap();
        let second = store
            .append_message(id, NewMessage::new(Role::Assistant, "hello"))
            .await
            .unwrap();
        assert_eq!(first.position, 1);
        assert_eq!(second.position, 2);

        let history = store.load_history(id).await.unwrap();
        let summary: Vec<_> = history
            .iter()
            .map(|m| (m.content.as_str(), m.position))
            .collect();
        assert_eq!(summary, vec![("hi", 1), ("hello", 2)]);
    }

    #[tokio::test]
    async fn test_new_conversation_is_empty() {
        let store = InMemoryStore::new();
        let id = store.create_conversation().await.unwrap();
        assert!(store.load_history(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let store = InMemoryStore::new();
        let unknown = Uuid::new_v4();

        let err = store
            .append_message(unknown, NewMessage::new(Role::User, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(id) if id == unknown));

        let err = store.load_history(unknown).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));

        // The failed append must not have created anything
        assert!(store.load_history(unknown).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_message_id_conflicts() {
        let store = InMemoryStore::new();
        let id = store.create_conversation().await.unwrap();
        let message_id = Uuid::new_v4();

        store
            .append_message(id, NewMessage::new(Role::User, "once").with_id(Some(message_id)))
            .await
            .unwrap();
        let err = store
            .append_message(id, NewMessage::new(Role::User, "twice").with_id(Some(message_id)))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Conflict(dup) if dup == message_id));
        assert_eq!(store.load_history(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_conversation_with_first_message() {
        let store = InMemoryStore::new();

        let first = store
            .start_conversation(None, NewMessage::new(Role::User, "hi"))
            .await
            .unwrap();
        assert_eq!(first.position, 1);

        let history = store.load_history(first.conversation_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hi");

        // An existing id keeps its history
        let second = store
            .start_conversation(
                Some(first.conversation_id),
                NewMessage::new(Role::User, "again"),
            )
            .await
            .unwrap();
        assert_eq!(second.conversation_id, first.conversation_id);
        assert_eq!(second.position, 2);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_no_conversation() {
        let store = InMemoryStore::new();
        let message_id = Uuid::new_v4();
        let existing = store
            .start_conversation(
                None,
                NewMessage::new(Role::User, "once").with_id(Some(message_id)),
            )
            .await
            .unwrap();

        let err = store
            .start_conversation(
                None,
                NewMessage::new(Role::User, "twice").with_id(Some(message_id)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(dup) if dup == message_id));

        let named = Uuid::new_v4();
        let err = store
            .start_conversation(
                Some(named),
                NewMessage::new(Role::User, "thrice").with_id(Some(message_id)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
        assert!(matches!(
            store.load_history(named).await,
            Err(GatewayError::NotFound(_))
        ));

        let state = store.state.read().await;
        assert_eq!(state.conversations.len(), 1);
        assert!(state.conversations.contains_key(&existing.conversation_id));
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_gap_free() {
        let store = InMemoryStore::new();
        let id = store.create_conversation().await.unwrap();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_message(id, NewMessage::new(Role::User, format!("msg {}", i)))
                        .await
                        .unwrap()
                        .position
                })
            })
            .collect();

        let mut positions = Vec::new();
        for handle in handles {
            positions.push(handle.await.unwrap());
        }
        positions.sort_unstable();
        assert_eq!(positions, (1..=32).collect::<Vec<i64>>());

        let history = store.load_history(id).await.unwrap();
        assert!(history.windows(2).all(|w| w[1].position == w[0].position + 1));
    }
}
