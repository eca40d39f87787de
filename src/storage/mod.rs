//! Conversation Storage Abstraction
//!
//! Information Hiding:
//! - Storage backend implementation details hidden behind trait
//! - Position allocation and per-conversation locking hidden in each backend
//! - Each storage implementation encapsulates its own data structures and protocols

use crate::core::conversation::{ConversationId, Message, NewMessage};
use crate::error::Result;
use async_trait::async_trait;

pub mod memory;
pub mod postgres;
mod schema;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Trait defining conversation storage interface.
///
/// Implementations must keep message positions gap-free and strictly
/// increasing per conversation, even when appends to the same conversation
/// race each other.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Allocate a new, empty conversation
    async fn create_conversation(&self) -> Result<ConversationId>;

    /// Append a message at the next position of the conversation.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the conversation does not exist (nothing is written)
    /// - `Conflict` if `message.id` is already taken
    /// - `Persistence` on backend failure
    async fn append_message(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
    ) -> Result<Message>;

    /// Create a conversation and append its first message atomically.
    ///
    /// With `id = None` a fresh id is allocated. With `Some(id)` the
    /// conversation is created unless it already exists, in which case the
    /// message is simply appended. If the append fails nothing is written,
    /// the conversation included.
    async fn start_conversation(
        &self,
        id: Option<ConversationId>,
        first: NewMessage,
    ) -> Result<Message>;

    /// All messages of the conversation in position order.
    /// Fails with `NotFound` for an unknown conversation.
    async fn load_history(&self, conversation_id: ConversationId) -> Result<Vec<Message>>;

    /// Liveness probe
    async fn ping(&self) -> Result<()>;
}
