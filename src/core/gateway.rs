//! Chat Gateway - one conversational turn from request to persisted reply
//!
//! Information Hiding:
//! - Turn state machine hidden behind `handle_turn`
//! - Storage and upstream provider are injected trait objects
//! - Ordering of persistence writes around the upstream call internalized

use crate::core::conversation::{ChatMessage, ConversationId, Message, NewMessage, Role};
use crate::core::llm::CompletionProvider;
use crate::error::{GatewayError, Result};
use crate::storage::ConversationStore;
use std::sync::Arc;
use uuid::Uuid;

pub const MAX_CONTENT_CHARS: usize = 32_000;

/// An incoming user message, not yet validated.
#[derive(Debug, Clone)]
pub struct UserMessage {
    pub id: Option<Uuid>,
    pub role: Role,
    pub content: String,
}

impl UserMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::User,
            content: content.into(),
        }
    }

    fn validate(self) -> Result<NewMessage> {
        if self.role != Role::User {
            return Err(GatewayError::Validation(format!(
                "role must be 'user', got '{}'",
                self.role
            )));
        }
        if self.content.trim().is_empty() {
            return Err(GatewayError::Validation(
                "content must not be empty".to_string(),
            ));
        }
        let length = self.content.chars().count();
        if length > MAX_CONTENT_CHARS {
            return Err(GatewayError::Validation(format!(
                "content is {} characters, limit is {}",
                length, MAX_CONTENT_CHARS
            )));
        }
        Ok(NewMessage::new(Role::User, self.content).with_id(self.id))
    }
}

/// A chat turn with its conversation target resolved.
#[derive(Debug, Clone)]
pub enum ChatTurn {
    NewConversation { message: UserMessage },
    ExistingConversation { id: ConversationId, message: UserMessage },
    /// Conversation named by the caller and created on first use.
    ImplicitConversation { id: ConversationId, message: UserMessage },
}

impl ChatTurn {
    pub fn from_request(conversation_id: Option<ConversationId>, message: UserMessage) -> Self {
        match conversation_id {
            Some(id) => ChatTurn::ExistingConversation { id, message },
            None => ChatTurn::NewConversation { message },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation_id: ConversationId,
    pub user_message: Message,
    pub reply: Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Received,
    Validated,
    HistoryLoaded,
    UpstreamCalled,
    Persisted,
    Responded,
    Failed,
}

enum Target {
    New,
    Existing(ConversationId),
    Implicit(ConversationId),
}

/// Relays chat turns between the store and the upstream provider.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn CompletionProvider>,
}

impl Gateway {
    pub fn new(store: Arc<dyn ConversationStore>, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { store, provider }
    }

    /// Run one turn. The user message is persisted before the upstream call
    /// and survives an upstream failure; the reply is only appended once the
    /// upstream call has resolved successfully.
    pub async fn handle_turn(&self, turn: ChatTurn) -> Result<TurnOutcome> {
        let mut state = TurnState::Received;
        self.drive(turn, &mut state).await
    }

    async fn drive(&self, turn: ChatTurn, state: &mut TurnState) -> Result<TurnOutcome> {
        let result = self.run_turn(turn, state).await;
        if let Err(e) = &result {
            tracing::debug!(from = ?state, "[Gateway] Turn failed: {}", e);
            advance(state, TurnState::Failed, None);
        }
        result
    }

    async fn run_turn(&self, turn: ChatTurn, state: &mut TurnState) -> Result<TurnOutcome> {
        let (target, message) = match turn {
            ChatTurn::NewConversation { message } => (Target::New, message),
            ChatTurn::ExistingConversation { id, message } => (Target::Existing(id), message),
            ChatTurn::ImplicitConversation { id, message } => (Target::Implicit(id), message),
        };
        let message = message.validate()?;
        advance(state, TurnState::Validated, None);

        // Appending first makes the store reject unknown ids before anything
        // is sent upstream, and the reloaded history then holds exactly what
        // precedes this message. New conversations are only created together
        // with their first message.
        let user_message = match target {
            Target::New => self.store.start_conversation(None, message).await?,
            Target::Implicit(id) => self.store.start_conversation(Some(id), message).await?,
            Target::Existing(id) => self.store.append_message(id, message).await?,
        };
        let conversation_id = user_message.conversation_id;
        let history = self.store.load_history(conversation_id).await?;
        let dialogue: Vec<ChatMessage> = history
            .iter()
            .filter(|m| m.position <= user_message.position)
            .map(Message::to_chat)
            .collect();
        advance(state, TurnState::HistoryLoaded, Some(conversation_id));

        let reply = self.provider.complete(&dialogue).await?;
        advance(state, TurnState::UpstreamCalled, Some(conversation_id));

        let reply = self
            .store
            .append_message(conversation_id, NewMessage::from(reply))
            .await?;
        advance(state, TurnState::Persisted, Some(conversation_id));

        tracing::info!(
            conversation = %conversation_id,
            position = reply.position,
            "[Gateway] Turn completed"
        );
        advance(state, TurnState::Responded, Some(conversation_id));

        Ok(TurnOutcome {
            conversation_id,
            user_message,
            reply,
        })
    }

    pub async fn history(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        self.store.load_history(conversation_id).await
    }

    pub async fn health(&self) -> Result<()> {
        self.store.ping().await
    }
}

fn advance(state: &mut TurnState, next: TurnState, conversation: Option<ConversationId>) {
    match conversation {
        Some(id) => tracing::debug!(conversation = %id, "[Gateway] {:?} -> {:?}", state, next),
        None => tracing::debug!("[Gateway] {:?} -> {:?}", state, next),
    }
    *state = next;
}
