//! chat-relay - chat-completion gateway
//!
//! Accepts chat turns over HTTP, relays the full conversation to an
//! OpenAI-compatible provider, and keeps the dialogue in PostgreSQL.

pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;

pub use crate::config::Settings;
pub use crate::core::{ChatTurn, CompletionProvider, Gateway, LLMClient, UserMessage};
pub use crate::error::GatewayError;
pub use crate::storage::{ConversationStore, InMemoryStore, PgStore};
