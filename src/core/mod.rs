pub mod conversation;
pub mod gateway;
pub mod llm;

pub use conversation::{ChatMessage, ConversationId, Message, NewMessage, Role};
pub use gateway::{ChatTurn, Gateway, TurnOutcome, UserMessage};
pub use llm::{CompletionProvider, LLMClient, RetryPolicy, UpstreamError};
