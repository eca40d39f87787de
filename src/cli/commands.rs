use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(author, version, about = "Chat-completion gateway with persistent conversation history", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP gateway (default)
    Serve,

    /// Create the database schema and exit
    Migrate,

    /// Print the stored history of a conversation
    History {
        conversation_id: Uuid,
    },
}

impl Cli {
    pub fn command(&self) -> &Commands {
        self.command.as_ref().unwrap_or(&Commands::Serve)
    }
}
