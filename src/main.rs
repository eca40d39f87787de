use anyhow::{Context, Result};
use chat_relay::cli::{Cli, Commands};
use chat_relay::storage::ConversationStore;
use chat_relay::{api, utils, Gateway, GatewayError, LLMClient, PgStore, Settings};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Configuration errors end the process before any socket is opened.
    let settings = Settings::new().context("Failed to load configuration")?;
    utils::logging::init(&settings.logging);
    tracing::debug!("Loaded settings: {:?}", settings);

    match cli.command() {
        Commands::Serve => handle_serve(settings).await,
        Commands::Migrate => handle_migrate(settings).await,
        Commands::History { conversation_id } => handle_history(settings, *conversation_id).await,
    }
}

async fn handle_serve(settings: Settings) -> Result<()> {
    let client = LLMClient::new(&settings.upstream)?;

    let store = PgStore::connect_with_retry(&settings.database).await?;
    store.migrate().await?;

    let gateway = Gateway::new(Arc::new(store), Arc::new(client));

    let address = settings.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;

    api::serve(listener, gateway).await
}

async fn handle_migrate(settings: Settings) -> Result<()> {
    let store = PgStore::connect_with_retry(&settings.database).await?;
    store.migrate().await?;
    utils::print_success(&format!("Schema applied to {}", settings.database));
    Ok(())
}

async fn handle_history(settings: Settings, conversation_id: Uuid) -> Result<()> {
    let store = PgStore::connect(&settings.database).await?;

    let history = match store.load_history(conversation_id).await {
        Ok(history) => history,
        Err(e @ GatewayError::NotFound(_)) => {
            utils::print_error(&e.to_string());
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    utils::print_header(&format!("Conversation {}", conversation_id));
    if history.is_empty() {
        utils::print_info("No messages yet");
    }
    for message in &history {
        utils::print_message(message);
    }
    Ok(())
}
