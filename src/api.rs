//! HTTP surface
//!
//! Thin axum layer over [`Gateway`]: decodes payloads, resolves the chat
//! turn, and renders results. Status mapping lives in `GatewayError`.

use crate::core::conversation::{ConversationId, Message, Role};
use crate::core::gateway::{ChatTurn, Gateway, UserMessage};
use crate::error::{GatewayError, Result};
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default = "default_role")]
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub message_id: Option<Uuid>,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub conversation_id: ConversationId,
    pub reply: String,
    pub message_id: Uuid,
    pub position: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageView {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            position: message.position,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub conversation_id: ConversationId,
    pub messages: Vec<MessageView>,
}

/// Payload of the legacy `/get_message` route.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetMessageRequest {
    pub dialog_id: Uuid,
    pub last_msg_text: String,
    #[serde(default)]
    pub last_message_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetMessageResponse {
    pub new_msg_text: String,
    pub dialog_id: Uuid,
}

pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/v1/chat", post(chat_handler))
        .route("/v1/conversations/:id/messages", get(history_handler))
        .route("/get_message", post(get_message_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Serve until Ctrl-C or SIGTERM, then drain in-flight requests.
pub async fn serve(listener: TcpListener, gateway: Gateway) -> anyhow::Result<()> {
    let address = listener.local_addr()?;
    tracing::info!(address = %address, "Starting HTTP server");

    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}

async fn chat_handler(
    State(gateway): State<Gateway>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>> {
    let Json(request) = payload.map_err(|e| GatewayError::Validation(e.body_text()))?;

    let message = UserMessage {
        id: request.message_id,
        role: request.role,
        content: request.content,
    };
    let outcome = gateway
        .handle_turn(ChatTurn::from_request(request.conversation_id, message))
        .await?;

    Ok(Json(ChatResponse {
        conversation_id: outcome.conversation_id,
        reply: outcome.reply.content,
        message_id: outcome.reply.id,
        position: outcome.reply.position,
    }))
}

async fn history_handler(
    State(gateway): State<Gateway>,
    id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<HistoryResponse>> {
    let Path(conversation_id) = id.map_err(|e| GatewayError::Validation(e.body_text()))?;
    let messages = gateway.history(conversation_id).await?;

    Ok(Json(HistoryResponse {
        conversation_id,
        messages: messages.into_iter().map(MessageView::from).collect(),
    }))
}

async fn get_message_handler(
    State(gateway): State<Gateway>,
    payload: std::result::Result<Json<GetMessageRequest>, JsonRejection>,
) -> Result<Json<GetMessageResponse>> {
    let Json(request) = payload.map_err(|e| GatewayError::Validation(e.body_text()))?;

    let mut message = UserMessage::new(request.last_msg_text);
    message.id = request.last_message_id;
    let outcome = gateway
        .handle_turn(ChatTurn::ImplicitConversation {
            id: request.dialog_id,
            message,
        })
        .await?;

    Ok(Json(GetMessageResponse {
        new_msg_text: outcome.reply.content,
        dialog_id: outcome.conversation_id,
    }))
}

async fn health_handler(State(gateway): State<Gateway>) -> impl IntoResponse {
    match gateway.health().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable", "error": e.to_string()})),
            )
        }
    }
}
