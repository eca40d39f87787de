//! PostgreSQL Conversation Storage
//!
//! Information Hiding:
//! - SQL statements and row mapping hidden from users
//! - Per-conversation serialization via row locks hidden behind `append_message`
//! - Startup connection polling hidden behind `connect_with_retry`

use super::{schema, ConversationStore};
use crate::config::DatabaseConfig;
use crate::core::conversation::{ConversationId, Message, NewMessage, Role};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    role: String,
    content: String,
    sequence_position: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = GatewayError;

    fn try_from(row: MessageRow) -> Result<Self> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|e| GatewayError::Persistence(format!("message {}: {}", row.id, e)))?;

        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            role,
            content: row.content,
            position: row.sequence_position,
            created_at: row.created_at,
        })
    }
}

/// Conversation store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool, failing on the first unsuccessful connection.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(config.connect_options())
            .await?;
        Ok(Self::new(pool))
    }

    /// Poll the database until it accepts connections or the attempt budget
    /// is spent.
    pub async fn connect_with_retry(config: &DatabaseConfig) -> Result<Self> {
        let max_attempts = config.startup_max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match Self::connect(config).await {
                Ok(store) => {
                    tracing::info!("Connected to PostgreSQL at {}", config);
                    return Ok(store);
                }
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        "Waiting for PostgreSQL to become available (attempt {}/{}): {}",
                        attempt,
                        max_attempts,
                        e
                    );
                    tokio::time::sleep(config.startup_retry_interval()).await;
                }
                Err(e) => {
                    return Err(GatewayError::Persistence(format!(
                        "PostgreSQL at {} unreachable after {} attempts: {}",
                        config, attempt, e
                    )));
                }
            }
        }
    }

    /// Create tables if they do not exist yet
    pub async fn migrate(&self) -> Result<()> {
        schema::apply(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn classify_insert_error(err: sqlx::Error, message_id: Uuid) -> GatewayError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() && db_err.constraint() == Some(schema::MESSAGES_PKEY) {
            return GatewayError::Conflict(message_id);
        }
    }
    GatewayError::from(err)
}

/// Insert at the next position of a conversation, inside the caller's
/// transaction. Fails with `NotFound` if the conversation row is missing.
async fn insert_message(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: ConversationId,
    message: NewMessage,
) -> Result<MessageRow> {
    // Row lock serializes appends on the same conversation until commit.
    let locked: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(conversation_id)
            .fetch_optional(&mut **tx)
            .await?;
    if locked.is_none() {
        return Err(GatewayError::NotFound(conversation_id));
    }

    let position: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(sequence_position), 0) + 1 FROM messages WHERE conversation_id = $1",
    )
    .bind(conversation_id)
    .fetch_one(&mut **tx)
    .await?;

    let message_id = message.id.unwrap_or_else(Uuid::new_v4);
    sqlx::query_as(
        "INSERT INTO messages (id, conversation_id, role, content, sequence_position) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id, conversation_id, role, content, sequence_position, created_at",
    )
    .bind(message_id)
    .bind(conversation_id)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(position)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| classify_insert_error(e, message_id))
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn create_conversation(&self) -> Result<ConversationId> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO conversations (id) VALUES ($1)")
            .bind(id)
            .execute(&self.pool)
            .await?;
        tracing::debug!("[PgStore] Created conversation '{}'", id);
        Ok(id)
    }

    async fn append_message(
        &self,
        conversation_id: ConversationId,
        message: NewMessage,
    ) -> Result<Message> {
        let mut tx = self.pool.begin().await?;
        let row = insert_message(&mut tx, conversation_id, message).await?;
        tx.commit().await?;

        tracing::debug!(
            "[PgStore] Appended {} message at position {} to '{}'",
            row.role,
            row.sequence_position,
            conversation_id
        );
        Message::try_from(row)
    }

    async fn start_conversation(
        &self,
        id: Option<ConversationId>,
        first: NewMessage,
    ) -> Result<Message> {
        let conversation_id = id.unwrap_or_else(Uuid::new_v4);
        let mut tx = self.pool.begin().await?;

        // Rolled back together with the first message if the insert fails.
        sqlx::query("INSERT INTO conversations (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        let row = insert_message(&mut tx, conversation_id, first).await?;
        tx.commit().await?;

        tracing::debug!(
            "[PgStore] Started conversation '{}' with {} message at position {}",
            conversation_id,
            row.role,
            row.sequence_position
        );
        Message::try_from(row)
    }

    async fn load_history(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM conversations WHERE id = $1)")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(GatewayError::NotFound(conversation_id));
        }

        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, conversation_id, role, content, sequence_position, created_at \
             FROM messages WHERE conversation_id = $1 ORDER BY sequence_position",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        tracing::debug!(
            "[PgStore] Loaded {} messages for conversation '{}'",
            rows.len(),
            conversation_id
        );
        rows.into_iter().map(Message::try_from).collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
