use sqlx::PgPool;

/// Key for the advisory lock that serializes concurrent schema setup.
const MIGRATION_LOCK_KEY: i64 = 0x6368_6174_7265_6c61;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id          UUID PRIMARY KEY,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        metadata    JSONB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id                 UUID PRIMARY KEY,
        conversation_id    UUID NOT NULL REFERENCES conversations (id),
        role               TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
        content            TEXT NOT NULL,
        sequence_position  BIGINT NOT NULL CHECK (sequence_position > 0),
        created_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT messages_conversation_position_key
            UNIQUE (conversation_id, sequence_position)
    )
    "#,
];

/// Primary key constraint name Postgres assigns to `messages.id`.
pub(crate) const MESSAGES_PKEY: &str = "messages_pkey";

pub(crate) async fn apply(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    for statement in STATEMENTS {
        sqlx::query(*statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::info!("Database schema is up to date");
    Ok(())
}
