//! Schema bootstrap for the queue tables.

use sqlx::PgPool;

use crate::error::EngineResult;

const CREATE_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queue (
    queue_type INT NOT NULL,
    message_id BIGINT NOT NULL,
    message_payload BYTEA NOT NULL,
    PRIMARY KEY (queue_type, message_id)
)
"#;

const CREATE_QUEUE_ACK_LEVELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queue_ack_levels (
    queue_type INT NOT NULL,
    ack_levels JSONB NOT NULL,
    PRIMARY KEY (queue_type)
)
"#;

/// Create the queue tables if they do not exist yet.
pub async fn run_migrations(pool: &PgPool) -> EngineResult<()> {
    sqlx::query(CREATE_QUEUE_TABLE).execute(pool).await?;
    sqlx::query(CREATE_QUEUE_ACK_LEVELS_TABLE).execute(pool).await?;
    Ok(())
}
