//! Engine configuration.

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL for the queue store
    pub database_url: String,

    /// Name of the cluster this process runs in; used as the default
    /// acknowledgement owner for queue watermarks
    pub cluster_name: String,

    /// Shard this engine instance routes history operations through
    pub shard_id: i32,

    /// Page size for history reads during reset event reapplication
    pub reset_page_size: i32,

    /// Maximum number of queue messages fetched per read
    pub queue_read_batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let cluster_name =
            std::env::var("BELAY_CLUSTER_NAME").unwrap_or_else(|_| "active".to_string());

        let shard_id: i32 = std::env::var("BELAY_SHARD_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let reset_page_size: i32 = std::env::var("BELAY_RESET_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(crate::resetter::DEFAULT_RESET_PAGE_SIZE);

        let queue_read_batch_size: usize = std::env::var("BELAY_QUEUE_READ_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(64);

        Ok(Config {
            database_url,
            cluster_name,
            shard_id,
            reset_page_size,
            queue_read_batch_size,
        })
    }
}
