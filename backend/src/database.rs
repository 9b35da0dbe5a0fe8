use sqlx::{PgPool, Postgres, migrate::MigrateDatabase, postgres::PgPoolOptions};
use std::time::Duration;

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection
    pub acquire_timeout: Duration,
    /// Maximum idle time before a connection is closed
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PoolConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(max) = std::env::var("DB_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                config.max_connections = n;
            }
        }

        if let Ok(min) = std::env::var("DB_MIN_CONNECTIONS") {
            if let Ok(n) = min.parse() {
                config.min_connections = n;
            }
        }

        if let Ok(timeout) = std::env::var("DB_ACQUIRE_TIMEOUT") {
            if let Ok(n) = timeout.parse() {
                config.acquire_timeout = Duration::from_secs(n);
            }
        }

        config
    }
}

/// Create a database connection pool with default configuration
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::from_env()).await
}

/// Create a database connection pool with custom configuration
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> anyhow::Result<PgPool> {
    if !Postgres::database_exists(database_url).await? {
        Postgres::create_database(database_url).await?;
        tracing::info!("Database created successfully");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    tracing::info!(
        "Database pool created: max={}, min={}",
        config.max_connections,
        config.min_connections
    );

    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check database health
pub async fn health_check(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
