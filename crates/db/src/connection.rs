use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use signoff_core::config::DatabaseConfig;

pub type DbPool = sqlx::SqlitePool;

/// Busy timeout used by the test/tooling entry point; the server pool
/// takes it from `[database]` config instead.
const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5_000;

/// Opens the workflow pool described by the `[database]` config section.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    pool_options(config.max_connections, config.timeout_secs, config.busy_timeout_ms)
        .connect(&config.url)
        .await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    pool_options(max_connections, timeout_secs, DEFAULT_BUSY_TIMEOUT_MS).connect(database_url).await
}

fn pool_options(max_connections: u32, timeout_secs: u64, busy_timeout_ms: u32) -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                // Steps, history, and comments all hang off approval_workflow;
                // enforce the references at the connection level, and keep
                // readers unblocked while a transition commits.
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
}

#[cfg(test)]
mod tests {
    use signoff_core::config::DatabaseConfig;

    use super::connect;

    #[tokio::test]
    async fn busy_timeout_follows_database_config() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            timeout_secs: 5,
            busy_timeout_ms: 250,
        };
        let pool = connect(&config).await.expect("pool should connect");

        let timeout: i64 = sqlx::query_scalar("PRAGMA busy_timeout")
            .fetch_one(&pool)
            .await
            .expect("pragma query");
        assert_eq!(timeout, 250);

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("pragma query");
        assert_eq!(foreign_keys, 1);
    }
}
