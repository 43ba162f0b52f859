use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

/// A migrated in-memory database. One connection that never expires, so every query sees the
/// same memory database.
pub async fn memory_pool() -> SqlitePool {
    let database = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&database).await.unwrap();
    database
}
