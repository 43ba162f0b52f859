use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::error::Result;

/// Open the SQLite database at `url`, creating the file and its directory when missing, and
/// bring the schema up to date.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);
    if let Some(parent) = options.get_filename().parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir(parent).await?;
    }
    let database = SqlitePoolOptions::new().connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&database).await?;
    info!("database {url} ready");
    Ok(database)
}

async fn create_dir(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create database directory {:?}", dir))
}
