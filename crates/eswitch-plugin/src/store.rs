//! Connection pool setup.

use std::str::FromStr;

use eswitch_common::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{info, instrument};

use crate::error::{PluginError, Result};
use crate::migrations;

/// Opens the store named by `sql_connection` and brings its schema up to
/// date.
///
/// An in-memory database lives only as long as its connection, so it is
/// served by a single connection that is never recycled.
#[instrument(skip(config), fields(url = %config.sql_connection))]
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.sql_connection)
        .map_err(|e| PluginError::database("connect", e))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool_options = if is_memory_url(&config.sql_connection) {
        SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(|e| PluginError::database("connect", e))?;

    migrations::run(&pool).await?;
    info!("Segmentation store ready");
    Ok(pool)
}

/// Fresh migrated in-memory store.
pub async fn connect_memory() -> Result<SqlitePool> {
    connect(&DatabaseConfig {
        sql_connection: "sqlite::memory:".to_string(),
        max_connections: 1,
    })
    .await
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}
