//! Database schema and migrations.

use sqlx::SqlitePool;
use tracing::{info, instrument};

use crate::error::{PluginError, Result};

const SCHEMA_VERSION: i64 = 2;

#[instrument(skip(pool))]
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(PluginError::migration)?;

    let current_version: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(PluginError::migration)?;
    let current_version = current_version.unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    info!("Migrating database from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        migrate_to_v1(pool).await?;
    }

    if current_version < 2 {
        migrate_to_v2(pool).await?;
    }

    Ok(())
}

/// Segmentation id pool, networks and their bindings.
#[instrument(skip(pool))]
async fn migrate_to_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration to schema version 1");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segmentation_id_allocation (
            physical_network TEXT NOT NULL,
            segmentation_id INTEGER NOT NULL,
            allocated INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (physical_network, segmentation_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(PluginError::migration)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_segmentation_free ON segmentation_id_allocation(allocated)",
    )
    .execute(pool)
    .await
    .map_err(PluginError::migration)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS networks (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            admin_state_up INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(PluginError::migration)?;

    // physical_network is NULL for local networks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS network_bindings (
            network_id TEXT PRIMARY KEY REFERENCES networks(id) ON DELETE CASCADE,
            network_type TEXT NOT NULL,
            physical_network TEXT,
            segmentation_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(PluginError::migration)?;

    set_version(pool, 1).await
}

/// Ports and their vNIC profiles.
#[instrument(skip(pool))]
async fn migrate_to_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration to schema version 2");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ports (
            id TEXT PRIMARY KEY,
            network_id TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
            name TEXT NOT NULL DEFAULT '',
            mac_address TEXT NOT NULL,
            device_id TEXT NOT NULL DEFAULT '',
            admin_state_up INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(PluginError::migration)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ports_mac ON ports(mac_address)")
        .execute(pool)
        .await
        .map_err(PluginError::migration)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_ports_network ON ports(network_id)")
        .execute(pool)
        .await
        .map_err(PluginError::migration)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS port_profile_bindings (
            port_id TEXT PRIMARY KEY REFERENCES ports(id) ON DELETE CASCADE,
            vnic_type TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(PluginError::migration)?;

    set_version(pool, 2).await
}

async fn set_version(pool: &SqlitePool, version: i64) -> Result<()> {
    sqlx::query("DELETE FROM schema_version")
        .execute(pool)
        .await
        .map_err(PluginError::migration)?;

    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(PluginError::migration)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = store::connect_memory().await.unwrap();
        run(&pool).await.unwrap();

        let version: i64 = sqlx::query_scalar("SELECT version FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        for table in ["network_bindings", "networks", "port_profile_bindings", "ports", "segmentation_id_allocation"] {
            assert!(tables.iter().any(|t| t == table), "missing table {table}");
        }
    }
}
