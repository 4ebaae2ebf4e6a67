//! Network and port rows.

use eswitch_types::MacAddress;
use sqlx::{FromRow, SqliteConnection};

use crate::error::{PluginError, Result};
use crate::model::{PortUpdate, Status};

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct NetworkRecord {
    pub id: String,
    pub name: String,
    pub admin_state_up: bool,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PortRecord {
    pub id: String,
    pub network_id: String,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub mac_address: MacAddress,
    pub device_id: String,
    pub admin_state_up: bool,
    pub status: Status,
}

pub(crate) const PORT_COLUMNS: &str = "id, network_id, name, mac_address, device_id, admin_state_up, status";

pub async fn insert_network(conn: &mut SqliteConnection, network: &NetworkRecord) -> Result<()> {
    sqlx::query("INSERT INTO networks (id, name, admin_state_up, status) VALUES (?, ?, ?, ?)")
        .bind(&network.id)
        .bind(&network.name)
        .bind(network.admin_state_up)
        .bind(network.status)
        .execute(conn)
        .await
        .map_err(|e| PluginError::database("insert_network", e))?;
    Ok(())
}

pub async fn get_network(conn: &mut SqliteConnection, id: &str) -> Result<Option<NetworkRecord>> {
    sqlx::query_as("SELECT id, name, admin_state_up, status FROM networks WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| PluginError::database("get_network", e))
}

pub async fn list_networks(conn: &mut SqliteConnection) -> Result<Vec<NetworkRecord>> {
    sqlx::query_as("SELECT id, name, admin_state_up, status FROM networks ORDER BY id")
        .fetch_all(conn)
        .await
        .map_err(|e| PluginError::database("list_networks", e))
}

/// Applies the given fields; `false` if the network does not exist.
pub async fn update_network(
    conn: &mut SqliteConnection,
    id: &str,
    name: Option<&str>,
    admin_state_up: Option<bool>,
) -> Result<bool> {
    let done = sqlx::query(
        "UPDATE networks SET name = COALESCE(?, name), admin_state_up = COALESCE(?, admin_state_up) WHERE id = ?",
    )
    .bind(name)
    .bind(admin_state_up)
    .bind(id)
    .execute(conn)
    .await
    .map_err(|e| PluginError::database("update_network", e))?;
    Ok(done.rows_affected() == 1)
}

/// Deletes the network; its binding goes with it.
pub async fn delete_network(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let done = sqlx::query("DELETE FROM networks WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await
        .map_err(|e| PluginError::database("delete_network", e))?;
    Ok(done.rows_affected() == 1)
}

pub async fn count_ports(conn: &mut SqliteConnection, network_id: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM ports WHERE network_id = ?")
        .bind(network_id)
        .fetch_one(conn)
        .await
        .map_err(|e| PluginError::database("count_ports", e))
}

pub async fn insert_port(conn: &mut SqliteConnection, port: &PortRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO ports (id, network_id, name, mac_address, device_id, admin_state_up, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&port.id)
    .bind(&port.network_id)
    .bind(&port.name)
    .bind(port.mac_address.to_string())
    .bind(&port.device_id)
    .bind(port.admin_state_up)
    .bind(port.status)
    .execute(conn)
    .await
    .map_err(|e| PluginError::database("insert_port", e))?;
    Ok(())
}

pub async fn get_port(conn: &mut SqliteConnection, id: &str) -> Result<Option<PortRecord>> {
    sqlx::query_as(&format!("SELECT {PORT_COLUMNS} FROM ports WHERE id = ?"))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|e| PluginError::database("get_port", e))
}

/// Ports of one network, or of all networks.
pub async fn list_ports(conn: &mut SqliteConnection, network_id: Option<&str>) -> Result<Vec<PortRecord>> {
    sqlx::query_as(&format!(
        "SELECT {PORT_COLUMNS} FROM ports WHERE ? IS NULL OR network_id = ? ORDER BY id"
    ))
    .bind(network_id)
    .bind(network_id)
    .fetch_all(conn)
    .await
    .map_err(|e| PluginError::database("list_ports", e))
}

/// Applies the given fields; `false` if the port does not exist.
pub async fn update_port(conn: &mut SqliteConnection, id: &str, update: &PortUpdate) -> Result<bool> {
    let done = sqlx::query(
        "UPDATE ports SET name = COALESCE(?, name), admin_state_up = COALESCE(?, admin_state_up), \
         device_id = COALESCE(?, device_id) WHERE id = ?",
    )
    .bind(update.name.as_deref())
    .bind(update.admin_state_up)
    .bind(update.device_id.as_deref())
    .bind(id)
    .execute(conn)
    .await
    .map_err(|e| PluginError::database("update_port", e))?;
    Ok(done.rows_affected() == 1)
}

pub async fn delete_port(conn: &mut SqliteConnection, id: &str) -> Result<bool> {
    let done = sqlx::query("DELETE FROM ports WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await
        .map_err(|e| PluginError::database("delete_port", e))?;
    Ok(done.rows_affected() == 1)
}
