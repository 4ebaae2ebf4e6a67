//! Network bindings, port profile bindings and port lookups.

use eswitch_types::{MacAddress, NetworkType, VnicType};
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

use crate::error::{PluginError, Result};
use crate::model::Status;
use crate::records::{PortRecord, PORT_COLUMNS};

/// How a network maps onto the fabric. One per network.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct NetworkBinding {
    pub network_id: String,
    #[sqlx(try_from = "String")]
    pub network_type: NetworkType,
    pub physical_network: Option<String>,
    /// Real id for VLAN and IB networks, a sentinel for flat and local ones.
    pub segmentation_id: i64,
}

impl NetworkBinding {
    /// Physical network and segmentation id as reported to callers.
    pub fn provider_view(&self) -> (Option<String>, Option<i64>) {
        match self.network_type {
            NetworkType::Flat => (self.physical_network.clone(), None),
            NetworkType::Local => (None, None),
            NetworkType::Vlan | NetworkType::Ib => (self.physical_network.clone(), Some(self.segmentation_id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PortProfileBinding {
    pub port_id: String,
    #[sqlx(try_from = "String")]
    pub vnic_type: VnicType,
}

pub async fn add_network_binding(
    conn: &mut SqliteConnection,
    network_id: &str,
    network_type: NetworkType,
    physical_network: Option<&str>,
    segmentation_id: i64,
) -> Result<NetworkBinding> {
    sqlx::query(
        "INSERT INTO network_bindings (network_id, network_type, physical_network, segmentation_id) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(network_id)
    .bind(network_type.as_str())
    .bind(physical_network)
    .bind(segmentation_id)
    .execute(conn)
    .await
    .map_err(|e| PluginError::database("add_network_binding", e))?;

    Ok(NetworkBinding {
        network_id: network_id.to_string(),
        network_type,
        physical_network: physical_network.map(str::to_string),
        segmentation_id,
    })
}

pub async fn get_network_binding(conn: &mut SqliteConnection, network_id: &str) -> Result<Option<NetworkBinding>> {
    sqlx::query_as(
        "SELECT network_id, network_type, physical_network, segmentation_id FROM network_bindings \
         WHERE network_id = ?",
    )
    .bind(network_id)
    .fetch_optional(conn)
    .await
    .map_err(|e| PluginError::database("get_network_binding", e))
}

pub async fn add_port_profile_binding(conn: &mut SqliteConnection, port_id: &str, vnic_type: VnicType) -> Result<()> {
    sqlx::query("INSERT INTO port_profile_bindings (port_id, vnic_type) VALUES (?, ?)")
        .bind(port_id)
        .bind(vnic_type.as_str())
        .execute(conn)
        .await
        .map_err(|e| PluginError::database("add_port_profile_binding", e))?;
    Ok(())
}

pub async fn get_port_profile_binding(
    conn: &mut SqliteConnection,
    port_id: &str,
) -> Result<Option<PortProfileBinding>> {
    sqlx::query_as("SELECT port_id, vnic_type FROM port_profile_bindings WHERE port_id = ?")
        .bind(port_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| PluginError::database("get_port_profile_binding", e))
}

/// First port whose id starts with `device`. Agents report truncated port
/// ids as device names.
pub async fn get_port_from_device(conn: &mut SqliteConnection, device: &str) -> Result<Option<PortRecord>> {
    sqlx::query_as(&format!(
        "SELECT {PORT_COLUMNS} FROM ports WHERE substr(id, 1, length(?)) = ? ORDER BY id LIMIT 1"
    ))
    .bind(device)
    .bind(device)
    .fetch_optional(conn)
    .await
    .map_err(|e| PluginError::database("get_port_from_device", e))
}

pub async fn get_port_from_device_mac(conn: &mut SqliteConnection, mac: MacAddress) -> Result<Option<PortRecord>> {
    sqlx::query_as(&format!("SELECT {PORT_COLUMNS} FROM ports WHERE mac_address = ? ORDER BY id LIMIT 1"))
        .bind(mac.to_string())
        .fetch_optional(conn)
        .await
        .map_err(|e| PluginError::database("get_port_from_device_mac", e))
}

pub async fn set_port_status(conn: &mut SqliteConnection, port_id: &str, status: Status) -> Result<()> {
    let done = sqlx::query("UPDATE ports SET status = ? WHERE id = ?")
        .bind(status)
        .bind(port_id)
        .execute(conn)
        .await
        .map_err(|e| PluginError::database("set_port_status", e))?;
    if done.rows_affected() == 0 {
        return Err(PluginError::PortNotFound(port_id.to_string()));
    }
    debug!(port_id, ?status, "Port status set");
    Ok(())
}
