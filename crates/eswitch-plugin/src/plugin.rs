//! Network and port workflow on top of the segmentation id allocator.

use std::sync::Arc;

use eswitch_common::{EswitchConfig, NetworkVlanRanges};
use eswitch_types::{MacAddress, TenantNetworkType, VnicType, LOCAL_VLAN_ID};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bindings::{self, NetworkBinding};
use crate::error::{PluginError, Result};
use crate::migrations;
use crate::model::{Network, NetworkRequest, NetworkUpdate, Port, PortRequest, PortUpdate, Status};
use crate::notifier::{AgentNotifier, EswitchNotifier};
use crate::provider;
use crate::records::{self, NetworkRecord, PortRecord};
use crate::segmentation;
use crate::store;

pub struct EswitchPlugin {
    pool: SqlitePool,
    ranges: NetworkVlanRanges,
    tenant_network_type: TenantNetworkType,
    vnic_type: VnicType,
    notifier: Option<Arc<dyn AgentNotifier>>,
}

impl EswitchPlugin {
    /// Brings the schema up to date and reconciles the segmentation id pool
    /// with `ranges`.
    pub async fn new(
        pool: SqlitePool,
        ranges: NetworkVlanRanges,
        tenant_network_type: TenantNetworkType,
        vnic_type: VnicType,
    ) -> Result<Self> {
        migrations::run(&pool).await?;
        {
            let mut conn = pool.acquire().await.map_err(|e| PluginError::database("acquire", e))?;
            segmentation::sync_network_states(&mut conn, &ranges).await?;
        }

        info!(%tenant_network_type, physical_networks = ?ranges.physical_networks().collect::<Vec<_>>(), "eSwitch plugin initialised");
        Ok(Self { pool, ranges, tenant_network_type, vnic_type, notifier: None })
    }

    /// Opens the configured store. Agent notifications go to the configured
    /// daemon when `agent.rpc` is set.
    pub async fn from_config(config: &EswitchConfig) -> Result<Self> {
        let ranges = config.network_vlan_ranges()?;
        let pool = store::connect(&config.database).await?;
        let plugin = Self::new(pool, ranges, config.vlans.tenant_network_type, config.eswitch.vnic_type).await?;

        Ok(if config.agent.rpc {
            plugin.with_notifier(Arc::new(EswitchNotifier::from_config(config)))
        } else {
            plugin
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AgentNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn network_vlan_ranges(&self) -> &NetworkVlanRanges {
        &self.ranges
    }

    pub fn tenant_network_type(&self) -> TenantNetworkType {
        self.tenant_network_type
    }

    /// Creates a network and its binding in one transaction.
    ///
    /// Without provider attributes the tenant network type decides: VLAN and
    /// IB networks take any free segmentation id, local networks take none.
    /// A provider network reserves exactly the id it names.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_network(&self, request: NetworkRequest) -> Result<Network> {
        let requested = provider::process_provider_create(&request.provider, &self.ranges)?;
        let db = |e| PluginError::database("create_network", e);
        let mut tx = self.pool.begin().await.map_err(db)?;

        let (network_type, physical_network, segmentation_id) = match requested {
            None => {
                let Some(network_type) = self.tenant_network_type.network_type() else {
                    return Err(PluginError::TenantNetworksDisabled);
                };
                if network_type.is_segmented() {
                    let (physical_network, segmentation_id) = segmentation::reserve_network(&mut tx).await?;
                    (network_type, Some(physical_network), segmentation_id)
                } else {
                    (network_type, None, LOCAL_VLAN_ID)
                }
            }
            Some(provider) => {
                if let Some(physical_network) = provider.physical_network.as_deref() {
                    segmentation::reserve_specific_network(&mut tx, physical_network, provider.segmentation_id)
                        .await?;
                }
                (provider.network_type, provider.physical_network, provider.segmentation_id)
            }
        };

        let record = NetworkRecord {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            admin_state_up: request.admin_state_up,
            status: Status::Active,
        };
        records::insert_network(&mut tx, &record).await?;
        let binding = bindings::add_network_binding(
            &mut tx,
            &record.id,
            network_type,
            physical_network.as_deref(),
            segmentation_id,
        )
        .await?;

        tx.commit().await.map_err(db)?;
        info!(network_id = %record.id, %network_type, ?physical_network, segmentation_id, "Created network");
        Ok(network_view(record, &binding))
    }

    /// Renames or changes admin state. Provider attributes are immutable.
    #[instrument(skip(self, update))]
    pub async fn update_network(&self, network_id: &str, update: NetworkUpdate) -> Result<Network> {
        provider::check_provider_update(&update.provider)?;
        let db = |e| PluginError::database("update_network", e);
        let mut tx = self.pool.begin().await.map_err(db)?;

        if !records::update_network(&mut tx, network_id, update.name.as_deref(), update.admin_state_up).await? {
            return Err(PluginError::NetworkNotFound(network_id.to_string()));
        }
        let network = load_network(&mut tx, network_id).await?;
        tx.commit().await.map_err(db)?;
        Ok(network)
    }

    /// Deletes a network without ports and releases its segmentation id.
    #[instrument(skip(self))]
    pub async fn delete_network(&self, network_id: &str) -> Result<()> {
        let db = |e| PluginError::database("delete_network", e);
        let mut tx = self.pool.begin().await.map_err(db)?;

        let binding = bindings::get_network_binding(&mut tx, network_id)
            .await?
            .ok_or_else(|| PluginError::NetworkNotFound(network_id.to_string()))?;
        let ports = records::count_ports(&mut tx, network_id).await?;
        if ports > 0 {
            return Err(PluginError::NetworkInUse { network_id: network_id.to_string(), ports });
        }

        // the binding row goes with the network
        records::delete_network(&mut tx, network_id).await?;
        if binding.segmentation_id != LOCAL_VLAN_ID {
            if let Some(physical_network) = binding.physical_network.as_deref() {
                segmentation::release_network(&mut tx, physical_network, binding.segmentation_id, &self.ranges)
                    .await?;
            }
        }

        tx.commit().await.map_err(db)?;
        info!("Deleted network");
        Ok(())
    }

    pub async fn get_network(&self, network_id: &str) -> Result<Network> {
        let mut conn = self.acquire().await?;
        load_network(&mut conn, network_id).await
    }

    pub async fn get_networks(&self) -> Result<Vec<Network>> {
        let mut conn = self.acquire().await?;
        let mut networks = Vec::new();
        for record in records::list_networks(&mut conn).await? {
            let binding = bindings::get_network_binding(&mut conn, &record.id)
                .await?
                .ok_or_else(|| PluginError::NetworkNotFound(record.id.clone()))?;
            networks.push(network_view(record, &binding));
        }
        Ok(networks)
    }

    /// Creates a port and records its vNIC type.
    #[instrument(skip(self, request), fields(network_id = %request.network_id, mac = %request.mac_address))]
    pub async fn create_port(&self, request: PortRequest) -> Result<Port> {
        let vnic_type = provider::vnic_type_from_profile(request.binding_profile.as_ref(), self.vnic_type)?;
        let db = |e| PluginError::database("create_port", e);
        let mut tx = self.pool.begin().await.map_err(db)?;

        if records::get_network(&mut tx, &request.network_id).await?.is_none() {
            return Err(PluginError::NetworkNotFound(request.network_id));
        }

        let record = PortRecord {
            id: Uuid::new_v4().to_string(),
            network_id: request.network_id,
            name: request.name,
            mac_address: request.mac_address,
            device_id: request.device_id,
            admin_state_up: request.admin_state_up,
            status: Status::Down,
        };
        records::insert_port(&mut tx, &record).await?;
        bindings::add_port_profile_binding(&mut tx, &record.id, vnic_type).await?;
        let port = load_port(&mut tx, &record.id).await?;

        tx.commit().await.map_err(db)?;
        debug!(port_id = %port.id, %vnic_type, "Created port");
        Ok(port)
    }

    pub async fn get_port(&self, port_id: &str) -> Result<Port> {
        let mut conn = self.acquire().await?;
        load_port(&mut conn, port_id).await
    }

    pub async fn get_ports(&self, network_id: Option<&str>) -> Result<Vec<Port>> {
        let mut conn = self.acquire().await?;
        let mut ports = Vec::new();
        for record in records::list_ports(&mut conn, network_id).await? {
            ports.push(port_view(&mut conn, record).await?);
        }
        Ok(ports)
    }

    /// Updates a port. A change of admin state is pushed to the agent once
    /// committed.
    #[instrument(skip(self, update))]
    pub async fn update_port(&self, port_id: &str, update: PortUpdate) -> Result<Port> {
        let db = |e| PluginError::database("update_port", e);
        let mut tx = self.pool.begin().await.map_err(db)?;

        let original = records::get_port(&mut tx, port_id)
            .await?
            .ok_or_else(|| PluginError::PortNotFound(port_id.to_string()))?;
        records::update_port(&mut tx, port_id, &update).await?;
        let port = load_port(&mut tx, port_id).await?;
        let binding = bindings::get_network_binding(&mut tx, &port.network_id).await?;
        tx.commit().await.map_err(db)?;

        if original.admin_state_up != port.admin_state_up {
            if let (Some(notifier), Some(binding)) = (&self.notifier, binding) {
                if let Err(e) = notifier.port_update(&port, &binding).await {
                    warn!(error = %e, "Port update notification failed");
                }
            }
        }
        Ok(port)
    }

    /// Deletes a port; the agent is told to release its vNIC.
    #[instrument(skip(self))]
    pub async fn delete_port(&self, port_id: &str) -> Result<()> {
        let db = |e| PluginError::database("delete_port", e);
        let mut tx = self.pool.begin().await.map_err(db)?;

        let port = load_port(&mut tx, port_id).await?;
        let binding = bindings::get_network_binding(&mut tx, &port.network_id).await?;
        records::delete_port(&mut tx, port_id).await?;
        tx.commit().await.map_err(db)?;

        if let (Some(notifier), Some(binding)) = (&self.notifier, binding) {
            if let Err(e) = notifier.port_release(&port, &binding).await {
                warn!(error = %e, "Port release notification failed");
            }
        }
        Ok(())
    }

    /// Port whose id starts with `device`.
    pub async fn get_port_from_device(&self, device: &str) -> Result<Option<Port>> {
        let mut conn = self.acquire().await?;
        match bindings::get_port_from_device(&mut conn, device).await? {
            Some(record) => Ok(Some(port_view(&mut conn, record).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_port_from_device_mac(&self, mac: MacAddress) -> Result<Option<Port>> {
        let mut conn = self.acquire().await?;
        match bindings::get_port_from_device_mac(&mut conn, mac).await? {
            Some(record) => Ok(Some(port_view(&mut conn, record).await?)),
            None => Ok(None),
        }
    }

    pub async fn set_port_status(&self, port_id: &str, status: Status) -> Result<()> {
        let mut conn = self.acquire().await?;
        bindings::set_port_status(&mut conn, port_id, status).await
    }

    /// Marks every port whose vNIC the switch reports as attached `ACTIVE`.
    /// Returns the number of ports that changed.
    #[instrument(skip(self))]
    pub async fn sync_port_status(&self) -> Result<usize> {
        let Some(notifier) = &self.notifier else {
            return Ok(0);
        };
        let attached = notifier.attached_vnics().await?;

        let db = |e| PluginError::database("sync_port_status", e);
        let mut tx = self.pool.begin().await.map_err(db)?;
        let mut changed = 0;
        for vnic in &attached {
            let Some(port) = bindings::get_port_from_device_mac(&mut tx, vnic.mac).await? else {
                debug!(mac = %vnic.mac, "Attached vNIC has no port");
                continue;
            };
            if port.status != Status::Active {
                bindings::set_port_status(&mut tx, &port.id, Status::Active).await?;
                changed += 1;
            }
        }
        tx.commit().await.map_err(db)?;

        info!(attached = attached.len(), changed, "Synchronized port status");
        Ok(changed)
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool.acquire().await.map_err(|e| PluginError::database("acquire", e))
    }
}

async fn load_network(conn: &mut SqliteConnection, network_id: &str) -> Result<Network> {
    let not_found = || PluginError::NetworkNotFound(network_id.to_string());
    let record = records::get_network(conn, network_id).await?.ok_or_else(not_found)?;
    let binding = bindings::get_network_binding(conn, network_id).await?.ok_or_else(not_found)?;
    Ok(network_view(record, &binding))
}

fn network_view(record: NetworkRecord, binding: &NetworkBinding) -> Network {
    let (physical_network, segmentation_id) = binding.provider_view();
    Network {
        id: record.id,
        name: record.name,
        admin_state_up: record.admin_state_up,
        status: record.status,
        network_type: binding.network_type,
        physical_network,
        segmentation_id,
    }
}

async fn load_port(conn: &mut SqliteConnection, port_id: &str) -> Result<Port> {
    let record = records::get_port(conn, port_id)
        .await?
        .ok_or_else(|| PluginError::PortNotFound(port_id.to_string()))?;
    port_view(conn, record).await
}

async fn port_view(conn: &mut SqliteConnection, record: PortRecord) -> Result<Port> {
    let vif_type = bindings::get_port_profile_binding(conn, &record.id).await?.map(|b| b.vnic_type);
    let physical_network = bindings::get_network_binding(conn, &record.network_id)
        .await?
        .and_then(|b| b.physical_network);

    Ok(Port {
        id: record.id,
        network_id: record.network_id,
        name: record.name,
        mac_address: record.mac_address,
        device_id: record.device_id,
        admin_state_up: record.admin_state_up,
        status: record.status,
        vif_type,
        physical_network,
    })
}
