//! Control channel client.
//!
//! One TCP connection to the control daemon, opened on the first request and
//! reused afterwards. Requests are strictly one at a time: `send` takes
//! `&mut self`, so concurrent callers either share a channel behind a lock or
//! open their own.
//!
//! Every exchange (connect, write, read) runs under the request timeout. When
//! it expires, or the connection fails in any other way, the connection is
//! discarded so the next request starts on a fresh one. Nothing is retried
//! here.

use std::time::Duration;

use eswitch_common::{EswitchConfig, InterfaceMappings};
use eswitch_types::protocol::{DeviceReply, Reply, ReplyOutcome, Request, VnicInfo, ALL_FABRICS};
use eswitch_types::{MacAddress, VnicType};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, instrument, warn};

use crate::error::{ClientError, Result};

type Connection = Framed<TcpStream, LinesCodec>;

pub struct ControlChannel {
    endpoint: String,
    timeout: Duration,
    conn: Option<Connection>,
    connects: u64,
}

impl ControlChannel {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self { endpoint: endpoint.into(), timeout, conn: None, connects: 0 }
    }

    pub fn from_config(config: &EswitchConfig) -> Self {
        Self::new(config.eswitch.daemon_endpoint.clone(), config.request_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Number of connections opened so far.
    pub fn connection_count(&self) -> u64 {
        self.connects
    }

    /// Drops the connection; the next request reconnects.
    pub fn reset(&mut self) {
        if self.conn.take().is_some() {
            debug!(endpoint = %self.endpoint, "Closed control channel connection");
        }
    }

    async fn connection(&mut self) -> Result<&mut Connection> {
        if self.conn.is_none() {
            let stream = TcpStream::connect(&self.endpoint).await.map_err(|source| {
                ClientError::Connect { endpoint: self.endpoint.clone(), source }
            })?;
            stream.set_nodelay(true)?;
            self.connects += 1;
            debug!(endpoint = %self.endpoint, connects = self.connects, "Opened control channel connection");
            self.conn = Some(Framed::new(stream, LinesCodec::new()));
        }
        self.conn.as_mut().ok_or(ClientError::ConnectionClosed)
    }

    async fn exchange(&mut self, action: &str, frame: String) -> Result<String> {
        let conn = self.connection().await?;
        conn.send(frame).await.map_err(|e| codec_error(action, e))?;
        match conn.next().await {
            Some(Ok(line)) => Ok(line),
            Some(Err(e)) => Err(codec_error(action, e)),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Sends one request and waits for its reply.
    ///
    /// Returns the payload of an `OK` reply.
    #[instrument(skip(self, request), fields(action = request.action()))]
    pub async fn send(&mut self, request: &Request) -> Result<Option<Value>> {
        let action = request.action();
        let frame = serde_json::to_string(request).map_err(|e| ClientError::decode(action, e))?;

        let line = match tokio::time::timeout(self.timeout, self.exchange(action, frame)).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                self.reset();
                return Err(e);
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Control channel request timed out");
                self.reset();
                return Err(ClientError::Timeout { action: action.to_string(), timeout: self.timeout });
            }
        };

        let reply: Reply = match serde_json::from_str(&line) {
            Ok(reply) => reply,
            Err(e) => {
                // framing is no longer trustworthy
                self.reset();
                return Err(ClientError::decode(action, e));
            }
        };

        match reply.into_outcome() {
            ReplyOutcome::Ok(payload) => Ok(payload),
            ReplyOutcome::Fail { action, reason } => {
                debug!(%reason, "Daemon reported failure");
                Err(ClientError::ProtocolFailure { action, reason })
            }
            ReplyOutcome::Unknown(status) => Err(ClientError::UnknownStatus(status)),
        }
    }

    async fn send_expecting<T: DeserializeOwned>(&mut self, request: &Request) -> Result<T> {
        let action = request.action();
        let payload = self
            .send(request)
            .await?
            .ok_or_else(|| ClientError::MissingPayload(action.to_string()))?;
        serde_json::from_value(payload).map_err(|e| ClientError::decode(action, e))
    }

    async fn send_device(&mut self, request: &Request) -> Result<String> {
        Ok(self.send_expecting::<DeviceReply>(request).await?.dev)
    }

    /// Asks the daemon for a device for a new vNIC. With `dev_name`, that
    /// specific device is requested.
    pub async fn allocate_virtual_interface(
        &mut self,
        vnic_mac: MacAddress,
        device_id: &str,
        fabric: &str,
        vnic_type: VnicType,
        dev_name: Option<&str>,
    ) -> Result<String> {
        self.send_device(&Request::CreatePort {
            vnic_mac,
            device_id: device_id.to_string(),
            fabric: fabric.to_string(),
            vnic_type,
            dev_name: dev_name.map(str::to_string),
        })
        .await
    }

    /// Binds a known device to a vNIC.
    pub async fn plug(
        &mut self,
        vnic_mac: MacAddress,
        device_id: &str,
        fabric: &str,
        vnic_type: VnicType,
        dev_name: &str,
    ) -> Result<String> {
        self.send_device(&Request::PlugNic {
            vnic_mac,
            device_id: device_id.to_string(),
            fabric: fabric.to_string(),
            vnic_type,
            dev_name: dev_name.to_string(),
        })
        .await
    }

    /// Releases the device held by a vNIC and returns it.
    pub async fn deallocate(&mut self, vnic_mac: MacAddress, fabric: &str) -> Result<String> {
        self.send_device(&Request::DeletePort { fabric: fabric.to_string(), vnic_mac }).await
    }

    /// Sends one `define_fabric_mapping` per mapping, stopping at the first
    /// failure.
    pub async fn define_fabric_mappings(&mut self, mappings: &InterfaceMappings) -> Result<()> {
        for (fabric, interface) in mappings.iter() {
            self.send(&Request::DefineFabricMapping {
                fabric: fabric.to_string(),
                interface: interface.to_string(),
            })
            .await?;
        }
        Ok(())
    }

    pub async fn port_up(&mut self, fabric: &str, mac: MacAddress) -> Result<()> {
        self.send(&Request::PortUp { fabric: fabric.to_string(), ref_by: Default::default(), mac })
            .await
            .map(drop)
    }

    pub async fn port_down(&mut self, fabric: &str, mac: MacAddress) -> Result<()> {
        self.send(&Request::PortDown { fabric: fabric.to_string(), ref_by: Default::default(), mac })
            .await
            .map(drop)
    }

    pub async fn port_release(&mut self, fabric: &str, mac: MacAddress) -> Result<()> {
        self.send(&Request::PortRelease { fabric: fabric.to_string(), ref_by: Default::default(), mac })
            .await
            .map(drop)
    }

    /// vNICs on every fabric.
    pub async fn get_attached_vnics(&mut self) -> Result<Vec<VnicInfo>> {
        self.get_vnics(ALL_FABRICS).await
    }

    pub async fn get_vnics(&mut self, fabric: &str) -> Result<Vec<VnicInfo>> {
        // an OK without payload means nothing is attached
        match self.send(&Request::GetVnics { fabric: fabric.to_string() }).await? {
            Some(payload) => serde_json::from_value(payload).map_err(|e| ClientError::decode("get_vnics", e)),
            None => Ok(Vec::new()),
        }
    }

    pub async fn set_port_vlan(&mut self, fabric: &str, port_mac: MacAddress, vlan: i64) -> Result<()> {
        self.send(&Request::SetVlan { fabric: fabric.to_string(), port_mac, vlan }).await.map(drop)
    }
}

fn codec_error(action: &str, e: LinesCodecError) -> ClientError {
    match e {
        LinesCodecError::Io(e) => ClientError::Io(e),
        other => ClientError::decode(action, other),
    }
}
