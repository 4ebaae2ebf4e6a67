//! SR-IOV device pool daemon.
//!
//! eswitchd owns the devices behind every configured fabric (a physical
//! network bound to one physical function port) and hands them out to vNICs
//! on request from the control channel.
//!
//! # Architecture
//!
//! ```text
//!  control channel ──▶ server ──▶ EswitchDaemon ──▶ ResourceManager
//!                                   (vNIC table)     ├── PciUtils   (sysfs)
//!                                                    ├── DeviceDb   (pools)
//!                                                    └── DomainSource (virsh)
//! ```
//!
//! Pool state lives in memory only. At startup it is rebuilt from the
//! interfaces the hypervisor reports as attached.

mod daemon;
mod device_db;
mod error;
mod hypervisor;
mod pci_utils;
mod resource_mgr;
mod server;
mod vnic_table;

pub use daemon::EswitchDaemon;
pub use device_db::{Allocation, DeviceDb, DeviceKind, DeviceOwner, FabricInfo, RefreshReport};
pub use error::{EswitchdError, Result};
pub use hypervisor::{DomainInterface, DomainSource, StaticDomains, VirshDomains};
pub use pci_utils::{DiscoveredDevices, PciUtils, PfDetails};
pub use resource_mgr::{AttachedDevice, AttachedScan, ResourceManager, RestoreReport};
pub use server::{serve, MAX_FRAME_LEN};
pub use vnic_table::{VnicEntry, VnicTable};
