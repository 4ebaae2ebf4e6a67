//! Segmentation id allocation and network/port bindings for eSwitch fabrics.
//!
//! [`EswitchPlugin`] owns the network and port workflow: it validates
//! provider attributes, reserves segmentation ids through [`segmentation`],
//! records bindings and tells the switch about port changes through an
//! [`AgentNotifier`]. The allocator and binding functions take a
//! `SqliteConnection` and open their own sub-transaction, so they can also be
//! composed inside a caller's transaction.
//!
//! ```text
//!   EswitchPlugin ──► provider (validation)
//!        │
//!        ├──► segmentation / bindings / records ──► SQLite (sqlx)
//!        │
//!        └──► AgentNotifier ──► ControlChannel ──► eswitchd
//! ```

pub mod bindings;
mod error;
mod migrations;
mod model;
mod notifier;
mod plugin;
pub mod provider;
pub mod records;
pub mod segmentation;
mod store;

pub use bindings::{NetworkBinding, PortProfileBinding};
pub use error::{PluginError, Result};
pub use model::{Network, NetworkRequest, NetworkUpdate, Port, PortRequest, PortUpdate, Status};
pub use notifier::{AgentNotifier, EswitchNotifier};
pub use plugin::EswitchPlugin;
pub use provider::{ProviderAttributes, ProviderNetwork};
pub use segmentation::{SegmentationIdAllocation, SyncReport};
pub use store::{connect, connect_memory};
