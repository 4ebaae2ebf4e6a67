//! Test infrastructure for eSwitch components
//!
//! Provides:
//! - Fake sysfs trees for device discovery
//! - A scripted control daemon for client tests
//! - Common fixtures

pub mod fixtures;
mod mock_daemon;
mod sysfs;

pub use fixtures::*;
pub use mock_daemon::{MockDaemon, Step};
pub use sysfs::FakeSysfs;
