//! Control channel client and VIF driver.
//!
//! [`ControlChannel`] talks to eswitchd; [`VifDriver`] builds on it to plug
//! and unplug guest vNICs.

mod channel;
mod error;
mod guest_config;
mod vif;

pub use channel::ControlChannel;
pub use error::{ClientError, Result, VifError};
pub use guest_config::GuestDevice;
pub use vif::VifDriver;
