//! PCI function addresses (`domain:bus:slot.function`).

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Address of a single PCI function, as it appears under
/// `/sys/bus/pci/devices`.
///
/// ```
/// use eswitch_types::PciAddress;
///
/// let vf: PciAddress = "0000:08:00.3".parse().unwrap();
/// assert_eq!(vf.slot_prefix(), "0000:08:00");
/// assert_eq!(vf.function(), 3);
/// assert!(vf.is_virtual_function());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PciAddress {
    domain: u16,
    bus: u8,
    slot: u8,
    function: u8,
}

impl PciAddress {
    pub const MAX_SLOT: u8 = 0x1f;
    pub const MAX_FUNCTION: u8 = 0x7;

    pub fn new(domain: u16, bus: u8, slot: u8, function: u8) -> Result<Self, ParseError> {
        if slot > Self::MAX_SLOT || function > Self::MAX_FUNCTION {
            return Err(ParseError::InvalidPciAddress(format!(
                "{domain:04x}:{bus:02x}:{slot:02x}.{function:x}"
            )));
        }
        Ok(Self { domain, bus, slot, function })
    }

    pub const fn domain(&self) -> u16 {
        self.domain
    }

    pub const fn bus(&self) -> u8 {
        self.bus
    }

    pub const fn slot(&self) -> u8 {
        self.slot
    }

    pub const fn function(&self) -> u8 {
        self.function
    }

    /// `domain:bus:slot` shared by a physical function and all of its
    /// sibling virtual functions.
    pub fn slot_prefix(&self) -> String {
        format!("{:04x}:{:02x}:{:02x}", self.domain, self.bus, self.slot)
    }

    /// Function 0 is the physical function; everything else on the slot is
    /// treated as a virtual function.
    pub const fn is_virtual_function(&self) -> bool {
        self.function != 0
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:x}", self.slot_prefix(), self.function)
    }
}

impl FromStr for PciAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidPciAddress(s.to_string());

        let (prefix, function) = s.rsplit_once('.').ok_or_else(invalid)?;
        let mut parts = prefix.split(':');
        let (Some(domain), Some(bus), Some(slot), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let domain = u16::from_str_radix(domain, 16).map_err(|_| invalid())?;
        let bus = u8::from_str_radix(bus, 16).map_err(|_| invalid())?;
        let slot = u8::from_str_radix(slot, 16).map_err(|_| invalid())?;
        let function = u8::from_str_radix(function, 16).map_err(|_| invalid())?;

        PciAddress::new(domain, bus, slot, function).map_err(|_| invalid())
    }
}

impl TryFrom<String> for PciAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PciAddress> for String {
    fn from(addr: PciAddress) -> String {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_and_display() {
        let addr: PciAddress = "0000:0a:1f.7".parse().unwrap();
        assert_eq!(addr.domain(), 0);
        assert_eq!(addr.bus(), 0x0a);
        assert_eq!(addr.slot(), 0x1f);
        assert_eq!(addr.function(), 7);
        assert_eq!(addr.to_string(), "0000:0a:1f.7");
    }

    #[test]
    fn test_physical_function() {
        let pf: PciAddress = "0000:08:00.0".parse().unwrap();
        assert!(!pf.is_virtual_function());
        assert_eq!(pf.slot_prefix(), "0000:08:00");
    }

    #[test]
    fn test_invalid() {
        assert!("0000:08:00".parse::<PciAddress>().is_err());
        assert!("08:00.1".parse::<PciAddress>().is_err());
        assert!("0000:08:00.8".parse::<PciAddress>().is_err());
        assert!("0000:08:20.1".parse::<PciAddress>().is_err());
        assert!("0000:08:00:00.1".parse::<PciAddress>().is_err());
        assert!("eth0".parse::<PciAddress>().is_err());
    }

    #[test]
    fn test_ordering_follows_function() {
        let a: PciAddress = "0000:08:00.1".parse().unwrap();
        let b: PciAddress = "0000:08:00.2".parse().unwrap();
        assert!(a < b);
    }
}
