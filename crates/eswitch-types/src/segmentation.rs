//! Segmentation ids and configured VLAN ranges.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Segmentation id stored in the binding of a flat network.
pub const FLAT_VLAN_ID: i64 = -1;

/// Segmentation id stored in the binding of a local network.
pub const LOCAL_VLAN_ID: i64 = -2;

/// Lowest usable 802.1Q tag.
pub const MIN_VLAN_TAG: i64 = 1;

/// Highest usable 802.1Q tag. 0 and 4095 are reserved.
pub const MAX_VLAN_TAG: i64 = 4094;

/// True for ids a provider may request on a VLAN or IB network.
pub const fn is_valid_vlan_tag(id: i64) -> bool {
    id >= MIN_VLAN_TAG && id <= MAX_VLAN_TAG
}

/// Inclusive range of allocatable segmentation ids on one physical network.
///
/// ```
/// use eswitch_types::VlanRange;
///
/// let range = VlanRange::new(10, 12).unwrap();
/// assert!(range.contains(11));
/// assert_eq!(range.ids().count(), 3);
///
/// assert!(VlanRange::new(12, 10).is_err());
/// assert!(VlanRange::new(0, 10).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VlanRange {
    min: i64,
    max: i64,
}

impl VlanRange {
    pub fn new(min: i64, max: i64) -> Result<Self, ParseError> {
        if !is_valid_vlan_tag(min) || !is_valid_vlan_tag(max) || min > max {
            return Err(ParseError::InvalidVlanRange(format!("{min}:{max}")));
        }
        Ok(Self { min, max })
    }

    pub const fn min(&self) -> i64 {
        self.min
    }

    pub const fn max(&self) -> i64 {
        self.max
    }

    pub const fn contains(&self, id: i64) -> bool {
        id >= self.min && id <= self.max
    }

    pub fn ids(&self) -> RangeInclusive<i64> {
        self.min..=self.max
    }

    pub const fn len(&self) -> usize {
        (self.max - self.min + 1) as usize
    }

    pub const fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for VlanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.min, self.max)
    }
}
