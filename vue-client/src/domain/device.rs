use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

/// Account-wide device identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceGid(pub u64);

impl fmt::Display for DeviceGid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Device {
    pub gid: DeviceGid,
    pub name: Option<String>,
    pub manufacturer_device_id: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
    /// Set for devices (smart plugs, chargers) that hang off another device's channel.
    pub parent_gid: Option<DeviceGid>,
}

impl Device {
    /// The name to publish the device under, or `None` when it has none.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// Distinct gids of every listed device, named or not, in ascending order.
    pub fn unique_gids(devices: &[Device]) -> Vec<DeviceGid> {
        devices
            .iter()
            .map(|d| d.gid)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(gid: u64, name: Option<&str>) -> Device {
        Device {
            gid: DeviceGid(gid),
            name: name.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn empty_or_missing_name_has_no_display_name() {
        assert_eq!(device(1, Some("Panel")).display_name(), Some("Panel"));
        assert_eq!(device(2, Some("")).display_name(), None);
        assert_eq!(device(3, None).display_name(), None);
    }

    #[test]
    fn unique_gids_dedupes_and_keeps_unnamed() {
        let devices = vec![device(7, Some("a")), device(3, None), device(7, Some("a"))];
        assert_eq!(Device::unique_gids(&devices), vec![DeviceGid(3), DeviceGid(7)]);
    }
}
