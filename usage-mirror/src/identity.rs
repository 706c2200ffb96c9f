//! Stable mapping from remote entity identifiers to the leaves created for them.
//!
//! The map is assembled once through [`IdentityMapBuilder`] and is immutable
//! afterwards: [`IdentityMap`] has no way to add or remove keys, so the
//! synchronizer can only route values through what the build produced.

use std::collections::HashMap;

use vue_client::domain::{ChannelUsage, DataValue, DeviceGid};

use crate::publisher::LeafHandle;

/// The fixed set of leaves published under every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLeaf {
    UsageKwh = 0,
    UsageWh = 1,
    Percentage = 2,
    ChannelNum = 3,
    Name = 4,
}

impl ChannelLeaf {
    pub const ALL: [ChannelLeaf; 5] = [
        ChannelLeaf::UsageKwh,
        ChannelLeaf::UsageWh,
        ChannelLeaf::Percentage,
        ChannelLeaf::ChannelNum,
        ChannelLeaf::Name,
    ];

    pub fn browse_name(self) -> &'static str {
        match self {
            ChannelLeaf::UsageKwh => "usage kWh",
            ChannelLeaf::UsageWh => "usage Wh",
            ChannelLeaf::Percentage => "percentage",
            ChannelLeaf::ChannelNum => "channel_num",
            ChannelLeaf::Name => "name",
        }
    }

    /// Value of this leaf for a channel record. Used for both the initial value
    /// and every later write, so `usage Wh` is always `usage kWh` × 1000.
    pub fn value_from(self, usage: &ChannelUsage) -> DataValue {
        match self {
            ChannelLeaf::UsageKwh => usage.usage.into(),
            ChannelLeaf::UsageWh => usage.usage_wh().into(),
            ChannelLeaf::Percentage => usage.percentage.into(),
            ChannelLeaf::ChannelNum => usage.channel_num.as_str().into(),
            ChannelLeaf::Name => usage.name.as_deref().into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelEntry {
    leaves: [LeafHandle; 5],
}

impl ChannelEntry {
    /// `leaves` is indexed by [`ChannelLeaf`] discriminant.
    pub(crate) fn new(leaves: [LeafHandle; 5]) -> Self {
        Self { leaves }
    }

    pub fn leaf(&self, leaf: ChannelLeaf) -> LeafHandle {
        self.leaves[leaf as usize]
    }

    pub fn leaves(&self) -> impl Iterator<Item = (ChannelLeaf, LeafHandle)> + '_ {
        ChannelLeaf::ALL.into_iter().map(|l| (l, self.leaf(l)))
    }
}

#[derive(Debug, Clone)]
pub struct DeviceEntry {
    name: String,
    attributes: HashMap<String, LeafHandle>,
    channels: HashMap<String, ChannelEntry>,
}

impl DeviceEntry {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: HashMap::new(),
            channels: HashMap::new(),
        }
    }

    pub(crate) fn insert_attribute(&mut self, key: String, leaf: LeafHandle) {
        self.attributes.entry(key).or_insert(leaf);
    }

    pub(crate) fn insert_channel(&mut self, channel: String, entry: ChannelEntry) {
        self.channels.entry(channel).or_insert(entry);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, key: &str) -> Option<LeafHandle> {
        self.attributes.get(key).copied()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, LeafHandle)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn channel(&self, channel: &str) -> Option<&ChannelEntry> {
        self.channels.get(channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, &ChannelEntry)> {
        self.channels.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn leaf_count(&self) -> usize {
        self.attributes.len() + self.channels.len() * ChannelLeaf::ALL.len()
    }
}

#[derive(Debug, Default)]
pub struct IdentityMapBuilder {
    devices: HashMap<DeviceGid, DeviceEntry>,
}

impl IdentityMapBuilder {
    pub fn contains(&self, gid: DeviceGid) -> bool {
        self.devices.contains_key(&gid)
    }

    /// Keys are write-once: a second insert for the same gid is ignored and
    /// reported as `false`.
    pub(crate) fn insert(&mut self, gid: DeviceGid, entry: DeviceEntry) -> bool {
        if self.contains(gid) {
            return false;
        }
        self.devices.insert(gid, entry);
        true
    }

    pub fn finish(self) -> IdentityMap {
        IdentityMap {
            devices: self.devices,
        }
    }
}

/// Read-only after build.
#[derive(Debug, Clone)]
pub struct IdentityMap {
    devices: HashMap<DeviceGid, DeviceEntry>,
}

impl IdentityMap {
    pub fn device(&self, gid: DeviceGid) -> Option<&DeviceEntry> {
        self.devices.get(&gid)
    }

    pub fn devices(&self) -> impl Iterator<Item = (DeviceGid, &DeviceEntry)> {
        self.devices.iter().map(|(gid, entry)| (*gid, entry))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn leaf_count(&self) -> usize {
        self.devices.values().map(DeviceEntry::leaf_count).sum()
    }

    /// Every leaf handle reachable through the map, sorted.
    pub fn handles(&self) -> Vec<LeafHandle> {
        let mut out: Vec<LeafHandle> = self
            .devices
            .values()
            .flat_map(|d| {
                d.attributes()
                    .map(|(_, h)| h)
                    .chain(d.channels().flat_map(|(_, c)| c.leaves().map(|(_, h)| h)))
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort();
        out
    }
}
