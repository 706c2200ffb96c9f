use tracing::{debug, warn};
use vue_client::domain::{ChannelUsage, Device, UsageRecord, UsageSnapshot};

use crate::{
    identity::{ChannelEntry, ChannelLeaf, DeviceEntry, IdentityMap, IdentityMapBuilder},
    pipeline::{MirrorError, TopologyMismatch},
    publisher::{LeafHandle, NodeId, NodePublisher},
};

pub const DEVICES_FOLDER: &str = "Devices";
pub const CHANNELS_FOLDER: &str = "Channels";

pub fn channel_node_name(channel: &str) -> String {
    format!("Channel {channel}")
}

/// Creates the node tree for a device list and its first usage snapshot.
///
/// Layout:
///
/// ```text
/// Devices/
///   <device name>/
///     <attribute>            one leaf per device-level scalar
///     Channels/
///       Channel <num>/
///         usage kWh, usage Wh, percentage, channel_num, name
/// ```
pub struct HierarchyBuilder<'a, P: ?Sized> {
    publisher: &'a P,
}

impl<'a, P> HierarchyBuilder<'a, P>
where
    P: NodePublisher + ?Sized,
{
    pub fn new(publisher: &'a P) -> Self {
        Self { publisher }
    }

    /// Devices without a display name are skipped. A named device with no
    /// record in `snapshot` fails the build, as does any publisher error; the
    /// nodes created up to that point are left in place.
    pub async fn build(
        &self,
        devices: &[Device],
        snapshot: &UsageSnapshot,
    ) -> Result<IdentityMap, MirrorError> {
        let devices_folder = self
            .publisher
            .add_container(self.publisher.root(), DEVICES_FOLDER)
            .await?;
        let mut map = IdentityMapBuilder::default();

        for device in devices {
            let Some(name) = device.display_name() else {
                debug!(device_gid = %device.gid, "skipping device without a name");
                continue;
            };
            if map.contains(device.gid) {
                warn!(device_gid = %device.gid, "device listed twice; keeping the first");
                continue;
            }

            let record = snapshot
                .get(device.gid)
                .ok_or(TopologyMismatch::MissingDevice(device.gid))?;
            let entry = self.build_device(devices_folder, name, record).await?;
            metrics::counter!("hierarchy_nodes_created_total")
                .increment(2 + entry.leaf_count() as u64 + entry.channels().count() as u64);
            debug!(
                device_gid = %device.gid,
                device = name,
                model = device.model.as_deref().unwrap_or("unknown"),
                firmware = device.firmware.as_deref().unwrap_or("unknown"),
                manufacturer_id = device.manufacturer_device_id.as_deref().unwrap_or(""),
                parent_gid = ?device.parent_gid,
                leaves = entry.leaf_count(),
                "device published"
            );
            map.insert(device.gid, entry);
        }

        Ok(map.finish())
    }

    async fn build_device(
        &self,
        devices_folder: NodeId,
        name: &str,
        record: &UsageRecord,
    ) -> Result<DeviceEntry, MirrorError> {
        let node = self.publisher.add_container(devices_folder, name).await?;
        let channels_node = self.publisher.add_container(node, CHANNELS_FOLDER).await?;
        let mut entry = DeviceEntry::new(name);

        for (key, value) in &record.attributes {
            let leaf = self.publisher.add_leaf(node, key, value.clone()).await?;
            entry.insert_attribute(key.clone(), leaf);
        }

        for (channel, usage) in &record.channels {
            let channel_entry = self.build_channel(channels_node, channel, usage).await?;
            entry.insert_channel(channel.clone(), channel_entry);
        }

        Ok(entry)
    }

    async fn build_channel(
        &self,
        channels_node: NodeId,
        channel: &str,
        usage: &ChannelUsage,
    ) -> Result<ChannelEntry, MirrorError> {
        let node = self
            .publisher
            .add_container(channels_node, &channel_node_name(channel))
            .await?;

        let usage_kwh = self.add_channel_leaf(node, ChannelLeaf::UsageKwh, usage).await?;
        let usage_wh = self.add_channel_leaf(node, ChannelLeaf::UsageWh, usage).await?;
        let percentage = self.add_channel_leaf(node, ChannelLeaf::Percentage, usage).await?;
        let channel_num = self.add_channel_leaf(node, ChannelLeaf::ChannelNum, usage).await?;
        let name = self.add_channel_leaf(node, ChannelLeaf::Name, usage).await?;

        Ok(ChannelEntry::new([usage_kwh, usage_wh, percentage, channel_num, name]))
    }

    async fn add_channel_leaf(
        &self,
        node: NodeId,
        leaf: ChannelLeaf,
        usage: &ChannelUsage,
    ) -> Result<LeafHandle, MirrorError> {
        Ok(self
            .publisher
            .add_leaf(node, leaf.browse_name(), leaf.value_from(usage))
            .await?)
    }
}
