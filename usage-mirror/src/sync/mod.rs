use std::time::Instant;

use futures::{Stream, StreamExt};
use tracing::{debug, error, info};
use vue_client::domain::{DataValue, UsageSnapshot};

use crate::{
    identity::{ChannelLeaf, IdentityMap},
    pipeline::{Envelope, MirrorError, TopologyMismatch},
    publisher::{LeafHandle, NodePublisher},
};

/// Outcome of one applied snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub devices: usize,
    pub writes: usize,
}

/// Pushes fresh snapshot values into the leaves created at build time.
///
/// Owns the identity map but only ever reads it; no node is created or
/// removed here.
pub struct Synchronizer<P> {
    publisher: P,
    map: IdentityMap,
}

impl<P: NodePublisher> Synchronizer<P> {
    pub fn new(publisher: P, map: IdentityMap) -> Self {
        Self { publisher, map }
    }

    pub fn identity_map(&self) -> &IdentityMap {
        &self.map
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Resolve every write a snapshot implies, without issuing any.
    ///
    /// Every mapped device, attribute and channel must be present in the
    /// snapshot, and a mapped device must not have gained attributes or
    /// channels. Snapshot devices that were never mapped (unnamed ones) are
    /// ignored.
    pub fn plan(&self, snapshot: &UsageSnapshot) -> Result<Vec<(LeafHandle, DataValue)>, TopologyMismatch> {
        let mut writes = Vec::with_capacity(self.map.leaf_count());

        for (gid, entry) in self.map.devices() {
            let record = snapshot
                .get(gid)
                .ok_or(TopologyMismatch::MissingDevice(gid))?;

            for (key, leaf) in entry.attributes() {
                let value = record
                    .attributes
                    .get(key)
                    .ok_or_else(|| TopologyMismatch::MissingAttribute {
                        gid,
                        key: key.to_string(),
                    })?;
                writes.push((leaf, value.clone()));
            }
            if let Some(key) = record.attributes.keys().find(|k| entry.attribute(k).is_none()) {
                return Err(TopologyMismatch::UnexpectedAttribute {
                    gid,
                    key: key.clone(),
                });
            }

            for (channel, channel_entry) in entry.channels() {
                let usage = record
                    .channels
                    .get(channel)
                    .ok_or_else(|| TopologyMismatch::MissingChannel {
                        gid,
                        channel: channel.to_string(),
                    })?;
                for leaf in ChannelLeaf::ALL {
                    writes.push((channel_entry.leaf(leaf), leaf.value_from(usage)));
                }
            }
            if let Some(channel) = record.channels.keys().find(|c| entry.channel(c).is_none()) {
                return Err(TopologyMismatch::UnexpectedChannel {
                    gid,
                    channel: channel.clone(),
                });
            }
        }

        Ok(writes)
    }

    /// Apply one snapshot. A snapshot that does not match the map is rejected
    /// before any value is written.
    pub async fn apply(&self, snapshot: &UsageSnapshot) -> Result<CycleReport, MirrorError> {
        let writes = self.plan(snapshot)?;
        let report = CycleReport {
            devices: self.map.len(),
            writes: writes.len(),
        };

        for (leaf, value) in writes {
            self.publisher.write(leaf, value).await?;
        }
        metrics::counter!("sync_leaf_writes_total").increment(report.writes as u64);

        Ok(report)
    }

    /// Apply snapshots until the stream ends. The first error stops the loop
    /// and is returned. Returns the number of cycles applied.
    pub async fn run<S>(&self, mut snapshots: S) -> Result<u64, MirrorError>
    where
        S: Stream<Item = Result<Envelope<UsageSnapshot>, MirrorError>> + Unpin,
    {
        let mut cycles: u64 = 0;

        while let Some(item) = snapshots.next().await {
            let env = item?;
            let started = Instant::now();

            let report = match self.apply(&env.payload).await {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, cycle = cycles + 1, "synchronization failed");
                    return Err(e);
                }
            };

            cycles += 1;
            metrics::counter!("sync_cycles_total").increment(1);
            metrics::histogram!("sync_cycle_duration_seconds").record(started.elapsed().as_secs_f64());
            debug!(
                cycle = cycles,
                devices = report.devices,
                writes = report.writes,
                "snapshot applied"
            );
        }

        info!(cycles, "synchronizer stopped");
        Ok(cycles)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        hierarchy::HierarchyBuilder,
        publisher::{AddressSpace, NodeId, PublishError},
    };
    use serde_json::{json, Value};
    use time::OffsetDateTime;
    use vue_client::domain::{Device, DeviceGid, EnergyUnit, Scale, UsageRecord};

    /// Wraps an address space and records the target of every write.
    #[derive(Default)]
    struct RecordingPublisher {
        space: AddressSpace,
        writes: Mutex<Vec<LeafHandle>>,
        creates: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl NodePublisher for RecordingPublisher {
        fn root(&self) -> NodeId {
            self.space.root()
        }

        async fn add_container(&self, parent: NodeId, name: &str) -> Result<NodeId, PublishError> {
            *self.creates.lock().unwrap() += 1;
            self.space.add_container(parent, name).await
        }

        async fn add_leaf(
            &self,
            parent: NodeId,
            name: &str,
            initial: DataValue,
        ) -> Result<LeafHandle, PublishError> {
            *self.creates.lock().unwrap() += 1;
            self.space.add_leaf(parent, name, initial).await
        }

        async fn write(&self, leaf: LeafHandle, value: DataValue) -> Result<(), PublishError> {
            self.writes.lock().unwrap().push(leaf);
            self.space.write(leaf, value).await
        }
    }

    impl RecordingPublisher {
        fn take_writes(&self) -> Vec<LeafHandle> {
            let mut writes = std::mem::take(&mut *self.writes.lock().unwrap());
            writes.sort();
            writes
        }
    }

    fn snapshot(records: Value) -> UsageSnapshot {
        let mut snapshot =
            UsageSnapshot::new(OffsetDateTime::now_utc(), Scale::Minute, EnergyUnit::KilowattHours);
        for (gid, record) in records.as_object().unwrap() {
            snapshot.insert(
                DeviceGid(gid.parse().unwrap()),
                UsageRecord::from_attributes(record.as_object().unwrap().clone()).unwrap(),
            );
        }
        snapshot
    }

    fn panel(voltage: i64, kwh: f64, pct: f64) -> UsageSnapshot {
        snapshot(json!({
            "1": {
                "voltage": voltage,
                "channels": {
                    "1": {"usage": kwh, "percentage": pct, "channel_num": "1", "name": "Kitchen"}
                }
            }
        }))
    }

    fn devices() -> Vec<Device> {
        vec![Device {
            gid: DeviceGid(1),
            name: Some("Panel".to_string()),
            ..Default::default()
        }]
    }

    async fn synchronizer(first: &UsageSnapshot) -> Synchronizer<RecordingPublisher> {
        let publisher = RecordingPublisher::default();
        let map = HierarchyBuilder::new(&publisher)
            .build(&devices(), first)
            .await
            .unwrap();
        Synchronizer::new(publisher, map)
    }

    fn envelope(payload: UsageSnapshot) -> Result<Envelope<UsageSnapshot>, MirrorError> {
        Ok(Envelope {
            payload,
            received_at: std::time::SystemTime::now(),
        })
    }

    #[tokio::test]
    async fn apply_updates_existing_leaves() {
        let sync = synchronizer(&panel(120, 2.5, 50.0)).await;
        let space = &sync.publisher().space;

        let report = sync.apply(&panel(121, 3.0, 55.0)).await.unwrap();
        assert_eq!(report, CycleReport { devices: 1, writes: 6 });

        assert_eq!(space.read_path("Devices/Panel/voltage").await, Some(DataValue::Int(121)));
        let channel = "Devices/Panel/Channels/Channel 1";
        assert_eq!(
            space.read_path(&format!("{channel}/usage kWh")).await,
            Some(DataValue::Float(3.0))
        );
        assert_eq!(
            space.read_path(&format!("{channel}/usage Wh")).await,
            Some(DataValue::Float(3000.0))
        );
        assert_eq!(
            space.read_path(&format!("{channel}/percentage")).await,
            Some(DataValue::Float(55.0))
        );
    }

    #[tokio::test]
    async fn every_cycle_writes_the_same_handles_and_creates_nothing() {
        let sync = synchronizer(&panel(120, 2.5, 50.0)).await;
        let created = *sync.publisher().creates.lock().unwrap();
        let nodes = sync.publisher().space.node_count().await;
        let expected = sync.identity_map().handles();

        let snapshots: Vec<_> = (0..5)
            .map(|i| envelope(panel(120 + i, 0.5 * i as f64, 10.0 * i as f64)))
            .collect();
        let mut seen = Vec::new();
        for env in snapshots {
            sync.apply(&env.unwrap().payload).await.unwrap();
            seen.push(sync.publisher().take_writes());
        }

        assert!(seen.iter().all(|w| *w == expected));
        assert_eq!(*sync.publisher().creates.lock().unwrap(), created);
        assert_eq!(sync.publisher().space.node_count().await, nodes);
    }

    #[tokio::test]
    async fn wh_tracks_kwh_after_every_cycle() {
        let sync = synchronizer(&panel(120, 2.5, 50.0)).await;
        let space = &sync.publisher().space;
        let channel = "Devices/Panel/Channels/Channel 1";

        for kwh in [0.0, 0.125, 7.5, 1.001] {
            sync.apply(&panel(120, kwh, 1.0)).await.unwrap();
            let k = space.read_path(&format!("{channel}/usage kWh")).await.unwrap();
            let w = space.read_path(&format!("{channel}/usage Wh")).await.unwrap();
            assert_eq!(w.as_f64().unwrap(), k.as_f64().unwrap() * 1000.0);
        }
    }

    #[tokio::test]
    async fn missing_device_is_fatal_and_writes_nothing() {
        let sync = synchronizer(&panel(120, 2.5, 50.0)).await;
        let other = snapshot(json!({"2": {"voltage": 1, "channels": {}}}));

        let res = sync.apply(&other).await;
        assert!(matches!(
            res,
            Err(MirrorError::Topology(TopologyMismatch::MissingDevice(DeviceGid(1))))
        ));
        assert!(sync.publisher().take_writes().is_empty());
    }

    #[tokio::test]
    async fn channel_changes_are_fatal() {
        let sync = synchronizer(&panel(120, 2.5, 50.0)).await;

        let missing = snapshot(json!({"1": {"voltage": 120, "channels": {}}}));
        assert!(matches!(
            sync.plan(&missing),
            Err(TopologyMismatch::MissingChannel { ref channel, .. }) if channel == "1"
        ));

        let added = snapshot(json!({"1": {"voltage": 120, "channels": {
            "1": {"usage": 1.0, "percentage": 1.0, "channel_num": "1", "name": "Kitchen"},
            "2": {"usage": 1.0, "percentage": 1.0, "channel_num": "2", "name": "Oven"}
        }}}));
        assert!(matches!(
            sync.plan(&added),
            Err(TopologyMismatch::UnexpectedChannel { ref channel, .. }) if channel == "2"
        ));
    }

    #[tokio::test]
    async fn attribute_changes_are_fatal() {
        let sync = synchronizer(&panel(120, 2.5, 50.0)).await;
        let channels = json!({"1": {"usage": 1.0, "percentage": 1.0, "channel_num": "1", "name": "Kitchen"}});

        let missing = snapshot(json!({"1": {"channels": channels.clone()}}));
        assert!(matches!(
            sync.plan(&missing),
            Err(TopologyMismatch::MissingAttribute { ref key, .. }) if key == "voltage"
        ));

        let added = snapshot(json!({"1": {"voltage": 120, "frequency": 60, "channels": channels}}));
        assert!(matches!(
            sync.plan(&added),
            Err(TopologyMismatch::UnexpectedAttribute { ref key, .. }) if key == "frequency"
        ));
    }

    #[tokio::test]
    async fn unmapped_devices_in_snapshot_are_ignored() {
        let sync = synchronizer(&panel(120, 2.5, 50.0)).await;
        let snap = snapshot(json!({
            "1": {"voltage": 120, "channels": {"1": {"usage": 1.0, "percentage": 1.0, "channel_num": "1", "name": "Kitchen"}}},
            "5": {"voltage": 1, "channels": {}}
        }));

        assert_eq!(sync.apply(&snap).await.unwrap().writes, 6);
    }

    #[tokio::test]
    async fn run_consumes_stream_and_stops_on_error() {
        let sync = synchronizer(&panel(120, 2.5, 50.0)).await;

        let ok = futures::stream::iter(vec![envelope(panel(121, 1.0, 1.0)), envelope(panel(122, 2.0, 2.0))]);
        assert_eq!(sync.run(ok).await.unwrap(), 2);
        assert_eq!(
            sync.publisher().space.read_path("Devices/Panel/voltage").await,
            Some(DataValue::Int(122))
        );

        let failing = futures::stream::iter(vec![
            envelope(panel(123, 1.0, 1.0)),
            Err(MirrorError::Source("boom".to_string())),
            envelope(panel(124, 1.0, 1.0)),
        ]);
        assert!(matches!(sync.run(failing).await, Err(MirrorError::Source(_))));
        assert_eq!(
            sync.publisher().space.read_path("Devices/Panel/voltage").await,
            Some(DataValue::Int(123))
        );
    }
}
