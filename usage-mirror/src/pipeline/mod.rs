use std::time::SystemTime;

use tracing::{info, warn};
use vue_client::{
    domain::{Device, DeviceGid},
    VueError,
};

use crate::{
    hierarchy::HierarchyBuilder,
    publisher::{NodePublisher, PublishError},
    sources::{PollingSource, UsageSource},
    sync::Synchronizer,
};

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

/// The remote tree no longer has the shape the node tree was built from.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyMismatch {
    #[error("device {0} missing from usage snapshot")]
    MissingDevice(DeviceGid),
    #[error("device {gid}: channel {channel} missing from usage snapshot")]
    MissingChannel { gid: DeviceGid, channel: String },
    #[error("device {gid}: channel {channel} was not present at build time")]
    UnexpectedChannel { gid: DeviceGid, channel: String },
    #[error("device {gid}: attribute `{key}` missing from usage snapshot")]
    MissingAttribute { gid: DeviceGid, key: String },
    #[error("device {gid}: attribute `{key}` was not present at build time")]
    UnexpectedAttribute { gid: DeviceGid, key: String },
}

#[derive(thiserror::Error, Debug)]
pub enum MirrorError {
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("topology mismatch: {0}")]
    Topology(#[from] TopologyMismatch),
    #[error("source error: {0}")]
    Source(String),
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),
}

impl From<VueError> for MirrorError {
    fn from(e: VueError) -> Self {
        if e.is_auth() {
            MirrorError::Auth(e.to_string())
        } else {
            MirrorError::Source(e.to_string())
        }
    }
}

/// Build the node tree from the first snapshot, then keep it synchronized
/// until the source's stop signal fires.
pub struct Pipeline<U, P> {
    pub source: PollingSource<U>,
    pub devices: Vec<Device>,
    pub publisher: P,
}

impl<U, P> Pipeline<U, P>
where
    U: UsageSource + 'static,
    P: NodePublisher,
{
    /// Returns the number of synchronization cycles applied.
    pub async fn run(self) -> Result<u64, MirrorError> {
        let first = self.source.fetch().await?;

        let map = HierarchyBuilder::new(&self.publisher)
            .build(&self.devices, &first.payload)
            .await?;
        drop(first);

        if map.is_empty() {
            warn!("no named devices in the account; the node tree has nothing to synchronize");
        }

        info!(
            devices = map.len(),
            leaves = map.leaf_count(),
            "node tree built"
        );

        let synchronizer = Synchronizer::new(self.publisher, map);
        synchronizer.run(self.source.poll()).await
    }
}
