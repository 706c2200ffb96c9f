pub mod address_space;

use std::fmt;

use serde::Serialize;
use vue_client::domain::DataValue;

pub use address_space::{AddressSpace, NodeView};

/// Namespace index used for every node this service creates.
pub const NAMESPACE_INDEX: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={NAMESPACE_INDEX};i={}", self.0)
    }
}

/// A node that carries a value. Only publishers hand these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafHandle(NodeId);

impl LeafHandle {
    pub fn new(node: NodeId) -> Self {
        Self(node)
    }

    pub fn node_id(self) -> NodeId {
        self.0
    }
}

impl fmt::Display for LeafHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("node {0} is not a container")]
    NotAContainer(NodeId),
    #[error("node {0} is not a leaf")]
    NotALeaf(NodeId),
    #[error("publisher unavailable: {0}")]
    Unavailable(String),
}

/// The node tree that remote clients browse.
///
/// Parents must exist before children are added under them.
#[async_trait::async_trait]
pub trait NodePublisher: Send + Sync {
    /// The implicit top-level container every tree starts from.
    fn root(&self) -> NodeId;

    async fn add_container(&self, parent: NodeId, name: &str) -> Result<NodeId, PublishError>;

    async fn add_leaf(
        &self,
        parent: NodeId,
        name: &str,
        initial: DataValue,
    ) -> Result<LeafHandle, PublishError>;

    async fn write(&self, leaf: LeafHandle, value: DataValue) -> Result<(), PublishError>;
}
