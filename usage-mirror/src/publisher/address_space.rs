use std::sync::Arc;

use serde::Serialize;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::RwLock;
use vue_client::domain::DataValue;

use super::{LeafHandle, NodeId, NodePublisher, PublishError};

pub const ROOT_NAME: &str = "Objects";
const ROOT: NodeId = NodeId(0);

/// In-process node tree shared between the synchronizer (writer) and the
/// browse endpoint (readers).
///
/// Nodes are never removed, so a `NodeId` is an index into the arena.
/// Sibling names are not required to be unique; path lookups resolve to the
/// first child created under a given name.
#[derive(Clone)]
pub struct AddressSpace {
    inner: Arc<RwLock<Tree>>,
}

struct Tree {
    nodes: Vec<Node>,
}

struct Node {
    name: String,
    kind: NodeKind,
}

enum NodeKind {
    Container { children: Vec<NodeId> },
    Leaf { value: DataValue, updated_at: OffsetDateTime },
}

/// Serializable view of a subtree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub node_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<DataValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeView>,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace {
    pub fn new() -> Self {
        let root = Node {
            name: ROOT_NAME.to_string(),
            kind: NodeKind::Container { children: Vec::new() },
        };
        Self {
            inner: Arc::new(RwLock::new(Tree { nodes: vec![root] })),
        }
    }

    /// Total number of nodes, the root included.
    pub async fn node_count(&self) -> usize {
        self.inner.read().await.nodes.len()
    }

    /// Resolve a `/`-separated browse path below the root, e.g.
    /// `Devices/Panel/Channels/Channel 1/usage kWh`.
    pub async fn browse(&self, path: &str) -> Option<NodeId> {
        let tree = self.inner.read().await;
        tree.resolve(path)
    }

    pub async fn read(&self, node: NodeId) -> Option<DataValue> {
        let tree = self.inner.read().await;
        match &tree.get(node)?.kind {
            NodeKind::Leaf { value, .. } => Some(value.clone()),
            NodeKind::Container { .. } => None,
        }
    }

    pub async fn read_path(&self, path: &str) -> Option<DataValue> {
        let node = self.browse(path).await?;
        self.read(node).await
    }

    pub async fn view(&self, node: NodeId) -> Option<NodeView> {
        let tree = self.inner.read().await;
        tree.view(node)
    }

    pub async fn view_path(&self, path: &str) -> Option<NodeView> {
        let tree = self.inner.read().await;
        let node = tree.resolve(path)?;
        tree.view(node)
    }

    async fn insert(&self, parent: NodeId, name: &str, kind: NodeKind) -> Result<NodeId, PublishError> {
        let mut tree = self.inner.write().await;
        let id = NodeId(tree.nodes.len() as u32);

        match tree.get_mut(parent).map(|n| &mut n.kind) {
            Some(NodeKind::Container { children }) => children.push(id),
            Some(NodeKind::Leaf { .. }) => return Err(PublishError::NotAContainer(parent)),
            None => return Err(PublishError::UnknownNode(parent)),
        }

        tree.nodes.push(Node {
            name: name.to_string(),
            kind,
        });
        Ok(id)
    }
}

impl Tree {
    fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize)
    }

    fn resolve(&self, path: &str) -> Option<NodeId> {
        let mut current = ROOT;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let NodeKind::Container { children } = &self.get(current)?.kind else {
                return None;
            };
            current = *children
                .iter()
                .find(|c| self.get(**c).is_some_and(|n| n.name == segment))?;
        }
        Some(current)
    }

    fn view(&self, id: NodeId) -> Option<NodeView> {
        let node = self.get(id)?;
        let (value, updated_at, children) = match &node.kind {
            NodeKind::Container { children } => (
                None,
                None,
                children.iter().filter_map(|c| self.view(*c)).collect::<Vec<_>>(),
            ),
            NodeKind::Leaf { value, updated_at } => {
                (Some(value.clone()), updated_at.format(&Rfc3339).ok(), Vec::new())
            }
        };
        Some(NodeView {
            node_id: id.to_string(),
            name: node.name.clone(),
            value,
            updated_at,
            children,
        })
    }
}

#[async_trait::async_trait]
impl NodePublisher for AddressSpace {
    fn root(&self) -> NodeId {
        ROOT
    }

    async fn add_container(&self, parent: NodeId, name: &str) -> Result<NodeId, PublishError> {
        self.insert(parent, name, NodeKind::Container { children: Vec::new() })
            .await
    }

    async fn add_leaf(
        &self,
        parent: NodeId,
        name: &str,
        initial: DataValue,
    ) -> Result<LeafHandle, PublishError> {
        let kind = NodeKind::Leaf {
            value: initial,
            updated_at: OffsetDateTime::now_utc(),
        };
        self.insert(parent, name, kind).await.map(LeafHandle::new)
    }

    async fn write(&self, leaf: LeafHandle, new_value: DataValue) -> Result<(), PublishError> {
        let id = leaf.node_id();
        let mut tree = self.inner.write().await;
        match tree.get_mut(id).map(|n| &mut n.kind) {
            Some(NodeKind::Leaf { value, updated_at }) => {
                *value = new_value;
                *updated_at = OffsetDateTime::now_utc();
                Ok(())
            }
            Some(NodeKind::Container { .. }) => Err(PublishError::NotALeaf(id)),
            None => Err(PublishError::UnknownNode(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_browsable_tree() {
        let space = AddressSpace::new();
        let devices = space.add_container(space.root(), "Devices").await.unwrap();
        let panel = space.add_container(devices, "Panel").await.unwrap();
        let voltage = space.add_leaf(panel, "voltage", DataValue::Int(120)).await.unwrap();

        assert_eq!(space.node_count().await, 4);
        assert_eq!(space.browse("Devices/Panel").await, Some(panel));
        assert_eq!(space.browse("/Devices/Panel/voltage").await, Some(voltage.node_id()));
        assert_eq!(space.read_path("Devices/Panel/voltage").await, Some(DataValue::Int(120)));
        assert_eq!(space.browse("Devices/Missing").await, None);
        assert_eq!(space.browse("").await, Some(space.root()));
    }

    #[tokio::test]
    async fn write_replaces_leaf_value_without_adding_nodes() {
        let space = AddressSpace::new();
        let leaf = space
            .add_leaf(space.root(), "usage kWh", DataValue::Float(2.5))
            .await
            .unwrap();

        space.write(leaf, DataValue::Float(3.0)).await.unwrap();

        assert_eq!(space.read(leaf.node_id()).await, Some(DataValue::Float(3.0)));
        assert_eq!(space.node_count().await, 2);
    }

    #[tokio::test]
    async fn rejects_children_under_leaves_and_unknown_parents() {
        let space = AddressSpace::new();
        let leaf = space.add_leaf(space.root(), "name", "Kitchen".into()).await.unwrap();

        let under_leaf = space.add_container(leaf.node_id(), "nope").await;
        assert!(matches!(under_leaf, Err(PublishError::NotAContainer(_))));

        let unknown = space.add_container(NodeId(42), "nope").await;
        assert!(matches!(unknown, Err(PublishError::UnknownNode(NodeId(42)))));

        let write_container = space.write(LeafHandle::new(space.root()), DataValue::Empty).await;
        assert!(matches!(write_container, Err(PublishError::NotALeaf(_))));
    }

    #[tokio::test]
    async fn duplicate_sibling_names_resolve_to_first() {
        let space = AddressSpace::new();
        let first = space.add_container(space.root(), "Panel").await.unwrap();
        let _second = space.add_container(space.root(), "Panel").await.unwrap();

        assert_eq!(space.browse("Panel").await, Some(first));
        assert_eq!(space.node_count().await, 3);
    }

    #[tokio::test]
    async fn view_serializes_values_and_children() {
        let space = AddressSpace::new();
        let panel = space.add_container(space.root(), "Panel").await.unwrap();
        space.add_leaf(panel, "voltage", DataValue::Int(120)).await.unwrap();

        let view = space.view_path("Panel").await.unwrap();
        assert_eq!(view.name, "Panel");
        assert_eq!(view.node_id, "ns=1;i=1");
        assert_eq!(view.value, None);
        assert_eq!(view.children.len(), 1);
        assert_eq!(view.children[0].value, Some(DataValue::Int(120)));
        assert!(view.children[0].updated_at.is_some());

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["children"][0]["value"], serde_json::json!(120));
        assert!(json.get("value").is_none());
    }
}
