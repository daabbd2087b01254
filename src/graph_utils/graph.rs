use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::persistence::codec::SerializedDocument;
use crate::persistence::error::{Result, StoryError};

// Node ids are plain strings on the wire; new ones are UUID v7 text.
pub type NodeId = String;
// Media references, choice descriptors and top-level connection records are
// application-defined and carried through untouched.
pub type MediaRef = Value;
pub type Choice = Value;
pub type ConnectionRecord = Value;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// JSON has no encoding for NaN or infinities.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeContent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoryNode {
    pub id: NodeId,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub content: NodeContent,
    /// Outgoing edges, by target node id.
    #[serde(default)]
    pub connections: Vec<NodeId>,
}

impl StoryNode {
    pub fn new(id: impl Into<NodeId>, position: Position) -> Self {
        Self {
            id: id.into(),
            position,
            content: NodeContent::default(),
            connections: Vec::new(),
        }
    }
}

/// What `GraphModel::replace` found while installing a document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplaceReport {
    pub node_count: usize,
    /// Ids that appeared more than once; the later node won.
    pub duplicate_ids: Vec<NodeId>,
    /// Per-node edges whose target is not in the document, as (from, to).
    pub dangling: Vec<(NodeId, NodeId)>,
}

/// The story graph being edited.
///
/// Per-node `connections` and the top-level `connections` list are kept
/// independently and are never reconciled against each other; files in
/// the wild disagree between the two and both are preserved verbatim.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphModel {
    nodes: IndexMap<NodeId, StoryNode>,
    connections: Vec<ConnectionRecord>,
}

impl GraphModel {
    // Instantiate a new, empty story graph
    pub fn new() -> Self {
        Self::default()
    }

    // Add an empty node at `position` and return its new ID
    pub fn add_node(&mut self, position: Position) -> NodeId {
        let id = Uuid::now_v7().to_string();
        self.nodes.insert(id.clone(), StoryNode::new(id.clone(), position));
        id
    }

    pub fn insert_node(&mut self, node: StoryNode) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(StoryError::DuplicateNode(node.id));
        }
        if !node.position.is_finite() {
            return Err(StoryError::Format(format!("node {} has a non-finite position", node.id)));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn set_text(&mut self, id: &str, text: String) -> bool {
        if let Some(node) = self.nodes.get_mut(id) {
            node.content.text = text;
            true
        } else {
            false
        }
    }

    pub fn move_node(&mut self, id: &str, position: Position) -> bool {
        if !position.is_finite() {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.position = position;
            true
        } else {
            false
        }
    }

    pub fn add_media(&mut self, id: &str, media: MediaRef) -> bool {
        if let Some(node) = self.nodes.get_mut(id) {
            node.content.media.push(media);
            true
        } else {
            false
        }
    }

    pub fn add_choice(&mut self, id: &str, choice: Choice) -> bool {
        if let Some(node) = self.nodes.get_mut(id) {
            node.content.choices.push(choice);
            true
        } else {
            false
        }
    }

    // Connect two existing nodes; records the edge on the source node and
    // in the top-level list
    pub fn connect(&mut self, from: &str, to: &str) -> bool {
        if !self.nodes.contains_key(to) {
            return false;
        }
        let Some(node) = self.nodes.get_mut(from) else {
            return false;
        };
        node.connections.push(to.to_string());
        self.connections.push(json!({ "from": from, "to": to }));
        true
    }

    pub fn disconnect(&mut self, from: &str, to: &str) -> bool {
        let Some(node) = self.nodes.get_mut(from) else {
            return false;
        };
        let before = node.connections.len();
        node.connections.retain(|target| target != to);
        let removed = node.connections.len() != before;
        self.connections.retain(|rec| !record_matches(rec, from, to));
        removed
    }

    // Delete a node and every edge that points at it
    pub fn remove_node(&mut self, id: &str) -> bool {
        if self.nodes.shift_remove(id).is_none() {
            return false;
        }
        for node in self.nodes.values_mut() {
            node.connections.retain(|target| target != id);
        }
        self.connections.retain(|rec| !record_mentions(rec, id));
        true
    }

    pub fn get_node(&self, id: &str) -> Option<&StoryNode> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of top-level connection records.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connections(&self) -> &[ConnectionRecord] {
        &self.connections
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.connections.is_empty()
    }

    pub fn dangling_connections(&self) -> Vec<(NodeId, NodeId)> {
        dangling_in(&self.nodes)
    }

    /// Owned copy of the current contents, nodes in iteration order.
    pub fn snapshot(&self) -> SerializedDocument {
        SerializedDocument {
            nodes: self.nodes.values().cloned().collect(),
            connections: self.connections.clone(),
        }
    }

    /// Discard everything and install `doc`.
    ///
    /// The new node map is built in full before the old one is dropped, so
    /// callers never observe a mix of old and new contents.
    pub fn replace(&mut self, doc: SerializedDocument) -> ReplaceReport {
        let mut nodes: IndexMap<NodeId, StoryNode> = IndexMap::with_capacity(doc.nodes.len());
        let mut duplicate_ids = Vec::new();
        for node in doc.nodes {
            // Later duplicates win but keep the slot of the first occurrence.
            if let Some(previous) = nodes.insert(node.id.clone(), node)
                && !duplicate_ids.contains(&previous.id)
            {
                duplicate_ids.push(previous.id);
            }
        }
        let dangling = dangling_in(&nodes);
        if !duplicate_ids.is_empty() {
            warn!("loaded document repeats node ids {:?}; keeping the last of each", duplicate_ids);
        }
        if !dangling.is_empty() {
            warn!("loaded document has {} dangling connection(s)", dangling.len());
        }

        self.nodes = nodes;
        self.connections = doc.connections;
        ReplaceReport {
            node_count: self.nodes.len(),
            duplicate_ids,
            dangling,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.connections.clear();
    }
}

fn dangling_in(nodes: &IndexMap<NodeId, StoryNode>) -> Vec<(NodeId, NodeId)> {
    nodes
        .values()
        .flat_map(|node| {
            node.connections
                .iter()
                .filter(|target| !nodes.contains_key(target.as_str()))
                .map(|target| (node.id.clone(), target.clone()))
        })
        .collect()
}

fn record_field<'a>(rec: &'a ConnectionRecord, key: &str) -> Option<&'a str> {
    rec.get(key).and_then(Value::as_str)
}

fn record_matches(rec: &ConnectionRecord, from: &str, to: &str) -> bool {
    record_field(rec, "from") == Some(from) && record_field(rec, "to") == Some(to)
}

fn record_mentions(rec: &ConnectionRecord, id: &str) -> bool {
    record_field(rec, "from") == Some(id) || record_field(rec, "to") == Some(id)
}
