//! # cognograph-core — workspace domain model and CRDT codec
//!
//! A workspace is a canvas of typed nodes joined by typed edges. The plain
//! domain form ([`WorkspaceSnapshot`]) is what the renderer consumes; the
//! replicated form ([`collab::SharedWorkspace`]) is what peers exchange.
//!
//! ```text
//! ┌───────────────────┐  populate / apply   ┌───────────────────┐
//! │ WorkspaceSnapshot │ ──────────────────► │ SharedWorkspace   │
//! │ (domain)          │ ◄────────────────── │ (yrs Doc)         │
//! └───────────────────┘      snapshot       └─────────┬─────────┘
//!                                                     │ v1 updates
//!                                                     ▼
//!                                                  relay / peers
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::SystemTime;
use uuid::Uuid;

pub mod collab;
pub mod value;

pub use value::{FieldMap, FieldValue};

/// Schema version written into new snapshots.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

/// A canvas node: conversation, note, task, and so on.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// Stable for the node's lifetime
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub position: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured: Option<Size>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draggable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
    /// Type-specific fields (title, content, message history, ...)
    #[serde(default)]
    pub data: FieldMap,
}

impl NodeRecord {
    pub fn new(node_type: impl Into<String>, position: Point) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), node_type, position)
    }

    pub fn with_id(id: impl Into<String>, node_type: impl Into<String>, position: Point) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position,
            measured: None,
            width: None,
            height: None,
            z_index: None,
            parent_id: None,
            draggable: None,
            selectable: None,
            data: FieldMap::new(),
        }
    }

    /// Builder-style `data` field setter.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.data.get("title").and_then(FieldValue::as_str)
    }
}

/// A typed connection between two nodes.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRecord {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<String>,
    /// Label, styling, waypoints
    #[serde(default)]
    pub data: FieldMap,
}

impl EdgeRecord {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), source, target)
    }

    pub fn with_id(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            edge_type: None,
            data: FieldMap::new(),
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Full plain-object representation of a workspace at a point in time.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub created_at: u64,
    pub updated_at: u64,
    pub viewport: Viewport,
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,

    // Rarely-mutated settings, replicated as opaque JSON blobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme_settings: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_preferences: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layers: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub areas: Option<serde_json::Value>,
}

impl WorkspaceSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            version: CURRENT_SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
            viewport: Viewport::default(),
            nodes: Vec::new(),
            edges: Vec::new(),
            property_schema: None,
            theme_settings: None,
            workspace_preferences: None,
            layers: None,
            areas: None,
        }
    }

    /// An empty snapshot with no identity, used when a document has no metadata yet.
    pub fn empty() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            version: CURRENT_SCHEMA_VERSION,
            created_at: 0,
            updated_at: 0,
            viewport: Viewport::default(),
            nodes: Vec::new(),
            edges: Vec::new(),
            property_schema: None,
            theme_settings: None,
            workspace_preferences: None,
            layers: None,
            areas: None,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&EdgeRecord> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Structural checks the codec deliberately does not perform.
    ///
    /// Returns every violation found; an empty list means the snapshot is sound.
    pub fn validate(&self) -> Vec<SnapshotIssue> {
        let mut issues = Vec::new();

        let mut node_ids = HashSet::new();
        for node in &self.nodes {
            if !node_ids.insert(node.id.as_str()) {
                issues.push(SnapshotIssue::DuplicateNodeId(node.id.clone()));
            }
        }

        let mut edge_ids = HashSet::new();
        for edge in &self.edges {
            if !edge_ids.insert(edge.id.as_str()) {
                issues.push(SnapshotIssue::DuplicateEdgeId(edge.id.clone()));
            }
            for endpoint in [&edge.source, &edge.target] {
                if !node_ids.contains(endpoint.as_str()) {
                    issues.push(SnapshotIssue::DanglingEdge {
                        edge_id: edge.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
        }

        issues
    }
}

/// A caller-side invariant violation found by [`WorkspaceSnapshot::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotIssue {
    DuplicateNodeId(String),
    DuplicateEdgeId(String),
    DanglingEdge { edge_id: String, node_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_creation() {
        let snapshot = WorkspaceSnapshot::new("Research");
        assert_eq!(snapshot.version, CURRENT_SCHEMA_VERSION);
        assert_eq!(snapshot.name, "Research");
        assert_eq!(snapshot.viewport.zoom, 1.0);
        assert!(snapshot.created_at > 0);
        assert_eq!(snapshot.created_at, snapshot.updated_at);
    }

    #[test]
    fn test_node_json_shape() {
        let node = NodeRecord::with_id("n1", "note", Point::new(1.0, 2.0)).field("title", "A");
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "note");
        assert_eq!(json["position"]["x"], 1.0);
        assert_eq!(json["data"]["title"], "A");
        assert!(json.get("zIndex").is_none());

        let back: NodeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
        assert_eq!(back.title(), Some("A"));
    }

    #[test]
    fn test_validate_sound_snapshot() {
        let mut snapshot = WorkspaceSnapshot::new("ok");
        snapshot.nodes.push(NodeRecord::with_id("a", "note", Point::default()));
        snapshot.nodes.push(NodeRecord::with_id("b", "task", Point::default()));
        snapshot.edges.push(EdgeRecord::with_id("e1", "a", "b"));
        assert!(snapshot.validate().is_empty());
    }

    #[test]
    fn test_validate_reports_every_issue() {
        let mut snapshot = WorkspaceSnapshot::new("broken");
        snapshot.nodes.push(NodeRecord::with_id("a", "note", Point::default()));
        snapshot.nodes.push(NodeRecord::with_id("a", "note", Point::default()));
        snapshot.edges.push(EdgeRecord::with_id("e1", "a", "ghost"));
        snapshot.edges.push(EdgeRecord::with_id("e1", "a", "a"));

        let issues = snapshot.validate();
        assert!(issues.contains(&SnapshotIssue::DuplicateNodeId("a".into())));
        assert!(issues.contains(&SnapshotIssue::DuplicateEdgeId("e1".into())));
        assert!(issues.contains(&SnapshotIssue::DanglingEdge {
            edge_id: "e1".into(),
            node_id: "ghost".into(),
        }));
        assert_eq!(issues.len(), 3);
    }
}
