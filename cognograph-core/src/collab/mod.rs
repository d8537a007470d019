//! Replicated workspace document backed by a yrs `Doc`.
//!
//! Root shared types:
//! - `meta`     — id, name, version, timestamps, nested `viewport` map
//! - `nodes`    — node id → node map (nested `position` and `data` maps)
//! - `edges`    — ordered array of edge maps
//! - `settings` — flat map of opaque JSON strings
//!
//! Local edits are committed as one transaction per [`SharedWorkspace::apply`]
//! call and return the v1 update to broadcast. Remote updates are applied in
//! delivery order; nothing here reorders or batches them.

use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Array, ArrayRef, Doc, Map, MapRef, Out, ReadTxn, StateVector, Transact, TransactionMut, Update,
};

pub mod codec;
mod records;
pub mod settings;

pub use codec::{decode_output, encode_value};
pub use settings::SettingKey;

use crate::value::{FieldMap, FieldValue};
use crate::{now_millis, EdgeRecord, NodeRecord, Point, Viewport, WorkspaceSnapshot};
use records::{DATA, POSITION};

const META: &str = "meta";
const NODES: &str = "nodes";
const EDGES: &str = "edges";
const SETTINGS: &str = "settings";

/// Node map entry that keeps snapshot order across peers.
const SEQ: &str = "seq";

/// The entity a decode problem was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Node(String),
    /// Position in the edge sequence
    Edge(usize),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Node(id) => write!(f, "node `{id}`"),
            EntityRef::Edge(index) => write!(f, "edge #{index}"),
        }
    }
}

/// A malformed entity in the replicated document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeIntegrityError {
    #[error("{entity} is not a map")]
    NotAMap { entity: EntityRef },
    #[error("{entity}: `{field}` is missing")]
    MissingField {
        entity: EntityRef,
        field: &'static str,
    },
    #[error("{entity}: `{field}` should be a {expected}")]
    WrongType {
        entity: EntityRef,
        field: &'static str,
        expected: &'static str,
    },
}

impl DecodeIntegrityError {
    pub fn entity(&self) -> &EntityRef {
        match self {
            DecodeIntegrityError::NotAMap { entity }
            | DecodeIntegrityError::MissingField { entity, .. }
            | DecodeIntegrityError::WrongType { entity, .. } => entity,
        }
    }
}

/// Errors from document operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("malformed update: {0}")]
    MalformedUpdate(String),
    #[error("failed to apply update: {0}")]
    Replication(String),
    #[error("no node with id `{0}`")]
    UnknownNode(String),
    #[error(transparent)]
    Integrity(#[from] DecodeIntegrityError),
}

/// How decode reacts to a malformed node or edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Fail on the first malformed entity
    Strict,
    /// Skip the entity, log it, and keep decoding
    Lenient,
}

impl Default for DecodeMode {
    /// Strict in debug builds, lenient in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            DecodeMode::Strict
        } else {
            DecodeMode::Lenient
        }
    }
}

/// A decoded snapshot plus every entity that was skipped to produce it.
#[derive(Debug, Clone)]
pub struct DecodeReport {
    pub snapshot: WorkspaceSnapshot,
    pub issues: Vec<DecodeIntegrityError>,
}

impl DecodeReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// A local edit. A batch passed to [`SharedWorkspace::apply`] is atomic.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkspaceEdit {
    /// Insert a node, or bring an existing one in line field by field
    UpsertNode(NodeRecord),
    RemoveNode(String),
    MoveNode { id: String, position: Point },
    /// Set one `data` field of a node
    SetNodeField {
        id: String,
        key: String,
        value: FieldValue,
    },
    UpsertEdge(EdgeRecord),
    RemoveEdge(String),
    SetViewport(Viewport),
    Rename(String),
    SetSetting {
        key: SettingKey,
        value: Option<serde_json::Value>,
    },
}

/// The CRDT mirror of a [`WorkspaceSnapshot`].
pub struct SharedWorkspace {
    doc: Doc,
    meta: MapRef,
    nodes: MapRef,
    edges: ArrayRef,
    settings: MapRef,
    mode: DecodeMode,
}

impl fmt::Debug for SharedWorkspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWorkspace")
            .field("client_id", &self.doc.client_id())
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .field("mode", &self.mode)
            .finish()
    }
}

impl Default for SharedWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedWorkspace {
    pub fn new() -> Self {
        Self::from_doc(Doc::new())
    }

    /// Fixed client id; useful for deterministic tests.
    pub fn with_client_id(client_id: u64) -> Self {
        Self::from_doc(Doc::with_client_id(client_id))
    }

    fn from_doc(doc: Doc) -> Self {
        let meta = doc.get_or_insert_map(META);
        let nodes = doc.get_or_insert_map(NODES);
        let edges = doc.get_or_insert_array(EDGES);
        let settings = doc.get_or_insert_map(SETTINGS);
        Self {
            doc,
            meta,
            nodes,
            edges,
            settings,
            mode: DecodeMode::default(),
        }
    }

    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn decode_mode(&self) -> DecodeMode {
        self.mode
    }

    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    /// Replace the whole document with `snapshot` in a single transaction.
    ///
    /// Called once when a workspace is first shared. Returns the update to send.
    pub fn populate(&mut self, snapshot: &WorkspaceSnapshot) -> Vec<u8> {
        let mut txn = self.doc.transact_mut();

        self.meta.clear(&mut txn);
        self.nodes.clear(&mut txn);
        let edge_len = self.edges.len(&txn);
        if edge_len > 0 {
            self.edges.remove_range(&mut txn, 0, edge_len);
        }
        self.settings.clear(&mut txn);

        codec::sync_map(&mut txn, &self.meta, &meta_fields(snapshot));
        for (seq, node) in snapshot.nodes.iter().enumerate() {
            let fields = sequenced(records::node_fields(node), seq as f64);
            codec::insert_value(&mut txn, &self.nodes, &node.id, &FieldValue::Object(fields));
        }
        for edge in &snapshot.edges {
            self.edges
                .push_back(&mut txn, codec::encode_map(&records::edge_fields(edge)));
        }
        for key in SettingKey::ALL {
            settings::write_setting(&mut txn, &self.settings, key, key.get(snapshot));
        }

        info!(
            "populated workspace {} ({} nodes, {} edges)",
            snapshot.id,
            snapshot.nodes.len(),
            snapshot.edges.len()
        );
        txn.encode_update_v1()
    }

    /// Decode the document using the configured [`DecodeMode`].
    pub fn snapshot(&self) -> Result<DecodeReport, CodecError> {
        self.decode(self.mode)
    }

    /// Decode, failing on the first malformed entity.
    pub fn snapshot_strict(&self) -> Result<WorkspaceSnapshot, CodecError> {
        self.decode(DecodeMode::Strict).map(|report| report.snapshot)
    }

    fn decode(&self, mode: DecodeMode) -> Result<DecodeReport, CodecError> {
        let txn = self.doc.transact();
        let mut report = DecodeReport {
            snapshot: read_meta(&txn, &self.meta),
            issues: Vec::new(),
        };

        let mut nodes = Vec::new();
        for (key, value) in self.nodes.iter(&txn) {
            let entity = EntityRef::Node(key.to_string());
            let decoded = records::entity_fields(&txn, &entity, value).and_then(|fields| {
                let seq = fields.get(SEQ).and_then(FieldValue::as_f64).unwrap_or(f64::MAX);
                records::decode_node(key, &fields).map(|node| (seq, node))
            });
            match decoded {
                Ok(entry) => nodes.push(entry),
                Err(e) => contain(mode, &mut report, e)?,
            }
        }
        nodes.sort_by(|(a_seq, a), (b_seq, b)| a_seq.total_cmp(b_seq).then_with(|| a.id.cmp(&b.id)));
        report.snapshot.nodes = nodes.into_iter().map(|(_, node)| node).collect();

        for (index, value) in self.edges.iter(&txn).enumerate() {
            let entity = EntityRef::Edge(index);
            let decoded = records::entity_fields(&txn, &entity, value)
                .and_then(|fields| records::decode_edge(index, &fields));
            match decoded {
                Ok(edge) => report.snapshot.edges.push(edge),
                Err(e) => contain(mode, &mut report, e)?,
            }
        }

        for key in SettingKey::ALL {
            key.set(
                &mut report.snapshot,
                settings::read_setting(&txn, &self.settings, key),
            );
        }

        Ok(report)
    }

    /// Commit a batch of local edits as one transaction.
    ///
    /// Edits that target a node must name one that exists, either already in
    /// the document or upserted earlier in the same batch; otherwise nothing is
    /// written. Returns the update to broadcast.
    pub fn apply(&mut self, edits: &[WorkspaceEdit]) -> Result<Vec<u8>, CodecError> {
        {
            let txn = self.doc.transact();
            let mut known: HashSet<String> =
                self.nodes.keys(&txn).map(str::to_owned).collect();
            for edit in edits {
                match edit {
                    WorkspaceEdit::UpsertNode(node) => {
                        known.insert(node.id.clone());
                    }
                    WorkspaceEdit::RemoveNode(id) => {
                        known.remove(id);
                    }
                    WorkspaceEdit::MoveNode { id, .. } | WorkspaceEdit::SetNodeField { id, .. } => {
                        if !known.contains(id) {
                            return Err(CodecError::UnknownNode(id.clone()));
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut txn = self.doc.transact_mut();
        let mut next_seq = self.max_seq(&txn) + 1.0;
        for edit in edits {
            self.apply_one(&mut txn, edit, &mut next_seq);
        }
        codec::sync_entry(
            &mut txn,
            &self.meta,
            "updatedAt",
            &FieldValue::Number(now_millis() as f64),
        );

        debug!("committed {} edits in one transaction", edits.len());
        Ok(txn.encode_update_v1())
    }

    fn apply_one(&self, txn: &mut TransactionMut, edit: &WorkspaceEdit, next_seq: &mut f64) {
        match edit {
            WorkspaceEdit::UpsertNode(node) => match self.node_map(&*txn, &node.id) {
                Some(existing) => {
                    let seq = existing
                        .get(&*txn, SEQ)
                        .and_then(|v| codec::decode_output(&*txn, v).as_f64())
                        .unwrap_or(*next_seq);
                    codec::sync_map(txn, &existing, &sequenced(records::node_fields(node), seq));
                }
                None => {
                    let fields = sequenced(records::node_fields(node), *next_seq);
                    *next_seq += 1.0;
                    codec::insert_value(txn, &self.nodes, &node.id, &FieldValue::Object(fields));
                }
            },
            WorkspaceEdit::RemoveNode(id) => {
                self.nodes.remove(txn, id);
            }
            WorkspaceEdit::MoveNode { id, position } => {
                if let Some(node) = self.node_map(&*txn, id) {
                    let target = codec::child_map(txn, &node, POSITION);
                    for (axis, value) in records::point_fields(*position) {
                        codec::sync_entry(txn, &target, &axis, &value);
                    }
                } else {
                    warn!("cannot move node `{id}`: entry is not a map");
                }
            }
            WorkspaceEdit::SetNodeField { id, key, value } => {
                if let Some(node) = self.node_map(&*txn, id) {
                    let data = codec::child_map(txn, &node, DATA);
                    codec::sync_entry(txn, &data, key, value);
                } else {
                    warn!("cannot set `{key}` on node `{id}`: entry is not a map");
                }
            }
            WorkspaceEdit::UpsertEdge(edge) => {
                let fields = records::edge_fields(edge);
                match self.find_edge(&*txn, &edge.id) {
                    Some((_, Out::YMap(existing))) => {
                        codec::sync_map(txn, &existing, &fields);
                    }
                    Some((index, _)) => {
                        self.edges.remove(txn, index);
                        self.edges.insert(txn, index, codec::encode_map(&fields));
                    }
                    None => {
                        self.edges.push_back(txn, codec::encode_map(&fields));
                    }
                }
            }
            WorkspaceEdit::RemoveEdge(id) => {
                if let Some((index, _)) = self.find_edge(&*txn, id) {
                    self.edges.remove(txn, index);
                }
            }
            WorkspaceEdit::SetViewport(viewport) => {
                codec::sync_entry(txn, &self.meta, "viewport", &viewport_value(*viewport));
            }
            WorkspaceEdit::Rename(name) => {
                codec::sync_entry(txn, &self.meta, "name", &FieldValue::Text(name.clone()));
            }
            WorkspaceEdit::SetSetting { key, value } => {
                settings::write_setting(txn, &self.settings, *key, value.as_ref());
            }
        }
    }

    fn node_map<T: ReadTxn>(&self, txn: &T, id: &str) -> Option<MapRef> {
        records::nested_map(txn, &self.nodes, id)
    }

    fn find_edge<T: ReadTxn>(&self, txn: &T, id: &str) -> Option<(u32, Out)> {
        self.edges
            .iter(txn)
            .enumerate()
            .find(|(_, value)| records::edge_id(txn, value).as_deref() == Some(id))
            .map(|(index, value)| (index as u32, value))
    }

    fn max_seq<T: ReadTxn>(&self, txn: &T) -> f64 {
        self.nodes
            .iter(txn)
            .filter_map(|(_, value)| match value {
                Out::YMap(node) => node.get(txn, SEQ),
                _ => None,
            })
            .filter_map(|seq| codec::decode_output(txn, seq).as_f64())
            .fold(-1.0, f64::max)
    }

    /// Apply a v1 update received from the relay.
    pub fn apply_remote_update(&mut self, update: &[u8]) -> Result<(), CodecError> {
        let update =
            Update::decode_v1(update).map_err(|e| CodecError::MalformedUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| CodecError::Replication(e.to_string()))?;
        Ok(())
    }

    /// Encoded state vector, sent to a peer to request what we lack.
    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Everything this document holds that `remote_state_vector` lacks.
    pub fn encode_diff(&self, remote_state_vector: &[u8]) -> Result<Vec<u8>, CodecError> {
        let sv = StateVector::decode_v1(remote_state_vector)
            .map_err(|e| CodecError::MalformedUpdate(e.to_string()))?;
        Ok(self.doc.transact().encode_diff_v1(&sv))
    }

    /// The full document state as a single update.
    pub fn encode_state(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// An independent copy of this document for a new branch.
    ///
    /// The copy evolves separately; nothing flows back without [`merge_from`].
    ///
    /// [`merge_from`]: SharedWorkspace::merge_from
    pub fn fork(&self) -> Result<SharedWorkspace, CodecError> {
        let mut branch = SharedWorkspace::new().with_decode_mode(self.mode);
        branch.apply_remote_update(&self.encode_state())?;
        Ok(branch)
    }

    /// Pull every change in `other` that this document has not seen.
    ///
    /// Conflicts resolve by the CRDT's own rules.
    pub fn merge_from(&mut self, other: &SharedWorkspace) -> Result<(), CodecError> {
        let diff = other.encode_diff(&self.state_vector())?;
        self.apply_remote_update(&diff)
    }

    pub fn node_count(&self) -> u32 {
        let txn = self.doc.transact();
        self.nodes.len(&txn)
    }

    pub fn edge_count(&self) -> u32 {
        let txn = self.doc.transact();
        self.edges.len(&txn)
    }

    /// Node ids in the document, sorted.
    pub fn node_ids(&self) -> Vec<String> {
        let txn = self.doc.transact();
        let mut ids: Vec<String> = self.nodes.keys(&txn).map(str::to_owned).collect();
        ids.sort();
        ids
    }

    /// The raw replicated entries of one node.
    pub fn raw_node(&self, id: &str) -> Option<FieldValue> {
        let txn = self.doc.transact();
        self.nodes
            .get(&txn, id)
            .map(|value| codec::decode_output(&txn, value))
    }

    /// Writes arbitrary content under a node key, bypassing the record schema.
    ///
    /// For integrity tooling and tests that need to reproduce a corrupt peer.
    pub fn put_raw_node(&mut self, id: &str, value: &FieldValue) -> Vec<u8> {
        let mut txn = self.doc.transact_mut();
        codec::insert_value(&mut txn, &self.nodes, id, value);
        txn.encode_update_v1()
    }
}

fn contain(
    mode: DecodeMode,
    report: &mut DecodeReport,
    err: DecodeIntegrityError,
) -> Result<(), CodecError> {
    match mode {
        DecodeMode::Strict => Err(CodecError::Integrity(err)),
        DecodeMode::Lenient => {
            warn!("skipping malformed entity: {err}");
            report.issues.push(err);
            Ok(())
        }
    }
}

fn sequenced(mut fields: FieldMap, seq: f64) -> FieldMap {
    fields.insert(SEQ.into(), FieldValue::Number(seq));
    fields
}

fn viewport_value(viewport: Viewport) -> FieldValue {
    let mut fields = FieldMap::new();
    fields.insert("x".into(), viewport.x.into());
    fields.insert("y".into(), viewport.y.into());
    fields.insert("zoom".into(), viewport.zoom.into());
    FieldValue::Object(fields)
}

fn meta_fields(snapshot: &WorkspaceSnapshot) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("id".into(), snapshot.id.as_str().into());
    fields.insert("name".into(), snapshot.name.as_str().into());
    fields.insert("version".into(), FieldValue::Number(snapshot.version.into()));
    fields.insert("createdAt".into(), FieldValue::Number(snapshot.created_at as f64));
    fields.insert("updatedAt".into(), FieldValue::Number(snapshot.updated_at as f64));
    fields.insert("viewport".into(), viewport_value(snapshot.viewport));
    fields
}

fn read_meta<T: ReadTxn>(txn: &T, meta: &MapRef) -> WorkspaceSnapshot {
    let fields = codec::decode_map(txn, meta);
    let text = |key: &str| fields.get(key).and_then(FieldValue::as_str).map(str::to_owned);
    let number = |key: &str| fields.get(key).and_then(FieldValue::as_f64);

    let mut snapshot = WorkspaceSnapshot::empty();
    snapshot.id = text("id").unwrap_or_default();
    snapshot.name = text("name").unwrap_or_default();
    if let Some(version) = number("version") {
        snapshot.version = version as u32;
    }
    snapshot.created_at = number("createdAt").unwrap_or_default() as u64;
    snapshot.updated_at = number("updatedAt").unwrap_or_default() as u64;
    if let Some(viewport) = fields.get("viewport").and_then(FieldValue::as_object) {
        let axis = |key: &str, default: f64| {
            viewport.get(key).and_then(FieldValue::as_f64).unwrap_or(default)
        };
        snapshot.viewport = Viewport {
            x: axis("x", 0.0),
            y: axis("y", 0.0),
            zoom: axis("zoom", 1.0),
        };
    }
    snapshot
}
