//! Node and edge records as replicated maps.
//!
//! A node map carries one entry per [`NodeRecord`] field. `position` and
//! `data` are nested maps so that a drag on one peer and a title edit on
//! another land on different entries. Optional fields are always present,
//! holding an explicit null when unset.

use yrs::{Map, MapRef, Out, ReadTxn};

use super::codec::decode_map;
use super::{DecodeIntegrityError, EntityRef};
use crate::value::{FieldMap, FieldValue};
use crate::{EdgeRecord, NodeRecord, Point, Size};

pub(crate) const POSITION: &str = "position";
pub(crate) const DATA: &str = "data";

pub(crate) fn point_fields(point: Point) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("x".into(), point.x.into());
    fields.insert("y".into(), point.y.into());
    fields
}

pub(crate) fn node_fields(node: &NodeRecord) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("id".into(), node.id.as_str().into());
    fields.insert("type".into(), node.node_type.as_str().into());
    fields.insert(POSITION.into(), FieldValue::Object(point_fields(node.position)));
    fields.insert(
        "measured".into(),
        node.measured.map_or(FieldValue::Null, |size| {
            let mut m = FieldMap::new();
            m.insert("width".into(), size.width.into());
            m.insert("height".into(), size.height.into());
            FieldValue::Object(m)
        }),
    );
    fields.insert("width".into(), node.width.into());
    fields.insert("height".into(), node.height.into());
    fields.insert("zIndex".into(), node.z_index.into());
    fields.insert("parentId".into(), node.parent_id.clone().into());
    fields.insert("draggable".into(), node.draggable.into());
    fields.insert("selectable".into(), node.selectable.into());
    fields.insert(DATA.into(), FieldValue::Object(node.data.clone()));
    fields
}

pub(crate) fn edge_fields(edge: &EdgeRecord) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("id".into(), edge.id.as_str().into());
    fields.insert("source".into(), edge.source.as_str().into());
    fields.insert("target".into(), edge.target.as_str().into());
    fields.insert("sourceHandle".into(), edge.source_handle.clone().into());
    fields.insert("targetHandle".into(), edge.target_handle.clone().into());
    fields.insert("type".into(), edge.edge_type.clone().into());
    fields.insert(DATA.into(), FieldValue::Object(edge.data.clone()));
    fields
}

/// Typed field access over a decoded entity, tracking which entity is read.
struct FieldReader<'a> {
    entity: &'a EntityRef,
    fields: &'a FieldMap,
}

impl<'a> FieldReader<'a> {
    fn wrong_type(&self, field: &'static str, expected: &'static str) -> DecodeIntegrityError {
        DecodeIntegrityError::WrongType {
            entity: self.entity.clone(),
            field,
            expected,
        }
    }

    fn required_str(&self, field: &'static str) -> Result<String, DecodeIntegrityError> {
        match self.fields.get(field) {
            Some(FieldValue::Text(s)) => Ok(s.clone()),
            None | Some(FieldValue::Null) => Err(DecodeIntegrityError::MissingField {
                entity: self.entity.clone(),
                field,
            }),
            Some(_) => Err(self.wrong_type(field, "string")),
        }
    }

    fn opt_str(&self, field: &'static str) -> Result<Option<String>, DecodeIntegrityError> {
        match self.fields.get(field) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(FieldValue::Text(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.wrong_type(field, "string")),
        }
    }

    fn opt_f64(&self, field: &'static str) -> Result<Option<f64>, DecodeIntegrityError> {
        match self.fields.get(field) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(FieldValue::Number(n)) => Ok(Some(*n)),
            Some(_) => Err(self.wrong_type(field, "number")),
        }
    }

    fn opt_bool(&self, field: &'static str) -> Result<Option<bool>, DecodeIntegrityError> {
        match self.fields.get(field) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(FieldValue::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(self.wrong_type(field, "bool")),
        }
    }

    /// A nested object; `None` when missing or null.
    fn opt_object(&self, field: &'static str) -> Result<Option<&'a FieldMap>, DecodeIntegrityError> {
        match self.fields.get(field) {
            None | Some(FieldValue::Null) => Ok(None),
            Some(FieldValue::Object(fields)) => Ok(Some(fields)),
            Some(_) => Err(self.wrong_type(field, "map")),
        }
    }
}

fn number_or_zero(fields: &FieldMap, key: &str) -> f64 {
    fields.get(key).and_then(FieldValue::as_f64).unwrap_or(0.0)
}

/// Reads the entity behind a document value, rejecting anything that is not a map.
pub(crate) fn entity_fields<T: ReadTxn>(
    txn: &T,
    entity: &EntityRef,
    value: Out,
) -> Result<FieldMap, DecodeIntegrityError> {
    match value {
        Out::YMap(map) => Ok(decode_map(txn, &map)),
        _ => Err(DecodeIntegrityError::NotAMap {
            entity: entity.clone(),
        }),
    }
}

pub(crate) fn decode_node(key: &str, fields: &FieldMap) -> Result<NodeRecord, DecodeIntegrityError> {
    let entity = EntityRef::Node(key.to_string());
    let reader = FieldReader {
        entity: &entity,
        fields,
    };

    // A node replicated mid-construction may lack position or data.
    let position = reader
        .opt_object(POSITION)?
        .map(|p| Point::new(number_or_zero(p, "x"), number_or_zero(p, "y")))
        .unwrap_or_default();
    let data = reader.opt_object(DATA)?.cloned().unwrap_or_default();
    let measured = reader.opt_object("measured")?.map(|m| Size {
        width: number_or_zero(m, "width"),
        height: number_or_zero(m, "height"),
    });

    Ok(NodeRecord {
        id: key.to_string(),
        node_type: reader.required_str("type")?,
        position,
        measured,
        width: reader.opt_f64("width")?,
        height: reader.opt_f64("height")?,
        z_index: reader.opt_f64("zIndex")?.map(|z| z as i64),
        parent_id: reader.opt_str("parentId")?,
        draggable: reader.opt_bool("draggable")?,
        selectable: reader.opt_bool("selectable")?,
        data,
    })
}

pub(crate) fn decode_edge(index: usize, fields: &FieldMap) -> Result<EdgeRecord, DecodeIntegrityError> {
    let entity = EntityRef::Edge(index);
    let reader = FieldReader {
        entity: &entity,
        fields,
    };

    Ok(EdgeRecord {
        id: reader.required_str("id")?,
        source: reader.required_str("source")?,
        target: reader.required_str("target")?,
        source_handle: reader.opt_str("sourceHandle")?,
        target_handle: reader.opt_str("targetHandle")?,
        edge_type: reader.opt_str("type")?,
        data: reader.opt_object(DATA)?.cloned().unwrap_or_default(),
    })
}

/// The `id` entry of an edge map, if readable.
pub(crate) fn edge_id<T: ReadTxn>(txn: &T, value: &Out) -> Option<String> {
    match value {
        Out::YMap(map) => match map.get(txn, "id") {
            Some(Out::Any(yrs::Any::String(id))) => Some(id.to_string()),
            _ => None,
        },
        _ => None,
    }
}

/// Nested-map lookup that tolerates absence.
pub(crate) fn nested_map<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<MapRef> {
    match map.get(txn, key) {
        Some(Out::YMap(child)) => Some(child),
        _ => None,
    }
}
