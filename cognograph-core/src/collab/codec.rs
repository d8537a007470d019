//! Recursive value codec between [`FieldValue`] and yrs shared types.
//!
//! Objects become `YMap`s (one entry per field), lists become `YArray`s, and
//! scalars are stored as `Any`. Nulls are written as explicit `Any::Null`
//! entries so a cleared field is distinguishable from one never written.

use std::collections::HashMap;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, GetString, In, Map, MapPrelim, MapRef, Out, ReadTxn,
    TransactionMut,
};

use crate::value::{FieldMap, FieldValue};

/// Converts a value into yrs preliminary content.
pub fn encode_value(value: &FieldValue) -> In {
    match value {
        FieldValue::Object(fields) => In::Map(encode_map(fields)),
        FieldValue::List(items) => In::Array(encode_list(items)),
        scalar => In::Any(encode_scalar(scalar)),
    }
}

pub(crate) fn encode_map(fields: &FieldMap) -> MapPrelim {
    fields
        .iter()
        .map(|(key, value)| (key.as_str(), encode_value(value)))
        .collect()
}

pub(crate) fn encode_list(items: &[FieldValue]) -> ArrayPrelim {
    items.iter().map(encode_value).collect()
}

fn encode_scalar(value: &FieldValue) -> Any {
    match value {
        FieldValue::Bool(b) => Any::Bool(*b),
        FieldValue::Number(n) => Any::Number(*n),
        FieldValue::Text(s) => Any::String(s.as_str().into()),
        // Containers never reach here; collapse defensively to null.
        FieldValue::Null | FieldValue::List(_) | FieldValue::Object(_) => Any::Null,
    }
}

/// Converts a value read from the document back into a [`FieldValue`].
pub fn decode_output<T: ReadTxn>(txn: &T, value: Out) -> FieldValue {
    match value {
        Out::Any(any) => decode_any(any),
        Out::YMap(map) => FieldValue::Object(decode_map(txn, &map)),
        Out::YArray(array) => FieldValue::List(decode_array(txn, &array)),
        Out::YText(text) => FieldValue::Text(text.get_string(txn)),
        _ => FieldValue::Null,
    }
}

pub(crate) fn decode_map<T: ReadTxn>(txn: &T, map: &MapRef) -> FieldMap {
    map.iter(txn)
        .map(|(key, value)| (key.to_string(), decode_output(txn, value)))
        .collect()
}

pub(crate) fn decode_array<T: ReadTxn>(txn: &T, array: &ArrayRef) -> Vec<FieldValue> {
    array.iter(txn).map(|value| decode_output(txn, value)).collect()
}

fn decode_any(any: Any) -> FieldValue {
    match any {
        Any::Null | Any::Undefined => FieldValue::Null,
        Any::Bool(b) => FieldValue::Bool(b),
        Any::Number(n) => FieldValue::Number(n),
        Any::BigInt(n) => FieldValue::Number(n as f64),
        Any::String(s) => FieldValue::Text(s.to_string()),
        Any::Array(items) => {
            FieldValue::List(items.iter().cloned().map(decode_any).collect())
        }
        Any::Map(entries) => FieldValue::Object(decode_any_map(&entries)),
        _ => FieldValue::Null,
    }
}

fn decode_any_map(entries: &HashMap<String, Any>) -> FieldMap {
    entries
        .iter()
        .map(|(key, value)| (key.clone(), decode_any(value.clone())))
        .collect()
}

/// Writes one map entry, choosing the shared type from the value's variant.
pub(crate) fn insert_value(txn: &mut TransactionMut, map: &MapRef, key: &str, value: &FieldValue) {
    match value {
        FieldValue::Object(fields) => {
            map.insert(txn, key, encode_map(fields));
        }
        FieldValue::List(items) => {
            map.insert(txn, key, encode_list(items));
        }
        scalar => {
            map.insert(txn, key, encode_scalar(scalar));
        }
    }
}

fn insert_item(txn: &mut TransactionMut, array: &ArrayRef, index: u32, value: &FieldValue) {
    match value {
        FieldValue::Object(fields) => {
            array.insert(txn, index, encode_map(fields));
        }
        FieldValue::List(items) => {
            array.insert(txn, index, encode_list(items));
        }
        scalar => {
            array.insert(txn, index, encode_scalar(scalar));
        }
    }
}

/// Brings `map` in line with `fields`, touching only entries that differ.
///
/// Nested objects stored as maps are descended into rather than replaced, so a
/// concurrent edit to a sibling field on another peer survives the merge.
/// Entries absent from `fields` are removed. Returns the number of writes.
pub(crate) fn sync_map(txn: &mut TransactionMut, map: &MapRef, fields: &FieldMap) -> usize {
    let stale: Vec<String> = map
        .keys(&*txn)
        .filter(|key| !fields.contains_key(*key))
        .map(str::to_owned)
        .collect();
    let mut writes = stale.len();
    for key in stale {
        map.remove(txn, &key);
    }

    for (key, value) in fields {
        writes += sync_entry(txn, map, key, value);
    }
    writes
}

/// Like [`sync_map`] for a single entry; never removes siblings.
pub(crate) fn sync_entry(
    txn: &mut TransactionMut,
    map: &MapRef,
    key: &str,
    value: &FieldValue,
) -> usize {
    let existing = map.get(&*txn, key);
    match (existing, value) {
        (Some(Out::YMap(child)), FieldValue::Object(fields)) => sync_map(txn, &child, fields),
        (Some(Out::YArray(child)), FieldValue::List(items)) => sync_array(txn, &child, items),
        (Some(current), _) if decode_output(&*txn, current.clone()) == *value => 0,
        _ => {
            insert_value(txn, map, key, value);
            1
        }
    }
}

/// Brings `array` in line with `items` element by element.
///
/// Map and array elements are synced in place, a changed scalar replaces only
/// its own slot, and length changes touch only the tail. Concurrent edits to
/// different elements therefore merge instead of one list replacing the other.
pub(crate) fn sync_array(txn: &mut TransactionMut, array: &ArrayRef, items: &[FieldValue]) -> usize {
    let wanted = u32::try_from(items.len()).unwrap_or(u32::MAX);
    let len = array.len(&*txn);
    let mut writes = 0;
    if len > wanted {
        array.remove_range(txn, wanted, len - wanted);
        writes += 1;
    }

    for (index, item) in (0..wanted).zip(items) {
        match (array.get(&*txn, index), item) {
            (Some(Out::YMap(child)), FieldValue::Object(fields)) => {
                writes += sync_map(txn, &child, fields);
            }
            (Some(Out::YArray(child)), FieldValue::List(nested)) => {
                writes += sync_array(txn, &child, nested);
            }
            (Some(current), _) if decode_output(&*txn, current.clone()) == *item => {}
            (Some(_), _) => {
                array.remove(txn, index);
                insert_item(txn, array, index, item);
                writes += 1;
            }
            (None, _) => {
                insert_item(txn, array, index, item);
                writes += 1;
            }
        }
    }
    writes
}

/// Reads a nested map entry, creating an empty one if missing or not a map.
pub(crate) fn child_map(txn: &mut TransactionMut, map: &MapRef, key: &str) -> MapRef {
    match map.get(&*txn, key) {
        Some(Out::YMap(child)) => child,
        _ => map.insert(txn, key, encode_map(&FieldMap::new())),
    }
}
