//! Open-typed field values carried by node and edge `data`.
//!
//! Every value is classified once, at the domain boundary, into one of the
//! variants below. The codec matches on these exhaustively instead of probing
//! JSON at runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered field bag used for `data` objects.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A JSON-shaped value with an explicit null marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<FieldValue>),
    Object(FieldMap),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&FieldMap> {
        match self {
            FieldValue::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Short type name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Number(_) => "number",
            FieldValue::Text(_) => "string",
            FieldValue::List(_) => "list",
            FieldValue::Object(_) => "object",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n as f64)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(items: Vec<FieldValue>) -> Self {
        FieldValue::List(items)
    }
}

impl From<FieldMap> for FieldValue {
    fn from(fields: FieldMap) -> Self {
        FieldValue::Object(fields)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Bool(b),
            serde_json::Value::Number(n) => FieldValue::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => FieldValue::Text(s),
            serde_json::Value::Array(items) => {
                FieldValue::List(items.into_iter().map(FieldValue::from).collect())
            }
            serde_json::Value::Object(fields) => FieldValue::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, FieldValue::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_roundtrips_through_json() {
        let mut fields = FieldMap::new();
        fields.insert("title".into(), FieldValue::Null);
        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"{"title":null}"#);

        let parsed: FieldMap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.get("title"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_integers_become_numbers() {
        let parsed: FieldValue = serde_json::from_str("[1, 2.5, \"x\", true]").unwrap();
        assert_eq!(
            parsed,
            FieldValue::List(vec![
                FieldValue::Number(1.0),
                FieldValue::Number(2.5),
                FieldValue::Text("x".into()),
                FieldValue::Bool(true),
            ])
        );
    }

    #[test]
    fn test_from_json_value() {
        let value = serde_json::json!({"label": "a", "points": [{"x": 1}], "hidden": null});
        let field = FieldValue::from(value);
        let obj = field.as_object().unwrap();
        assert_eq!(obj["label"].as_str(), Some("a"));
        assert!(obj["hidden"].is_null());
        assert_eq!(obj["points"].kind(), "list");
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(FieldValue::from(None::<f64>), FieldValue::Null);
        assert_eq!(FieldValue::from(Some(2.0)), FieldValue::Number(2.0));
    }
}
