//! Materialized result trees. Objects and lists are `Arc`-shared so that
//! structural recycling can hand back the previous subtree when nothing
//! underneath changed, and so callers can test that with `ptr_eq`.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value as JsonValue;

use crate::graph::record::JsonMap;

/// One node of a materialized result.
#[derive(Clone, Debug)]
pub enum Data {
    /// A scalar leaf, including null and inline objects copied verbatim.
    Scalar(JsonValue),
    Object(Arc<IndexMap<String, Data>>),
    List(Arc<Vec<Data>>),
}

impl Data {
    pub fn null() -> Self {
        Data::Scalar(JsonValue::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Scalar(JsonValue::Null))
    }

    pub fn object(fields: IndexMap<String, Data>) -> Self {
        Data::Object(Arc::new(fields))
    }

    pub fn list(items: Vec<Data>) -> Self {
        Data::List(Arc::new(items))
    }

    pub fn get(&self, key: &str) -> Option<&Data> {
        match self {
            Data::Object(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Walks a path of response keys.
    pub fn at(&self, path: &[&str]) -> Option<&Data> {
        let mut current = self;
        for segment in path {
            current = current.get(segment)?;
        }
        Some(current)
    }

    pub fn items(&self) -> Option<&[Data]> {
        match self {
            Data::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Data::List(items) => items.len(),
            Data::Object(fields) => fields.len(),
            Data::Scalar(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::Scalar(JsonValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Data::Scalar(JsonValue::Number(n)) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Scalar(JsonValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Identity comparison: shared containers compare by pointer, scalars
    /// by value. This is what "unchanged subtree" means across two
    /// materializations.
    pub fn ptr_eq(&self, other: &Data) -> bool {
        match (self, other) {
            (Data::Object(a), Data::Object(b)) => Arc::ptr_eq(a, b),
            (Data::List(a), Data::List(b)) => Arc::ptr_eq(a, b),
            (Data::Scalar(a), Data::Scalar(b)) => a == b,
            _ => false,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Data::Scalar(value) => value.clone(),
            Data::Object(fields) => {
                let mut map = JsonMap::new();
                for (key, value) in fields.iter() {
                    map.insert(ByteString::from(key.as_str()), value.to_json());
                }
                JsonValue::Object(map)
            }
            Data::List(items) => JsonValue::Array(items.iter().map(Data::to_json).collect()),
        }
    }
}

/// Deep structural equality, shortcut through shared pointers.
impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Data::Scalar(a), Data::Scalar(b)) => a == b,
            (Data::Object(a), Data::Object(b)) => Arc::ptr_eq(a, b) || a == b,
            (Data::List(a), Data::List(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}
