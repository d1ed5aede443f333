use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
use serde_json_bytes::Value as JsonValue;

/// A JSON object as received from (or sent to) the transport.
pub type JsonMap = Map<ByteString, JsonValue>;

/// Identity of a record in the entity graph.
///
/// Two shapes exist: entity keys (`"User:1"`) derived from a per-type key
/// extractor, and synthetic keys for non-entity records: the root (`"@"`),
/// strict connection pages (`"@.posts({...})"`), canonical connections
/// (`"@connection.posts({...})"`), and connection children
/// (`"<conn>.edges:0"`, `"<conn>.pageInfo"`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    pub fn root() -> Self {
        Key(Arc::from("@"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        &*self.0 == "@"
    }

    /// True for synthetic (non-entity) keys.
    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with('@')
    }

    /// The typename segment of an entity key, if this is one.
    pub fn typename(&self) -> Option<&str> {
        if self.is_synthetic() {
            None
        } else {
            self.0.split_once(':').map(|(typename, _)| typename)
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key(Arc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key(Arc::from(value.as_str()))
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", &self.0)
    }
}

/// A single attribute value inside a record.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// A scalar (including null) or an inline object captured verbatim
    /// because it could not be promoted to its own record.
    Scalar(JsonValue),
    /// A pointer to another record. The target is owned by its own record,
    /// never by the referent.
    Ref(Key),
    /// An ordered list of record pointers. Rewritten atomically.
    RefList(Vec<Key>),
    /// A list that mixes refs with inline values, stored element-wise.
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn null() -> Self {
        FieldValue::Scalar(JsonValue::Null)
    }

    pub fn string(value: impl Into<String>) -> Self {
        FieldValue::Scalar(JsonValue::String(ByteString::from(value.into())))
    }

    pub fn as_ref_key(&self) -> Option<&Key> {
        match self {
            FieldValue::Ref(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_ref_list(&self) -> Option<&[Key]> {
        match self {
            FieldValue::RefList(keys) => Some(keys),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&JsonValue> {
        match self {
            FieldValue::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Snapshot encoding: refs become `{"__ref": key}`, ref-lists become
    /// `{"__refs": [key, ...]}`, everything else is emitted verbatim.
    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Scalar(value) => value.clone(),
            FieldValue::Ref(key) => {
                let mut map = JsonMap::new();
                map.insert(ByteString::from("__ref"), json_string(key.as_str()));
                JsonValue::Object(map)
            }
            FieldValue::RefList(keys) => {
                let mut map = JsonMap::new();
                map.insert(
                    ByteString::from("__refs"),
                    JsonValue::Array(keys.iter().map(|k| json_string(k.as_str())).collect()),
                );
                JsonValue::Object(map)
            }
            FieldValue::List(items) => {
                JsonValue::Array(items.iter().map(FieldValue::to_json).collect())
            }
        }
    }

    /// Inverse of [`FieldValue::to_json`].
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Object(map) if map.len() == 1 => {
                if let Some(JsonValue::String(key)) = map.get("__ref") {
                    return FieldValue::Ref(Key::from(key.as_str()));
                }
                if let Some(JsonValue::Array(keys)) = map.get("__refs") {
                    let keys: Vec<Key> = keys
                        .iter()
                        .filter_map(|k| k.as_str().map(Key::from))
                        .collect();
                    return FieldValue::RefList(keys);
                }
                FieldValue::Scalar(value.clone())
            }
            JsonValue::Array(items) => {
                let decoded: Vec<FieldValue> = items.iter().map(FieldValue::from_json).collect();
                if decoded.iter().all(|v| matches!(v, FieldValue::Ref(_))) && !decoded.is_empty() {
                    FieldValue::RefList(
                        decoded
                            .into_iter()
                            .filter_map(|v| match v {
                                FieldValue::Ref(key) => Some(key),
                                _ => None,
                            })
                            .collect(),
                    )
                } else if decoded
                    .iter()
                    .any(|v| !matches!(v, FieldValue::Scalar(_)))
                {
                    FieldValue::List(decoded)
                } else {
                    FieldValue::Scalar(value.clone())
                }
            }
            other => FieldValue::Scalar(other.clone()),
        }
    }
}

fn json_string(value: &str) -> JsonValue {
    JsonValue::String(ByteString::from(value))
}

/// A normalized record: an ordered mapping from attribute name to value.
///
/// Attributes for fields with arguments are stored under
/// `name(<stable-args-json>)`; argument-less fields under the bare name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.shift_remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The record's `__typename` attribute, when present.
    pub fn typename(&self) -> Option<&str> {
        match self.fields.get("__typename") {
            Some(FieldValue::Scalar(JsonValue::String(s))) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Attribute-wise merge. A ref replaces the previous value at its
    /// attribute; a ref-list replaces the whole list; attributes missing
    /// from `other` are preserved. Returns whether anything changed.
    pub fn merge_from(&mut self, other: &Record) -> bool {
        let mut changed = false;
        for (field, value) in &other.fields {
            if self.fields.get(field) != Some(value) {
                self.fields.insert(field.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    pub fn to_json(&self) -> JsonValue {
        let mut map = JsonMap::new();
        for (field, value) in &self.fields {
            map.insert(ByteString::from(field.as_str()), value.to_json());
        }
        JsonValue::Object(map)
    }

    pub fn from_json(value: &JsonValue) -> Self {
        let mut record = Record::new();
        if let JsonValue::Object(map) = value {
            for (field, value) in map.iter() {
                record.insert(field.as_str(), FieldValue::from_json(value));
            }
        }
        record
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Record {
            fields: iter.into_iter().collect(),
        }
    }
}
