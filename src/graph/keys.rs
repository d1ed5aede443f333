//! Record identity: entity keys from per-type extractors, synthetic keys
//! for the root, connection pages, canonical connections and their child
//! records, and the stable argument JSON all of them share.

use std::fmt::Write;

use indexmap::IndexMap;
use serde_json_bytes::Value as JsonValue;

use crate::config::CacheOptions;
use crate::graph::record::JsonMap;
use crate::graph::record::Key;

/// Canonical JSON: object keys sorted, arrays in order. Identical argument
/// maps therefore always produce identical key text.
pub fn stable_json(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Null => out.push_str("null"),
        JsonValue::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
        }
        JsonValue::Number(n) => {
            let _ = write!(out, "{n}");
        }
        JsonValue::String(s) => {
            // serde_json's escaping keeps the output valid JSON.
            let _ = write!(out, "{}", serde_json::Value::from(s.as_str()));
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                stable_json(item, out);
            }
            out.push(']');
        }
        JsonValue::Object(map) => {
            let mut keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", serde_json::Value::from(*key));
                if let Some(value) = map.get(*key) {
                    stable_json(value, out);
                }
            }
            out.push('}');
        }
    }
}

/// Stable JSON for an argument map built by the plan compiler. The map is
/// emitted sorted by argument name; entries whose variables were absent
/// have already been dropped.
pub fn stable_args(args: &IndexMap<String, JsonValue>) -> String {
    let mut keys: Vec<&str> = args.keys().map(String::as_str).collect();
    keys.sort_unstable();
    let mut out = String::from("{");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}:", serde_json::Value::from(*key));
        if let Some(value) = args.get(*key) {
            stable_json(value, &mut out);
        }
    }
    out.push('}');
    out
}

/// Applies the per-type key extractor (default: the `id` attribute) and
/// returns the full entity key, or `None` when the object stays embedded.
pub fn identify(options: &CacheOptions, typename: &str, attrs: &JsonMap) -> Option<String> {
    let key_value = match options.keys.get(typename) {
        Some(extractor) => extractor(attrs)?,
        None => default_key(attrs)?,
    };
    Some(format!("{typename}:{key_value}"))
}

fn default_key(attrs: &JsonMap) -> Option<String> {
    match attrs.get("id")? {
        JsonValue::String(s) => Some(s.as_str().to_owned()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parent_prefix(parent: &Key) -> String {
    if parent.is_root() {
        String::new()
    } else {
        format!("{parent}.")
    }
}

/// Key of the attribute a field is stored under in its parent record, and
/// also the arg-keyed dependency link for root fields.
pub fn field_storage_key(name: &str, args_json: Option<&str>) -> String {
    match args_json {
        Some(args) => format!("{name}({args})"),
        None => name.to_owned(),
    }
}

/// Strict page record key, e.g. `@.posts({"after":"c2","first":2})`.
pub fn page_key(parent: &Key, field: &str, args_json: &str) -> Key {
    Key::from(format!("@.{}{field}({args_json})", parent_prefix(parent)))
}

/// Arg-keyed dependency link for a root field with arguments. Shares the
/// strict page key shape.
pub fn link_key(parent: &Key, field: &str, args_json: &str) -> Key {
    page_key(parent, field, args_json)
}

/// Canonical connection key, e.g. `@connection.posts({"category":"tech"})`.
pub fn canonical_key(parent: &Key, connection_name: &str, filters_json: &str) -> Key {
    Key::from(format!(
        "@connection.{}{connection_name}({filters_json})",
        parent_prefix(parent)
    ))
}

/// Key of the `i`-th edge child record of a connection page.
pub fn edge_key(connection: &Key, index: usize) -> Key {
    Key::from(format!("{connection}.edges:{index}"))
}

/// Key of an edge minted by an optimistic `add_node`. The canonical-key
/// prefix keeps it out of the strict pages' edge namespace.
pub fn optimistic_edge_key(canonical: &Key, serial: u64) -> Key {
    Key::from(format!("{canonical}.edges:opt{serial}"))
}

/// Key of a connection's `pageInfo` child record.
pub fn page_info_key(connection: &Key) -> Key {
    Key::from(format!("{connection}.pageInfo"))
}
