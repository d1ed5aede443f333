//! Write side of the materializer: walks a payload with its plan, promotes
//! identifiable objects to entity records, captures null-key objects
//! inline, writes connection pages, and returns the touched-key union.

use serde_json_bytes::Value as JsonValue;
use tracing::debug;

use crate::config::CacheOptions;
use crate::connection;
use crate::connection::PageApplication;
use crate::graph::keys;
use crate::graph::record::FieldValue;
use crate::graph::record::JsonMap;
use crate::graph::record::Key;
use crate::graph::record::Record;
use crate::graph::EntityGraph;
use crate::graph::TouchedSet;
use crate::plan::Plan;
use crate::plan::PlanField;

/// Normalizes `data` under `plan` into the graph, rooted at `root`
/// (`"@"` for operations, an entity key for fragments).
pub(crate) fn normalize(
    options: &CacheOptions,
    graph: &mut EntityGraph,
    plan: &Plan,
    vars: &JsonMap,
    data: &JsonMap,
    root: &Key,
) -> TouchedSet {
    let mut normalizer = Normalizer {
        options,
        graph,
        vars,
        touched: TouchedSet::new(),
    };
    let hint = root
        .typename()
        .map(str::to_owned)
        .unwrap_or_else(|| plan.root_typename.clone());
    normalizer.write_selection(root, &plan.fields, data, Some(&hint));

    // Fragment writes may omit __typename; the target key still knows it,
    // and type guards depend on it being present.
    if let Some(typename) = root.typename() {
        let current = normalizer.graph.get(root.as_str());
        if current.is_some_and(|record| record.typename().is_none()) {
            let mut stamp = Record::new();
            stamp.insert("__typename", FieldValue::string(typename));
            normalizer
                .graph
                .put(root.clone(), stamp, &mut normalizer.touched);
        }
    }
    debug!(root = %root, touched = normalizer.touched.len(), "normalized payload");
    normalizer.touched
}

struct Normalizer<'a> {
    options: &'a CacheOptions,
    graph: &'a mut EntityGraph,
    vars: &'a JsonMap,
    touched: TouchedSet,
}

impl Normalizer<'_> {
    fn write_selection(
        &mut self,
        parent: &Key,
        fields: &[PlanField],
        data: &JsonMap,
        typename_hint: Option<&str>,
    ) {
        let payload_typename = data
            .get("__typename")
            .and_then(JsonValue::as_str)
            .or(typename_hint);
        let mut partial = Record::new();
        for field in fields {
            if let (Some(guard), Some(typename)) = (&field.type_guard, payload_typename) {
                if !self.options.matches_type(guard, typename) {
                    continue;
                }
            }
            let Some(value) = data.get(field.response_key.as_str()) else {
                continue;
            };
            if field.is_connection {
                if let JsonValue::Object(payload) = value {
                    self.write_connection(parent, field, payload);
                }
                continue;
            }
            if parent.is_root() && !field.arguments.is_empty() {
                // Virtual link key so arg-keyed readers wake on this write.
                self.touched.insert(keys::link_key(
                    parent,
                    &field.name,
                    &field.stringify_args(self.vars),
                ));
            }
            let stored = self.encode_value(field, value);
            partial.insert(field.storage_key(self.vars), stored);
        }
        if !partial.is_empty() {
            self.graph.put(parent.clone(), partial, &mut self.touched);
        }
    }

    /// Encodes one payload value: identifiable objects become refs (and
    /// their records are written), unidentifiable ones are captured
    /// verbatim, lists become ref-lists when homogeneous.
    fn encode_value(&mut self, field: &PlanField, value: &JsonValue) -> FieldValue {
        match value {
            JsonValue::Object(object) => match self.promote_entity(field, object) {
                Some(key) => FieldValue::Ref(key),
                None => FieldValue::Scalar(value.clone()),
            },
            JsonValue::Array(items) => {
                let encoded: Vec<FieldValue> = items
                    .iter()
                    .map(|item| self.encode_value(field, item))
                    .collect();
                if !encoded.is_empty() && encoded.iter().all(|v| matches!(v, FieldValue::Ref(_))) {
                    FieldValue::RefList(
                        encoded
                            .into_iter()
                            .filter_map(|v| match v {
                                FieldValue::Ref(key) => Some(key),
                                _ => None,
                            })
                            .collect(),
                    )
                } else if encoded.iter().any(|v| !matches!(v, FieldValue::Scalar(_))) {
                    FieldValue::List(encoded)
                } else {
                    FieldValue::Scalar(value.clone())
                }
            }
            scalar => FieldValue::Scalar(scalar.clone()),
        }
    }

    fn promote_entity(&mut self, field: &PlanField, object: &JsonMap) -> Option<Key> {
        let typename = object.get("__typename")?.as_str()?.to_owned();
        let key = Key::from(keys::identify(self.options, &typename, object)?);
        self.write_selection(&key, &field.children, object, Some(&typename));
        Some(key)
    }

    fn write_connection(&mut self, parent: &Key, field: &PlanField, payload: &JsonMap) {
        let args = field.build_args(self.vars);
        let args_json = keys::stable_args(&args);
        let page_key = keys::page_key(parent, &field.name, &args_json);
        let canonical = field.canonical_key(parent, self.vars);

        let edges_plan = field.child("edges");
        let mut edge_keys: Vec<Key> = Vec::new();
        if let Some(JsonValue::Array(edges)) = payload.get("edges") {
            for (index, edge) in edges.iter().enumerate() {
                let JsonValue::Object(edge_payload) = edge else {
                    continue;
                };
                let edge_key = keys::edge_key(&page_key, index);
                let mut edge_record = Record::new();
                if let Some(edges_plan) = edges_plan {
                    for child in &edges_plan.children {
                        if let Some(value) = edge_payload.get(child.response_key.as_str()) {
                            let stored = self.encode_value(child, value);
                            edge_record.insert(child.storage_key(self.vars), stored);
                        }
                    }
                }
                self.graph
                    .put(edge_key.clone(), edge_record, &mut self.touched);
                edge_keys.push(edge_key);
            }
        }

        let page_info = match payload.get("pageInfo") {
            Some(JsonValue::Object(info)) => {
                let mut record = Record::new();
                match field.child("pageInfo") {
                    Some(info_plan) => {
                        for child in &info_plan.children {
                            if let Some(value) = info.get(child.response_key.as_str()) {
                                let stored = self.encode_value(child, value);
                                record.insert(child.storage_key(self.vars), stored);
                            }
                        }
                    }
                    None => {
                        for (name, value) in info.iter() {
                            record.insert(name.as_str(), FieldValue::Scalar(value.clone()));
                        }
                    }
                }
                Some(record)
            }
            _ => None,
        };

        let mut siblings = Record::new();
        for child in &field.children {
            if child.response_key == "edges" || child.response_key == "pageInfo" {
                continue;
            }
            if let Some(value) = payload.get(child.response_key.as_str()) {
                let stored = self.encode_value(child, value);
                siblings.insert(child.storage_key(self.vars), stored);
            }
        }

        let mut strict = Record::new();
        strict.insert("edges", FieldValue::RefList(edge_keys.clone()));
        if let Some(info) = &page_info {
            let info_key = keys::page_info_key(&page_key);
            self.graph
                .put(info_key.clone(), info.clone(), &mut self.touched);
            strict.insert("pageInfo", FieldValue::Ref(info_key));
        }
        strict.merge_from(&siblings);
        self.graph.put(page_key, strict, &mut self.touched);

        let mode = connection::page_mode(&args, field.replace_mode);
        connection::apply_page(
            self.graph,
            PageApplication {
                canonical,
                edges: edge_keys,
                page_info,
                siblings,
                mode,
            },
            &mut self.touched,
        );
    }
}
