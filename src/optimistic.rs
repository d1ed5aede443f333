//! The optimistic layer stack: ordered overlays above the entity graph.
//! Each layer holds record patches, tombstones and connection ops; reads
//! fold base-through-layers, and a layer can be committed or reverted
//! independently without disturbing its neighbors.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json_bytes::Value as JsonValue;
use tracing::debug;

use crate::config::CacheOptions;
use crate::graph::keys;
use crate::graph::record::FieldValue;
use crate::graph::record::JsonMap;
use crate::graph::record::Key;
use crate::graph::record::Record;
use crate::graph::EntityGraph;
use crate::graph::TouchedSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(pub(crate) u64);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PatchMode {
    #[default]
    Merge,
    Replace,
}

/// Where an optimistically added node lands in the canonical edge order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Position {
    Start,
    End,
    Before(String),
    After(String),
}

#[derive(Clone, Debug)]
pub(crate) enum ConnectionOp {
    AddEdge {
        edge: Key,
        node: Key,
        position: Position,
    },
    RemoveNode {
        node: Key,
    },
}

#[derive(Clone, Debug, Default)]
pub(crate) struct RecordPatch {
    pub mode: PatchMode,
    pub tombstone: bool,
    pub fields: Record,
}

pub(crate) struct Layer {
    pub id: LayerId,
    pub committed: bool,
    pub records: IndexMap<Key, RecordPatch>,
    pub connections: IndexMap<Key, Vec<ConnectionOp>>,
}

impl Layer {
    pub fn new(id: LayerId) -> Self {
        Self {
            id,
            committed: false,
            records: IndexMap::new(),
            connections: IndexMap::new(),
        }
    }

    /// Every record key this layer can affect.
    pub fn touched_keys(&self) -> TouchedSet {
        let mut keys: TouchedSet = self.records.keys().cloned().collect();
        keys.extend(self.connections.keys().cloned());
        keys
    }
}

struct FoldEntry {
    graph_version: u64,
    stack_version: u64,
    record: Option<Arc<Record>>,
}

/// The stack itself. Visible state is `base ⊕ layer_0 ⊕ layer_1 ⊕ …` in
/// creation order; uncommitted layers are active-visible.
#[derive(Default)]
pub(crate) struct LayerStack {
    layers: Vec<Layer>,
    next_id: u64,
    version: u64,
    fold_cache: RefCell<HashMap<Key, FoldEntry>>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_layer_id(&mut self) -> LayerId {
        self.next_id += 1;
        LayerId(self.next_id)
    }

    pub fn push(&mut self, layer: Layer) -> TouchedSet {
        let touched = layer.touched_keys();
        debug!(layer = layer.id.0, keys = touched.len(), "optimistic layer installed");
        self.layers.push(layer);
        self.version += 1;
        touched
    }

    /// Finalizes the layer. Visible state does not change (uncommitted
    /// layers were already active); the touched set still feeds a notify
    /// so dependents re-validate.
    pub fn commit(&mut self, id: LayerId) -> Option<TouchedSet> {
        let layer = self.layers.iter_mut().find(|layer| layer.id == id)?;
        layer.committed = true;
        let touched = layer.touched_keys();
        self.version += 1;
        debug!(layer = id.0, "optimistic layer committed");
        Some(touched)
    }

    /// Removes only this layer; later layers keep applying to the new
    /// base.
    pub fn revert(&mut self, id: LayerId) -> Option<TouchedSet> {
        let position = self.layers.iter().position(|layer| layer.id == id)?;
        let layer = self.layers.remove(position);
        self.version += 1;
        debug!(layer = id.0, "optimistic layer reverted");
        Some(layer.touched_keys())
    }

    /// Folded view of one record: base record overlaid by every layer, in
    /// order. Cached per key until either the graph or the stack moves.
    pub fn resolve(&self, graph: &EntityGraph, key: &Key) -> Option<Arc<Record>> {
        if self.layers.is_empty() {
            return graph.get(key.as_str()).cloned();
        }
        if let Some(entry) = self.fold_cache.borrow().get(key) {
            if entry.graph_version == graph.version() && entry.stack_version == self.version {
                return entry.record.clone();
            }
        }

        let overlaid = self
            .layers
            .iter()
            .any(|layer| layer.records.contains_key(key) || layer.connections.contains_key(key));
        let record = if overlaid {
            let mut current: Option<Record> = graph.get(key.as_str()).map(|r| (**r).clone());
            for layer in &self.layers {
                if let Some(patch) = layer.records.get(key) {
                    if patch.tombstone {
                        current = None;
                    } else {
                        match patch.mode {
                            PatchMode::Replace => current = Some(patch.fields.clone()),
                            PatchMode::Merge => {
                                current
                                    .get_or_insert_with(Record::new)
                                    .merge_from(&patch.fields);
                            }
                        }
                    }
                }
                if let Some(ops) = layer.connections.get(key) {
                    let target = current.get_or_insert_with(Record::new);
                    self.apply_connection_ops(graph, target, ops);
                }
            }
            current.map(Arc::new)
        } else {
            graph.get(key.as_str()).cloned()
        };

        self.fold_cache.borrow_mut().insert(
            key.clone(),
            FoldEntry {
                graph_version: graph.version(),
                stack_version: self.version,
                record: record.clone(),
            },
        );
        record
    }

    fn apply_connection_ops(&self, graph: &EntityGraph, record: &mut Record, ops: &[ConnectionOp]) {
        let mut edges: Vec<Key> = record
            .get("edges")
            .and_then(FieldValue::as_ref_list)
            .map(<[Key]>::to_vec)
            .unwrap_or_default();
        for op in ops {
            match op {
                ConnectionOp::AddEdge {
                    edge,
                    node,
                    position,
                } => {
                    let already = edges
                        .iter()
                        .any(|e| self.edge_node(graph, e).as_ref() == Some(node));
                    if already {
                        continue;
                    }
                    let at = match position {
                        Position::Start => 0,
                        Position::End => edges.len(),
                        Position::Before(cursor) => edges
                            .iter()
                            .position(|e| self.edge_cursor(graph, e).as_deref() == Some(cursor))
                            .unwrap_or(edges.len()),
                        Position::After(cursor) => edges
                            .iter()
                            .position(|e| self.edge_cursor(graph, e).as_deref() == Some(cursor))
                            .map(|i| i + 1)
                            .unwrap_or(edges.len()),
                    };
                    edges.insert(at, edge.clone());
                }
                ConnectionOp::RemoveNode { node } => {
                    edges.retain(|e| self.edge_node(graph, e).as_ref() != Some(node));
                }
            }
        }
        record.insert("edges", FieldValue::RefList(edges));
    }

    fn edge_node(&self, graph: &EntityGraph, edge: &Key) -> Option<Key> {
        self.resolve(graph, edge)?
            .get("node")
            .and_then(FieldValue::as_ref_key)
            .cloned()
    }

    fn edge_cursor(&self, graph: &EntityGraph, edge: &Key) -> Option<String> {
        match self.resolve(graph, edge)?.get("cursor") {
            Some(FieldValue::Scalar(serde_json_bytes::Value::String(s))) => {
                Some(s.as_str().to_owned())
            }
            _ => None,
        }
    }
}

/// Builder handed to the `modify_optimistic` callback. Collects one
/// layer's patches, tombstones and connection ops; nothing becomes
/// visible until the facade installs the layer.
pub struct OptimisticEdit<'a> {
    pub(crate) options: &'a CacheOptions,
    pub(crate) graph: &'a EntityGraph,
    pub(crate) stack: &'a LayerStack,
    pub(crate) layer: Layer,
    pub(crate) edge_serial: u64,
}

impl<'a> OptimisticEdit<'a> {
    pub(crate) fn new(
        options: &'a CacheOptions,
        graph: &'a EntityGraph,
        stack: &'a LayerStack,
        id: LayerId,
    ) -> Self {
        Self {
            options,
            graph,
            stack,
            layer: Layer::new(id),
            edge_serial: 0,
        }
    }

    /// Overlays a partial record. Values use the snapshot encoding, so
    /// `{"__ref": key}` installs a ref.
    pub fn patch(&mut self, key: &str, partial: JsonValue, mode: PatchMode) {
        let fields = Record::from_json(&partial);
        let entry = self.layer.records.entry(Key::from(key)).or_default();
        entry.tombstone = false;
        match mode {
            PatchMode::Replace => {
                entry.mode = PatchMode::Replace;
                entry.fields = fields;
            }
            PatchMode::Merge => {
                entry.fields.merge_from(&fields);
            }
        }
    }

    /// Installs a tombstone suppressing the record for this layer's
    /// lifetime.
    pub fn delete(&mut self, key: &str) {
        let entry = self.layer.records.entry(Key::from(key)).or_default();
        entry.tombstone = true;
        entry.mode = PatchMode::Merge;
        entry.fields = Record::new();
    }

    /// Addresses one canonical connection for edge-level edits.
    pub fn connection(&mut self, locator: ConnectionLocator) -> ConnectionEditor<'_, 'a> {
        let parent = locator
            .parent
            .as_deref()
            .map(Key::from)
            .unwrap_or_else(Key::root);
        let filters: IndexMap<String, JsonValue> = match &locator.filters {
            JsonValue::Object(map) => map
                .iter()
                .map(|(k, v)| (k.as_str().to_owned(), v.clone()))
                .collect(),
            _ => IndexMap::new(),
        };
        let canonical = keys::canonical_key(&parent, &locator.key, &keys::stable_args(&filters));
        let info_key = keys::page_info_key(&canonical);
        let entry = self.layer.records.entry(canonical.clone()).or_default();
        if entry.fields.get("pageInfo").is_none() {
            entry.fields.insert("pageInfo", FieldValue::Ref(info_key));
        }
        ConnectionEditor {
            edit: self,
            canonical,
        }
    }
}

/// Names a canonical connection: parent record (root by default), the
/// connection key (field name or `@connection(key:)` override) and its
/// filter arguments.
#[derive(Clone, Debug)]
pub struct ConnectionLocator {
    pub parent: Option<String>,
    pub key: String,
    pub filters: JsonValue,
}

impl Default for ConnectionLocator {
    fn default() -> Self {
        Self {
            parent: None,
            key: String::new(),
            filters: JsonValue::Null,
        }
    }
}

pub struct ConnectionEditor<'e, 'a> {
    edit: &'e mut OptimisticEdit<'a>,
    canonical: Key,
}

impl ConnectionEditor<'_, '_> {
    /// Adds `node` at `position` in the canonical edge order. Silently
    /// ignored when the node carries no `__typename` or no resolvable key.
    pub fn add_node(&mut self, node: JsonValue, position: Position) {
        let Some(object) = node.as_object() else {
            return;
        };
        let Some(typename) = object.get("__typename").and_then(JsonValue::as_str) else {
            return;
        };
        let Some(node_key) = keys::identify(self.edit.options, typename, object) else {
            return;
        };
        let node_key = Key::from(node_key);

        let node_record = Record::from_json(&node);
        let entry = self
            .edit
            .layer
            .records
            .entry(node_key.clone())
            .or_default();
        entry.fields.merge_from(&node_record);

        self.edit.edge_serial += 1;
        let edge_key = keys::optimistic_edge_key(&self.canonical, self.edit.edge_serial);
        let mut edge_record = Record::new();
        edge_record.insert("node", FieldValue::Ref(node_key.clone()));
        self.edit.layer.records.insert(
            edge_key.clone(),
            RecordPatch {
                mode: PatchMode::Merge,
                tombstone: false,
                fields: edge_record,
            },
        );
        self.edit
            .layer
            .connections
            .entry(self.canonical.clone())
            .or_default()
            .push(ConnectionOp::AddEdge {
                edge: edge_key,
                node: node_key,
                position,
            });
    }

    /// Removes every canonical edge whose node has this identity. Strict
    /// pages are unaffected.
    pub fn remove_node(&mut self, node: JsonValue) {
        let Some(object) = node.as_object() else {
            return;
        };
        let Some(typename) = object.get("__typename").and_then(JsonValue::as_str) else {
            return;
        };
        let Some(node_key) = keys::identify(self.edit.options, typename, object) else {
            return;
        };
        self.edit
            .layer
            .connections
            .entry(self.canonical.clone())
            .or_default()
            .push(ConnectionOp::RemoveNode {
                node: Key::from(node_key),
            });
    }

    /// Functional update over the connection's sibling attributes and
    /// `pageInfo`. The closure sees the current canonical view; only the
    /// entries it changes become part of the layer.
    pub fn patch(&mut self, f: impl FnOnce(&mut ConnectionView)) {
        let canonical_record = self.edit.stack.resolve(self.edit.graph, &self.canonical);
        let info_key = keys::page_info_key(&self.canonical);
        let info_record = self.edit.stack.resolve(self.edit.graph, &info_key);

        let mut view = ConnectionView {
            page_info: record_as_json(info_record.as_deref(), &[]),
            fields: record_as_json(canonical_record.as_deref(), &["edges", "pageInfo"]),
            edge_count: canonical_record
                .as_deref()
                .and_then(|record| record.get("edges"))
                .and_then(FieldValue::as_ref_list)
                .map(<[Key]>::len)
                .unwrap_or(0),
        };
        let before_info = view.page_info.clone();
        let before_fields = view.fields.clone();
        f(&mut view);

        let info_delta = changed_entries(&before_info, &view.page_info);
        if !info_delta.is_empty() {
            let entry = self.edit.layer.records.entry(info_key).or_default();
            entry.fields.merge_from(&info_delta);
        }
        let fields_delta = changed_entries(&before_fields, &view.fields);
        if !fields_delta.is_empty() {
            let entry = self
                .edit
                .layer
                .records
                .entry(self.canonical.clone())
                .or_default();
            for (name, value) in fields_delta.iter() {
                if name == "edges" || name == "pageInfo" {
                    continue;
                }
                entry.fields.insert(name, value.clone());
            }
        }
    }
}

/// The current canonical view a connection `patch` closure edits.
pub struct ConnectionView {
    page_info: JsonMap,
    fields: JsonMap,
    edge_count: usize,
}

impl ConnectionView {
    pub fn page_info(&mut self) -> &mut JsonMap {
        &mut self.page_info
    }

    pub fn fields(&mut self) -> &mut JsonMap {
        &mut self.fields
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}

fn record_as_json(record: Option<&Record>, skip: &[&str]) -> JsonMap {
    let mut map = JsonMap::new();
    if let Some(record) = record {
        for (name, value) in record.iter() {
            if skip.contains(&name) {
                continue;
            }
            map.insert(
                serde_json_bytes::ByteString::from(name),
                value.to_json(),
            );
        }
    }
    map
}

fn changed_entries(before: &JsonMap, after: &JsonMap) -> Record {
    let mut delta = Record::new();
    for (name, value) in after.iter() {
        if before.get(name.as_str()) != Some(value) {
            delta.insert(name.as_str(), FieldValue::from_json(value));
        }
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(graph: &mut EntityGraph, key: &str, fields: &[(&str, &str)]) {
        let mut record = Record::new();
        for (name, value) in fields {
            record.insert(*name, FieldValue::string(*value));
        }
        let mut touched = TouchedSet::new();
        graph.put(Key::from(key), record, &mut touched);
    }

    fn patch_layer(stack: &mut LayerStack, key: &str, fields: &[(&str, &str)]) -> LayerId {
        let id = stack.next_layer_id();
        let mut layer = Layer::new(id);
        let mut record = Record::new();
        for (name, value) in fields {
            record.insert(*name, FieldValue::string(*value));
        }
        layer.records.insert(
            Key::from(key),
            RecordPatch {
                mode: PatchMode::Merge,
                tombstone: false,
                fields: record,
            },
        );
        stack.push(layer);
        id
    }

    fn name_of(stack: &LayerStack, graph: &EntityGraph, key: &str) -> Option<String> {
        stack
            .resolve(graph, &Key::from(key))
            .and_then(|record| match record.get("name") {
                Some(FieldValue::Scalar(serde_json_bytes::Value::String(s))) => {
                    Some(s.as_str().to_owned())
                }
                _ => None,
            })
    }

    #[test]
    fn later_layers_survive_earlier_revert() {
        let mut graph = EntityGraph::new();
        let mut stack = LayerStack::new();
        seed(&mut graph, "User:1", &[("name", "base")]);

        let tx1 = patch_layer(&mut stack, "User:1", &[("name", "one")]);
        let tx2 = patch_layer(&mut stack, "User:1", &[("name", "two")]);
        stack.commit(tx1);
        stack.commit(tx2);
        assert_eq!(name_of(&stack, &graph, "User:1").as_deref(), Some("two"));

        stack.revert(tx1);
        assert_eq!(name_of(&stack, &graph, "User:1").as_deref(), Some("two"));

        stack.revert(tx2);
        assert_eq!(name_of(&stack, &graph, "User:1").as_deref(), Some("base"));
    }

    #[test]
    fn reverting_in_creation_order_restores_base() {
        let mut graph = EntityGraph::new();
        let mut stack = LayerStack::new();
        seed(&mut graph, "User:1", &[("name", "base")]);
        let tx1 = patch_layer(&mut stack, "User:1", &[("name", "one")]);
        let tx2 = patch_layer(&mut stack, "User:1", &[("name", "two")]);
        stack.commit(tx1);
        stack.commit(tx2);
        stack.revert(tx2);
        assert_eq!(name_of(&stack, &graph, "User:1").as_deref(), Some("one"));
        stack.revert(tx1);
        assert_eq!(name_of(&stack, &graph, "User:1").as_deref(), Some("base"));
    }

    #[test]
    fn tombstone_suppresses_base() {
        let mut graph = EntityGraph::new();
        let mut stack = LayerStack::new();
        seed(&mut graph, "User:1", &[("name", "base")]);

        let id = stack.next_layer_id();
        let mut layer = Layer::new(id);
        layer.records.insert(
            Key::from("User:1"),
            RecordPatch {
                mode: PatchMode::Merge,
                tombstone: true,
                fields: Record::new(),
            },
        );
        stack.push(layer);
        assert!(stack.resolve(&graph, &Key::from("User:1")).is_none());

        stack.revert(id);
        assert_eq!(name_of(&stack, &graph, "User:1").as_deref(), Some("base"));
    }

    #[test]
    fn connection_ops_fold_over_base() {
        let mut graph = EntityGraph::new();
        let mut touched = TouchedSet::new();
        let canonical = Key::from("@connection.posts({})");
        for (i, (node, cursor)) in [("Post:p1", "c1"), ("Post:p2", "c2")].iter().enumerate() {
            let mut edge = Record::new();
            edge.insert("cursor", FieldValue::string(*cursor));
            edge.insert("node", FieldValue::Ref(Key::from(*node)));
            graph.put(
                Key::from(format!("{canonical}.edges:{i}").as_str()),
                edge,
                &mut touched,
            );
        }
        let mut conn = Record::new();
        conn.insert(
            "edges",
            FieldValue::RefList(vec![
                Key::from(format!("{canonical}.edges:0").as_str()),
                Key::from(format!("{canonical}.edges:1").as_str()),
            ]),
        );
        graph.put(canonical.clone(), conn, &mut touched);

        let mut stack = LayerStack::new();
        let id = stack.next_layer_id();
        let mut layer = Layer::new(id);
        let new_edge = Key::from("@connection.posts({}).edges:opt1");
        let mut edge_record = Record::new();
        edge_record.insert("node", FieldValue::Ref(Key::from("Post:p9")));
        layer.records.insert(
            new_edge.clone(),
            RecordPatch {
                mode: PatchMode::Merge,
                tombstone: false,
                fields: edge_record,
            },
        );
        layer.connections.insert(
            canonical.clone(),
            vec![
                ConnectionOp::AddEdge {
                    edge: new_edge,
                    node: Key::from("Post:p9"),
                    position: Position::Start,
                },
                ConnectionOp::RemoveNode {
                    node: Key::from("Post:p1"),
                },
            ],
        );
        stack.push(layer);

        let folded = stack.resolve(&graph, &canonical).unwrap();
        let edges = folded.get("edges").and_then(FieldValue::as_ref_list).unwrap();
        let nodes: Vec<String> = edges
            .iter()
            .filter_map(|e| stack.edge_node(&graph, e))
            .map(|k| k.as_str().to_owned())
            .collect();
        assert_eq!(nodes, vec!["Post:p9", "Post:p2"]);

        stack.revert(id);
        let folded = stack.resolve(&graph, &canonical);
        assert!(folded.is_some());
        let folded = folded.unwrap();
        let edges = folded.get("edges").and_then(FieldValue::as_ref_list).unwrap();
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn replace_patch_discards_base_fields() {
        let mut graph = EntityGraph::new();
        let mut stack = LayerStack::new();
        seed(&mut graph, "User:1", &[("name", "base"), ("email", "a@b")]);
        let id = stack.next_layer_id();
        let mut layer = Layer::new(id);
        let mut fields = Record::new();
        fields.insert("name", FieldValue::string("patched"));
        layer.records.insert(
            Key::from("User:1"),
            RecordPatch {
                mode: PatchMode::Replace,
                tombstone: false,
                fields,
            },
        );
        stack.push(layer);
        let folded = stack.resolve(&graph, &Key::from("User:1")).unwrap();
        assert_eq!(folded.get("email"), None);
        assert_eq!(folded.get("name"), Some(&FieldValue::string("patched")));
    }
}
