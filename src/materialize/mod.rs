//! Read side of the materializer: translates a plan plus a root identity
//! into a result tree, picking canonical or strict connection sources,
//! dispatching type guards, guarding against cycles, collecting the
//! dependency set, and recycling unchanged subtrees from the previous
//! result so their references are preserved.

pub mod data;
pub(crate) mod normalize;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value as JsonValue;
use tracing::trace;

use crate::config::CacheOptions;
use crate::graph::keys;
use crate::graph::record::FieldValue;
use crate::graph::record::JsonMap;
use crate::graph::record::Key;
use crate::graph::record::Record;
use crate::graph::EntityGraph;
use crate::graph::TouchedSet;
use crate::optimistic::LayerStack;
use crate::plan::Plan;
use crate::plan::PlanField;

pub use data::Data;

/// Where the data for a result's root fields came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Canonical,
    Strict,
    None,
}

/// Outcome of a read. A cache miss is `data: None, source: None`; it is
/// never an error.
#[derive(Clone, Debug)]
pub struct ReadResult {
    pub data: Option<Data>,
    pub source: Source,
    pub dependencies: TouchedSet,
    /// True when this exact `(plan, mode, root, vars)` was served from the
    /// result cache without walking the graph.
    pub hot: bool,
}

/// Identity of a cached materialization.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ResultKey {
    pub plan_id: u32,
    pub canonical: bool,
    pub root: Key,
    pub vars_key: String,
}

pub(crate) struct ResultEntry {
    pub data: Option<Data>,
    pub source: Source,
    pub deps: TouchedSet,
    pub dirty: bool,
}

/// Cache of materialized trees with a reverse dependency index, so a write
/// burst can invalidate exactly the results it affects.
#[derive(Default)]
pub(crate) struct ResultCache {
    entries: HashMap<ResultKey, ResultEntry>,
    dep_index: HashMap<Key, HashSet<ResultKey>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, key: &ResultKey) -> Option<&ResultEntry> {
        self.entries.get(key)
    }

    /// Marks every entry depending on a touched key as needing a re-walk.
    pub fn mark_touched(&mut self, touched: &TouchedSet) {
        for key in touched {
            if let Some(dependents) = self.dep_index.get(key) {
                for result_key in dependents {
                    if let Some(entry) = self.entries.get_mut(result_key) {
                        entry.dirty = true;
                    }
                }
            }
        }
    }

    pub fn invalidate_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.dirty = true;
        }
    }

    fn store(&mut self, key: ResultKey, data: Option<Data>, source: Source, deps: TouchedSet) {
        if let Some(old) = self.entries.get(&key) {
            for dep in &old.deps {
                if !deps.contains(dep) {
                    if let Some(set) = self.dep_index.get_mut(dep) {
                        set.remove(&key);
                        if set.is_empty() {
                            self.dep_index.remove(dep);
                        }
                    }
                }
            }
        }
        for dep in &deps {
            self.dep_index
                .entry(dep.clone())
                .or_default()
                .insert(key.clone());
        }
        self.entries.insert(
            key,
            ResultEntry {
                data,
                source,
                deps,
                dirty: false,
            },
        );
    }
}

/// Borrowed view of everything a read needs.
pub(crate) struct MaterializeCtx<'a> {
    pub options: &'a CacheOptions,
    pub graph: &'a EntityGraph,
    pub layers: &'a LayerStack,
}

pub(crate) fn materialize(
    ctx: MaterializeCtx<'_>,
    results: &mut ResultCache,
    plan: &Plan,
    root: &Key,
    vars: &JsonMap,
    canonical: bool,
) -> ReadResult {
    let key = ResultKey {
        plan_id: plan.plan_id,
        canonical,
        root: root.clone(),
        vars_key: plan.make_vars_key(canonical, vars),
    };
    if let Some(entry) = results.entry(&key) {
        if !entry.dirty {
            trace!(plan_id = plan.plan_id, root = %root, "hot result");
            return ReadResult {
                data: entry.data.clone(),
                source: entry.source,
                dependencies: entry.deps.clone(),
                hot: true,
            };
        }
    }
    let prev = results.entry(&key).and_then(|entry| entry.data.clone());

    let mut walker = Walker {
        ctx: &ctx,
        vars,
        canonical,
        deps: TouchedSet::new(),
        visiting: HashSet::new(),
    };
    let record = walker.resolve(root);
    let root_typename = root
        .typename()
        .map(str::to_owned)
        .unwrap_or_else(|| plan.root_typename.clone());
    let (tree, found) = walker.walk_fields(
        record.as_deref(),
        root,
        &plan.fields,
        Some(&root_typename),
        prev.as_ref(),
    );
    let (data, source) = if found {
        (
            Some(tree),
            if canonical {
                Source::Canonical
            } else {
                Source::Strict
            },
        )
    } else {
        (None, Source::None)
    };
    let deps = walker.deps;
    results.store(key, data.clone(), source, deps.clone());
    ReadResult {
        data,
        source,
        dependencies: deps,
        hot: false,
    }
}

struct Walker<'a> {
    ctx: &'a MaterializeCtx<'a>,
    vars: &'a JsonMap,
    canonical: bool,
    deps: TouchedSet,
    visiting: HashSet<(Key, usize)>,
}

impl Walker<'_> {
    fn resolve(&mut self, key: &Key) -> Option<Arc<Record>> {
        self.deps.insert(key.clone());
        self.ctx.layers.resolve(self.ctx.graph, key)
    }

    fn walk_fields(
        &mut self,
        record: Option<&Record>,
        record_key: &Key,
        fields: &[PlanField],
        typename_hint: Option<&str>,
        prev: Option<&Data>,
    ) -> (Data, bool) {
        let typename = record
            .and_then(Record::typename)
            .or(typename_hint)
            .map(str::to_owned);
        let mut built: IndexMap<String, Data> = IndexMap::new();
        let mut found = false;
        for field in fields {
            if let (Some(guard), Some(typename)) = (&field.type_guard, typename.as_deref()) {
                if !self.ctx.options.matches_type(guard, typename) {
                    continue;
                }
            }
            let slot_prev = prev.and_then(|p| p.get(&field.response_key));
            let (value, field_found) =
                self.walk_field(record, record_key, field, typename.as_deref(), slot_prev);
            found |= field_found;
            merge_slot(&mut built, &field.response_key, value);
        }
        (recycled_object(prev, built), found)
    }

    fn walk_field(
        &mut self,
        record: Option<&Record>,
        record_key: &Key,
        field: &PlanField,
        typename: Option<&str>,
        prev: Option<&Data>,
    ) -> (Data, bool) {
        if field.is_connection {
            return self.walk_connection(record_key, field, prev);
        }
        if field.name == "__typename" && field.arguments.is_empty() {
            return match typename {
                Some(typename) => (
                    Data::Scalar(JsonValue::String(ByteString::from(typename))),
                    record.is_some(),
                ),
                None => (Data::null(), false),
            };
        }
        if record_key.is_root() && !field.arguments.is_empty() {
            self.deps.insert(keys::link_key(
                record_key,
                &field.name,
                &field.stringify_args(self.vars),
            ));
        }
        let Some(record) = record else {
            return (Data::null(), false);
        };
        let Some(value) = record.get(&field.storage_key(self.vars)) else {
            return (Data::null(), false);
        };
        (self.walk_value(value, field, prev), true)
    }

    fn walk_value(&mut self, value: &FieldValue, field: &PlanField, prev: Option<&Data>) -> Data {
        match value {
            FieldValue::Scalar(scalar) => {
                if !field.children.is_empty() {
                    if let JsonValue::Object(object) = scalar {
                        return self.walk_inline(object, field, prev);
                    }
                }
                Data::Scalar(scalar.clone())
            }
            FieldValue::Ref(key) => self.walk_ref(key, field, prev),
            FieldValue::RefList(refs) => {
                let prev_items = prev.and_then(Data::items);
                let items = refs
                    .iter()
                    .enumerate()
                    .map(|(i, key)| {
                        self.walk_ref(key, field, prev_items.and_then(|p| p.get(i)))
                    })
                    .collect();
                recycled_list(prev, items)
            }
            FieldValue::List(values) => {
                let prev_items = prev.and_then(Data::items);
                let items = values
                    .iter()
                    .enumerate()
                    .map(|(i, value)| {
                        self.walk_value(value, field, prev_items.and_then(|p| p.get(i)))
                    })
                    .collect();
                recycled_list(prev, items)
            }
        }
    }

    /// Reads a referenced record. A missing target and a re-entered cycle
    /// both yield the shared empty placeholder, observable until the
    /// target (or the cycle exit) produces a value.
    fn walk_ref(&mut self, key: &Key, field: &PlanField, prev: Option<&Data>) -> Data {
        let Some(record) = self.resolve(key) else {
            return Data::null();
        };
        let probe = (key.clone(), field as *const PlanField as usize);
        if !self.visiting.insert(probe.clone()) {
            return Data::null();
        }
        let (data, _) = self.walk_fields(Some(&*record), key, &field.children, None, prev);
        self.visiting.remove(&probe);
        data
    }

    fn walk_connection(
        &mut self,
        parent: &Key,
        field: &PlanField,
        prev: Option<&Data>,
    ) -> (Data, bool) {
        let source_key = if self.canonical {
            field.canonical_key(parent, self.vars)
        } else {
            field.page_key(parent, self.vars)
        };
        match self.resolve(&source_key) {
            Some(record) => {
                let (data, _) =
                    self.walk_fields(Some(&*record), &source_key, &field.children, None, prev);
                (data, true)
            }
            None => (self.empty_connection(field, prev), false),
        }
    }

    /// Plan-shaped placeholder for a connection whose source record does
    /// not exist yet. Stays observably empty until a source appears; the
    /// source key is already a registered dependency by the time this
    /// runs.
    fn empty_connection(&mut self, field: &PlanField, prev: Option<&Data>) -> Data {
        let mut built: IndexMap<String, Data> = IndexMap::new();
        for child in &field.children {
            let slot_prev = prev.and_then(|p| p.get(&child.response_key));
            let value = match child.response_key.as_str() {
                "edges" => recycled_list(slot_prev, Vec::new()),
                "pageInfo" => {
                    let mut info = IndexMap::new();
                    for grandchild in &child.children {
                        let value = match grandchild.response_key.as_str() {
                            "hasNextPage" | "hasPreviousPage" => {
                                Data::Scalar(JsonValue::Bool(false))
                            }
                            _ => Data::null(),
                        };
                        info.insert(grandchild.response_key.clone(), value);
                    }
                    recycled_object(slot_prev, info)
                }
                _ => Data::null(),
            };
            built.insert(child.response_key.clone(), value);
        }
        recycled_object(prev, built)
    }

    /// Inline (null-key) objects were captured verbatim; selection still
    /// shapes what the reader sees.
    fn walk_inline(&mut self, object: &JsonMap, field: &PlanField, prev: Option<&Data>) -> Data {
        let typename = object.get("__typename").and_then(JsonValue::as_str);
        let mut built: IndexMap<String, Data> = IndexMap::new();
        for child in &field.children {
            if let (Some(guard), Some(typename)) = (&child.type_guard, typename) {
                if !self.ctx.options.matches_type(guard, typename) {
                    continue;
                }
            }
            let slot_prev = prev.and_then(|p| p.get(&child.response_key));
            let value = match object.get(child.response_key.as_str()) {
                Some(JsonValue::Object(inner)) if !child.children.is_empty() => {
                    self.walk_inline(inner, child, slot_prev)
                }
                Some(value) => Data::Scalar(value.clone()),
                None => Data::null(),
            };
            built.insert(child.response_key.clone(), value);
        }
        recycled_object(prev, built)
    }
}

/// Guarded duplicates of one response key merge object-wise; scalars let
/// the non-null contribution win.
fn merge_slot(built: &mut IndexMap<String, Data>, response_key: &str, value: Data) {
    let replacement = match built.get(response_key) {
        None => Some(value),
        Some(Data::Object(existing)) => match &value {
            Data::Object(incoming) => {
                let mut merged = (**existing).clone();
                for (key, item) in incoming.iter() {
                    merged.insert(key.clone(), item.clone());
                }
                Some(Data::object(merged))
            }
            _ => None,
        },
        Some(existing) => {
            if !value.is_null() || existing.is_null() {
                Some(value)
            } else {
                None
            }
        }
    };
    if let Some(replacement) = replacement {
        built.insert(response_key.to_owned(), replacement);
    }
}

fn recycled_object(prev: Option<&Data>, built: IndexMap<String, Data>) -> Data {
    if let Some(Data::Object(prev_fields)) = prev {
        if prev_fields.len() == built.len()
            && built
                .iter()
                .all(|(key, value)| prev_fields.get(key).is_some_and(|p| p.ptr_eq(value)))
        {
            return Data::Object(prev_fields.clone());
        }
    }
    Data::object(built)
}

fn recycled_list(prev: Option<&Data>, items: Vec<Data>) -> Data {
    if let Some(Data::List(prev_items)) = prev {
        if prev_items.len() == items.len()
            && items
                .iter()
                .zip(prev_items.iter())
                .all(|(new, old)| old.ptr_eq(new))
        {
            return Data::List(prev_items.clone());
        }
    }
    Data::list(items)
}

#[cfg(test)]
mod tests {
    use super::normalize::normalize;
    use super::*;
    use crate::plan::compile;
    use serde_json_bytes::json;

    struct Harness {
        options: CacheOptions,
        graph: EntityGraph,
        layers: LayerStack,
        results: ResultCache,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_options(CacheOptions::new())
        }

        fn with_options(options: CacheOptions) -> Self {
            Harness {
                options,
                graph: EntityGraph::new(),
                layers: LayerStack::new(),
                results: ResultCache::new(),
            }
        }

        fn write(&mut self, source: &str, vars: JsonValue, data: JsonValue) -> TouchedSet {
            let plan = compile(source, None).unwrap();
            let vars = vars.as_object().cloned().unwrap_or_default();
            let touched = normalize(
                &self.options,
                &mut self.graph,
                &plan,
                &vars,
                data.as_object().unwrap(),
                &Key::root(),
            );
            self.results.mark_touched(&touched);
            touched
        }

        fn write_fragment(&mut self, id: &str, source: &str, data: JsonValue) -> TouchedSet {
            let plan = compile(source, None).unwrap();
            let touched = normalize(
                &self.options,
                &mut self.graph,
                &plan,
                &JsonMap::new(),
                data.as_object().unwrap(),
                &Key::from(id),
            );
            self.results.mark_touched(&touched);
            touched
        }

        fn read(&mut self, source: &str, vars: JsonValue, canonical: bool) -> ReadResult {
            let plan = compile(source, None).unwrap();
            let vars = vars.as_object().cloned().unwrap_or_default();
            materialize(
                MaterializeCtx {
                    options: &self.options,
                    graph: &self.graph,
                    layers: &self.layers,
                },
                &mut self.results,
                &plan,
                &Key::root(),
                &vars,
                canonical,
            )
        }
    }

    const USER_QUERY: &str = r#"
        query User($id: ID) {
          user(id: $id) { id name profile { id bio } }
        }
    "#;

    fn seed_user(harness: &mut Harness) {
        harness.write(
            USER_QUERY,
            json!({"id": "1"}),
            json!({
                "user": {
                    "__typename": "User", "id": "1", "name": "Alice",
                    "profile": {"__typename": "Profile", "id": "p1", "bio": "b"}
                }
            }),
        );
    }

    #[test]
    fn read_after_write_nested_entity() {
        let mut harness = Harness::new();
        seed_user(&mut harness);
        let result = harness.read(USER_QUERY, json!({"id": "1"}), true);
        assert_eq!(result.source, Source::Canonical);
        let data = result.data.unwrap();
        assert_eq!(
            data.at(&["user", "profile", "bio"]).and_then(Data::as_str),
            Some("b")
        );
        assert!(result.dependencies.contains("User:1"));
        assert!(result.dependencies.contains("Profile:p1"));
    }

    #[test]
    fn cache_miss_is_empty_with_source_none() {
        let mut harness = Harness::new();
        let result = harness.read(USER_QUERY, json!({"id": "1"}), true);
        assert_eq!(result.source, Source::None);
        assert!(result.data.is_none());
        // The missing link is still a dependency so arrival wakes readers.
        assert!(result
            .dependencies
            .contains(r#"@.user({"id":"1"})"#));
    }

    #[test]
    fn hot_results_skip_the_walk() {
        let mut harness = Harness::new();
        seed_user(&mut harness);
        let first = harness.read(USER_QUERY, json!({"id": "1"}), true);
        assert!(!first.hot);
        let second = harness.read(USER_QUERY, json!({"id": "1"}), true);
        assert!(second.hot);
        assert!(second.data.unwrap().ptr_eq(&first.data.unwrap()));
    }

    #[test]
    fn recycling_preserves_unrelated_subtrees() {
        let mut harness = Harness::new();
        seed_user(&mut harness);
        let r1 = harness.read(USER_QUERY, json!({"id": "1"}), true).data.unwrap();

        harness.write_fragment(
            "User:1",
            "fragment UserName on User { name }",
            json!({"name": "Alice Updated"}),
        );

        let r2 = harness.read(USER_QUERY, json!({"id": "1"}), true).data.unwrap();
        assert_eq!(
            r2.at(&["user", "name"]).and_then(Data::as_str),
            Some("Alice Updated")
        );
        assert!(r2
            .at(&["user", "profile"])
            .unwrap()
            .ptr_eq(r1.at(&["user", "profile"]).unwrap()));
        assert!(!r2.at(&["user"]).unwrap().ptr_eq(r1.at(&["user"]).unwrap()));
    }

    #[test]
    fn identical_rematerialization_recycles_the_root() {
        let mut harness = Harness::new();
        seed_user(&mut harness);
        let r1 = harness.read(USER_QUERY, json!({"id": "1"}), true).data.unwrap();
        // A write that touches nothing this plan depends on.
        harness.write(
            "{ other { __typename id tag } }",
            json!(null),
            json!({"other": {"__typename": "Other", "id": "o1", "tag": "t"}}),
        );
        let r2 = harness.read(USER_QUERY, json!({"id": "1"}), true).data.unwrap();
        assert!(r2.ptr_eq(&r1));
    }

    const POSTS_QUERY: &str = r#"
        query Posts($category: String, $first: Int, $after: String) {
          posts(category: $category, first: $first, after: $after) @connection {
            edges { cursor node { id title } }
            pageInfo { startCursor endCursor hasNextPage hasPreviousPage }
          }
        }
    "#;

    fn post(id: &str, title: &str) -> JsonValue {
        json!({"__typename": "Post", "id": id, "title": title})
    }

    fn page(posts: &[(&str, &str, &str)], end: &str, has_next: bool) -> JsonValue {
        json!({
            "posts": {
                "__typename": "PostConnection",
                "edges": posts.iter().map(|(id, title, cursor)| json!({
                    "__typename": "PostEdge", "cursor": cursor, "node": post(id, title)
                })).collect::<Vec<_>>(),
                "pageInfo": {
                    "__typename": "PageInfo",
                    "startCursor": posts.first().map(|p| p.2),
                    "endCursor": end,
                    "hasNextPage": has_next,
                    "hasPreviousPage": false
                }
            }
        })
    }

    fn edge_titles(data: &Data) -> Vec<String> {
        data.at(&["posts", "edges"])
            .and_then(Data::items)
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|e| e.at(&["node", "title"]).and_then(Data::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn canonical_union_and_strict_separation() {
        let mut harness = Harness::new();
        harness.write(
            POSTS_QUERY,
            json!({"category": "tech", "first": 2}),
            page(&[("p1", "one", "c1"), ("p2", "two", "c2")], "c2", true),
        );
        harness.write(
            POSTS_QUERY,
            json!({"category": "tech", "first": 2, "after": "c2"}),
            page(&[("p3", "three", "c3"), ("p4", "four", "c4")], "c4", false),
        );

        // Canonical: union of both pages under the filter identity.
        let canonical = harness
            .read(POSTS_QUERY, json!({"category": "tech"}), true)
            .data
            .unwrap();
        assert_eq!(edge_titles(&canonical), vec!["one", "two", "three", "four"]);

        // Strict: each window sees exactly its own page.
        let first_page = harness
            .read(POSTS_QUERY, json!({"category": "tech", "first": 2}), false)
            .data
            .unwrap();
        assert_eq!(edge_titles(&first_page), vec!["one", "two"]);
        let second_page = harness
            .read(
                POSTS_QUERY,
                json!({"category": "tech", "first": 2, "after": "c2"}),
                false,
            )
            .data
            .unwrap();
        assert_eq!(edge_titles(&second_page), vec!["three", "four"]);
    }

    #[test]
    fn canonical_dedup_updates_metadata_in_place() {
        let mut harness = Harness::new();
        harness.write(
            POSTS_QUERY,
            json!({"category": "tech", "first": 2}),
            page(&[("p1", "one", "c1"), ("p2", "two", "c2")], "c2", true),
        );
        harness.write(
            POSTS_QUERY,
            json!({"category": "tech", "first": 2, "after": "c2"}),
            page(&[("p3", "three", "c3"), ("p4", "four", "c4")], "c4", false),
        );
        // A page reintroducing p2 with an updated title.
        harness.write(
            POSTS_QUERY,
            json!({"category": "tech", "first": 2, "after": "c4"}),
            page(&[("p2", "two updated", "c2")], "c2", false),
        );

        let canonical = harness
            .read(POSTS_QUERY, json!({"category": "tech"}), true)
            .data
            .unwrap();
        assert_eq!(
            edge_titles(&canonical),
            vec!["one", "two updated", "three", "four"]
        );
    }

    #[test]
    fn missing_connection_yields_observably_empty_placeholder() {
        let mut harness = Harness::new();
        let result = harness.read(POSTS_QUERY, json!({"category": "tech"}), true);
        assert_eq!(result.source, Source::None);
        assert!(result
            .dependencies
            .contains(r#"@connection.posts({"category":"tech"})"#));
        assert!(result.data.is_none());

        // Once a page lands, the same read produces data.
        harness.write(
            POSTS_QUERY,
            json!({"category": "tech", "first": 1}),
            page(&[("p1", "one", "c1")], "c1", false),
        );
        let result = harness.read(POSTS_QUERY, json!({"category": "tech"}), true);
        assert_eq!(result.source, Source::Canonical);
        assert_eq!(edge_titles(&result.data.unwrap()), vec!["one"]);
    }

    #[test]
    fn interface_guard_dispatch() {
        let mut harness = Harness::with_options(
            CacheOptions::new().with_interface("Node", ["User", "Post"]),
        );
        let query = r#"{
            item { __typename ... on Node { id } ... on User { name } ... on Post { title } }
        }"#;
        harness.write(
            query,
            json!(null),
            json!({"item": {"__typename": "User", "id": "1", "name": "Alice"}}),
        );
        let data = harness.read(query, json!(null), true).data.unwrap();
        assert_eq!(data.at(&["item", "id"]).and_then(Data::as_str), Some("1"));
        assert_eq!(
            data.at(&["item", "name"]).and_then(Data::as_str),
            Some("Alice")
        );
        // The Post branch yields no data for a User record.
        assert!(data.at(&["item", "title"]).is_none());
    }

    #[test]
    fn cyclic_graphs_short_circuit() {
        let mut harness = Harness::new();
        let query = r#"{
            post { __typename id author { __typename id posts { __typename id author { id } } } }
        }"#;
        harness.write(
            query,
            json!(null),
            json!({
                "post": {
                    "__typename": "Post", "id": "p1",
                    "author": {
                        "__typename": "User", "id": "u1",
                        "posts": [{
                            "__typename": "Post", "id": "p1",
                            "author": {"__typename": "User", "id": "u1"}
                        }]
                    }
                }
            }),
        );
        let data = harness.read(query, json!(null), true).data.unwrap();
        assert_eq!(
            data.at(&["post", "author", "id"]).and_then(Data::as_str),
            Some("u1")
        );
        let nested = data.at(&["post", "author", "posts"]).unwrap();
        assert_eq!(nested.items().unwrap().len(), 1);
    }

    #[test]
    fn inline_objects_are_captured_verbatim() {
        let mut harness = Harness::new();
        let query = "{ user { __typename id settings { theme locale } } }";
        harness.write(
            query,
            json!(null),
            json!({
                "user": {
                    "__typename": "User", "id": "1",
                    "settings": {"theme": "dark", "locale": "en"}
                }
            }),
        );
        assert!(harness.graph.get("Settings:1").is_none());
        let data = harness.read(query, json!(null), true).data.unwrap();
        assert_eq!(
            data.at(&["user", "settings", "theme"]).and_then(Data::as_str),
            Some("dark")
        );
    }

    #[test]
    fn aliases_share_storage_by_field_identity() {
        let mut harness = Harness::new();
        harness.write(
            r#"{ me: user(id: "1") { __typename id name } }"#,
            json!(null),
            json!({"me": {"__typename": "User", "id": "1", "name": "Alice"}}),
        );
        let result = harness.read(
            r#"{ account: user(id: "1") { __typename id name } }"#,
            json!(null),
            true,
        );
        let data = result.data.unwrap();
        assert_eq!(
            data.at(&["account", "name"]).and_then(Data::as_str),
            Some("Alice")
        );
    }
}
