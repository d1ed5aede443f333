//! Canonical connection maintenance: applying a strict page write to the
//! filter-identified union record, with edge dedup on node identity,
//! order-preserving merges, and `pageInfo` extremes handling.

use indexmap::IndexMap;
use serde_json_bytes::Value as JsonValue;
use tracing::debug;

use crate::graph::keys;
use crate::graph::record::FieldValue;
use crate::graph::record::Key;
use crate::graph::record::Record;
use crate::graph::EntityGraph;
use crate::graph::TouchedSet;

/// How a page contributes to the canonical record, derived from its window
/// signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PageMode {
    Append,
    Prepend,
    Replace,
}

/// `after` present appends, `before` prepends, no cursor replaces. A plan
/// level `mode: "replace"` override wins over all of them.
pub(crate) fn page_mode(args: &IndexMap<String, JsonValue>, replace_override: bool) -> PageMode {
    if replace_override {
        return PageMode::Replace;
    }
    let present = |name: &str| args.get(name).is_some_and(|v| !v.is_null());
    if present("after") {
        PageMode::Append
    } else if present("before") {
        PageMode::Prepend
    } else {
        PageMode::Replace
    }
}

/// One strict page, ready to fold into its canonical record.
pub(crate) struct PageApplication {
    pub canonical: Key,
    /// Page edge record keys, in server order.
    pub edges: Vec<Key>,
    /// The page's `pageInfo` attributes.
    pub page_info: Option<Record>,
    /// Sibling attributes (totals, aggregations); overwritten from the
    /// latest contributing page.
    pub siblings: Record,
    pub mode: PageMode,
}

fn node_of(graph: &EntityGraph, edge: &Key) -> Option<Key> {
    graph
        .get(edge.as_str())
        .and_then(|record| record.get("node"))
        .and_then(FieldValue::as_ref_key)
        .cloned()
}

/// Merges a duplicate edge's metadata into the edge already holding its
/// node. The new edge's cursor and metadata win; the resident node ref and
/// the edge's position do not change.
fn merge_edge_metadata(graph: &mut EntityGraph, resident: &Key, incoming: &Key, touched: &mut TouchedSet) {
    if resident == incoming {
        return;
    }
    let Some(incoming_record) = graph.get(incoming.as_str()).cloned() else {
        return;
    };
    let mut partial = (*incoming_record).clone();
    partial.remove("node");
    graph.put(resident.clone(), partial, touched);
}

/// Applies one page to its canonical record.
pub(crate) fn apply_page(graph: &mut EntityGraph, page: PageApplication, touched: &mut TouchedSet) {
    let PageApplication {
        canonical,
        edges,
        page_info,
        siblings,
        mode,
    } = page;

    let existing: Vec<Key> = graph
        .get(canonical.as_str())
        .and_then(|record| record.get("edges"))
        .and_then(FieldValue::as_ref_list)
        .map(<[Key]>::to_vec)
        .unwrap_or_default();
    let was_empty = existing.is_empty();

    // Node identity of every edge already in the canonical order.
    let mut resident: IndexMap<Key, Key> = IndexMap::new();
    for edge in &existing {
        if let Some(node) = node_of(graph, edge) {
            resident.insert(node, edge.clone());
        }
    }

    // Dedup the page itself first: a node may not appear twice.
    let mut page_edges: Vec<(Key, Option<Key>)> = Vec::with_capacity(edges.len());
    for edge in edges {
        let node = node_of(graph, &edge);
        let holder = node.as_ref().and_then(|node_key| {
            page_edges
                .iter()
                .find(|(_, n)| n.as_ref() == Some(node_key))
                .map(|(e, _)| e.clone())
        });
        match holder {
            Some(holder) => merge_edge_metadata(graph, &holder, &edge, touched),
            None => page_edges.push((edge, node)),
        }
    }

    let merged: Vec<Key> = match mode {
        PageMode::Replace => page_edges.iter().map(|(edge, _)| edge.clone()).collect(),
        PageMode::Append => {
            let mut out = existing.clone();
            for (edge, node) in &page_edges {
                match node.as_ref().and_then(|n| resident.get(n)) {
                    Some(holder) => {
                        let holder = holder.clone();
                        merge_edge_metadata(graph, &holder, edge, touched);
                    }
                    None => {
                        if let Some(node) = node {
                            resident.insert(node.clone(), edge.clone());
                        }
                        out.push(edge.clone());
                    }
                }
            }
            out
        }
        PageMode::Prepend => {
            let mut fresh: Vec<Key> = Vec::new();
            for (edge, node) in &page_edges {
                match node.as_ref().and_then(|n| resident.get(n)) {
                    Some(holder) => {
                        let holder = holder.clone();
                        merge_edge_metadata(graph, &holder, edge, touched);
                    }
                    None => {
                        if let Some(node) = node {
                            resident.insert(node.clone(), edge.clone());
                        }
                        fresh.push(edge.clone());
                    }
                }
            }
            fresh.extend(existing.iter().cloned());
            fresh
        }
    };
    debug!(canonical = %canonical, mode = ?mode, edges = merged.len(), "canonical page applied");

    let info_key = keys::page_info_key(&canonical);
    let mut connection_record = Record::new();
    connection_record.insert("edges", FieldValue::RefList(merged));
    connection_record.insert("pageInfo", FieldValue::Ref(info_key.clone()));
    connection_record.merge_from(&siblings);
    graph.put(canonical, connection_record, touched);

    if let Some(info) = page_info {
        let partial = match mode {
            PageMode::Replace => info,
            PageMode::Append => {
                let mut partial = info.clone();
                if !was_empty {
                    // Left extreme stays with the leftmost contributing page.
                    partial.remove("startCursor");
                    partial.remove("hasPreviousPage");
                }
                partial
            }
            PageMode::Prepend => {
                let mut partial = info.clone();
                if !was_empty {
                    partial.remove("endCursor");
                    partial.remove("hasNextPage");
                }
                partial
            }
        };
        if mode == PageMode::Replace {
            graph.put_replace(info_key, partial, touched);
        } else {
            graph.put(info_key, partial, touched);
        }
    }
}
