//! Dehydration and hydration: the whole graph as an ordered list of
//! `{key, record}` entries, with refs encoded as `{"__ref": …}` markers so
//! a snapshot survives JSON transport between processes.

use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::Value as JsonValue;

use crate::graph::record::Key;
use crate::graph::record::Record;
use crate::graph::EntityGraph;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub record: JsonValue,
}

/// A serializable image of the graph. Entries are emitted sorted by key so
/// two dehydrations of the same graph are byte-identical.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub records: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub(crate) fn dehydrate(graph: &EntityGraph) -> Snapshot {
    let records = graph
        .keys()
        .sorted()
        .filter_map(|key| {
            graph.get(key.as_str()).map(|record| SnapshotEntry {
                key: key.as_str().to_owned(),
                record: record.to_json(),
            })
        })
        .collect();
    Snapshot { records }
}

pub(crate) fn decode(snapshot: &Snapshot) -> impl Iterator<Item = (Key, Record)> + '_ {
    snapshot
        .records
        .iter()
        .map(|entry| (Key::from(entry.key.as_str()), Record::from_json(&entry.record)))
}
