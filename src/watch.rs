//! Watcher bookkeeping: per-watcher dependency sets, the reverse index
//! from record key to interested watchers, and the dirty queue the cache
//! drains once per write burst. The drain itself lives in the facade,
//! which owns materialization; this module only tracks who needs waking.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexSet;
use tracing::trace;

use crate::error::CacheError;
use crate::graph::record::JsonMap;
use crate::graph::record::Key;
use crate::graph::TouchedSet;
use crate::materialize::Data;
use crate::materialize::ReadResult;
use crate::plan::Plan;

/// A reactive input: either a plain value or a zero-arg producer read anew
/// on every re-materialization. The host's reactivity adapter supplies
/// producers and calls `update` when they change.
#[derive(Clone)]
pub enum Input<T> {
    Static(T),
    Dynamic(Rc<dyn Fn() -> T>),
}

impl<T: Clone> Input<T> {
    pub fn get(&self) -> T {
        match self {
            Input::Static(value) => value.clone(),
            Input::Dynamic(producer) => producer(),
        }
    }
}

impl<T> Input<T> {
    pub fn dynamic(producer: impl Fn() -> T + 'static) -> Self {
        Input::Dynamic(Rc::new(producer))
    }
}

impl<T: fmt::Debug> fmt::Debug for Input<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Input::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

pub type DataCallback = Rc<dyn Fn(ReadResult)>;
pub type ErrorCallback = Rc<dyn Fn(CacheError)>;

/// Builder for `Cache::watch_query`.
pub struct Watch {
    pub(crate) variables: Input<JsonMap>,
    pub(crate) canonical: Input<bool>,
    pub(crate) enabled: Input<bool>,
    pub(crate) skip_initial: bool,
    pub(crate) on_data: DataCallback,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl Watch {
    pub fn new() -> Self {
        Watch {
            variables: Input::Static(JsonMap::new()),
            canonical: Input::Static(true),
            enabled: Input::Static(true),
            skip_initial: false,
            on_data: Rc::new(|_| {}),
            on_error: None,
        }
    }

    pub fn variables(mut self, variables: serde_json_bytes::Value) -> Self {
        self.variables = Input::Static(match variables {
            serde_json_bytes::Value::Object(map) => map,
            _ => JsonMap::new(),
        });
        self
    }

    pub fn variables_with(mut self, producer: impl Fn() -> JsonMap + 'static) -> Self {
        self.variables = Input::dynamic(producer);
        self
    }

    pub fn canonical(mut self, canonical: bool) -> Self {
        self.canonical = Input::Static(canonical);
        self
    }

    pub fn canonical_with(mut self, producer: impl Fn() -> bool + 'static) -> Self {
        self.canonical = Input::dynamic(producer);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Input::Static(enabled);
        self
    }

    pub fn enabled_with(mut self, producer: impl Fn() -> bool + 'static) -> Self {
        self.enabled = Input::dynamic(producer);
        self
    }

    pub fn skip_initial(mut self) -> Self {
        self.skip_initial = true;
        self
    }

    pub fn on_data(mut self, callback: impl Fn(ReadResult) + 'static) -> Self {
        self.on_data = Rc::new(callback);
        self
    }

    pub fn on_error(mut self, callback: impl Fn(CacheError) + 'static) -> Self {
        self.on_error = Some(Rc::new(callback));
        self
    }
}

impl Default for Watch {
    fn default() -> Self {
        Self::new()
    }
}

/// Replacement inputs for a live watcher.
#[derive(Default)]
pub struct WatchUpdate {
    pub variables: Option<Input<JsonMap>>,
    pub canonical: Option<Input<bool>>,
    pub enabled: Option<Input<bool>>,
    pub immediate: bool,
}

impl WatchUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variables(mut self, variables: serde_json_bytes::Value) -> Self {
        self.variables = Some(Input::Static(match variables {
            serde_json_bytes::Value::Object(map) => map,
            _ => JsonMap::new(),
        }));
        self
    }

    pub fn canonical(mut self, canonical: bool) -> Self {
        self.canonical = Some(Input::Static(canonical));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(Input::Static(enabled));
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

pub(crate) struct Watcher {
    pub plan: Arc<Plan>,
    pub variables: Input<JsonMap>,
    pub canonical: Input<bool>,
    pub enabled: Input<bool>,
    pub root: Key,
    pub on_data: DataCallback,
    pub on_error: Option<ErrorCallback>,
    pub deps: TouchedSet,
    pub snapshot: Option<Data>,
    /// Canonical signature of the watcher's current request family, used
    /// to route transport errors and gate stale generations.
    pub family: String,
}

#[derive(Default)]
pub(crate) struct WatchRegistry {
    watchers: HashMap<u64, Watcher>,
    dep_index: HashMap<Key, HashSet<u64>>,
    dirty: IndexSet<u64>,
    next_id: u64,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, watcher: Watcher) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        for dep in &watcher.deps {
            self.dep_index.entry(dep.clone()).or_default().insert(id);
        }
        self.watchers.insert(id, watcher);
        id
    }

    /// Atomic removal: the watcher disappears from the dep tables and any
    /// pending dirtiness, so an unsubscribed watcher can never fire.
    pub fn remove(&mut self, id: u64) -> Option<Watcher> {
        let watcher = self.watchers.remove(&id)?;
        for dep in &watcher.deps {
            if let Some(set) = self.dep_index.get_mut(dep) {
                set.remove(&id);
                if set.is_empty() {
                    self.dep_index.remove(dep);
                }
            }
        }
        self.dirty.shift_remove(&id);
        Some(watcher)
    }

    pub fn get(&self, id: u64) -> Option<&Watcher> {
        self.watchers.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Watcher> {
        self.watchers.get_mut(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.watchers.contains_key(&id)
    }

    pub fn update_deps(&mut self, id: u64, deps: TouchedSet) {
        let Some(watcher) = self.watchers.get_mut(&id) else {
            return;
        };
        for dep in &watcher.deps {
            if !deps.contains(dep) {
                if let Some(set) = self.dep_index.get_mut(dep) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.dep_index.remove(dep);
                    }
                }
            }
        }
        for dep in &deps {
            self.dep_index.entry(dep.clone()).or_default().insert(id);
        }
        watcher.deps = deps;
    }

    /// Marks every watcher whose dependency set intersects `touched`.
    pub fn mark_touched(&mut self, touched: &TouchedSet) {
        for key in touched {
            if let Some(ids) = self.dep_index.get(key) {
                for id in ids {
                    trace!(watcher = id, key = %key, "watcher marked dirty");
                    self.dirty.insert(*id);
                }
            }
        }
    }

    pub fn mark_dirty(&mut self, id: u64) {
        if self.watchers.contains_key(&id) {
            self.dirty.insert(id);
        }
    }

    pub fn take_next_dirty(&mut self) -> Option<u64> {
        self.dirty.shift_remove_index(0)
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Watchers whose current request family matches a canonical
    /// signature.
    pub fn family_members(&self, family: &str) -> Vec<u64> {
        self.watchers
            .iter()
            .filter(|(_, watcher)| watcher.family == family)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}
