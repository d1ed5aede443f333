//! The cache facade: one handle owning the entity graph, the optimistic
//! stack, the materializer caches, the watcher tables and the execution
//! pipeline. Every mutating entry point funnels through a single write
//! transaction that ends with one coalesced drain of dirty watchers.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::rc::Weak;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use serde_json_bytes::Value as JsonValue;
use tracing::debug;
use tracing::trace;

use crate::config::CacheOptions;
use crate::error::CacheError;
use crate::error::NetworkError;
use crate::error::PlanError;
use crate::exec::CachePolicy;
use crate::exec::Clock;
use crate::exec::ExecResult;
use crate::exec::GenerationTable;
use crate::exec::InflightTable;
use crate::exec::NetOutcome;
use crate::exec::SystemClock;
use crate::exec::Transport;
use crate::exec::TransportFuture;
use crate::exec::TransportRequest;
use crate::graph::keys;
use crate::graph::record::JsonMap;
use crate::graph::record::Key;
use crate::graph::EntityGraph;
use crate::graph::TouchedSet;
use crate::materialize::materialize;
use crate::materialize::normalize::normalize;
use crate::materialize::Data;
use crate::materialize::MaterializeCtx;
use crate::materialize::ReadResult;
use crate::materialize::ResultCache;
use crate::materialize::Source;
use crate::optimistic::LayerId;
use crate::optimistic::LayerStack;
use crate::optimistic::OptimisticEdit;
use crate::plan;
use crate::plan::Plan;
use crate::snapshot;
use crate::snapshot::Snapshot;
use crate::watch::ErrorCallback;
use crate::watch::Watch;
use crate::watch::Watcher;
use crate::watch::WatchRegistry;
use crate::watch::WatchUpdate;

/// Result of a facade write.
#[derive(Clone, Debug)]
pub struct WriteResult {
    pub touched: TouchedSet,
}

pub(crate) struct CacheState {
    pub(crate) options: CacheOptions,
    pub(crate) transport: Rc<dyn Transport>,
    pub(crate) graph: EntityGraph,
    pub(crate) layers: LayerStack,
    pub(crate) results: ResultCache,
    pub(crate) watchers: WatchRegistry,
    pub(crate) plans: HashMap<(String, Option<String>), Arc<Plan>>,
    pub(crate) inflight: InflightTable,
    pub(crate) generations: GenerationTable,
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) hydration_deadline: Option<Instant>,
    pub(crate) draining: bool,
}

impl CacheState {
    fn plan(&mut self, document: &str, fragment: Option<&str>) -> Result<Arc<Plan>, PlanError> {
        let key = (document.to_owned(), fragment.map(str::to_owned));
        if let Some(plan) = self.plans.get(&key) {
            return Ok(plan.clone());
        }
        let plan = plan::compile(document, fragment)?;
        self.plans.insert(key, plan.clone());
        Ok(plan)
    }

    fn hydrating(&self) -> bool {
        match self.hydration_deadline {
            Some(deadline) => self.clock.now() < deadline,
            None => false,
        }
    }

    fn read(&mut self, plan: &Plan, root: &Key, vars: &JsonMap, canonical: bool) -> ReadResult {
        let CacheState {
            options,
            graph,
            layers,
            results,
            ..
        } = self;
        materialize(
            MaterializeCtx {
                options,
                graph,
                layers,
            },
            results,
            plan,
            root,
            vars,
            canonical,
        )
    }
}

/// The client-side cache. Single-threaded: clones share one state.
#[derive(Clone)]
pub struct Cache {
    inner: Rc<RefCell<CacheState>>,
}

fn to_vars(value: JsonValue) -> JsonMap {
    match value {
        JsonValue::Object(map) => map,
        _ => JsonMap::new(),
    }
}

struct NoTransport;

impl Transport for NoTransport {
    fn execute(&self, _request: TransportRequest) -> TransportFuture {
        futures::future::ready(Err(NetworkError::new("no transport configured"))).boxed_local()
    }
}

impl Cache {
    /// A cache with no transport: every network path fails, all cache
    /// operations work.
    pub fn new(options: CacheOptions) -> Self {
        Self::with_transport(options, Rc::new(NoTransport))
    }

    pub fn with_transport(options: CacheOptions, transport: Rc<dyn Transport>) -> Self {
        Cache {
            inner: Rc::new(RefCell::new(CacheState {
                options,
                transport,
                graph: EntityGraph::new(),
                layers: LayerStack::new(),
                results: ResultCache::new(),
                watchers: WatchRegistry::new(),
                plans: HashMap::new(),
                inflight: InflightTable::new(),
                generations: GenerationTable::new(),
                clock: Rc::new(SystemClock),
                hydration_deadline: None,
                draining: false,
            })),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_clock(&self, clock: Rc<dyn Clock>) {
        self.inner.borrow_mut().clock = clock;
    }

    /// Applies the per-type key extractor to `attrs`.
    pub fn identify(&self, typename: &str, attrs: &JsonMap) -> Option<String> {
        keys::identify(&self.inner.borrow().options, typename, attrs)
    }

    /// Reads a query from the cache. A miss is `source: None`, never an
    /// error.
    pub fn read_query(
        &self,
        document: &str,
        variables: JsonValue,
        canonical: bool,
    ) -> Result<ReadResult, PlanError> {
        let vars = to_vars(variables);
        let mut state = self.inner.borrow_mut();
        let plan = state.plan(document, None)?;
        Ok(state.read(&plan, &Key::root(), &vars, canonical))
    }

    /// Writes a query-shaped payload into the graph.
    pub fn write_query(
        &self,
        document: &str,
        variables: JsonValue,
        data: JsonValue,
    ) -> Result<WriteResult, PlanError> {
        let vars = to_vars(variables);
        let touched = {
            let mut state = self.inner.borrow_mut();
            let plan = state.plan(document, None)?;
            let Some(payload) = data.as_object() else {
                return Ok(WriteResult {
                    touched: TouchedSet::new(),
                });
            };
            let CacheState {
                options, graph, ..
            } = &mut *state;
            normalize(options, graph, &plan, &vars, payload, &Key::root())
        };
        self.after_write(touched.clone());
        Ok(WriteResult { touched })
    }

    /// Materializes one entity through a fragment. `None` when the entity
    /// is absent.
    pub fn read_fragment(&self, id: &str, document: &str) -> Result<Option<Data>, PlanError> {
        let mut state = self.inner.borrow_mut();
        let plan = state.plan(document, None)?;
        let result = state.read(&plan, &Key::from(id), &JsonMap::new(), true);
        Ok(result.data)
    }

    /// Writes a partial entity through a fragment.
    pub fn write_fragment(
        &self,
        id: &str,
        document: &str,
        data: JsonValue,
    ) -> Result<WriteResult, PlanError> {
        let touched = {
            let mut state = self.inner.borrow_mut();
            let plan = state.plan(document, None)?;
            let Some(payload) = data.as_object() else {
                return Ok(WriteResult {
                    touched: TouchedSet::new(),
                });
            };
            let CacheState {
                options, graph, ..
            } = &mut *state;
            normalize(options, graph, &plan, &JsonMap::new(), payload, &Key::from(id))
        };
        self.after_write(touched.clone());
        Ok(WriteResult { touched })
    }

    /// Subscribes to a query. The watcher emits an initial snapshot
    /// (unless `skip_initial`) and re-emits whenever a write changes any
    /// record its result depends on.
    pub fn watch_query(&self, document: &str, watch: Watch) -> Result<WatchHandle, PlanError> {
        self.watch_internal(document, Key::root(), watch)
    }

    /// Subscribes to one entity through a fragment. Fragment and query
    /// watchers share the same dependency tables and drain.
    pub fn watch_fragment(
        &self,
        id: &str,
        document: &str,
        watch: Watch,
    ) -> Result<WatchHandle, PlanError> {
        self.watch_internal(document, Key::from(id), watch)
    }

    fn watch_internal(
        &self,
        document: &str,
        root: Key,
        watch: Watch,
    ) -> Result<WatchHandle, PlanError> {
        let Watch {
            variables,
            canonical,
            enabled,
            skip_initial,
            on_data,
            on_error,
        } = watch;
        let vars = variables.get();
        let canonical_now = canonical.get();
        let (id, initial, callback) = {
            let mut state = self.inner.borrow_mut();
            let plan = state.plan(document, None)?;
            let result = state.read(&plan, &root, &vars, canonical_now);
            let family = plan.make_signature(true, &vars);
            let watcher = Watcher {
                plan,
                variables,
                canonical,
                enabled,
                root,
                on_data: on_data.clone(),
                on_error,
                deps: result.dependencies.clone(),
                snapshot: result.data.clone(),
                family,
            };
            let id = state.watchers.insert(watcher);
            (id, result, on_data)
        };
        if !skip_initial {
            callback(initial);
        }
        Ok(WatchHandle {
            state: Rc::downgrade(&self.inner),
            id,
        })
    }

    /// Opens an optimistic transaction. The layer is visible as soon as
    /// this returns; `commit` finalizes it, `revert` removes it.
    pub fn modify_optimistic(&self, f: impl FnOnce(&mut OptimisticEdit<'_>)) -> OptimisticTx {
        let (id, touched) = {
            let mut state = self.inner.borrow_mut();
            let id = state.layers.next_layer_id();
            let layer = {
                let state = &*state;
                let mut edit =
                    OptimisticEdit::new(&state.options, &state.graph, &state.layers, id);
                f(&mut edit);
                edit.layer
            };
            let touched = state.layers.push(layer);
            (id, touched)
        };
        self.after_write(touched);
        OptimisticTx {
            state: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Serializes the confirmed (non-optimistic) graph.
    pub fn dehydrate(&self) -> Snapshot {
        snapshot::dehydrate(&self.inner.borrow().graph)
    }

    /// Replaces the graph contents with a snapshot and, when a
    /// `hydration_timeout` is configured, opens the hydration window:
    /// reads stay cache-bound and no transport is called until it lapses.
    pub fn hydrate(&self, snapshot: &Snapshot) {
        let touched = {
            let mut state = self.inner.borrow_mut();
            let touched = state.graph.replace_all(snapshot::decode(snapshot));
            state.results.invalidate_all();
            if state.options.hydration_timeout > Duration::ZERO {
                let deadline = state.clock.now() + state.options.hydration_timeout;
                state.hydration_deadline = Some(deadline);
            }
            debug!(records = snapshot.len(), "hydrated");
            touched
        };
        self.after_write(touched);
    }

    /// Ends the hydration window explicitly.
    pub fn end_hydration(&self) {
        self.inner.borrow_mut().hydration_deadline = None;
    }

    /// Cancels an in-flight request: the fingerprint leaves the dedup
    /// table, and the transport future is dropped once no caller still
    /// awaits it. Data it already wrote stays.
    pub fn cancel_query(&self, document: &str, variables: JsonValue) -> Result<(), PlanError> {
        let vars = to_vars(variables);
        let mut state = self.inner.borrow_mut();
        let plan = state.plan(document, None)?;
        let signature = plan.make_signature(false, &vars);
        state.inflight.remove(&signature);
        Ok(())
    }

    /// Executes a query through the policy pipeline. The future resolves
    /// after the cache (and, when the policy asks for it, the network)
    /// have been consulted; watcher emissions are driven by the same
    /// completion.
    pub fn execute_query(
        &self,
        document: &str,
        variables: JsonValue,
        policy: Option<CachePolicy>,
    ) -> LocalBoxFuture<'static, ExecResult> {
        let vars = to_vars(variables);
        let plan = match self.inner.borrow_mut().plan(document, None) {
            Ok(plan) => plan,
            Err(error) => {
                return futures::future::ready(ExecResult {
                    data: None,
                    error: Some(CacheError::Plan(error)),
                    source: Source::None,
                })
                .boxed_local()
            }
        };

        let resolved_policy = {
            let mut state = self.inner.borrow_mut();
            if state.hydrating() {
                if policy == Some(CachePolicy::NetworkOnly) {
                    // An explicit network-only request opts out and ends
                    // the window.
                    state.hydration_deadline = None;
                } else {
                    trace!(plan_id = plan.plan_id, "hydration window read");
                    let strict = state.read(&plan, &Key::root(), &vars, false);
                    let result = if strict.source != Source::None {
                        strict
                    } else {
                        state.read(&plan, &Key::root(), &vars, true)
                    };
                    return futures::future::ready(ExecResult {
                        data: result.data,
                        error: None,
                        source: result.source,
                    })
                    .boxed_local();
                }
            }
            policy.unwrap_or(state.options.cache_policy)
        };

        match resolved_policy {
            CachePolicy::CacheOnly => {
                let result = self.read_with_plan(&plan, &vars, true);
                futures::future::ready(ExecResult {
                    data: result.data,
                    error: None,
                    source: result.source,
                })
                .boxed_local()
            }
            CachePolicy::CacheFirst => {
                let result = self.read_with_plan(&plan, &vars, true);
                if result.source != Source::None {
                    futures::future::ready(ExecResult {
                        data: result.data,
                        error: None,
                        source: result.source,
                    })
                    .boxed_local()
                } else {
                    self.network(plan, vars)
                }
            }
            CachePolicy::CacheAndNetwork => {
                // Cached data is already flowing to watchers; the future
                // itself resolves with the post-network state.
                let _ = self.read_with_plan(&plan, &vars, true);
                self.network(plan, vars)
            }
            CachePolicy::NetworkOnly => self.network(plan, vars),
        }
    }

    /// Executes a mutation: straight to the network, normalize on success.
    /// Mutations are never deduped and never generation-gated.
    pub fn execute_mutation(
        &self,
        document: &str,
        variables: JsonValue,
    ) -> LocalBoxFuture<'static, ExecResult> {
        let vars = to_vars(variables);
        let plan = match self.inner.borrow_mut().plan(document, None) {
            Ok(plan) => plan,
            Err(error) => {
                return futures::future::ready(ExecResult {
                    data: None,
                    error: Some(CacheError::Plan(error)),
                    source: Source::None,
                })
                .boxed_local()
            }
        };
        let request = TransportRequest {
            query: plan.query.clone(),
            variables: vars.clone(),
            operation_name: plan.operation_name.clone(),
        };
        let transport = self.inner.borrow().transport.clone();
        let transport_future = transport.execute(request);
        let weak = Rc::downgrade(&self.inner);
        async move {
            let outcome = transport_future.await;
            let Some(inner) = weak.upgrade() else {
                return ExecResult::miss();
            };
            let cache = Cache { inner };
            match outcome {
                Ok(payload) => {
                    let touched = {
                        let mut state = cache.inner.borrow_mut();
                        let CacheState {
                            options, graph, ..
                        } = &mut *state;
                        normalize(options, graph, &plan, &vars, &payload, &Key::root())
                    };
                    cache.after_write(touched);
                    let result = cache.read_with_plan(&plan, &vars, true);
                    ExecResult {
                        data: result.data,
                        error: None,
                        source: result.source,
                    }
                }
                Err(error) => ExecResult::failed(error),
            }
        }
        .boxed_local()
    }

    fn read_with_plan(&self, plan: &Plan, vars: &JsonMap, canonical: bool) -> ReadResult {
        self.inner
            .borrow_mut()
            .read(plan, &Key::root(), vars, canonical)
    }

    /// The in-flight dedup + latest-wins network path shared by the
    /// query policies.
    fn network(&self, plan: Arc<Plan>, vars: JsonMap) -> LocalBoxFuture<'static, ExecResult> {
        let weak = Rc::downgrade(&self.inner);
        let strict_sig = plan.make_signature(false, &vars);
        let existing = {
            let mut state = self.inner.borrow_mut();
            let now = state.clock.now();
            let window = state.options.suspension_timeout;
            state.inflight.lookup(&strict_sig, now, window)
        };
        let shared = match existing {
            Some(shared) => {
                trace!(signature = %strict_sig, "in-flight dedup hit");
                shared
            }
            None => {
                let family = plan.make_signature(true, &vars);
                let (transport, generation) = {
                    let mut state = self.inner.borrow_mut();
                    (state.transport.clone(), state.generations.begin(&family))
                };
                let cursor_page = is_cursor_page(&plan, &vars);
                let request = TransportRequest {
                    query: plan.query.clone(),
                    variables: vars.clone(),
                    operation_name: plan.operation_name.clone(),
                };
                // The transport is user code; it must not run under a
                // state borrow.
                let transport_future = transport.execute(request);
                let completed_at = Rc::new(Cell::new(None));
                let completion_stamp = completed_at.clone();
                let weak_for_request = weak.clone();
                let plan_for_request = plan.clone();
                let vars_for_request = vars.clone();
                let shared = async move {
                    let outcome = transport_future.await;
                    let Some(inner) = weak_for_request.upgrade() else {
                        return NetOutcome {
                            error: outcome.err(),
                            stale: true,
                            cursor_page,
                        };
                    };
                    Cache { inner }.complete_request(
                        &plan_for_request,
                        &vars_for_request,
                        &family,
                        generation,
                        outcome,
                        completion_stamp,
                        cursor_page,
                    )
                }
                .boxed_local()
                .shared();
                self.inner
                    .borrow_mut()
                    .inflight
                    .insert(strict_sig, shared.clone(), completed_at);
                shared
            }
        };

        async move {
            let outcome = shared.await;
            let Some(inner) = weak.upgrade() else {
                return ExecResult::miss();
            };
            let cache = Cache { inner };
            match outcome.error {
                Some(error) if !outcome.stale => ExecResult {
                    data: None,
                    error: Some(CacheError::Network(error)),
                    source: Source::None,
                },
                // Stale completions (data or error) resolve silently with
                // the current cache state.
                _ => {
                    let result = cache.read_with_plan(&plan, &vars, true);
                    ExecResult {
                        data: result.data,
                        error: None,
                        source: result.source,
                    }
                }
            }
        }
        .boxed_local()
    }

    /// Runs once per in-flight request, in whichever awaiter polls it to
    /// completion: stamps the suspension window, applies latest-wins
    /// gating, normalizes fresh data, and routes errors to watchers.
    #[allow(clippy::too_many_arguments)]
    fn complete_request(
        &self,
        plan: &Plan,
        vars: &JsonMap,
        family: &str,
        generation: u64,
        outcome: Result<JsonMap, NetworkError>,
        completed_at: Rc<Cell<Option<Instant>>>,
        cursor_page: bool,
    ) -> NetOutcome {
        {
            let state = self.inner.borrow();
            completed_at.set(Some(state.clock.now()));
        }
        let stale = !self
            .inner
            .borrow()
            .generations
            .is_latest(family, generation);
        match outcome {
            Ok(payload) => {
                if stale {
                    debug!(family = %family, generation, "stale response dropped");
                    return NetOutcome {
                        error: None,
                        stale: true,
                        cursor_page,
                    };
                }
                let touched = {
                    let mut state = self.inner.borrow_mut();
                    let CacheState {
                        options, graph, ..
                    } = &mut *state;
                    normalize(options, graph, plan, vars, &payload, &Key::root())
                };
                self.after_write(touched);
                NetOutcome {
                    error: None,
                    stale: false,
                    cursor_page,
                }
            }
            Err(error) => {
                if stale {
                    debug!(family = %family, generation, "stale error dropped");
                    return NetOutcome {
                        error: Some(error),
                        stale: true,
                        cursor_page,
                    };
                }
                if cursor_page {
                    // A failed cursor page never disturbs the base page's
                    // data or its watchers.
                    debug!(family = %family, "cursor page error dropped");
                } else {
                    self.notify_error(family, &error);
                }
                NetOutcome {
                    error: Some(error),
                    stale: false,
                    cursor_page,
                }
            }
        }
    }

    fn notify_error(&self, family: &str, error: &NetworkError) {
        let callbacks: Vec<ErrorCallback> = {
            let state = self.inner.borrow();
            state
                .watchers
                .family_members(family)
                .into_iter()
                .filter_map(|id| state.watchers.get(id).and_then(|w| w.on_error.clone()))
                .collect()
        };
        for callback in callbacks {
            callback(CacheError::Network(error.clone()));
        }
    }

    /// Ends a write transaction: invalidates dependent results, marks
    /// dependent watchers, and drains the dirty queue exactly once per
    /// write burst (writes performed by callbacks fold into the same
    /// drain).
    pub(crate) fn after_write(&self, touched: TouchedSet) {
        if touched.is_empty() {
            return;
        }
        let should_drain = {
            let mut state = self.inner.borrow_mut();
            state.results.mark_touched(&touched);
            state.watchers.mark_touched(&touched);
            if state.draining || !state.watchers.has_dirty() {
                false
            } else {
                state.draining = true;
                true
            }
        };
        if should_drain {
            self.drain();
        }
    }

    fn drain(&self) {
        loop {
            let next = self.inner.borrow_mut().watchers.take_next_dirty();
            let Some(id) = next else {
                self.inner.borrow_mut().draining = false;
                return;
            };
            self.refresh_watcher(id);
        }
    }

    /// Re-materializes one watcher and emits iff the snapshot changed by
    /// structural-recycling identity.
    pub(crate) fn refresh_watcher(&self, id: u64) {
        let inputs = {
            let state = self.inner.borrow();
            state.watchers.get(id).map(|watcher| {
                (
                    watcher.plan.clone(),
                    watcher.variables.clone(),
                    watcher.canonical.clone(),
                    watcher.enabled.clone(),
                    watcher.root.clone(),
                )
            })
        };
        let Some((plan, variables, canonical, enabled, root)) = inputs else {
            return;
        };
        // Dynamic producers run outside any borrow.
        if !enabled.get() {
            return;
        }
        let vars = variables.get();
        let canonical_now = canonical.get();

        let emission = {
            let mut state = self.inner.borrow_mut();
            if !state.watchers.contains(id) {
                return;
            }
            let result = state.read(&plan, &root, &vars, canonical_now);
            state.watchers.update_deps(id, result.dependencies.clone());
            let Some(watcher) = state.watchers.get_mut(id) else {
                return;
            };
            watcher.family = plan.make_signature(true, &vars);
            let changed = match (&watcher.snapshot, &result.data) {
                (Some(previous), Some(next)) => !previous.ptr_eq(next),
                (None, None) => false,
                _ => true,
            };
            watcher.snapshot = result.data.clone();
            if changed {
                Some((watcher.on_data.clone(), result))
            } else {
                None
            }
        };
        if let Some((callback, result)) = emission {
            trace!(watcher = id, "watcher emission");
            callback(result);
        }
    }
}

fn is_cursor_page(plan: &Plan, vars: &JsonMap) -> bool {
    plan.fields.iter().any(|field| {
        if !field.is_connection {
            return false;
        }
        let args = field.build_args(vars);
        let cursor = |name: &str| args.get(name).is_some_and(|v| !v.is_null());
        cursor("after") || cursor("before")
    })
}

/// Handle to a live watcher.
pub struct WatchHandle {
    state: Weak<RefCell<CacheState>>,
    id: u64,
}

impl WatchHandle {
    /// Atomic removal: a watcher marked dirty but unsubscribed before the
    /// drain is dropped without firing.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.state.upgrade() {
            inner.borrow_mut().watchers.remove(self.id);
        }
    }

    /// Replaces the watcher's reactive inputs; `immediate` re-materializes
    /// now instead of waiting for the next touched event.
    pub fn update(&self, update: WatchUpdate) {
        let Some(inner) = self.state.upgrade() else {
            return;
        };
        {
            let mut state = inner.borrow_mut();
            let Some(watcher) = state.watchers.get_mut(self.id) else {
                return;
            };
            if let Some(variables) = update.variables {
                watcher.variables = variables;
            }
            if let Some(canonical) = update.canonical {
                watcher.canonical = canonical;
            }
            if let Some(enabled) = update.enabled {
                watcher.enabled = enabled;
            }
        }
        if update.immediate {
            Cache { inner }.refresh_watcher(self.id);
        }
    }
}

/// Handle to one optimistic layer.
pub struct OptimisticTx {
    state: Weak<RefCell<CacheState>>,
    id: LayerId,
}

impl OptimisticTx {
    /// Finalizes the layer (it was already visible). Dependents are
    /// notified so they can re-validate.
    pub fn commit(&self) {
        let Some(inner) = self.state.upgrade() else {
            return;
        };
        let touched = inner.borrow_mut().layers.commit(self.id);
        if let Some(touched) = touched {
            Cache { inner }.after_write(touched);
        }
    }

    /// Removes only this layer; later layers keep applying.
    pub fn revert(&self) {
        let Some(inner) = self.state.upgrade() else {
            return;
        };
        let touched = inner.borrow_mut().layers.revert(self.id);
        if let Some(touched) = touched {
            Cache { inner }.after_write(touched);
        }
    }
}
