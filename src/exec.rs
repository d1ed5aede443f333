//! Execution pipeline plumbing: cache policies, the transport contract,
//! the in-flight dedup table (suspension window), the per-family request
//! generations behind latest-wins gating, and the clock the timed windows
//! are measured against. The policy orchestration itself lives in the
//! facade, which owns the state all of this gates.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use std::time::Instant;

use futures::future::LocalBoxFuture;
use futures::future::Shared;

use crate::error::CacheError;
use crate::error::NetworkError;
use crate::graph::record::JsonMap;
use crate::materialize::Data;
use crate::materialize::Source;

/// Request policy for `execute_query`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString,
)]
pub enum CachePolicy {
    #[strum(serialize = "cache-first")]
    CacheFirst,
    #[strum(serialize = "cache-only")]
    CacheOnly,
    #[strum(serialize = "network-only")]
    NetworkOnly,
    #[strum(serialize = "cache-and-network")]
    CacheAndNetwork,
}

/// What the cache hands the transport. No framing, batching or retry
/// semantics are prescribed beyond this shape.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub query: String,
    pub variables: JsonMap,
    pub operation_name: Option<String>,
}

pub type TransportFuture = LocalBoxFuture<'static, Result<JsonMap, NetworkError>>;

/// The remote service: one call, one data-or-error response.
pub trait Transport {
    fn execute(&self, request: TransportRequest) -> TransportFuture;
}

/// Resolution of `execute_query` / `execute_mutation`.
#[derive(Clone, Debug)]
pub struct ExecResult {
    pub data: Option<Data>,
    pub error: Option<CacheError>,
    pub source: Source,
}

impl ExecResult {
    pub(crate) fn miss() -> Self {
        ExecResult {
            data: None,
            error: None,
            source: Source::None,
        }
    }

    pub(crate) fn failed(error: NetworkError) -> Self {
        ExecResult {
            data: None,
            error: Some(CacheError::Network(error)),
            source: Source::None,
        }
    }
}

/// Time source. Timed windows are evaluated lazily against this, so tests
/// substitute a manual clock and never sleep.
pub(crate) trait Clock {
    fn now(&self) -> Instant;
}

pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// What a shared in-flight request broadcasts to every awaiter. Data is
/// not carried here: each awaiter re-reads the cache for its own view
/// after the normalize has happened exactly once.
#[derive(Clone, Debug)]
pub(crate) struct NetOutcome {
    pub error: Option<NetworkError>,
    /// A newer generation for the same family started before this one
    /// completed; nothing was normalized.
    pub stale: bool,
    /// The request windowed past a cursor; errors are dropped without
    /// watcher notification.
    pub cursor_page: bool,
}

pub(crate) type SharedRequest = Shared<LocalBoxFuture<'static, NetOutcome>>;

struct InflightEntry {
    shared: SharedRequest,
    completed_at: Rc<Cell<Option<Instant>>>,
}

/// In-flight dedup, keyed by strict signature. An entry absorbs identical
/// requests while pending and for `suspension_timeout` after completion.
#[derive(Default)]
pub(crate) struct InflightTable {
    entries: HashMap<String, InflightEntry>,
}

impl InflightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry for a signature, evicting it when its suspension window
    /// has lapsed.
    pub fn lookup(&mut self, signature: &str, now: Instant, window: Duration) -> Option<SharedRequest> {
        let expired = match self.entries.get(signature) {
            Some(entry) => match entry.completed_at.get() {
                Some(done) => now.saturating_duration_since(done) > window,
                None => false,
            },
            None => return None,
        };
        if expired {
            self.entries.remove(signature);
            return None;
        }
        self.entries.get(signature).map(|entry| entry.shared.clone())
    }

    pub fn insert(
        &mut self,
        signature: String,
        shared: SharedRequest,
        completed_at: Rc<Cell<Option<Instant>>>,
    ) {
        self.entries.insert(
            signature,
            InflightEntry {
                shared,
                completed_at,
            },
        );
    }

    /// Cancellation: drops the fingerprint (and with it the transport
    /// future, once no awaiter holds a clone).
    pub fn remove(&mut self, signature: &str) {
        self.entries.remove(signature);
    }
}

/// Monotonic request generations per canonical-signature family. Only the
/// latest generation of a family may normalize its response.
#[derive(Default)]
pub(crate) struct GenerationTable {
    latest: HashMap<String, u64>,
    counter: u64,
}

impl GenerationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, family: &str) -> u64 {
        self.counter += 1;
        self.latest.insert(family.to_owned(), self.counter);
        self.counter
    }

    pub fn is_latest(&self, family: &str, generation: u64) -> bool {
        self.latest.get(family) == Some(&generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn outcome() -> NetOutcome {
        NetOutcome {
            error: None,
            stale: false,
            cursor_page: false,
        }
    }

    fn shared() -> SharedRequest {
        async { outcome() }.boxed_local().shared()
    }

    #[test]
    fn inflight_entries_expire_after_the_window() {
        let mut table = InflightTable::new();
        let t0 = Instant::now();
        let completed = Rc::new(Cell::new(None));
        table.insert("sig".into(), shared(), completed.clone());

        // Pending entries never expire.
        assert!(table
            .lookup("sig", t0 + Duration::from_secs(60), Duration::ZERO)
            .is_some());

        completed.set(Some(t0));
        let window = Duration::from_millis(1000);
        assert!(table
            .lookup("sig", t0 + Duration::from_millis(10), window)
            .is_some());
        assert!(table
            .lookup("sig", t0 + Duration::from_millis(1500), window)
            .is_none());
        // Eviction is sticky: the entry is gone, not just hidden.
        assert!(table
            .lookup("sig", t0 + Duration::from_millis(10), window)
            .is_none());
    }

    #[test]
    fn generations_gate_older_requests() {
        let mut generations = GenerationTable::new();
        let a = generations.begin("family");
        let b = generations.begin("family");
        let other = generations.begin("elsewhere");
        assert!(!generations.is_latest("family", a));
        assert!(generations.is_latest("family", b));
        assert!(generations.is_latest("elsewhere", other));
    }

    #[test]
    fn policy_names_round_trip() {
        use std::str::FromStr;
        assert_eq!(CachePolicy::CacheFirst.to_string(), "cache-first");
        assert_eq!(
            CachePolicy::from_str("cache-and-network").unwrap(),
            CachePolicy::CacheAndNetwork
        );
        assert_eq!(
            CachePolicy::from_str("network-only").unwrap(),
            CachePolicy::NetworkOnly
        );
    }
}
