use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use crate::exec::CachePolicy;
use crate::graph::record::JsonMap;

/// Derives the key value for one entity type. Returning `None` keeps the
/// object embedded in its parent instead of promoting it to a record.
pub type KeyExtractor = Rc<dyn Fn(&JsonMap) -> Option<String>>;

/// Cache-wide configuration.
#[derive(Clone)]
pub struct CacheOptions {
    /// Per-type key extractors. Types without an entry fall back to the
    /// `id` attribute.
    pub keys: HashMap<String, KeyExtractor>,
    /// Interface name to concrete implementors, used for type-condition
    /// dispatch in fragments and inline spreads.
    pub interfaces: HashMap<String, Vec<String>>,
    /// Default policy for `execute_query`.
    pub cache_policy: CachePolicy,
    /// How long a completed in-flight request keeps absorbing identical
    /// requests.
    pub suspension_timeout: Duration,
    /// How long reads stay cache-bound after `hydrate`.
    pub hydration_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
            interfaces: HashMap::new(),
            cache_policy: CachePolicy::CacheFirst,
            suspension_timeout: Duration::ZERO,
            hydration_timeout: Duration::ZERO,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(
        mut self,
        typename: impl Into<String>,
        extractor: impl Fn(&JsonMap) -> Option<String> + 'static,
    ) -> Self {
        self.keys.insert(typename.into(), Rc::new(extractor));
        self
    }

    pub fn with_interface(
        mut self,
        interface: impl Into<String>,
        implementors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.interfaces.insert(
            interface.into(),
            implementors.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_suspension_timeout(mut self, timeout: Duration) -> Self {
        self.suspension_timeout = timeout;
        self
    }

    pub fn with_hydration_timeout(mut self, timeout: Duration) -> Self {
        self.hydration_timeout = timeout;
        self
    }

    /// Whether a record of type `concrete` satisfies the type condition
    /// `condition`, directly or through the configured interface map.
    pub fn matches_type(&self, condition: &str, concrete: &str) -> bool {
        if condition == concrete {
            return true;
        }
        self.interfaces
            .get(condition)
            .is_some_and(|implementors| implementors.iter().any(|t| t == concrete))
    }
}

impl std::fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOptions")
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .field("interfaces", &self.interfaces)
            .field("cache_policy", &self.cache_policy)
            .field("suspension_timeout", &self.suspension_timeout)
            .field("hydration_timeout", &self.hydration_timeout)
            .finish()
    }
}
