//! The plan compiler: lowers a query/mutation/fragment document into an
//! immutable, fingerprinted plan with precompiled argument builders, a
//! network-safe query string, and per-mode variable masks.

pub(crate) mod arguments;
mod compile;
mod fingerprint;

use std::collections::HashSet;

use apollo_compiler::ast;
use apollo_compiler::Node;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use serde_json_bytes::Value as JsonValue;

pub use compile::compile;
pub use compile::compile_document;

use crate::graph::keys;
use crate::graph::record::JsonMap;
use crate::graph::record::Key;
use crate::graph::TouchedSet;

lazy_static! {
    /// Argument names that express a pagination window. They participate in
    /// strict page identity but never in canonical (filter) identity.
    pub static ref WINDOW_ARGS: HashSet<&'static str> =
        ["first", "last", "after", "before", "offset", "limit"]
            .into_iter()
            .collect();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum OperationKind {
    #[strum(to_string = "query")]
    Query,
    #[strum(to_string = "mutation")]
    Mutation,
    #[strum(to_string = "subscription")]
    Subscription,
    #[strum(to_string = "fragment")]
    Fragment,
}

/// One lowered field of a plan. Named fragments have been expanded and
/// equivalent selections merged before this exists.
#[derive(Clone, Debug)]
pub struct PlanField {
    pub response_key: String,
    pub name: String,
    /// Type condition inherited from an enclosing inline fragment or named
    /// spread, if any.
    pub type_guard: Option<String>,
    /// Argument AST retained for on-demand evaluation, in document order.
    pub arguments: Vec<(String, Node<ast::Value>)>,
    pub arg_names: Vec<String>,
    pub is_connection: bool,
    /// `@connection(key:)` override for canonical identity.
    pub connection_key: Option<String>,
    /// `@connection(filters:)`; `None` infers expected args minus window args.
    pub connection_filters: Option<Vec<String>>,
    /// `@connection(mode: "replace")`: every page overwrites the canonical.
    pub replace_mode: bool,
    pub children: Vec<PlanField>,
    /// Response-key index into `children` (first occurrence).
    pub index: IndexMap<String, usize>,
}

impl PlanField {
    /// Evaluates the field's arguments against `vars`, dropping undefined
    /// entries.
    pub fn build_args(&self, vars: &JsonMap) -> IndexMap<String, JsonValue> {
        arguments::build_args(&self.arguments, vars)
    }

    /// Stable JSON text of the evaluated arguments.
    pub fn stringify_args(&self, vars: &JsonMap) -> String {
        keys::stable_args(&self.build_args(vars))
    }

    /// Attribute name this field is stored under in its parent record.
    pub fn storage_key(&self, vars: &JsonMap) -> String {
        if self.arguments.is_empty() {
            self.name.clone()
        } else {
            keys::field_storage_key(&self.name, Some(&self.stringify_args(vars)))
        }
    }

    /// Connection identity name: the `@connection(key:)` override or the
    /// field name.
    pub fn connection_name(&self) -> &str {
        self.connection_key.as_deref().unwrap_or(&self.name)
    }

    /// The arguments participating in canonical (filter) identity.
    pub fn filter_args(&self, vars: &JsonMap) -> IndexMap<String, JsonValue> {
        let args = self.build_args(vars);
        match &self.connection_filters {
            Some(filters) => args
                .into_iter()
                .filter(|(name, _)| filters.iter().any(|f| f == name))
                .collect(),
            None => args
                .into_iter()
                .filter(|(name, _)| !WINDOW_ARGS.contains(name.as_str()))
                .collect(),
        }
    }

    pub fn filters_json(&self, vars: &JsonMap) -> String {
        keys::stable_args(&self.filter_args(vars))
    }

    /// Strict page key for this connection under `parent`.
    pub fn page_key(&self, parent: &Key, vars: &JsonMap) -> Key {
        keys::page_key(parent, &self.name, &self.stringify_args(vars))
    }

    /// Canonical connection key for this connection under `parent`.
    pub fn canonical_key(&self, parent: &Key, vars: &JsonMap) -> Key {
        keys::canonical_key(parent, self.connection_name(), &self.filters_json(vars))
    }

    pub fn child(&self, response_key: &str) -> Option<&PlanField> {
        self.index.get(response_key).map(|i| &self.children[*i])
    }
}

/// A compiled document. Immutable; shared behind `Arc`.
#[derive(Clone, Debug)]
pub struct Plan {
    pub operation: OperationKind,
    pub operation_name: Option<String>,
    pub root_typename: String,
    pub fields: Vec<PlanField>,
    /// Response-key index into `fields` (first occurrence).
    pub index: IndexMap<String, usize>,
    /// Network-safe document text: `__typename` added to every non-root
    /// selection set, cache-only directives stripped.
    pub query: String,
    /// FNV-1a-32 of the structural fingerprint.
    pub plan_id: u32,
    /// All declared (or, for fragments, used) variable names, sorted.
    pub strict_mask: Vec<String>,
    /// `strict_mask` minus variables bound to window arguments.
    pub canonical_mask: Vec<String>,
    /// Window argument names used by this plan's connection fields.
    pub window_args: Vec<String>,
}

impl Plan {
    pub fn mask(&self, canonical: bool) -> &[String] {
        if canonical {
            &self.canonical_mask
        } else {
            &self.strict_mask
        }
    }

    /// Stable JSON over the requested variable mask.
    pub fn make_vars_key(&self, canonical: bool, vars: &JsonMap) -> String {
        let mut masked = IndexMap::new();
        for name in self.mask(canonical) {
            if let Some(value) = vars.get(name.as_str()) {
                masked.insert(name.clone(), value.clone());
            }
        }
        keys::stable_args(&masked)
    }

    /// `<plan_id>|<mode>|<vars_key>`: unique identity of a canonical or
    /// strict result of this plan.
    pub fn make_signature(&self, canonical: bool, vars: &JsonMap) -> String {
        format!(
            "{}|{}|{}",
            self.plan_id,
            if canonical { "canonical" } else { "strict" },
            self.make_vars_key(canonical, vars)
        )
    }

    /// Root dependency keys touched by this plan for the supplied
    /// variables.
    pub fn get_dependencies(&self, canonical: bool, vars: &JsonMap) -> TouchedSet {
        let root = Key::root();
        let mut deps = TouchedSet::new();
        deps.insert(root.clone());
        for field in &self.fields {
            if field.is_connection {
                if canonical {
                    deps.insert(field.canonical_key(&root, vars));
                } else {
                    deps.insert(field.page_key(&root, vars));
                }
            } else if !field.arguments.is_empty() {
                deps.insert(keys::link_key(
                    &root,
                    &field.name,
                    &field.stringify_args(vars),
                ));
            }
        }
        deps
    }

    pub fn field(&self, response_key: &str) -> Option<&PlanField> {
        self.index.get(response_key).map(|i| &self.fields[*i])
    }
}
