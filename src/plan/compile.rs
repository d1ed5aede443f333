//! Document lowering: fragment expansion, selection dedup/merge,
//! `__typename` sanitization, `@connection` extraction, and the
//! network-safe query string.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::ast::Document;
use apollo_compiler::name;
use apollo_compiler::Node;
use indexmap::IndexMap;
use tracing::debug;

use crate::error::PlanError;
use crate::plan::arguments;
use crate::plan::fingerprint;
use crate::plan::OperationKind;
use crate::plan::Plan;
use crate::plan::PlanField;
use crate::plan::WINDOW_ARGS;

/// Compiles a document source into a plan. With a `fragment` selector the
/// named fragment becomes the plan root even when operations exist.
pub fn compile(source: &str, fragment: Option<&str>) -> Result<Arc<Plan>, PlanError> {
    let document =
        Document::parse(source, "document.graphql").map_err(|e| PlanError::Parse(e.to_string()))?;
    compile_document(&document, fragment)
}

/// Compiles an already parsed document.
pub fn compile_document(document: &Document, fragment: Option<&str>) -> Result<Arc<Plan>, PlanError> {
    let mut fragments: IndexMap<String, Node<ast::FragmentDefinition>> = IndexMap::new();
    let mut operations: Vec<Node<ast::OperationDefinition>> = Vec::new();
    for definition in &document.definitions {
        match definition {
            ast::Definition::OperationDefinition(operation) => operations.push(operation.clone()),
            ast::Definition::FragmentDefinition(def) => {
                fragments.insert(def.name.as_str().to_owned(), def.clone());
            }
            _ => {}
        }
    }

    let root = if let Some(name) = fragment {
        Root::Fragment(
            fragments
                .get(name)
                .cloned()
                .ok_or_else(|| PlanError::FragmentNotFound(name.to_owned()))?,
        )
    } else if let Some(operation) = operations.first() {
        Root::Operation(operation.clone())
    } else if fragments.len() == 1 {
        let only = fragments.values().next().cloned();
        match only {
            Some(def) => Root::Fragment(def),
            None => return Err(PlanError::NoOperation),
        }
    } else if fragments.is_empty() {
        return Err(PlanError::NoOperation);
    } else {
        return Err(PlanError::AmbiguousFragment);
    };

    let mut state = LowerState::default();
    let mut raw_root: IndexMap<String, RawField> = IndexMap::new();

    let (kind, root_typename, operation_name, declared_vars) = match &root {
        Root::Operation(operation) => {
            lower_into(
                &fragments,
                &mut state,
                &operation.selection_set,
                None,
                &mut raw_root,
            );
            let kind = match operation.operation_type {
                ast::OperationType::Query => OperationKind::Query,
                ast::OperationType::Mutation => OperationKind::Mutation,
                ast::OperationType::Subscription => OperationKind::Subscription,
            };
            let typename = match operation.operation_type {
                ast::OperationType::Query => "Query",
                ast::OperationType::Mutation => "Mutation",
                ast::OperationType::Subscription => "Subscription",
            };
            let declared: BTreeSet<String> = operation
                .variables
                .iter()
                .map(|v| v.name.as_str().to_owned())
                .collect();
            (
                kind,
                typename.to_owned(),
                operation.name.as_ref().map(|n| n.as_str().to_owned()),
                Some(declared),
            )
        }
        Root::Fragment(def) => {
            lower_into(
                &fragments,
                &mut state,
                &def.selection_set,
                None,
                &mut raw_root,
            );
            (
                OperationKind::Fragment,
                def.type_condition.as_str().to_owned(),
                Some(def.name.as_str().to_owned()),
                None,
            )
        }
    };

    let fields: Vec<PlanField> = raw_root.into_values().map(finish).collect();
    let index = response_key_index(&fields);

    // Strict mask: declared variables for operations, used variables for
    // fragments. Canonical drops the window-bound ones.
    let strict: Vec<String> = match declared_vars {
        Some(declared) => declared.into_iter().collect(),
        None => state.used_vars.iter().cloned().collect(),
    };
    let canonical: Vec<String> = strict
        .iter()
        .filter(|name| !state.window_vars.contains(*name))
        .cloned()
        .collect();

    let query = network_query(&root, &fragments, &state.used_fragments);

    let mut print = format!("{kind}|{root_typename}|");
    fingerprint::fingerprint_fields(&fields, &mut print);
    let plan_id = fingerprint::fnv1a_32(&print);
    debug!(plan_id, operation = %kind, "compiled plan");

    Ok(Arc::new(Plan {
        operation: kind,
        operation_name,
        root_typename,
        fields,
        index,
        query,
        plan_id,
        strict_mask: strict,
        canonical_mask: canonical,
        window_args: state.window_args.into_iter().collect(),
    }))
}

#[derive(Default)]
struct LowerState {
    fragment_stack: Vec<String>,
    used_fragments: HashSet<String>,
    used_vars: BTreeSet<String>,
    window_vars: BTreeSet<String>,
    window_args: BTreeSet<String>,
}

#[derive(Clone, Debug)]
struct ConnectionInfo {
    key: Option<String>,
    filters: Option<Vec<String>>,
    replace: bool,
}

struct RawField {
    response_key: String,
    name: String,
    type_guard: Option<String>,
    arguments: Vec<(String, Node<ast::Value>)>,
    connection: Option<ConnectionInfo>,
    children: IndexMap<String, RawField>,
}

/// Expands fragments and merges equivalent selections (same response key,
/// argument signature and directive signature) into one map entry, keyed
/// so that differently-guarded selections stay distinct.
fn lower_into(
    fragments: &IndexMap<String, Node<ast::FragmentDefinition>>,
    state: &mut LowerState,
    selections: &[ast::Selection],
    guard: Option<&str>,
    out: &mut IndexMap<String, RawField>,
) {
    for selection in selections {
        match selection {
            ast::Selection::Field(field) => {
                let response_key = field
                    .alias
                    .as_ref()
                    .unwrap_or(&field.name)
                    .as_str()
                    .to_owned();
                let arguments: Vec<(String, Node<ast::Value>)> = field
                    .arguments
                    .iter()
                    .map(|arg| (arg.name.as_str().to_owned(), arg.value.clone()))
                    .collect();
                for (_, value) in &arguments {
                    arguments::collect_variables(value, &mut state.used_vars);
                }
                let connection = connection_info(&field.directives);
                if connection.is_some() {
                    for (name, value) in &arguments {
                        if WINDOW_ARGS.contains(name.as_str()) {
                            state.window_args.insert(name.clone());
                            arguments::collect_variables(value, &mut state.window_vars);
                        }
                    }
                }
                let dedup = dedup_key(&response_key, guard, &arguments, &field.directives);
                let raw = out.entry(dedup).or_insert_with(|| RawField {
                    response_key,
                    name: field.name.as_str().to_owned(),
                    type_guard: guard.map(str::to_owned),
                    arguments,
                    connection: connection.clone(),
                    children: IndexMap::new(),
                });
                if raw.connection.is_none() {
                    raw.connection = connection;
                }
                lower_into(fragments, state, &field.selection_set, None, &mut raw.children);
            }
            ast::Selection::InlineFragment(inline) => {
                let next_guard = inline
                    .type_condition
                    .as_ref()
                    .map(|t| t.as_str())
                    .or(guard);
                lower_into(fragments, state, &inline.selection_set, next_guard, out);
            }
            ast::Selection::FragmentSpread(spread) => {
                let name = spread.fragment_name.as_str();
                if state.fragment_stack.iter().any(|f| f == name) {
                    continue;
                }
                let Some(def) = fragments.get(name) else {
                    continue;
                };
                let def = def.clone();
                state.used_fragments.insert(name.to_owned());
                state.fragment_stack.push(name.to_owned());
                lower_into(
                    fragments,
                    state,
                    &def.selection_set,
                    Some(def.type_condition.as_str()),
                    out,
                );
                state.fragment_stack.pop();
            }
        }
    }
}

fn finish(raw: RawField) -> PlanField {
    let had_children = !raw.children.is_empty();
    let mut children: Vec<PlanField> = raw.children.into_values().map(finish).collect();
    if had_children
        && !children
            .iter()
            .any(|child| child.response_key == "__typename")
    {
        children.push(typename_field());
    }
    let index = response_key_index(&children);
    let arg_names: Vec<String> = raw.arguments.iter().map(|(name, _)| name.clone()).collect();
    let (is_connection, connection_key, connection_filters, replace_mode) = match raw.connection {
        Some(info) => (true, info.key, info.filters, info.replace),
        None => (false, None, None, false),
    };
    PlanField {
        response_key: raw.response_key,
        name: raw.name,
        type_guard: raw.type_guard,
        arguments: raw.arguments,
        arg_names,
        is_connection,
        connection_key,
        connection_filters,
        replace_mode,
        children,
        index,
    }
}

fn typename_field() -> PlanField {
    PlanField {
        response_key: "__typename".to_owned(),
        name: "__typename".to_owned(),
        type_guard: None,
        arguments: Vec::new(),
        arg_names: Vec::new(),
        is_connection: false,
        connection_key: None,
        connection_filters: None,
        replace_mode: false,
        children: Vec::new(),
        index: IndexMap::new(),
    }
}

fn response_key_index(fields: &[PlanField]) -> IndexMap<String, usize> {
    let mut index = IndexMap::new();
    for (i, field) in fields.iter().enumerate() {
        index.entry(field.response_key.clone()).or_insert(i);
    }
    index
}

fn connection_info(directives: &ast::DirectiveList) -> Option<ConnectionInfo> {
    let directive = directives
        .iter()
        .find(|directive| directive.name.as_str() == "connection")?;
    let argument = |name: &str| {
        directive
            .arguments
            .iter()
            .find(|arg| arg.name.as_str() == name)
            .map(|arg| &arg.value)
    };
    let key = argument("key").and_then(|value| match &**value {
        ast::Value::String(s) => Some(s.clone()),
        _ => None,
    });
    let filters = argument("filters").and_then(|value| match &**value {
        ast::Value::List(items) => Some(
            items
                .iter()
                .filter_map(|item| match &**item {
                    ast::Value::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect::<Vec<String>>(),
        ),
        _ => None,
    });
    let replace = argument("mode").is_some_and(|value| match &**value {
        ast::Value::String(s) => s == "replace",
        ast::Value::Enum(name) => name.as_str() == "replace",
        _ => false,
    });
    Some(ConnectionInfo {
        key,
        filters,
        replace,
    })
}

fn dedup_key(
    response_key: &str,
    guard: Option<&str>,
    arguments: &[(String, Node<ast::Value>)],
    directives: &ast::DirectiveList,
) -> String {
    let mut out = String::new();
    let _ = write!(out, "{response_key}|{}|", guard.unwrap_or(""));
    let mut names: Vec<&str> = arguments.iter().map(|(name, _)| name.as_str()).collect();
    names.sort_unstable();
    for name in names {
        if let Some((_, value)) = arguments.iter().find(|(n, _)| n == name) {
            let _ = write!(out, "{name}:");
            value_signature(value, &mut out);
            out.push(',');
        }
    }
    out.push('|');
    let mut sigs: Vec<String> = directives
        .iter()
        .map(|directive| {
            let mut sig = format!("@{}(", directive.name.as_str());
            let mut args: Vec<&Node<ast::Argument>> = directive.arguments.iter().collect();
            args.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
            for arg in args {
                let _ = write!(sig, "{}:", arg.name.as_str());
                value_signature(&arg.value, &mut sig);
                sig.push(',');
            }
            sig.push(')');
            sig
        })
        .collect();
    sigs.sort_unstable();
    out.push_str(&sigs.join(""));
    out
}

fn value_signature(value: &ast::Value, out: &mut String) {
    match value {
        ast::Value::Null => out.push_str("null"),
        ast::Value::Boolean(b) => {
            let _ = write!(out, "{b}");
        }
        ast::Value::Variable(name) => {
            let _ = write!(out, "${}", name.as_str());
        }
        ast::Value::Enum(name) => out.push_str(name.as_str()),
        ast::Value::String(s) => {
            let _ = write!(out, "{s:?}");
        }
        ast::Value::Int(i) => {
            let _ = write!(out, "{}", i.try_to_f64().unwrap_or(f64::NAN));
        }
        ast::Value::Float(f) => {
            let _ = write!(out, "{}", f.try_to_f64().unwrap_or(f64::NAN));
        }
        ast::Value::List(items) => {
            out.push('[');
            for item in items {
                value_signature(item, out);
                out.push(',');
            }
            out.push(']');
        }
        ast::Value::Object(fields) => {
            let mut names: Vec<&str> = fields.iter().map(|(name, _)| name.as_str()).collect();
            names.sort_unstable();
            out.push('{');
            for name in names {
                if let Some((_, field_value)) = fields.iter().find(|(n, _)| n.as_str() == name) {
                    let _ = write!(out, "{name}:");
                    value_signature(field_value, out);
                    out.push(',');
                }
            }
            out.push('}');
        }
    }
}

/// Builds the network-safe document: the selected root plus the fragments
/// it uses, with `__typename` added to every nested selection set and
/// cache-only directives stripped.
enum Root {
    Operation(Node<ast::OperationDefinition>),
    Fragment(Node<ast::FragmentDefinition>),
}

fn network_query(
    root: &Root,
    fragments: &IndexMap<String, Node<ast::FragmentDefinition>>,
    used_fragments: &HashSet<String>,
) -> String {
    let mut document = Document::new();
    match root {
        Root::Operation(operation) => {
            let mut operation = operation.clone();
            sanitize_selections(&mut operation.make_mut().selection_set, true);
            document
                .definitions
                .push(ast::Definition::OperationDefinition(operation));
        }
        Root::Fragment(def) => {
            let mut def = def.clone();
            sanitize_selections(&mut def.make_mut().selection_set, false);
            document
                .definitions
                .push(ast::Definition::FragmentDefinition(def));
        }
    }
    for (name, def) in fragments {
        let is_root_fragment = matches!(root, Root::Fragment(f) if f.name.as_str() == name);
        if is_root_fragment || !used_fragments.contains(name) {
            continue;
        }
        let mut def = def.clone();
        sanitize_selections(&mut def.make_mut().selection_set, false);
        document
            .definitions
            .push(ast::Definition::FragmentDefinition(def));
    }
    document.to_string()
}

fn sanitize_selections(selections: &mut Vec<ast::Selection>, is_root: bool) {
    for selection in selections.iter_mut() {
        match selection {
            ast::Selection::Field(field) => {
                let field = field.make_mut();
                field
                    .directives
                    .retain(|directive| directive.name.as_str() != "connection");
                if !field.selection_set.is_empty() {
                    sanitize_selections(&mut field.selection_set, false);
                }
            }
            ast::Selection::InlineFragment(inline) => {
                sanitize_selections(&mut inline.make_mut().selection_set, false);
            }
            ast::Selection::FragmentSpread(_) => {}
        }
    }
    if !is_root {
        ensure_typename(selections);
    }
}

fn ensure_typename(selections: &mut Vec<ast::Selection>) {
    let present = selections.iter().any(|selection| {
        matches!(
            selection,
            ast::Selection::Field(field)
                if field.name.as_str() == "__typename" && field.alias.is_none()
        )
    });
    if !present {
        selections.push(ast::Selection::Field(Node::new(ast::Field {
            alias: None,
            name: name!(__typename),
            arguments: Vec::new(),
            directives: Default::default(),
            selection_set: Vec::new(),
        })));
    }
}
