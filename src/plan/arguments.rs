//! Precompiled argument evaluation: AST argument values are kept on the
//! plan fields and evaluated against variables on demand, omitting
//! undefined entries and emitting deterministic key order.

use std::collections::BTreeSet;

use apollo_compiler::ast;
use apollo_compiler::Node;
use indexmap::IndexMap;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value as JsonValue;

use crate::graph::record::JsonMap;

/// Evaluates a literal or variable AST value. `None` means undefined (a
/// variable that was not supplied), which callers drop rather than encode.
pub(crate) fn evaluate(value: &ast::Value, vars: &JsonMap) -> Option<JsonValue> {
    Some(match value {
        ast::Value::Null => JsonValue::Null,
        ast::Value::Boolean(b) => JsonValue::Bool(*b),
        ast::Value::Enum(name) => JsonValue::String(ByteString::from(name.as_str())),
        ast::Value::String(s) => JsonValue::String(ByteString::from(s.as_str())),
        ast::Value::Variable(name) => return vars.get(name.as_str()).cloned(),
        ast::Value::Int(i) => match i.try_to_i32() {
            Ok(n) => JsonValue::Number(n.into()),
            Err(_) => JsonValue::Number(serde_json::Number::from_f64(i.try_to_f64().ok()?)?),
        },
        ast::Value::Float(f) => {
            JsonValue::Number(serde_json::Number::from_f64(f.try_to_f64().ok()?)?)
        }
        ast::Value::List(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| evaluate(item, vars).unwrap_or(JsonValue::Null))
                .collect(),
        ),
        ast::Value::Object(fields) => {
            let mut map = JsonMap::new();
            for (name, field_value) in fields {
                if let Some(evaluated) = evaluate(field_value, vars) {
                    map.insert(ByteString::from(name.as_str()), evaluated);
                }
            }
            JsonValue::Object(map)
        }
    })
}

/// Evaluates a field's argument list, dropping undefined entries.
pub(crate) fn build_args(
    arguments: &[(String, Node<ast::Value>)],
    vars: &JsonMap,
) -> IndexMap<String, JsonValue> {
    let mut out = IndexMap::with_capacity(arguments.len());
    for (name, value) in arguments {
        if let Some(evaluated) = evaluate(value, vars) {
            out.insert(name.clone(), evaluated);
        }
    }
    out
}

/// Collects every variable name referenced by an AST value.
pub(crate) fn collect_variables(value: &ast::Value, out: &mut BTreeSet<String>) {
    match value {
        ast::Value::Variable(name) => {
            out.insert(name.as_str().to_owned());
        }
        ast::Value::List(items) => {
            for item in items {
                collect_variables(item, out);
            }
        }
        ast::Value::Object(fields) => {
            for (_, field_value) in fields {
                collect_variables(field_value, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apollo_compiler::ast::Document;
    use serde_json_bytes::json;

    fn field_arguments(source: &str) -> Vec<(String, Node<ast::Value>)> {
        let document = Document::parse(source, "test.graphql").unwrap();
        for definition in &document.definitions {
            if let ast::Definition::OperationDefinition(operation) = definition {
                if let ast::Selection::Field(field) = &operation.selection_set[0] {
                    return field
                        .arguments
                        .iter()
                        .map(|arg| (arg.name.as_str().to_owned(), arg.value.clone()))
                        .collect();
                }
            }
        }
        panic!("no field in document");
    }

    #[test]
    fn evaluates_literals_and_variables() {
        let arguments =
            field_arguments("query($cat: String) { posts(category: $cat, first: 2, flag: true) { id } }");
        let vars = json!({"cat": "tech"});
        let args = build_args(&arguments, vars.as_object().unwrap());
        assert_eq!(args.get("category"), Some(&json!("tech")));
        assert_eq!(args.get("first"), Some(&json!(2)));
        assert_eq!(args.get("flag"), Some(&json!(true)));
    }

    #[test]
    fn undefined_variables_are_dropped() {
        let arguments = field_arguments("query($a: String, $b: Int) { posts(category: $a, first: $b) { id } }");
        let vars = json!({"a": "tech"});
        let args = build_args(&arguments, vars.as_object().unwrap());
        assert!(args.contains_key("category"));
        assert!(!args.contains_key("first"));
    }

    #[test]
    fn null_literal_is_kept() {
        let arguments = field_arguments("{ posts(after: null) { id } }");
        let args = build_args(&arguments, &JsonMap::new());
        assert_eq!(args.get("after"), Some(&JsonValue::Null));
    }

    #[test]
    fn collects_nested_variables() {
        let arguments =
            field_arguments("query($a: Int, $b: Int) { posts(where: {min: $a, max: [$b, 3]}) { id } }");
        let mut vars = BTreeSet::new();
        for (_, value) in &arguments {
            collect_variables(value, &mut vars);
        }
        assert_eq!(vars.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
