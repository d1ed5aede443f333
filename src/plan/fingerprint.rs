//! Plan identity: a canonical string over the lowered plan's structural
//! shape, hashed with FNV-1a-32. The id is a pure function of response
//! keys, field names, argument names, type guards and connection markers;
//! argument *values* never participate.

use std::fmt::Write;

use crate::plan::PlanField;

/// 32-bit FNV-1a over the fingerprint text. Collisions are acceptable only
/// for query identity within one process.
pub(crate) fn fnv1a_32(input: &str) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Canonical structural fingerprint of a lowered field list. Fields are
/// emitted sorted so that selection order does not change plan identity.
pub(crate) fn fingerprint_fields(fields: &[PlanField], out: &mut String) {
    let mut order: Vec<&PlanField> = fields.iter().collect();
    order.sort_by(|a, b| {
        (a.response_key.as_str(), a.type_guard.as_deref())
            .cmp(&(b.response_key.as_str(), b.type_guard.as_deref()))
    });
    out.push('{');
    for (i, field) in order.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}:{}", field.response_key, field.name);
        if let Some(guard) = &field.type_guard {
            let _ = write!(out, "@on({guard})");
        }
        if !field.arg_names.is_empty() {
            let mut names: Vec<&str> = field.arg_names.iter().map(String::as_str).collect();
            names.sort_unstable();
            let _ = write!(out, "({})", names.join(","));
        }
        if field.is_connection {
            out.push_str("@connection");
            if let Some(key) = &field.connection_key {
                let _ = write!(out, "[key={key}]");
            }
            if let Some(filters) = &field.connection_filters {
                let mut filters: Vec<&str> = filters.iter().map(String::as_str).collect();
                filters.sort_unstable();
                let _ = write!(out, "[filters={}]", filters.join(","));
            }
            if field.replace_mode {
                out.push_str("[mode=replace]");
            }
        }
        if !field.children.is_empty() {
            fingerprint_fields(&field.children, out);
        }
    }
    out.push('}');
}
