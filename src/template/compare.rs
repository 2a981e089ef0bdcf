//! Value-flexible comparison predicates.
//!
//! Replaces strict-typed template comparisons so number literals work
//! against fixture values parsed from JSON (which decode as floats).
//! Rules, in order:
//!
//! 1. Both operands numeric → compare as f64.
//! 2. Both operands strings → lexicographic.
//! 3. Otherwise `eq`/`ne` fall back to structural equality; the ordering
//!    predicates return false.

use serde_json::Value;

/// Extract a numeric value, accepting any JSON number representation.
fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

pub fn eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x == y;
    }
    a == b
}

pub fn ne(a: &Value, b: &Value) -> bool {
    !eq(a, b)
}

pub fn lt(a: &Value, b: &Value) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x < y,
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x < y,
            _ => false,
        },
    }
}

pub fn le(a: &Value, b: &Value) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x <= y,
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x <= y,
            _ => false,
        },
    }
}

pub fn gt(a: &Value, b: &Value) -> bool {
    lt(b, a)
}

pub fn ge(a: &Value, b: &Value) -> bool {
    le(b, a)
}
