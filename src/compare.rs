//! Output comparison
//!
//! Structural deep equality over JSON values. Integers compare exactly;
//! as soon as either side is a float, numbers match within an absolute or
//! relative tolerance of [`FLOAT_TOLERANCE`]. With `order_sensitive = false`
//! every array level is compared as a multiset.
//!
//! Comparison never fails: anything that cannot be compared is unequal.

use std::cmp::Ordering;

use serde_json::{Number, Value};

/// Absolute/relative tolerance for floating point results
pub const FLOAT_TOLERANCE: f64 = 1e-6;

/// Compare two parsed values
pub fn compare(actual: &Value, expected: &Value, order_sensitive: bool) -> bool {
    if order_sensitive {
        values_equal(actual, expected)
    } else {
        values_equal(&canonical(actual), &canonical(expected))
    }
}

/// Compare a harness result line against a test case's expected output.
///
/// A missing result never matches. Expected text that is not JSON is taken
/// as a string of its trimmed text.
pub fn compare_text(actual: Option<&str>, expected: &str, order_sensitive: bool) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    let Ok(actual) = serde_json::from_str::<Value>(actual.trim()) else {
        return false;
    };
    compare(&actual, &parse_expected(expected), order_sensitive)
}

/// Parse expected output, falling back to a plain string
pub fn parse_expected(expected: &str) -> Value {
    let trimmed = expected.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => false,
    }
}

fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => floats_close(a, b),
        _ => false,
    }
}

fn floats_close(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    let diff = (a - b).abs();
    diff <= FLOAT_TOLERANCE || diff <= FLOAT_TOLERANCE * a.abs().max(b.abs())
}

/// Sort every array level (recursively) into a canonical order
fn canonical(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(canonical).collect();
            items.sort_by(total_order);
            Value::Array(items)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonical(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used only for canonical sorting
fn total_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => {
                let (fx, fy) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
                fx.total_cmp(&fy)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(xs), Value::Array(ys)) => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| total_order(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| xs.len().cmp(&ys.len())),
        (Value::Object(xm), Value::Object(ym)) => {
            let mut xs: Vec<_> = xm.iter().collect();
            let mut ys: Vec<_> = ym.iter().collect();
            xs.sort_by(|l, r| l.0.cmp(r.0));
            ys.sort_by(|l, r| l.0.cmp(r.0));
            xs.iter()
                .zip(&ys)
                .map(|((kx, vx), (ky, vy))| kx.cmp(ky).then_with(|| total_order(vx, vy)))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| xs.len().cmp(&ys.len()))
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_sensitivity() {
        assert!(compare(&json!([1, 0]), &json!([1, 0]), true));
        assert!(!compare(&json!([0, 1]), &json!([1, 0]), true));
        assert!(compare(&json!([0, 1]), &json!([1, 0]), false));
    }

    #[test]
    fn test_unordered_is_multiset() {
        assert!(!compare(&json!([1, 1, 2]), &json!([1, 2, 2]), false));
        assert!(compare(&json!([[2, 1], [3]]), &json!([[3], [1, 2]]), false));
        assert!(compare(&json!(["b", "a"]), &json!(["a", "b"]), false));
        assert!(!compare(&json!([1, 2]), &json!([1, 2, 3]), false));
    }

    #[test]
    fn test_numbers() {
        assert!(compare(&json!(3), &json!(3), true));
        assert!(!compare(&json!(3), &json!(4), true));
        assert!(compare(&json!(2.0), &json!(2), true));
        assert!(compare(&json!(0.1 + 0.2), &json!(0.3), true));
        assert!(compare(&json!(1e12 + 1.0), &json!(1e12), true));
        assert!(!compare(&json!(0.5), &json!(0.501), true));
        // Large integers are never rounded through f64
        assert!(!compare(
            &json!(9_007_199_254_740_993_i64),
            &json!(9_007_199_254_740_992_i64),
            true
        ));
    }

    #[test]
    fn test_scalars_and_types() {
        assert!(compare(&json!(true), &json!(true), true));
        assert!(!compare(&json!(true), &json!(1), true));
        assert!(!compare(&json!("1"), &json!(1), true));
        assert!(!compare(&Value::Null, &json!([]), true));
        assert!(compare(&json!({"a": [1, 2]}), &json!({"a": [1, 2]}), true));
        assert!(!compare(&json!({"a": 1}), &json!({"b": 1}), true));
    }

    #[test]
    fn test_compare_text() {
        assert!(compare_text(Some("[0,1]"), "[0, 1]", true));
        assert!(compare_text(Some("[1,0]"), "[0,1]", false));
        assert!(compare_text(Some("\"hello\""), "hello", true));
        assert!(compare_text(Some("\"hello\""), "  hello \n", true));
        assert!(!compare_text(None, "[0,1]", true));
        assert!(!compare_text(None, "null", true));
        assert!(!compare_text(Some("not json"), "[0,1]", true));
        assert!(!compare_text(Some("null"), "[0,1]", true));
    }
}
