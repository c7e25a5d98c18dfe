//! Helpers for treating `serde_json::Value` as a dynamically typed template value

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

/// Parameter mapping supplied by the caller
pub type Params = Map<String, Value>;

/// Numeric view of a JSON number
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

impl From<Num> for Value {
    fn from(num: Num) -> Self {
        match num {
            Num::Int(i) => Value::from(i),
            // NaN and infinities have no JSON representation
            Num::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        }
    }
}

/// Try to view a value as a number
pub fn as_num(value: &Value) -> Option<Num> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        Some(Num::Int(i))
    } else {
        n.as_f64().map(Num::Float)
    }
}

/// Get a type name for error messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Truthiness used by conditions, tests and `not`
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => as_num(value).map(|n| n.as_f64() != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Convert a value to the text it contributes to a rendered string
///
/// Strings are inserted verbatim, null renders as nothing and containers
/// render as compact JSON.
pub fn to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(_) => match as_num(value) {
            Some(Num::Int(i)) => i.to_string(),
            Some(Num::Float(f)) => format_float_plain(f),
            None => value.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Default float formatting: whole floats keep a trailing `.0`
fn format_float_plain(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

/// Check if two values are equal (with type coercion for numbers)
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (as_num(left), as_num(right)) {
        (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
        (Some(a), Some(b)) => (a.as_f64() - b.as_f64()).abs() < f64::EPSILON,
        _ => left == right,
    }
}

/// Order two values of compatible types
pub fn compare_values(left: &Value, right: &Value) -> Result<Ordering, String> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            match (as_num(left), as_num(right)) {
                (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(a.cmp(&b)),
                (Some(a), Some(b)) => Ok(a
                    .as_f64()
                    .partial_cmp(&b.as_f64())
                    .unwrap_or(Ordering::Equal)),
                _ => Ok(Ordering::Equal),
            }
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let ordering = compare_values(x, y)?;
                if ordering != Ordering::Equal {
                    return Ok(ordering);
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => Err(format!(
            "cannot compare {} and {}",
            type_name(left),
            type_name(right)
        )),
    }
}

/// Check whether `item` is contained in `container`
///
/// Strings test for substrings, sequences for an equal element and
/// mappings for a key.
pub fn contains(container: &Value, item: &Value) -> Result<bool, String> {
    match container {
        Value::String(s) => match item {
            Value::String(sub) => Ok(s.contains(sub.as_str())),
            other => Ok(s.contains(&to_display(other))),
        },
        Value::Array(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Object(map) => Ok(map.contains_key(&to_display(item))),
        _ => Err(format!("cannot test membership in {}", type_name(container))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_display() {
        assert_eq!(to_display(&json!("text")), "text");
        assert_eq!(to_display(&json!(42)), "42");
        assert_eq!(to_display(&json!(2.5)), "2.5");
        assert_eq!(to_display(&json!(3.0)), "3.0");
        assert_eq!(to_display(&json!(true)), "true");
        assert_eq!(to_display(&json!(null)), "");
        assert_eq!(to_display(&json!([1, "a"])), "[1,\"a\"]");
        assert_eq!(to_display(&json!({"a": 1})), "{\"a\":1}");
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("no")));
        assert!(is_truthy(&json!([0])));
    }

    #[test]
    fn test_values_equal_coerces_numbers() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!("a"), &json!("a")));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(1), &json!(2.5)).unwrap(), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")).unwrap(), Ordering::Greater);
        assert!(compare_values(&json!("a"), &json!(1)).is_err());
    }

    #[test]
    fn test_contains() {
        assert!(contains(&json!("release-1.2"), &json!("1.2")).unwrap());
        assert!(contains(&json!([1, 2, 3]), &json!(2)).unwrap());
        assert!(contains(&json!({"linux": true}), &json!("linux")).unwrap());
        assert!(contains(&json!(3), &json!(3)).is_err());
    }

    #[test]
    fn test_non_finite_float_becomes_null() {
        assert_eq!(Value::from(Num::Float(f64::NAN)), Value::Null);
        assert_eq!(Value::from(Num::Int(7)), json!(7));
    }
}
