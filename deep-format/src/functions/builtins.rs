//! Built-in filters and tests available to every template group
//!
//! Filters: `upper`, `lower`, `capitalize`, `title`, `trim`, `length`
//! (`count`), `default`, `join`, `split`, `replace`, `first`, `last`,
//! `reverse`, `sort`, `abs`, `round`, `int`, `float`, `string`, `tojson`,
//! `keys`, `values`.
//!
//! Tests: `none`, `string`, `number`, `integer`, `float`, `boolean`,
//! `mapping`, `sequence`, `even`, `odd`, `divisibleby`, `startingwith`,
//! `endingwith`. The `defined` and `undefined` tests are handled by the
//! evaluator itself since they need to observe missing variables.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value;

use super::Callable;
use crate::value::{Num, as_num, compare_values, is_truthy, to_display, type_name};

type NativeFn = fn(&[Value]) -> Result<Value, String>;

/// A built-in implemented in Rust
pub struct NativeFunction(NativeFn);

impl Callable for NativeFunction {
    fn call(&self, args: &[Value]) -> Result<Value, String> {
        (self.0)(args)
    }
}

static FILTERS: Lazy<HashMap<&'static str, NativeFunction>> = Lazy::new(|| {
    let entries: [(&'static str, NativeFn); 23] = [
        ("upper", upper),
        ("lower", lower),
        ("capitalize", capitalize),
        ("title", title),
        ("trim", trim),
        ("length", length),
        ("count", length),
        ("default", default),
        ("join", join),
        ("split", split),
        ("replace", replace),
        ("first", first),
        ("last", last),
        ("reverse", reverse),
        ("sort", sort),
        ("abs", abs),
        ("round", round),
        ("int", int),
        ("float", float),
        ("string", string),
        ("tojson", tojson),
        ("keys", keys),
        ("values", values),
    ];
    entries
        .into_iter()
        .map(|(name, f)| (name, NativeFunction(f)))
        .collect()
});

static TESTS: Lazy<HashMap<&'static str, NativeFunction>> = Lazy::new(|| {
    let entries: [(&'static str, NativeFn); 13] = [
        ("none", is_none),
        ("string", is_string),
        ("number", is_number),
        ("integer", is_integer),
        ("float", is_float),
        ("boolean", is_boolean),
        ("mapping", is_mapping),
        ("sequence", is_sequence),
        ("even", is_even),
        ("odd", is_odd),
        ("divisibleby", is_divisibleby),
        ("startingwith", is_startingwith),
        ("endingwith", is_endingwith),
    ];
    entries
        .into_iter()
        .map(|(name, f)| (name, NativeFunction(f)))
        .collect()
});

/// Look up a built-in filter
pub fn filter(name: &str) -> Option<&'static dyn Callable> {
    FILTERS.get(name).map(|f| f as &dyn Callable)
}

/// Look up a built-in test
pub fn test(name: &str) -> Option<&'static dyn Callable> {
    TESTS.get(name).map(|f| f as &dyn Callable)
}

// =============================================================================
// Argument helpers
// =============================================================================

fn subject(args: &[Value]) -> &Value {
    args.first().unwrap_or(&Value::Null)
}

fn arg(args: &[Value], index: usize) -> Option<&Value> {
    args.get(index)
}

fn text(args: &[Value]) -> String {
    to_display(subject(args))
}

fn int_arg(args: &[Value], index: usize, what: &str) -> Result<i64, String> {
    match arg(args, index).and_then(as_num) {
        Some(Num::Int(n)) => Ok(n),
        Some(Num::Float(f)) => Ok(f as i64),
        None => Err(format!("expected a number for {}", what)),
    }
}

// =============================================================================
// Filters
// =============================================================================

fn upper(args: &[Value]) -> Result<Value, String> {
    Ok(Value::String(text(args).to_uppercase()))
}

fn lower(args: &[Value]) -> Result<Value, String> {
    Ok(Value::String(text(args).to_lowercase()))
}

fn capitalize_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

fn capitalize(args: &[Value]) -> Result<Value, String> {
    Ok(Value::String(capitalize_word(&text(args))))
}

fn title(args: &[Value]) -> Result<Value, String> {
    let s = text(args);
    let mut result = String::with_capacity(s.len());
    let mut word = String::new();
    for c in s.chars() {
        if c.is_alphanumeric() {
            word.push(c);
        } else {
            result.push_str(&capitalize_word(&word));
            word.clear();
            result.push(c);
        }
    }
    result.push_str(&capitalize_word(&word));
    Ok(Value::String(result))
}

fn trim(args: &[Value]) -> Result<Value, String> {
    Ok(Value::String(text(args).trim().to_string()))
}

fn length(args: &[Value]) -> Result<Value, String> {
    let len = match subject(args) {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        Value::Null => 0,
        other => return Err(format!("{} has no length", type_name(other))),
    };
    Ok(Value::from(len))
}

fn default(args: &[Value]) -> Result<Value, String> {
    match subject(args) {
        Value::Null => Ok(arg(args, 1).cloned().unwrap_or_else(|| Value::String(String::new()))),
        other => Ok(other.clone()),
    }
}

fn join(args: &[Value]) -> Result<Value, String> {
    let sep = arg(args, 1).map(to_display).unwrap_or_default();
    match subject(args) {
        Value::Array(items) => Ok(Value::String(
            items.iter().map(to_display).collect::<Vec<_>>().join(&sep),
        )),
        other => Err(format!("cannot join {}", type_name(other))),
    }
}

fn split(args: &[Value]) -> Result<Value, String> {
    let s = text(args);
    let parts: Vec<Value> = match arg(args, 1) {
        Some(Value::Null) | None => s.split_whitespace().map(Value::from).collect(),
        Some(sep) => s.split(to_display(sep).as_str()).map(Value::from).collect(),
    };
    Ok(Value::Array(parts))
}

fn replace(args: &[Value]) -> Result<Value, String> {
    let (Some(from), Some(to)) = (arg(args, 1), arg(args, 2)) else {
        return Err("replace expects two arguments".to_string());
    };
    Ok(Value::String(
        text(args).replace(to_display(from).as_str(), &to_display(to)),
    ))
}

fn first(args: &[Value]) -> Result<Value, String> {
    match subject(args) {
        Value::Array(items) => Ok(items.first().cloned().unwrap_or(Value::Null)),
        Value::String(s) => Ok(s.chars().next().map(|c| Value::String(c.to_string())).unwrap_or(Value::Null)),
        other => Err(format!("{} has no first item", type_name(other))),
    }
}

fn last(args: &[Value]) -> Result<Value, String> {
    match subject(args) {
        Value::Array(items) => Ok(items.last().cloned().unwrap_or(Value::Null)),
        Value::String(s) => Ok(s.chars().last().map(|c| Value::String(c.to_string())).unwrap_or(Value::Null)),
        other => Err(format!("{} has no last item", type_name(other))),
    }
}

fn reverse(args: &[Value]) -> Result<Value, String> {
    match subject(args) {
        Value::Array(items) => Ok(Value::Array(items.iter().rev().cloned().collect())),
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        other => Err(format!("cannot reverse {}", type_name(other))),
    }
}

fn sort(args: &[Value]) -> Result<Value, String> {
    let Value::Array(items) = subject(args) else {
        return Err(format!("cannot sort {}", type_name(subject(args))));
    };
    let mut sorted = items.clone();
    let mut failure = None;
    sorted.sort_by(|a, b| {
        compare_values(a, b).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            std::cmp::Ordering::Equal
        })
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(Value::Array(sorted)),
    }
}

fn abs(args: &[Value]) -> Result<Value, String> {
    match as_num(subject(args)) {
        Some(Num::Int(n)) => Ok(Value::from(n.abs())),
        Some(Num::Float(f)) => Ok(Num::Float(f.abs()).into()),
        None => Err(format!("cannot take abs of {}", type_name(subject(args)))),
    }
}

fn round(args: &[Value]) -> Result<Value, String> {
    let precision = if args.len() > 1 { int_arg(args, 1, "round precision")? } else { 0 };
    let Some(n) = as_num(subject(args)) else {
        return Err(format!("cannot round {}", type_name(subject(args))));
    };
    let factor = 10f64.powi(precision as i32);
    Ok(Num::Float((n.as_f64() * factor).round() / factor).into())
}

fn int(args: &[Value]) -> Result<Value, String> {
    let n = match subject(args) {
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        Value::Bool(b) => *b as i64,
        other => match as_num(other) {
            Some(Num::Int(n)) => n,
            Some(Num::Float(f)) => f as i64,
            None => 0,
        },
    };
    Ok(Value::from(n))
}

fn float(args: &[Value]) -> Result<Value, String> {
    let f = match subject(args) {
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(b) => *b as i64 as f64,
        other => as_num(other).map(Num::as_f64).unwrap_or(0.0),
    };
    Ok(Num::Float(f).into())
}

fn string(args: &[Value]) -> Result<Value, String> {
    Ok(Value::String(text(args)))
}

fn tojson(args: &[Value]) -> Result<Value, String> {
    serde_json::to_string(subject(args))
        .map(Value::String)
        .map_err(|e| e.to_string())
}

fn keys(args: &[Value]) -> Result<Value, String> {
    match subject(args) {
        Value::Object(map) => Ok(Value::Array(map.keys().cloned().map(Value::String).collect())),
        other => Err(format!("{} has no keys", type_name(other))),
    }
}

fn values(args: &[Value]) -> Result<Value, String> {
    match subject(args) {
        Value::Object(map) => Ok(Value::Array(map.values().cloned().collect())),
        other => Err(format!("{} has no values", type_name(other))),
    }
}

// =============================================================================
// Tests
// =============================================================================

fn is_none(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(subject(args).is_null()))
}

fn is_string(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(subject(args).is_string()))
}

fn is_number(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(subject(args).is_number()))
}

fn is_integer(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(matches!(as_num(subject(args)), Some(Num::Int(_)))))
}

fn is_float(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(matches!(as_num(subject(args)), Some(Num::Float(_)))))
}

fn is_boolean(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(subject(args).is_boolean()))
}

fn is_mapping(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(subject(args).is_object()))
}

fn is_sequence(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(subject(args).is_array()))
}

fn is_even(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(int_arg(args, 0, "even")? % 2 == 0))
}

fn is_odd(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Bool(int_arg(args, 0, "odd")? % 2 != 0))
}

fn is_divisibleby(args: &[Value]) -> Result<Value, String> {
    let n = int_arg(args, 0, "divisibleby")?;
    let d = int_arg(args, 1, "divisibleby divisor")?;
    if d == 0 {
        return Err("division by zero".to_string());
    }
    Ok(Value::Bool(n % d == 0))
}

fn is_startingwith(args: &[Value]) -> Result<Value, String> {
    let prefix = arg(args, 1).map(to_display).unwrap_or_default();
    Ok(Value::Bool(text(args).starts_with(&prefix)))
}

fn is_endingwith(args: &[Value]) -> Result<Value, String> {
    let suffix = arg(args, 1).map(to_display).unwrap_or_default();
    Ok(Value::Bool(text(args).ends_with(&suffix)))
}

/// Run a built-in test and reduce the result to a boolean
pub fn run_test(test: &dyn Callable, args: &[Value]) -> Result<bool, String> {
    test.call(args).map(|v| is_truthy(&v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_filter(name: &str, args: &[Value]) -> Value {
        filter(name).unwrap().call(args).unwrap()
    }

    fn call_test(name: &str, args: &[Value]) -> bool {
        run_test(test(name).unwrap(), args).unwrap()
    }

    #[test]
    fn test_string_filters() {
        assert_eq!(call_filter("upper", &[json!("abc")]), json!("ABC"));
        assert_eq!(call_filter("lower", &[json!("ABC")]), json!("abc"));
        assert_eq!(call_filter("capitalize", &[json!("hELLO")]), json!("Hello"));
        assert_eq!(call_filter("title", &[json!("build and test")]), json!("Build And Test"));
        assert_eq!(call_filter("trim", &[json!("  x  ")]), json!("x"));
        assert_eq!(
            call_filter("replace", &[json!("a-b-c"), json!("-"), json!("_")]),
            json!("a_b_c")
        );
    }

    #[test]
    fn test_collection_filters() {
        assert_eq!(call_filter("length", &[json!([1, 2, 3])]), json!(3));
        assert_eq!(call_filter("count", &[json!("héllo")]), json!(5));
        assert_eq!(call_filter("join", &[json!(["a", 1]), json!(",")]), json!("a,1"));
        assert_eq!(call_filter("split", &[json!("a b  c")]), json!(["a", "b", "c"]));
        assert_eq!(call_filter("split", &[json!("a,b"), json!(",")]), json!(["a", "b"]));
        assert_eq!(call_filter("first", &[json!([4, 5])]), json!(4));
        assert_eq!(call_filter("last", &[json!([4, 5])]), json!(5));
        assert_eq!(call_filter("reverse", &[json!([1, 2])]), json!([2, 1]));
        assert_eq!(call_filter("sort", &[json!([3, 1, 2])]), json!([1, 2, 3]));
        assert_eq!(call_filter("keys", &[json!({"b": 1, "a": 2})]), json!(["b", "a"]));
        assert_eq!(call_filter("values", &[json!({"b": 1, "a": 2})]), json!([1, 2]));
    }

    #[test]
    fn test_sort_mixed_types_fails() {
        assert!(filter("sort").unwrap().call(&[json!([1, "a"])]).is_err());
    }

    #[test]
    fn test_numeric_filters() {
        assert_eq!(call_filter("abs", &[json!(-4)]), json!(4));
        assert_eq!(call_filter("round", &[json!(2.567), json!(2)]), json!(2.57));
        assert_eq!(call_filter("int", &[json!("42")]), json!(42));
        assert_eq!(call_filter("int", &[json!("4.9")]), json!(4));
        assert_eq!(call_filter("int", &[json!("nope")]), json!(0));
        assert_eq!(call_filter("float", &[json!("1.5")]), json!(1.5));
    }

    #[test]
    fn test_conversion_filters() {
        assert_eq!(call_filter("string", &[json!(7)]), json!("7"));
        assert_eq!(call_filter("tojson", &[json!({"a": [1]})]), json!("{\"a\":[1]}"));
        assert_eq!(call_filter("default", &[json!(null), json!("x")]), json!("x"));
        assert_eq!(call_filter("default", &[json!("set"), json!("x")]), json!("set"));
    }

    #[test]
    fn test_type_tests() {
        assert!(call_test("none", &[json!(null)]));
        assert!(call_test("string", &[json!("s")]));
        assert!(call_test("number", &[json!(1.5)]));
        assert!(call_test("integer", &[json!(1)]));
        assert!(!call_test("integer", &[json!(1.5)]));
        assert!(call_test("float", &[json!(1.5)]));
        assert!(call_test("boolean", &[json!(false)]));
        assert!(call_test("mapping", &[json!({})]));
        assert!(call_test("sequence", &[json!([])]));
    }

    #[test]
    fn test_numeric_tests() {
        assert!(call_test("even", &[json!(4)]));
        assert!(call_test("odd", &[json!(3)]));
        assert!(call_test("divisibleby", &[json!(9), json!(3)]));
        assert!(test("divisibleby").unwrap().call(&[json!(9), json!(0)]).is_err());
        assert!(test("even").unwrap().call(&[json!("x")]).is_err());
    }

    #[test]
    fn test_string_tests() {
        assert!(call_test("startingwith", &[json!("release/1.0"), json!("release/")]));
        assert!(call_test("endingwith", &[json!("build.xml"), json!(".xml")]));
    }

    #[test]
    fn test_unknown_names() {
        assert!(filter("nope").is_none());
        assert!(test("defined").is_none());
    }
}
