//! Helper functions for Lua filters and tests
//!
//! Implements the `lib.*` namespace available to every script.

use mlua::{Function, Lua, LuaSerdeExt, Result as LuaResult, Table, Value};

/// Register the `lib` table with all helper functions
pub fn register_stdlib(lua: &Lua) -> LuaResult<()> {
    let lib = lua.create_table()?;

    // String functions
    lib.set("lower", lua.create_function(|_, s: String| Ok(s.to_lowercase()))?)?;
    lib.set("upper", lua.create_function(|_, s: String| Ok(s.to_uppercase()))?)?;
    lib.set("trim", lua.create_function(|_, s: String| Ok(s.trim().to_string()))?)?;
    lib.set("split", create_split_fn(lua)?)?;
    lib.set("join", create_join_fn(lua)?)?;
    lib.set("replace", create_replace_fn(lua)?)?;
    lib.set(
        "contains",
        lua.create_function(|_, (s, sub): (String, String)| Ok(s.contains(&sub)))?,
    )?;
    lib.set(
        "starts_with",
        lua.create_function(|_, (s, prefix): (String, String)| Ok(s.starts_with(&prefix)))?,
    )?;
    lib.set(
        "ends_with",
        lua.create_function(|_, (s, suffix): (String, String)| Ok(s.ends_with(&suffix)))?,
    )?;

    // Collection functions
    lib.set("find", create_find_fn(lua)?)?;
    lib.set("filter", create_filter_fn(lua)?)?;
    lib.set("map", create_map_fn(lua)?)?;

    // Type check functions
    lib.set("is_nil", lua.create_function(|_, v: Value| Ok(v.is_nil()))?)?;
    lib.set("is_string", lua.create_function(|_, v: Value| Ok(v.is_string()))?)?;
    lib.set(
        "is_number",
        lua.create_function(|_, v: Value| Ok(matches!(v, Value::Number(_) | Value::Integer(_))))?,
    )?;
    lib.set("is_table", lua.create_function(|_, v: Value| Ok(v.is_table()))?)?;
    lib.set("is_boolean", lua.create_function(|_, v: Value| Ok(v.is_boolean()))?)?;

    // Logging functions
    lib.set(
        "log",
        lua.create_function(|_, msg: String| {
            log::info!("[lua] {}", msg);
            Ok(())
        })?,
    )?;
    lib.set(
        "warn",
        lua.create_function(|_, msg: String| {
            log::warn!("[lua] {}", msg);
            Ok(())
        })?,
    )?;

    lua.globals().set("lib", lib)?;
    Ok(())
}

/// lib.split(s, delim?) -> table
/// Splits on whitespace when no delimiter is given
fn create_split_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (s, delim): (String, Option<String>)| {
        let parts: Vec<&str> = match &delim {
            Some(d) if !d.is_empty() => s.split(d.as_str()).collect(),
            _ => s.split_whitespace().collect(),
        };
        let table = lua.create_sequence_from(parts)?;
        table.set_metatable(Some(lua.array_metatable()));
        Ok(table)
    })
}

/// lib.join(items, sep?) -> string
fn create_join_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (items, sep): (Vec<String>, Option<String>)| {
        Ok(items.join(sep.as_deref().unwrap_or("")))
    })
}

/// lib.replace(s, from, to) -> string
/// Plain substring replacement, unlike string.gsub patterns
fn create_replace_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (s, from, to): (String, String, String)| {
        if from.is_empty() {
            return Ok(s);
        }
        Ok(s.replace(&from, &to))
    })
}

/// lib.find(records, field, value) -> record|nil
/// Find first record where record[field] == value
fn create_find_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|_, (records, field, value): (Table, String, Value)| {
        for pair in records.sequence_values::<Value>() {
            let Value::Table(record) = pair? else {
                continue;
            };
            let field_value: Value = record.get(field.as_str())?;
            if values_equal(&field_value, &value) {
                return Ok(Value::Table(record));
            }
        }
        Ok(Value::Nil)
    })
}

/// lib.filter(items, fn) -> items
/// Keep items for which the predicate is truthy
fn create_filter_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (items, predicate): (Table, Function)| {
        let result = sequence_table(lua)?;
        for item in items.sequence_values::<Value>() {
            let item = item?;
            let keep: Value = predicate.call(item.clone())?;
            if !matches!(keep, Value::Nil | Value::Boolean(false)) {
                result.raw_push(item)?;
            }
        }
        Ok(result)
    })
}

/// lib.map(items, fn) -> items
fn create_map_fn(lua: &Lua) -> LuaResult<Function> {
    lua.create_function(|lua, (items, transform): (Table, Function)| {
        let result = sequence_table(lua)?;
        for item in items.sequence_values::<Value>() {
            let mapped: Value = transform.call(item?)?;
            result.raw_push(mapped)?;
        }
        Ok(result)
    })
}

/// An empty table that converts to an array even when nothing is pushed
fn sequence_table(lua: &Lua) -> LuaResult<Table> {
    let table = lua.create_table()?;
    table.set_metatable(Some(lua.array_metatable()));
    Ok(table)
}

/// Compare two Lua values for equality
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Integer(a), Value::Integer(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => (a - b).abs() < f64::EPSILON,
        (Value::Integer(a), Value::Number(b)) | (Value::Number(b), Value::Integer(a)) => {
            (*a as f64 - b).abs() < f64::EPSILON
        }
        (Value::String(a), Value::String(b)) => a.as_bytes() == b.as_bytes(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_lua() -> Lua {
        let lua = Lua::new();
        register_stdlib(&lua).unwrap();
        lua
    }

    #[test]
    fn test_string_functions() {
        let lua = create_test_lua();

        let lower: String = lua.load("return lib.lower('HELLO')").eval().unwrap();
        assert_eq!(lower, "hello");

        let upper: String = lua.load("return lib.upper('hello')").eval().unwrap();
        assert_eq!(upper, "HELLO");

        let trimmed: String = lua.load("return lib.trim('  hello  ')").eval().unwrap();
        assert_eq!(trimmed, "hello");

        let contains: bool = lua.load("return lib.contains('hello world', 'world')").eval().unwrap();
        assert!(contains);

        let starts: bool = lua.load("return lib.starts_with('release/1.0', 'release/')").eval().unwrap();
        assert!(starts);

        let ends: bool = lua.load("return lib.ends_with('build.xml', '.xml')").eval().unwrap();
        assert!(ends);
    }

    #[test]
    fn test_split_and_join() {
        let lua = create_test_lua();

        let parts: Vec<String> = lua.load("return lib.split('a,b,c', ',')").eval().unwrap();
        assert_eq!(parts, vec!["a", "b", "c"]);

        let words: Vec<String> = lua.load("return lib.split('  a  b ')").eval().unwrap();
        assert_eq!(words, vec!["a", "b"]);

        let joined: String = lua.load("return lib.join({'x', 'y', 3}, '-')").eval().unwrap();
        assert_eq!(joined, "x-y-3");
    }

    #[test]
    fn test_replace_is_plain() {
        let lua = create_test_lua();
        let replaced: String = lua.load("return lib.replace('a.b.c', '.', '/')").eval().unwrap();
        assert_eq!(replaced, "a/b/c");
    }

    #[test]
    fn test_type_checks() {
        let lua = create_test_lua();

        let checks: Vec<bool> = lua
            .load(
                r#"
            return {
                lib.is_nil(nil),
                lib.is_string('hello'),
                lib.is_number(42),
                lib.is_number(4.2),
                lib.is_table({}),
                lib.is_boolean(true),
                lib.is_string(1),
            }
        "#,
            )
            .eval()
            .unwrap();

        assert_eq!(checks, vec![true, true, true, true, true, true, false]);
    }

    #[test]
    fn test_find() {
        let lua = create_test_lua();

        let age: i64 = lua
            .load(
                r#"
            local records = {
                { name = "Alice", age = 30 },
                { name = "Bob", age = 25 },
            }
            return lib.find(records, "name", "Bob").age
        "#,
            )
            .eval()
            .unwrap();
        assert_eq!(age, 25);

        let missing: bool = lua
            .load(r#"return lib.find({}, "name", "Bob") == nil"#)
            .eval()
            .unwrap();
        assert!(missing);
    }

    #[test]
    fn test_filter_and_map() {
        let lua = create_test_lua();

        let result: Vec<i64> = lua
            .load(
                r#"
            local evens = lib.filter({1, 2, 3, 4}, function(n) return n % 2 == 0 end)
            return lib.map(evens, function(n) return n * 10 end)
        "#,
            )
            .eval()
            .unwrap();

        assert_eq!(result, vec![20, 40]);
    }

    #[test]
    fn test_logging() {
        let lua = create_test_lua();
        lua.load(
            r#"
            lib.log("Info message")
            lib.warn("Warning message")
        "#,
        )
        .exec()
        .unwrap();
    }
}
