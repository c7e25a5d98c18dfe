//! Lua runtime for filter and test scripts
//!
//! Provides a sandboxed Lua environment: only the `table`, `string`, `math`
//! and `utf8` libraries are loaded, memory is capped, and a `lib` table of
//! helpers is installed.

use anyhow::{Context, Result, bail};
use mlua::{Function, Lua, LuaOptions, LuaSerdeExt, MultiValue, SerializeOptions, StdLib, Value};

use super::stdlib::register_stdlib;

const TO_LUA: SerializeOptions = SerializeOptions::new()
    .serialize_none_to_null(false)
    .serialize_unit_to_null(false);

/// A sandboxed Lua runtime owned by one template group
pub struct LuaRuntime {
    lua: Lua,
}

impl LuaRuntime {
    /// Create a new sandboxed Lua runtime
    pub fn new(memory_limit: usize) -> Result<Self> {
        // Limited standard libraries (no io, os, package, debug)
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )
        .context("Failed to create Lua runtime")?;

        lua.set_memory_limit(memory_limit)
            .context("Failed to set Lua memory limit")?;

        register_stdlib(&lua).context("Failed to register stdlib")?;

        Ok(LuaRuntime { lua })
    }

    /// Evaluate source that must produce a function, e.g.
    /// `function(s) return s:upper() end`
    pub fn load_function(&self, source: &str) -> Result<Function> {
        let value: Value = self
            .lua
            .load(source)
            .eval()
            .context("Failed to evaluate script")?;

        match value {
            Value::Function(function) => Ok(function),
            other => bail!(
                "Script must evaluate to a function, got {}",
                other.type_name()
            ),
        }
    }

    /// Call a function with JSON arguments and convert its first result back
    pub fn call(&self, function: &Function, args: &[serde_json::Value]) -> Result<serde_json::Value> {
        let lua_args = args
            .iter()
            .map(|arg| self.json_to_lua(arg))
            .collect::<Result<Vec<_>>>()?;

        let result: Value = function
            .call(MultiValue::from_vec(lua_args))
            .context("Lua function failed")?;

        self.lua_to_json(result)
    }

    /// Convert JSON value to Lua value
    ///
    /// Null becomes `nil`; arrays carry the array metatable so that empty
    /// ones convert back to arrays.
    pub fn json_to_lua(&self, value: &serde_json::Value) -> Result<Value> {
        self.lua
            .to_value_with(value, TO_LUA)
            .context("Failed to convert value to Lua")
    }

    /// Convert Lua value to JSON
    ///
    /// Tables with a sequence part or the array metatable become arrays;
    /// other tables become objects.
    pub fn lua_to_json(&self, value: Value) -> Result<serde_json::Value> {
        let type_name = value.type_name();
        self.lua
            .from_value(value)
            .with_context(|| format!("Cannot convert Lua {} to a template value", type_name))
    }
}
