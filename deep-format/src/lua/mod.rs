//! Lua filters and tests
//!
//! A filter or test is a Lua chunk that evaluates to a function:
//!
//! ```lua
//! function(name, suffix)
//!     return lib.lower(name) .. "-" .. (suffix or "job")
//! end
//! ```
//!
//! The function receives the filtered value first, followed by any
//! arguments given in the template. Each template group gets its own
//! runtime, so globals set by one group's scripts never leak into another.

mod runtime;
mod stdlib;

use std::sync::Arc;

use mlua::Function;
use serde_json::Value;

use crate::functions::{Callable, Evaluator, Lang};

pub use runtime::LuaRuntime;

/// Compiles Lua sources into functions that share one runtime
pub struct LuaEvaluator {
    runtime: Arc<LuaRuntime>,
}

impl LuaEvaluator {
    pub fn new(memory_limit: usize) -> anyhow::Result<Self> {
        Ok(LuaEvaluator {
            runtime: Arc::new(LuaRuntime::new(memory_limit)?),
        })
    }
}

impl Evaluator for LuaEvaluator {
    fn lang(&self) -> Lang {
        Lang::Lua
    }

    fn compile(&self, name: &str, source: &str) -> Result<Arc<dyn Callable>, String> {
        let function = self
            .runtime
            .load_function(source)
            .map_err(|e| format!("{:#}", e))?;

        log::trace!("compiled Lua function '{}'", name);

        Ok(Arc::new(LuaFunction {
            runtime: Arc::clone(&self.runtime),
            function,
        }))
    }
}

/// A Lua function together with the runtime that owns it
struct LuaFunction {
    runtime: Arc<LuaRuntime>,
    function: Function,
}

impl Callable for LuaFunction {
    fn call(&self, args: &[Value]) -> Result<Value, String> {
        self.runtime
            .call(&self.function, args)
            .map_err(|e| format!("{:#}", e))
    }
}
