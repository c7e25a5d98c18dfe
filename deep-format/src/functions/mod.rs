//! Filter and test functions for the macro layer
//!
//! Template groups declare their own filters and tests as source code in one
//! of two dialects:
//!
//! - `lua`: a Lua chunk evaluating to a function, run in a sandboxed runtime
//! - `expr`: a closure in the template expression language, e.g. `|s, n| s ~ n`
//!
//! Definitions usually come from the job-definition document:
//!
//! ```yaml
//! name: release
//! filters:
//!   - name: shout
//!     func: "function(s) return s:upper() .. '!' end"
//!   - name: double
//!     lang: expr
//!     func: "|n| n * 2"
//! tests:
//!   - name: release_branch
//!     func: "function(s) return s:sub(1, 8) == 'release/' end"
//! ```
//!
//! The [`FunctionRegistry`] compiles each group once and caches the result.
//! Names that a group does not define fall back to the [`builtins`].

pub mod builtins;
mod expr;
mod registry;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FormatError, Result};

pub use expr::ExpressionEvaluator;
pub use registry::{FunctionRegistry, GroupFunctions};

/// Dialect a filter or test is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    /// Sandboxed Lua script evaluator
    #[default]
    Lua,
    /// Template expression language
    Expr,
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lang::Lua => write!(f, "lua"),
            Lang::Expr => write!(f, "expr"),
        }
    }
}

/// A named filter or test function and its source code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    /// Evaluator to compile with; `None` uses the formatter's default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<Lang>,
    #[serde(rename = "func", alias = "source")]
    pub source: String,
}

impl FunctionSpec {
    pub fn new(name: impl Into<String>, lang: Option<Lang>, source: impl Into<String>) -> Self {
        FunctionSpec {
            name: name.into(),
            lang,
            source: source.into(),
        }
    }

    pub fn lua(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(name, Some(Lang::Lua), source)
    }

    pub fn expr(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(name, Some(Lang::Expr), source)
    }
}

/// Filters and tests declared for one template group
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionSet {
    /// Group identifier; functions are compiled once per name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub filters: Vec<FunctionSpec>,
    pub tests: Vec<FunctionSpec>,
}

impl FunctionSet {
    /// Create an empty set for a named group
    pub fn new(name: impl Into<String>) -> Self {
        FunctionSet {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// The identifier the registry caches this set under
    pub fn group(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn with_filter(mut self, spec: FunctionSpec) -> Self {
        self.filters.push(spec);
        self
    }

    pub fn with_test(mut self, spec: FunctionSpec) -> Self {
        self.tests.push(spec);
        self
    }

    /// Parse a set from a YAML document
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).map_err(|e| FormatError::InvalidFunctionSet(e.to_string()))
    }

    /// Parse a set from a JSON document
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| FormatError::InvalidFunctionSet(e.to_string()))
    }
}

/// A compiled filter or test
///
/// Receives the filtered value followed by any call arguments.
pub trait Callable: Send + Sync {
    fn call(&self, args: &[Value]) -> std::result::Result<Value, String>;
}

/// Something that turns function source code into a [`Callable`]
pub trait Evaluator {
    fn lang(&self) -> Lang;

    fn compile(&self, name: &str, source: &str) -> std::result::Result<Arc<dyn Callable>, String>;
}

/// Filter and test lookup used while evaluating templates
pub trait FunctionLookup {
    fn filter(&self, name: &str) -> Option<&dyn Callable>;
    fn test(&self, name: &str) -> Option<&dyn Callable>;
}

/// Lookup with no group functions; only built-ins resolve
pub struct BuiltinsOnly;

impl FunctionLookup for BuiltinsOnly {
    fn filter(&self, _name: &str) -> Option<&dyn Callable> {
        None
    }

    fn test(&self, _name: &str) -> Option<&dyn Callable> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_set_from_yaml() {
        let set = FunctionSet::from_yaml_str(
            r#"
name: release
filters:
  - name: shout
    func: "function(s) return s:upper() end"
  - name: double
    lang: expr
    func: "|n| n * 2"
tests:
  - name: short
    lang: lua
    func: "function(s) return #s < 4 end"
"#,
        )
        .unwrap();

        assert_eq!(set.group(), "release");
        assert_eq!(set.filters.len(), 2);
        assert_eq!(set.filters[0].lang, None);
        assert_eq!(set.filters[1].lang, Some(Lang::Expr));
        assert_eq!(set.filters[1].source, "|n| n * 2");
        assert_eq!(set.tests[0].lang, Some(Lang::Lua));
    }

    #[test]
    fn test_function_set_from_json_without_name() {
        let set = FunctionSet::from_json_str(r#"{"filters": [{"name": "id", "source": "|v| v"}]}"#)
            .unwrap();
        assert_eq!(set.group(), "");
        assert!(set.tests.is_empty());
        assert_eq!(set.filters[0].source, "|v| v");
    }

    #[test]
    fn test_function_set_rejects_unknown_lang() {
        let err = FunctionSet::from_yaml_str(
            "filters:\n  - name: f\n    lang: ruby\n    func: x\n",
        )
        .unwrap_err();
        assert!(matches!(err, FormatError::InvalidFunctionSet(_)));
    }

    #[test]
    fn test_builder() {
        let set = FunctionSet::new("g")
            .with_filter(FunctionSpec::expr("inc", "|n| n + 1"))
            .with_test(FunctionSpec::lua("big", "function(n) return n > 10 end"));
        assert_eq!(set.filters[0].name, "inc");
        assert_eq!(set.tests[0].lang, Some(Lang::Lua));
    }
}
