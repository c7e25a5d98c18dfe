//! Formatter options

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, Result};
use crate::functions::Lang;

/// Default memory ceiling for each Lua runtime (64 MiB)
pub const DEFAULT_SCRIPT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// How null behaves in macro arithmetic and ordering comparisons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NullHandling {
    /// Error when null is encountered in math/comparison
    #[default]
    Error,
    /// Null operands make the whole operation null
    Empty,
    /// Treat null as 0 in math operations
    Zero,
}

/// Options applied by [`Formatter::format`](crate::Formatter::format) and
/// used when compiling function definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterOptions {
    /// Replace unresolved placeholders with an empty string instead of failing
    pub lenient: bool,
    /// Maximum container depth to descend into (`None` for unlimited)
    pub max_depth: Option<usize>,
    /// Null semantics for macro expressions
    pub null_handling: NullHandling,
    /// Evaluator used when a function definition omits `lang`
    pub default_lang: Lang,
    /// Memory limit in bytes for each Lua runtime
    pub script_memory_limit: usize,
}

impl Default for FormatterOptions {
    fn default() -> Self {
        Self {
            lenient: false,
            max_depth: None,
            null_handling: NullHandling::Error,
            default_lang: Lang::Lua,
            script_memory_limit: DEFAULT_SCRIPT_MEMORY_LIMIT,
        }
    }
}

impl FormatterOptions {
    /// Parse options from a TOML document; omitted keys keep their defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| FormatError::InvalidOptions(e.to_string()))
    }

    /// Serialize options to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| FormatError::InvalidOptions(e.to_string()))
    }

    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn null_handling(mut self, null_handling: NullHandling) -> Self {
        self.null_handling = null_handling;
        self
    }

    pub fn default_lang(mut self, lang: Lang) -> Self {
        self.default_lang = lang;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = FormatterOptions::default();
        assert!(!options.lenient);
        assert_eq!(options.max_depth, None);
        assert_eq!(options.null_handling, NullHandling::Error);
        assert_eq!(options.default_lang, Lang::Lua);
    }

    #[test]
    fn test_from_toml_partial() {
        let options = FormatterOptions::from_toml_str(
            r#"
            lenient = true
            max_depth = 3
            null_handling = "zero"
            "#,
        )
        .unwrap();

        assert!(options.lenient);
        assert_eq!(options.max_depth, Some(3));
        assert_eq!(options.null_handling, NullHandling::Zero);
        assert_eq!(options.script_memory_limit, DEFAULT_SCRIPT_MEMORY_LIMIT);
    }

    #[test]
    fn test_from_toml_default_lang() {
        let options = FormatterOptions::from_toml_str("default_lang = \"expr\"").unwrap();
        assert_eq!(options.default_lang, Lang::Expr);
    }

    #[test]
    fn test_from_toml_rejects_unknown_null_handling() {
        let err = FormatterOptions::from_toml_str("null_handling = \"maybe\"").unwrap_err();
        assert!(matches!(err, FormatError::InvalidOptions(_)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let options = FormatterOptions::default().lenient(true).default_lang(Lang::Expr);
        let text = options.to_toml_string().unwrap();
        assert_eq!(FormatterOptions::from_toml_str(&text).unwrap(), options);
    }
}
