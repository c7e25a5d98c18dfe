//! Error types for interpolation, rendering and function compilation

use thiserror::Error;

use crate::functions::Lang;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, FormatError>;

/// Errors that abort a format operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    /// A placeholder references a key that is not in the parameter mapping
    #[error("{key} parameter missing to format {template}\nGiven:\n{params}")]
    MissingParameter {
        key: String,
        template: String,
        /// Pretty-printed parameter mapping at the time of the failure
        params: String,
    },

    /// A filter or test function failed to compile in its evaluator
    #[error("failed to compile {lang} function '{name}' for template group '{group}': {message}")]
    FunctionCompilation {
        group: String,
        name: String,
        lang: Lang,
        message: String,
    },

    /// The macro engine could not parse or evaluate a template
    #[error("failed to render template {template:?}: {message}")]
    MacroRender { template: String, message: String },

    /// The `=` escape produced text the expression evaluator rejected
    #[error("failed to evaluate expression {expression:?}: {message}")]
    ExpressionEvaluation { expression: String, message: String },

    /// A classic `{field}` format string is malformed
    #[error("invalid format string {template:?}: {message}")]
    ClassicFormat { template: String, message: String },

    /// A function definition document could not be parsed
    #[error("invalid function definitions: {0}")]
    InvalidFunctionSet(String),

    /// A formatter options document could not be parsed
    #[error("invalid formatter options: {0}")]
    InvalidOptions(String),
}

impl FormatError {
    /// Build a missing-parameter error with a snapshot of the parameters
    pub fn missing_parameter(
        key: impl Into<String>,
        template: impl Into<String>,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let params = serde_json::to_string_pretty(params).unwrap_or_else(|_| format!("{:?}", params));
        FormatError::MissingParameter {
            key: key.into(),
            template: template.into(),
            params,
        }
    }

    /// The missing key, if this is a missing-parameter error
    pub fn missing_key(&self) -> Option<&str> {
        match self {
            FormatError::MissingParameter { key, .. } => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_parameter_display() {
        let params = json!({"name": "demo"});
        let err = FormatError::missing_parameter("branch", "{branch}", params.as_object().unwrap());

        let text = err.to_string();
        assert!(text.starts_with("branch parameter missing to format {branch}\nGiven:\n"));
        assert!(text.contains("\"name\": \"demo\""));
        assert_eq!(err.missing_key(), Some("branch"));
    }

    #[test]
    fn test_compilation_error_names_lang() {
        let err = FormatError::FunctionCompilation {
            group: "defaults".to_string(),
            name: "shout".to_string(),
            lang: Lang::Lua,
            message: "syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to compile lua function 'shout' for template group 'defaults': syntax error"
        );
        assert_eq!(err.missing_key(), None);
    }
}
