//! Interpolation of a single text value
//!
//! Each text is routed by its content:
//!
//! - `{obj:KEY}` as the whole text returns the parameter itself, keeping its type
//! - text with `${`, `{%` or `{#` is a macro template
//! - any other text with a brace is a classic `{name}` format string
//! - everything else is returned as is

mod classic;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{FormatError, Result};
use crate::formatter::Formatter;
use crate::functions::FunctionSet;
use crate::value::{Params, to_display};

static SHORTCUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{obj:(\w+)\}$").expect("shortcut pattern is valid"));

/// How a text value is interpolated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind<'a> {
    /// `{obj:KEY}`, replaced by the raw parameter value
    Shortcut(&'a str),
    Macro,
    Classic,
    Literal,
}

impl<'a> TextKind<'a> {
    pub fn classify(text: &'a str) -> Self {
        if let Some(key) = SHORTCUT.captures(text).and_then(|c| c.get(1)) {
            return TextKind::Shortcut(key.as_str());
        }
        if text.contains("${") || text.contains("{%") || text.contains("{#") {
            TextKind::Macro
        } else if text.contains(['{', '}']) {
            TextKind::Classic
        } else {
            TextKind::Literal
        }
    }
}

impl Formatter {
    /// Interpolate one text value against `params`
    ///
    /// Returns a string except for `{obj:KEY}` shortcuts and macro
    /// templates that use the `=` expression escape.
    pub fn interpolate(
        &self,
        text: &str,
        params: &Params,
        group: &FunctionSet,
        lenient: bool,
    ) -> Result<Value> {
        let kind = TextKind::classify(text);
        log::trace!("interpolating {:?} as {:?}", text, kind);

        match kind {
            TextKind::Shortcut(key) => match params.get(key) {
                Some(value) => Ok(value.clone()),
                None if lenient => {
                    log::debug!("Found uninitialized key {}, replaced with empty string", key);
                    Ok(Value::String(String::new()))
                }
                None => Err(FormatError::missing_parameter(key, text, params)),
            },
            TextKind::Macro => self.render(text, params, group, lenient),
            TextKind::Classic => classic::substitute(text, params, lenient).map(Value::String),
            TextKind::Literal => Ok(Value::String(text.to_string())),
        }
    }

    /// Render a mapping key; keys never take the shortcut path and are
    /// always strings
    pub(crate) fn render_key(
        &self,
        key: &str,
        params: &Params,
        group: &FunctionSet,
        lenient: bool,
    ) -> Result<String> {
        match TextKind::classify(key) {
            TextKind::Macro => self
                .render(key, params, group, lenient)
                .map(|value| match value {
                    Value::String(s) => s,
                    other => to_display(&other),
                }),
            TextKind::Shortcut(_) | TextKind::Classic => classic::substitute(key, params, lenient),
            TextKind::Literal => Ok(key.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> Params {
        json!({
            "name": "deploy",
            "branches": ["main", "dev"],
            "retries": 3,
            "id": "job-1",
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(TextKind::classify("{obj:branches}"), TextKind::Shortcut("branches"));
        assert_eq!(TextKind::classify("${name}"), TextKind::Macro);
        assert_eq!(TextKind::classify("{% if x %}y{% endif %}"), TextKind::Macro);
        assert_eq!(TextKind::classify("{# note #}"), TextKind::Macro);
        assert_eq!(TextKind::classify("hello {name}"), TextKind::Classic);
        assert_eq!(TextKind::classify("x {obj:branches}"), TextKind::Classic);
        assert_eq!(TextKind::classify("{obj:a-b}"), TextKind::Classic);
        assert_eq!(TextKind::classify("plain text"), TextKind::Literal);
    }

    #[test]
    fn test_shortcut_keeps_type() {
        let formatter = Formatter::new();
        let group = FunctionSet::default();

        let value = formatter.interpolate("{obj:branches}", &params(), &group, false).unwrap();
        assert_eq!(value, json!(["main", "dev"]));

        let value = formatter.interpolate("{obj:retries}", &params(), &group, false).unwrap();
        assert_eq!(value, json!(3));
    }

    #[test]
    fn test_shortcut_missing_key() {
        let formatter = Formatter::new();
        let group = FunctionSet::default();

        let err = formatter.interpolate("{obj:nope}", &params(), &group, false).unwrap_err();
        assert_eq!(err.missing_key(), Some("nope"));

        let value = formatter.interpolate("{obj:nope}", &params(), &group, true).unwrap();
        assert_eq!(value, json!(""));
    }

    #[test]
    fn test_dispatch() {
        let formatter = Formatter::new();
        let group = FunctionSet::default();
        let interpolate = |text: &str| formatter.interpolate(text, &params(), &group, false).unwrap();

        assert_eq!(interpolate("hello {name}"), json!("hello deploy"));
        assert_eq!(interpolate("${name | upper}-${retries + 1}"), json!("DEPLOY-4"));
        assert_eq!(interpolate("no braces"), json!("no braces"));
        assert_eq!(interpolate("=${retries} * 2"), json!(6));
    }

    #[test]
    fn test_macro_leaves_single_braces_alone() {
        let formatter = Formatter::new();
        let value = formatter
            .interpolate("{literal} ${name}", &params(), &FunctionSet::default(), false)
            .unwrap();
        assert_eq!(value, json!("{literal} deploy"));
    }

    #[test]
    fn test_render_key() {
        let formatter = Formatter::new();
        let group = FunctionSet::default();
        let key = |text: &str| formatter.render_key(text, &params(), &group, false).unwrap();

        assert_eq!(key("{id}"), "job-1");
        assert_eq!(key("${id}-x"), "job-1-x");
        assert_eq!(key("=${retries} + 1"), "4");
        assert_eq!(key("static"), "static");
    }

    #[test]
    fn test_render_key_never_uses_shortcut() {
        let formatter = Formatter::new();
        let group = FunctionSet::default();

        // Classic substitution of `obj:id` looks up the key "obj"
        let err = formatter.render_key("{obj:id}", &params(), &group, false).unwrap_err();
        assert_eq!(err.missing_key(), Some("obj"));
    }
}
