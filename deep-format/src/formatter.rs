//! The formatter: options, compiled functions and the macro renderer

use serde_json::Value;

use crate::config::FormatterOptions;
use crate::error::{FormatError, Result};
use crate::format::{Context, EvalError, parse_template};
use crate::functions::{ExpressionEvaluator, FunctionRegistry, FunctionSet};
use crate::value::Params;

/// Interpolates parameters into template trees
///
/// A formatter owns the compiled filters and tests of every template group
/// it has rendered, so reuse one formatter for all jobs of a run. It can be
/// shared between threads.
#[derive(Debug)]
pub struct Formatter {
    options: FormatterOptions,
    registry: FunctionRegistry,
    expressions: ExpressionEvaluator,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter {
    pub fn new() -> Self {
        Self::with_options(FormatterOptions::default())
    }

    pub fn with_options(options: FormatterOptions) -> Self {
        Formatter {
            registry: FunctionRegistry::new(&options),
            expressions: ExpressionEvaluator::new(options.null_handling),
            options,
        }
    }

    pub fn options(&self) -> &FormatterOptions {
        &self.options
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// [`transform`](Self::transform) with the configured leniency and depth
    pub fn format(&self, node: &Value, params: &Params, group: &FunctionSet) -> Result<Value> {
        self.transform(node, params, group, self.options.lenient, self.options.max_depth)
    }

    /// Render a macro template
    ///
    /// The group's filters and tests are compiled on first use. If the
    /// rendered text starts with `=`, the rest is evaluated as an expression
    /// and its value returned instead of the text.
    pub fn render(
        &self,
        text: &str,
        params: &Params,
        group: &FunctionSet,
        lenient: bool,
    ) -> Result<Value> {
        let functions = self.registry.get_or_build(group)?;

        let template = parse_template(text).map_err(|e| FormatError::MacroRender {
            template: text.to_string(),
            message: e.to_string(),
        })?;

        let rendered = Context::new(params, &*functions)
            .lenient(lenient)
            .null_handling(self.options.null_handling)
            .render(&template)
            .map_err(|e| match e {
                EvalError::Undefined(key) => FormatError::missing_parameter(key, text, params),
                EvalError::Failed(message) => FormatError::MacroRender {
                    template: text.to_string(),
                    message,
                },
            })?;

        match rendered.strip_prefix('=') {
            Some(expression) => {
                log::debug!("evaluating expression escape {:?}", expression);
                self.expressions.evaluate(expression)
            }
            None => Ok(Value::String(rendered)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NullHandling;
    use crate::functions::{FunctionSpec, Lang};
    use serde_json::json;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_formatter_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Formatter>();
    }

    #[test]
    fn test_classic_substitution() {
        init();
        let formatter = Formatter::new();
        let result = formatter
            .format(&json!("hello {name}"), &params(json!({"name": "world"})), &FunctionSet::default())
            .unwrap();
        assert_eq!(result, json!("hello world"));
    }

    #[test]
    fn test_strict_missing_key_names_key() {
        init();
        let formatter = Formatter::new();
        let err = formatter
            .format(&json!({"a": ["{absent}"]}), &Params::new(), &FunctionSet::default())
            .unwrap_err();
        assert_eq!(err.missing_key(), Some("absent"));
        assert!(err.to_string().contains("absent parameter missing to format {absent}"));
    }

    #[test]
    fn test_lenient_from_options() {
        init();
        let formatter = Formatter::with_options(FormatterOptions::default().lenient(true));
        let result = formatter
            .format(
                &json!(["{absent}", "${absent}", "{obj:absent}"]),
                &Params::new(),
                &FunctionSet::default(),
            )
            .unwrap();
        assert_eq!(result, json!(["", "", ""]));
    }

    #[test]
    fn test_max_depth_from_options() {
        init();
        let formatter = Formatter::with_options(FormatterOptions::default().max_depth(Some(1)));
        let result = formatter
            .format(&json!([[["{x}"]]]), &params(json!({"x": 1})), &FunctionSet::default())
            .unwrap();
        assert_eq!(result, json!([[["{x}"]]]));
    }

    #[test]
    fn test_expression_escape() {
        init();
        let formatter = Formatter::new();
        let group = FunctionSet::default();

        assert_eq!(formatter.render("=1+1", &Params::new(), &group, false).unwrap(), json!(2));
        assert_eq!(
            formatter
                .render("=${a} > ${b}", &params(json!({"a": 3, "b": 2})), &group, false)
                .unwrap(),
            json!(true)
        );
        assert_eq!(
            formatter
                .render("=[${a}, ${b}]", &params(json!({"a": 3, "b": 2})), &group, false)
                .unwrap(),
            json!([3, 2])
        );
    }

    #[test]
    fn test_expression_escape_failure() {
        init();
        let err = Formatter::new()
            .render("=1 +", &Params::new(), &FunctionSet::default(), false)
            .unwrap_err();
        assert!(matches!(err, FormatError::ExpressionEvaluation { ref expression, .. } if expression == "1 +"));
    }

    #[test]
    fn test_macro_undefined_is_missing_parameter() {
        init();
        let err = Formatter::new()
            .render("${nope}", &Params::new(), &FunctionSet::default(), false)
            .unwrap_err();
        assert_eq!(err.missing_key(), Some("nope"));
    }

    #[test]
    fn test_macro_syntax_error() {
        init();
        let err = Formatter::new()
            .render("{% if x %}open", &params(json!({"x": true})), &FunctionSet::default(), false)
            .unwrap_err();
        assert!(matches!(err, FormatError::MacroRender { .. }));
    }

    #[test]
    fn test_group_filters_and_tests() {
        init();
        let group = FunctionSet::new("release")
            .with_filter(FunctionSpec::lua("shout", "function(s) return s:upper() .. '!' end"))
            .with_filter(FunctionSpec::expr("twice", "|s| s ~ s"))
            .with_test(FunctionSpec::lua(
                "release_branch",
                "function(s) return s:sub(1, 8) == 'release/' end",
            ));
        let params = params(json!({"name": "go", "branch": "release/1.2"}));
        let formatter = Formatter::new();

        let result = formatter
            .render(
                "${name | shout}${name | twice}{% if branch is release_branch %} (release){% endif %}",
                &params,
                &group,
                false,
            )
            .unwrap();
        assert_eq!(result, json!("GO!gogo (release)"));
    }

    #[test]
    fn test_group_compiled_once_across_renders() {
        init();
        let group = FunctionSet::new("counted").with_filter(FunctionSpec::lua(
            "loads",
            "loads = (loads or 0) + 1\nreturn function() return loads end",
        ));
        let formatter = Formatter::new();

        for _ in 0..3 {
            let result = formatter.render("${none | loads}", &Params::new(), &group, false).unwrap();
            assert_eq!(result, json!("1"));
        }
        assert_eq!(formatter.registry().len(), 1);
    }

    #[test]
    fn test_compile_error_surfaces_before_rendering() {
        init();
        let group = FunctionSet::new("broken").with_filter(FunctionSpec::lua("bad", "function( end"));
        let err = Formatter::new()
            .render("${name}", &Params::new(), &group, false)
            .unwrap_err();
        assert!(matches!(err, FormatError::FunctionCompilation { lang: Lang::Lua, .. }));
    }

    #[test]
    fn test_filter_failure_is_render_error() {
        init();
        let group = FunctionSet::new("failing")
            .with_filter(FunctionSpec::lua("boom", "function() error('boom') end"));
        let err = Formatter::new()
            .render("${1 | boom}", &Params::new(), &group, false)
            .unwrap_err();
        assert!(matches!(err, FormatError::MacroRender { ref message, .. } if message.contains("boom")));
    }

    #[test]
    fn test_null_handling_option() {
        init();
        let params = params(json!({"n": null}));
        let group = FunctionSet::default();

        let strict = Formatter::new();
        assert!(strict.render("${n + 1}", &params, &group, false).is_err());

        let zero = Formatter::with_options(FormatterOptions::default().null_handling(NullHandling::Zero));
        assert_eq!(zero.render("${n + 1}", &params, &group, false).unwrap(), json!("1"));
    }

    #[test]
    fn test_job_definition() {
        init();
        let group = FunctionSet::from_yaml_str(
            r#"
name: pipelines
filters:
  - name: slug
    func: "function(s) return lib.lower(lib.replace(s, ' ', '-')) end"
"#,
        )
        .unwrap();
        let template = json!({
            "name": "${project | slug}-${stage}",
            "triggers": "{obj:branches}",
            "{stage}-timeout": "=${minutes} * 60",
            "description": "{% for b in branches %}${b}{% if not loop.last %}, {% endif %}{% endfor %}",
        });
        let params = params(json!({
            "project": "Web Shop",
            "stage": "deploy",
            "branches": ["main", "hotfix"],
            "minutes": 5,
        }));

        let result = Formatter::new().format(&template, &params, &group).unwrap();
        assert_eq!(
            result,
            json!({
                "name": "web-shop-deploy",
                "triggers": ["main", "hotfix"],
                "deploy-timeout": 300,
                "description": "main, hotfix",
            })
        );
    }

    #[test]
    fn test_format_is_idempotent_on_rendered_output() {
        init();
        let formatter = Formatter::new();
        let params = params(json!({"name": "deploy"}));
        let group = FunctionSet::default();

        let once = formatter.format(&json!({"a": ["{name}", 1]}), &params, &group).unwrap();
        let twice = formatter.format(&once, &params, &group).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_lua_filters_keep_empty_sequences() {
        init();
        let group = FunctionSet::new("shapes")
            .with_filter(FunctionSpec::lua("id", "function(v) return v end"))
            .with_filter(FunctionSpec::lua(
                "drop_all",
                "function(xs) return lib.filter(xs, function() return false end) end",
            ));
        let params = params(json!({"branches": ["main", "dev"]}));
        let formatter = Formatter::new();

        assert_eq!(formatter.render("=${ [] | id }", &params, &group, false).unwrap(), json!([]));
        assert_eq!(
            formatter.render("=${ branches | drop_all }", &params, &group, false).unwrap(),
            json!([])
        );
        assert_eq!(formatter.render("=${ {} | id }", &params, &group, false).unwrap(), json!({}));
    }

    #[test]
    fn test_deeply_nested_expression_is_render_error() {
        init();
        let text = format!("${{{}a{}}}", "(".repeat(200), ")".repeat(200));
        let err = Formatter::new()
            .render(&text, &params(json!({"a": true})), &FunctionSet::default(), false)
            .unwrap_err();
        assert!(matches!(err, FormatError::MacroRender { ref message, .. } if message.contains("nested deeper")));
    }

    #[test]
    fn test_loop_variables() {
        init();
        let result = Formatter::new()
            .render(
                "{% for b in branches %}${loop.index0}/${loop.index}/${loop.length}:${b}{% if loop.first %}^{% endif %} {% endfor %}",
                &params(json!({"branches": ["main", "dev", "qa"]})),
                &FunctionSet::default(),
                false,
            )
            .unwrap();
        assert_eq!(result, json!("0/1/3:main^ 1/2/3:dev 2/3/3:qa "));
    }
}
