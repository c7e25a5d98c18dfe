//! Filters and tests written in the template expression language

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{BuiltinsOnly, Callable, Evaluator, Lang};
use crate::config::NullHandling;
use crate::error::{FormatError, Result};
use crate::format::{Context, Lambda, parse_expression, parse_lambda};
use crate::value::Params;

/// Evaluates expression-language source with built-in functions only
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator {
    null_handling: NullHandling,
}

impl ExpressionEvaluator {
    pub fn new(null_handling: NullHandling) -> Self {
        ExpressionEvaluator { null_handling }
    }

    /// Evaluate a standalone expression such as `1 + 1`
    ///
    /// No variables are in scope; any reference fails.
    pub fn evaluate(&self, source: &str) -> Result<Value> {
        let failure = |message: String| FormatError::ExpressionEvaluation {
            expression: source.to_string(),
            message,
        };

        let expr = parse_expression(source).map_err(|e| failure(e.to_string()))?;
        let params = Params::new();
        Context::new(&params, &BuiltinsOnly)
            .null_handling(self.null_handling)
            .eval(&expr)
            .map_err(|e| failure(e.to_string()))
    }
}

impl Evaluator for ExpressionEvaluator {
    fn lang(&self) -> Lang {
        Lang::Expr
    }

    fn compile(&self, _name: &str, source: &str) -> std::result::Result<Arc<dyn Callable>, String> {
        let lambda = parse_lambda(source).map_err(|e| e.to_string())?;
        Ok(Arc::new(ExprFunction {
            lambda,
            null_handling: self.null_handling,
        }))
    }
}

/// A compiled closure; missing arguments are bound to null
struct ExprFunction {
    lambda: Lambda,
    null_handling: NullHandling,
}

impl Callable for ExprFunction {
    fn call(&self, args: &[Value]) -> std::result::Result<Value, String> {
        let locals: Map<String, Value> = self
            .lambda
            .params
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), args.get(i).cloned().unwrap_or(Value::Null)))
            .collect();

        let params = Params::new();
        Context::new(&params, &BuiltinsOnly)
            .null_handling(self.null_handling)
            .with_locals(locals)
            .eval(&self.lambda.body)
            .map_err(|e| e.to_string())
    }
}
