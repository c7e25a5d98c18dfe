//! Evaluator for macro templates

use std::cmp::Ordering;

use serde_json::{Map, Value, json};

use super::ast::*;
use crate::config::NullHandling;
use crate::functions::{FunctionLookup, builtins};
use crate::value::{
    Num, Params, as_num, compare_values, contains, is_truthy, to_display, type_name, values_equal,
};

/// Why evaluation stopped
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// A variable or attribute that does not exist (strict mode only)
    Undefined(String),
    /// Any other evaluation failure
    Failed(String),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Undefined(name) => write!(f, "'{}' is undefined", name),
            EvalError::Failed(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<String> for EvalError {
    fn from(message: String) -> Self {
        EvalError::Failed(message)
    }
}

/// Variables, functions and settings a template is evaluated against
pub struct Context<'a> {
    params: &'a Params,
    functions: &'a dyn FunctionLookup,
    lenient: bool,
    null_handling: NullHandling,
    /// Loop and closure bindings, innermost last
    scopes: Vec<Map<String, Value>>,
}

impl<'a> Context<'a> {
    pub fn new(params: &'a Params, functions: &'a dyn FunctionLookup) -> Self {
        Context {
            params,
            functions,
            lenient: false,
            null_handling: NullHandling::Error,
            scopes: Vec::new(),
        }
    }

    /// Undefined variables evaluate to null instead of failing
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    pub fn null_handling(mut self, null_handling: NullHandling) -> Self {
        self.null_handling = null_handling;
        self
    }

    /// Bind extra variables that shadow the parameters
    pub fn with_locals(mut self, locals: Map<String, Value>) -> Self {
        self.scopes.push(locals);
        self
    }

    /// Render a template to text
    pub fn render(&mut self, template: &Template) -> Result<String, EvalError> {
        let mut out = String::new();
        self.render_nodes(&template.nodes, &mut out)?;
        Ok(out)
    }

    fn render_nodes(&mut self, nodes: &[Node], out: &mut String) -> Result<(), EvalError> {
        for node in nodes {
            match node {
                Node::Literal(s) => out.push_str(s),
                Node::Output(expr) => {
                    let value = self.eval(expr)?;
                    out.push_str(&to_display(&value));
                }
                Node::If { branches, otherwise } => {
                    let mut taken = None;
                    for (condition, body) in branches {
                        if is_truthy(&self.eval(condition)?) {
                            taken = Some(body);
                            break;
                        }
                    }
                    self.render_nodes(taken.unwrap_or(otherwise), out)?;
                }
                Node::For {
                    target,
                    iterable,
                    body,
                    otherwise,
                } => self.render_for(target, iterable, body, otherwise, out)?,
            }
        }
        Ok(())
    }

    fn render_for(
        &mut self,
        target: &LoopTarget,
        iterable: &Expr,
        body: &[Node],
        otherwise: &[Node],
        out: &mut String,
    ) -> Result<(), EvalError> {
        let iterable = self.eval(iterable)?;

        let rows: Vec<Vec<Value>> = match (&iterable, target) {
            (Value::Array(items), LoopTarget::Single(_)) => {
                items.iter().map(|item| vec![item.clone()]).collect()
            }
            (Value::Array(items), LoopTarget::Pair(..)) => items
                .iter()
                .map(unpack_pair)
                .collect::<Result<_, _>>()?,
            (Value::Object(map), LoopTarget::Single(_)) => {
                map.keys().map(|k| vec![Value::String(k.clone())]).collect()
            }
            (Value::Object(map), LoopTarget::Pair(..)) => map
                .iter()
                .map(|(k, v)| vec![Value::String(k.clone()), v.clone()])
                .collect(),
            (Value::String(s), LoopTarget::Single(_)) => {
                s.chars().map(|c| vec![Value::String(c.to_string())]).collect()
            }
            // Undefined values resolved leniently iterate as empty
            (Value::Null, _) => Vec::new(),
            (other, LoopTarget::Single(_)) => {
                return Err(EvalError::Failed(format!("cannot iterate over {}", type_name(other))));
            }
            (other, LoopTarget::Pair(..)) => {
                return Err(EvalError::Failed(format!(
                    "cannot unpack items of {} into two loop variables",
                    type_name(other)
                )));
            }
        };

        if rows.is_empty() {
            return self.render_nodes(otherwise, out);
        }

        let length = rows.len();
        for (index0, row) in rows.into_iter().enumerate() {
            let mut scope = Map::new();
            for (name, value) in target.names().into_iter().zip(row) {
                scope.insert(name.to_string(), value);
            }
            scope.insert(
                "loop".to_string(),
                json!({
                    "index": index0 + 1,
                    "index0": index0,
                    "first": index0 == 0,
                    "last": index0 + 1 == length,
                    "length": length,
                }),
            );

            self.scopes.push(scope);
            let result = self.render_nodes(body, out);
            self.scopes.pop();
            result?;
        }

        Ok(())
    }

    /// Evaluate an expression
    pub fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Variable(_) | Expr::Attr { .. } | Expr::Index { .. } => match self.lookup(expr)? {
                Some(value) => Ok(value),
                None => self.undefined(expr),
            },

            Expr::Constant(value) => Ok(value.clone()),

            Expr::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?,
            )),

            Expr::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = to_display(&self.eval(key)?);
                    map.insert(key, self.eval(value)?);
                }
                Ok(Value::Object(map))
            }

            Expr::Math { left, op, right } => {
                let left_val = self.eval(left)?;
                let right_val = self.eval(right)?;
                Ok(eval_math(&left_val, *op, &right_val, self.null_handling)?)
            }

            Expr::Concat { left, right } => {
                let left_val = self.eval(left)?;
                let right_val = self.eval(right)?;
                Ok(Value::String(to_display(&left_val) + &to_display(&right_val)))
            }

            Expr::Compare { left, op, right } => {
                let left_val = self.eval(left)?;
                let right_val = self.eval(right)?;
                let result = eval_compare(&left_val, *op, &right_val, self.null_handling)?;
                Ok(Value::Bool(result))
            }

            Expr::Contains {
                item,
                container,
                negated,
            } => {
                let item_val = self.eval(item)?;
                let container_val = self.eval(container)?;
                let found = contains(&container_val, &item_val)?;
                Ok(Value::Bool(found != *negated))
            }

            // `and`/`or` return one of their operands
            Expr::And(left, right) => {
                let left_val = self.eval(left)?;
                if is_truthy(&left_val) {
                    self.eval(right)
                } else {
                    Ok(left_val)
                }
            }

            Expr::Or(left, right) => {
                let left_val = self.eval(left)?;
                if is_truthy(&left_val) {
                    Ok(left_val)
                } else {
                    self.eval(right)
                }
            }

            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&self.eval(inner)?))),

            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                let cond_val = self.eval(condition)?;
                if is_truthy(&cond_val) {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }

            Expr::Coalesce { exprs } => {
                for e in exprs {
                    if let Some(val) = self.lookup(e)? {
                        if !val.is_null() {
                            return Ok(val);
                        }
                    }
                }
                // All values were null or undefined
                Ok(Value::Null)
            }

            Expr::Formatted { expr, spec } => {
                let val = self.eval(expr)?;
                let formatted = apply_format_spec(&val, spec)?;
                Ok(Value::String(formatted))
            }

            Expr::Negate(inner) => {
                let val = self.eval(inner)?;
                Ok(eval_negate(&val, self.null_handling)?)
            }

            Expr::Filter { base, name, args } => self.apply_filter(base, name, args),

            Expr::Test {
                base,
                name,
                args,
                negated,
            } => {
                let result = self.apply_test(base, name, args)?;
                Ok(Value::Bool(result != *negated))
            }
        }
    }

    /// Evaluate an expression, reporting undefined references as `None`
    fn lookup(&mut self, expr: &Expr) -> Result<Option<Value>, EvalError> {
        match expr {
            Expr::Variable(name) => Ok(self.variable(name).cloned()),
            Expr::Attr { base, name } => {
                let Some(base) = self.lookup(base)? else {
                    return Ok(None);
                };
                Ok(get_attr(&base, name))
            }
            Expr::Index { base, index } => {
                let Some(base) = self.lookup(base)? else {
                    return Ok(None);
                };
                let index = self.eval(index)?;
                Ok(get_item(&base, &index))
            }
            other => self.eval(other).map(Some),
        }
    }

    fn variable(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.params.get(name))
    }

    fn undefined(&self, expr: &Expr) -> Result<Value, EvalError> {
        let path = describe(expr);
        if self.lenient {
            log::debug!("undefined template variable '{}' rendered as empty", path);
            Ok(Value::Null)
        } else {
            Err(EvalError::Undefined(path))
        }
    }

    fn call_args(&mut self, base: &Expr, args: &[Expr]) -> Result<Vec<Value>, EvalError> {
        let mut values = Vec::with_capacity(args.len() + 1);
        values.push(self.eval(base)?);
        for arg in args {
            values.push(self.eval(arg)?);
        }
        Ok(values)
    }

    fn apply_filter(&mut self, base: &Expr, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        let functions = self.functions;
        if let Some(filter) = functions.filter(name) {
            let argv = self.call_args(base, args)?;
            return filter
                .call(&argv)
                .map_err(|e| EvalError::Failed(format!("filter '{}' failed: {}", name, e)));
        }

        // `default` sees undefined values, so it cannot go through call_args
        if name == "default" || name == "d" {
            let value = self.lookup(base)?;
            let fallback = match args.first() {
                Some(arg) => self.eval(arg)?,
                None => Value::String(String::new()),
            };
            let replace_falsy = match args.get(1) {
                Some(arg) => is_truthy(&self.eval(arg)?),
                None => false,
            };
            return Ok(match value {
                Some(v) if !v.is_null() && (!replace_falsy || is_truthy(&v)) => v,
                _ => fallback,
            });
        }

        match builtins::filter(name) {
            Some(filter) => {
                let argv = self.call_args(base, args)?;
                filter
                    .call(&argv)
                    .map_err(|e| EvalError::Failed(format!("filter '{}' failed: {}", name, e)))
            }
            None => Err(EvalError::Failed(format!("no filter named '{}'", name))),
        }
    }

    fn apply_test(&mut self, base: &Expr, name: &str, args: &[Expr]) -> Result<bool, EvalError> {
        let functions = self.functions;
        if let Some(test) = functions.test(name) {
            let argv = self.call_args(base, args)?;
            return builtins::run_test(test, &argv)
                .map_err(|e| EvalError::Failed(format!("test '{}' failed: {}", name, e)));
        }

        match name {
            "defined" => Ok(self.lookup(base)?.is_some()),
            "undefined" => Ok(self.lookup(base)?.is_none()),
            _ => match builtins::test(name) {
                Some(test) => {
                    let argv = self.call_args(base, args)?;
                    builtins::run_test(test, &argv)
                        .map_err(|e| EvalError::Failed(format!("test '{}' failed: {}", name, e)))
                }
                None => Err(EvalError::Failed(format!("no test named '{}'", name))),
            },
        }
    }
}

/// Printable path of a variable reference, e.g. `scm.branches[0]`
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Variable(name) => name.clone(),
        Expr::Attr { base, name } => format!("{}.{}", describe(base), name),
        Expr::Index { base, index } => match index.as_ref() {
            Expr::Constant(value) => format!("{}[{}]", describe(base), value),
            _ => format!("{}[...]", describe(base)),
        },
        _ => "expression".to_string(),
    }
}

fn unpack_pair(item: &Value) -> Result<Vec<Value>, EvalError> {
    match item {
        Value::Array(pair) if pair.len() == 2 => Ok(pair.clone()),
        other => Err(EvalError::Failed(format!(
            "cannot unpack {} into two loop variables",
            type_name(other)
        ))),
    }
}

/// `base.name`: mapping key, or sequence position for numeric names
fn get_attr(base: &Value, name: &str) -> Option<Value> {
    match base {
        Value::Object(map) => map.get(name).cloned(),
        Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        _ => None,
    }
}

/// `base[index]`; negative indexes count from the end
fn get_item(base: &Value, index: &Value) -> Option<Value> {
    match base {
        Value::Object(map) => map.get(&to_display(index)).cloned(),
        Value::Array(items) => {
            let i = resolve_index(index, items.len())?;
            items.get(i).cloned()
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = resolve_index(index, chars.len())?;
            chars.get(i).map(|c| Value::String(c.to_string()))
        }
        _ => None,
    }
}

fn resolve_index(index: &Value, len: usize) -> Option<usize> {
    let Some(Num::Int(i)) = as_num(index) else {
        return None;
    };
    if i < 0 {
        len.checked_sub(i.unsigned_abs() as usize)
    } else {
        Some(i as usize)
    }
}

/// Evaluate a math operation
fn eval_math(
    left: &Value,
    op: MathOp,
    right: &Value,
    null_handling: NullHandling,
) -> Result<Value, String> {
    // Handle null
    if left.is_null() || right.is_null() {
        return match null_handling {
            NullHandling::Error => Err("null value in math operation".to_string()),
            NullHandling::Zero => {
                let zero = Value::from(0);
                let left = if left.is_null() { &zero } else { left };
                let right = if right.is_null() { &zero } else { right };
                eval_math(left, op, right, NullHandling::Error)
            }
            NullHandling::Empty => Ok(Value::Null),
        };
    }

    // `+` also joins strings and sequences
    if op == MathOp::Add {
        match (left, right) {
            (Value::String(a), Value::String(b)) => return Ok(Value::String(format!("{}{}", a, b))),
            (Value::Array(a), Value::Array(b)) => {
                return Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()));
            }
            _ => {}
        }
    }

    let (Some(a), Some(b)) = (as_num(left), as_num(right)) else {
        return Err(match (left, right) {
            (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                "boolean values cannot be used in math operations".to_string()
            }
            (Value::String(_), _) | (_, Value::String(_)) => {
                "string values cannot be used in math operations (use ~ for concatenation)"
                    .to_string()
            }
            _ => format!(
                "cannot perform {} on {} and {}",
                op,
                type_name(left),
                type_name(right)
            ),
        });
    };

    match (a, b) {
        (Num::Int(a), Num::Int(b)) => int_math(a, op, b),
        (a, b) => float_math(a.as_f64(), op, b.as_f64()),
    }
}

fn int_math(a: i64, op: MathOp, b: i64) -> Result<Value, String> {
    let result = match op {
        MathOp::Add => a.checked_add(b).ok_or("integer overflow")?,
        MathOp::Sub => a.checked_sub(b).ok_or("integer underflow")?,
        MathOp::Mul => a.checked_mul(b).ok_or("integer overflow")?,
        // `/` is true division
        MathOp::Div => return float_math(a as f64, op, b as f64),
        MathOp::Rem => {
            if b == 0 {
                return Err("division by zero".to_string());
            }
            // Remainder takes the sign of the divisor
            let r = a.checked_rem(b).ok_or("integer overflow")?;
            if r != 0 && (r < 0) != (b < 0) { r + b } else { r }
        }
    };
    Ok(Value::from(result))
}

fn float_math(a: f64, op: MathOp, b: f64) -> Result<Value, String> {
    let result = match op {
        MathOp::Add => a + b,
        MathOp::Sub => a - b,
        MathOp::Mul => a * b,
        MathOp::Div => {
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            a / b
        }
        MathOp::Rem => {
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            a - b * (a / b).floor()
        }
    };
    Ok(Num::Float(result).into())
}

/// Evaluate a comparison operation
fn eval_compare(
    left: &Value,
    op: CompareOp,
    right: &Value,
    null_handling: NullHandling,
) -> Result<bool, String> {
    // Equality/inequality works across types, null included
    match op {
        CompareOp::Eq => return Ok(values_equal(left, right)),
        CompareOp::Ne => return Ok(!values_equal(left, right)),
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return match null_handling {
            NullHandling::Error => Err("null value in comparison".to_string()),
            NullHandling::Zero | NullHandling::Empty => Ok(false),
        };
    }

    let ordering = compare_values(left, right).map_err(|e| format!("{} with {}", e, op))?;

    Ok(match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
    })
}

/// Negate a value
fn eval_negate(val: &Value, null_handling: NullHandling) -> Result<Value, String> {
    if val.is_null() {
        return match null_handling {
            NullHandling::Error => Err("null value in negation".to_string()),
            NullHandling::Zero => Ok(Value::from(0)),
            NullHandling::Empty => Ok(Value::Null),
        };
    }

    match as_num(val) {
        Some(Num::Int(n)) => n
            .checked_neg()
            .map(Value::from)
            .ok_or_else(|| "integer overflow".to_string()),
        Some(Num::Float(n)) => Ok(Num::Float(-n).into()),
        None => Err(format!("cannot negate {}", type_name(val))),
    }
}

/// Apply a format specifier to a value
fn apply_format_spec(val: &Value, spec: &FormatSpec) -> Result<String, String> {
    if val.is_null() {
        return Ok(String::new());
    }

    match spec.format_type {
        FormatType::Auto => {
            // Auto-detect based on value type and spec
            match as_num(val) {
                Some(Num::Float(n)) => Ok(format_float(n, spec)),
                Some(Num::Int(n)) if spec.precision.is_some() => Ok(format_float(n as f64, spec)),
                Some(Num::Int(n)) => Ok(format_int(n, spec)),
                None => Ok(to_display(val)),
            }
        }
        FormatType::Float => {
            let n = to_float(val)?;
            Ok(format_float(n, spec))
        }
        FormatType::Integer => {
            let n = to_int(val)?;
            Ok(format_int(n, spec))
        }
        FormatType::Percent => {
            let n = to_float(val)?;
            let pct = n * 100.0;
            let precision = spec.precision.unwrap_or(0) as usize;
            let formatted = format!("{:.prec$}", pct, prec = precision);
            if spec.thousands_sep {
                Ok(add_thousands_sep(&formatted) + "%")
            } else {
                Ok(formatted + "%")
            }
        }
    }
}

/// Format a float with the given spec
fn format_float(n: f64, spec: &FormatSpec) -> String {
    let precision = spec.precision.unwrap_or(2) as usize;
    let formatted = format!("{:.prec$}", n, prec = precision);

    if spec.thousands_sep {
        add_thousands_sep(&formatted)
    } else {
        formatted
    }
}

/// Format an integer with the given spec
fn format_int(n: i64, spec: &FormatSpec) -> String {
    let formatted = n.to_string();

    if spec.thousands_sep {
        add_thousands_sep(&formatted)
    } else {
        formatted
    }
}

/// Add thousands separator to a number string
pub(crate) fn add_thousands_sep(s: &str) -> String {
    // Split on decimal point
    let (int_part, dec_part) = match s.find('.') {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s, ""),
    };

    // Handle negative
    let (sign, int_part) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };

    // Add commas every 3 digits from the right
    let mut result = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    let int_with_sep: String = result.chars().rev().collect();

    format!("{}{}{}", sign, int_with_sep, dec_part)
}

/// Convert a value to float
fn to_float(val: &Value) -> Result<f64, String> {
    match val {
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("cannot convert {:?} to float", s)),
        _ => as_num(val)
            .map(Num::as_f64)
            .ok_or_else(|| format!("cannot convert {} to float", type_name(val))),
    }
}

/// Convert a value to int
fn to_int(val: &Value) -> Result<i64, String> {
    match as_num(val) {
        Some(Num::Int(n)) => Ok(n),
        Some(Num::Float(n)) => Ok(n as i64),
        None => Err(format!("cannot convert {} to integer", type_name(val))),
    }
}
