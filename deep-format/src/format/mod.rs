//! Macro templates - `${}` expressions with statements and filters
//!
//! Supports:
//! - Variable interpolation: `${name}`, `${scm.branches[0]}`
//! - Math and concatenation: `${a + b}`, `${'v' ~ version}`
//! - Comparisons and logic: `${a == b and not c}`, `${'x' in items}`
//! - Ternary conditionals: `${cond ? then : else}`
//! - Null coalesce: `${a ?? b ?? 'default'}`
//! - Filters and tests: `${name | upper}`, `${n is divisibleby(3)}`
//! - Format specifiers: `${price:,.2f}`
//! - Statements: `{% if %}`, `{% for x in xs %}`, with `{% else %}` branches
//! - Comments: `{# ... #}`, and `-` whitespace trimming on tags
//!
//! Classic single-brace `{name}` placeholders are plain text here.

mod ast;
mod eval;
mod parser;

pub use ast::{
    CompareOp, Expr, FormatSpec, FormatType, Lambda, LoopTarget, MathOp, Node, Template,
};
pub use eval::{Context, EvalError};
pub(crate) use eval::add_thousands_sep;
pub use parser::{ParseError, parse_expression, parse_lambda, parse_template};
