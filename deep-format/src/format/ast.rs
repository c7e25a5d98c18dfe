//! AST types for macro templates

use serde_json::Value;

/// A parsed macro template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub nodes: Vec<Node>,
    /// The original template string (for display/debugging)
    pub source: String,
}

impl Template {
    pub fn new(nodes: Vec<Node>, source: String) -> Self {
        Self { nodes, source }
    }

    /// Top-level variable names the template reads, in first-use order
    ///
    /// Loop variables bound by `{% for %}` are not included.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_node_variables(&self.nodes, &mut Vec::new(), &mut names);
        names
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn collect_node_variables<'a>(nodes: &'a [Node], bound: &mut Vec<&'a str>, names: &mut Vec<&'a str>) {
    for node in nodes {
        match node {
            Node::Literal(_) => {}
            Node::Output(expr) => collect_expr_variables(expr, bound, names),
            Node::If { branches, otherwise } => {
                for (condition, body) in branches {
                    collect_expr_variables(condition, bound, names);
                    collect_node_variables(body, bound, names);
                }
                collect_node_variables(otherwise, bound, names);
            }
            Node::For {
                target,
                iterable,
                body,
                otherwise,
            } => {
                collect_expr_variables(iterable, bound, names);
                let depth = bound.len();
                bound.extend(target.names());
                bound.push("loop");
                collect_node_variables(body, bound, names);
                bound.truncate(depth);
                collect_node_variables(otherwise, bound, names);
            }
        }
    }
}

/// Collect variable references from an expression recursively
fn collect_expr_variables<'a>(expr: &'a Expr, bound: &[&'a str], names: &mut Vec<&'a str>) {
    match expr {
        Expr::Variable(name) => {
            if !bound.contains(&name.as_str()) && !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        Expr::Constant(_) => {}
        Expr::List(items) => {
            for item in items {
                collect_expr_variables(item, bound, names);
            }
        }
        Expr::Map(entries) => {
            for (key, value) in entries {
                collect_expr_variables(key, bound, names);
                collect_expr_variables(value, bound, names);
            }
        }
        Expr::Attr { base, .. } => collect_expr_variables(base, bound, names),
        Expr::Index { base, index } => {
            collect_expr_variables(base, bound, names);
            collect_expr_variables(index, bound, names);
        }
        Expr::Math { left, right, .. }
        | Expr::Concat { left, right }
        | Expr::Compare { left, right, .. }
        | Expr::And(left, right)
        | Expr::Or(left, right) => {
            collect_expr_variables(left, bound, names);
            collect_expr_variables(right, bound, names);
        }
        Expr::Contains {
            item, container, ..
        } => {
            collect_expr_variables(item, bound, names);
            collect_expr_variables(container, bound, names);
        }
        Expr::Not(inner) | Expr::Negate(inner) => collect_expr_variables(inner, bound, names),
        Expr::Ternary {
            condition,
            then_expr,
            else_expr,
        } => {
            collect_expr_variables(condition, bound, names);
            collect_expr_variables(then_expr, bound, names);
            collect_expr_variables(else_expr, bound, names);
        }
        Expr::Coalesce { exprs } => {
            for e in exprs {
                collect_expr_variables(e, bound, names);
            }
        }
        Expr::Formatted { expr, .. } => collect_expr_variables(expr, bound, names),
        Expr::Filter { base, args, .. } | Expr::Test { base, args, .. } => {
            collect_expr_variables(base, bound, names);
            for arg in args {
                collect_expr_variables(arg, bound, names);
            }
        }
    }
}

/// A node of a template body
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text
    Literal(String),
    /// An expression to evaluate and print: `${...}`
    Output(Expr),
    /// `{% if %}` / `{% elif %}` / `{% else %}` / `{% endif %}`
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    /// `{% for x in xs %}` ... `{% else %}` ... `{% endfor %}`
    For {
        target: LoopTarget,
        iterable: Expr,
        body: Vec<Node>,
        /// Rendered when the iterable is empty
        otherwise: Vec<Node>,
    },
}

/// Variables bound by a for loop
#[derive(Debug, Clone, PartialEq)]
pub enum LoopTarget {
    /// `for item in ...`
    Single(String),
    /// `for key, value in ...`
    Pair(String, String),
}

impl LoopTarget {
    pub fn names(&self) -> Vec<&str> {
        match self {
            LoopTarget::Single(name) => vec![name],
            LoopTarget::Pair(first, second) => vec![first, second],
        }
    }
}

/// An expression within a template
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A variable reference: `name`
    Variable(String),
    /// A constant value: `'string'`, `123`, `true`, `none`
    Constant(Value),
    /// List literal: `[a, b]`
    List(Vec<Expr>),
    /// Map literal: `{'key': value}`
    Map(Vec<(Expr, Expr)>),
    /// Attribute access: `base.name`
    Attr { base: Box<Expr>, name: String },
    /// Subscript: `base[index]`
    Index { base: Box<Expr>, index: Box<Expr> },
    /// Math operation: `a + b`, `a % b`
    Math {
        left: Box<Expr>,
        op: MathOp,
        right: Box<Expr>,
    },
    /// String concatenation: `a ~ b`
    Concat { left: Box<Expr>, right: Box<Expr> },
    /// Comparison: `a == b`, `a < b`
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    /// Membership: `a in b`, `a not in b`
    Contains {
        item: Box<Expr>,
        container: Box<Expr>,
        negated: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// Ternary conditional: `cond ? then : else`
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Null coalesce: `a ?? b ?? c`
    Coalesce { exprs: Vec<Expr> },
    /// Formatted expression with format spec: `expr:,.2f`
    Formatted { expr: Box<Expr>, spec: FormatSpec },
    /// Negation: `-expr`
    Negate(Box<Expr>),
    /// Filter application: `base | name(args)`
    Filter {
        base: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    /// Test: `base is name(args)`, `base is not name`
    Test {
        base: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        negated: bool,
    },
}

/// A closure in the expression language: `|a, b| body`
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Expr,
}

/// Math operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl std::fmt::Display for MathOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MathOp::Add => write!(f, "+"),
            MathOp::Sub => write!(f, "-"),
            MathOp::Mul => write!(f, "*"),
            MathOp::Div => write!(f, "/"),
            MathOp::Rem => write!(f, "%"),
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::Ne => write!(f, "!="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Le => write!(f, "<="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Ge => write!(f, ">="),
        }
    }
}

/// Format specifier for controlling output formatting
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormatSpec {
    /// Use thousands separator (`,`)
    pub thousands_sep: bool,
    /// Decimal precision (`.2` means 2 decimal places)
    pub precision: Option<u8>,
    pub format_type: FormatType,
}

impl std::fmt::Display for FormatSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.thousands_sep {
            write!(f, ",")?;
        }
        if let Some(prec) = self.precision {
            write!(f, ".{}", prec)?;
        }
        match self.format_type {
            FormatType::Auto => {}
            FormatType::Float => write!(f, "f")?,
            FormatType::Integer => write!(f, "d")?,
            FormatType::Percent => write!(f, "%")?,
        }
        Ok(())
    }
}

/// Format type specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatType {
    /// Infer from value type
    #[default]
    Auto,
    /// Decimal float
    Float,
    /// Integer
    Integer,
    /// Percentage (multiply by 100, add %)
    Percent,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Variable(name.to_string())
    }

    #[test]
    fn test_template_variables() {
        let template = Template::new(
            vec![
                Node::Literal("Job ".to_string()),
                Node::Output(Expr::Attr {
                    base: Box::new(var("project")),
                    name: "name".to_string(),
                }),
                Node::For {
                    target: LoopTarget::Single("branch".to_string()),
                    iterable: var("branches"),
                    body: vec![Node::Output(Expr::Concat {
                        left: Box::new(var("branch")),
                        right: Box::new(var("suffix")),
                    })],
                    otherwise: vec![],
                },
                Node::Output(var("project")),
            ],
            String::new(),
        );

        assert_eq!(template.variables(), vec!["project", "branches", "suffix"]);
    }

    #[test]
    fn test_format_spec_display() {
        let spec = FormatSpec {
            thousands_sep: true,
            precision: Some(2),
            format_type: FormatType::Float,
        };
        assert_eq!(spec.to_string(), ",.2f");

        let spec2 = FormatSpec {
            thousands_sep: false,
            precision: Some(0),
            format_type: FormatType::Percent,
        };
        assert_eq!(spec2.to_string(), ".0%");
    }

    #[test]
    fn test_loop_target_names() {
        assert_eq!(LoopTarget::Single("x".into()).names(), vec!["x"]);
        assert_eq!(
            LoopTarget::Pair("k".into(), "v".into()).names(),
            vec!["k", "v"]
        );
    }
}
