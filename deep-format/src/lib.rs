//! Recursive parameter interpolation for job definitions
//!
//! [`Formatter::transform`] walks a template tree and substitutes parameters
//! into every text value and mapping key:
//!
//! ```
//! use deep_format::{Formatter, FunctionSet};
//! use serde_json::json;
//!
//! let params = json!({"name": "deploy", "branches": ["main", "dev"]});
//! let template = json!({
//!     "job-{name}": {
//!         "display": "Job ${name | upper}",
//!         "branches": "{obj:branches}",
//!         "timeout": "=${branches | length} * 60",
//!     }
//! });
//!
//! let formatter = Formatter::new();
//! let result = formatter
//!     .transform(&template, params.as_object().unwrap(), &FunctionSet::default(), false, None)
//!     .unwrap();
//!
//! assert_eq!(result, json!({
//!     "job-deploy": {
//!         "display": "Job DEPLOY",
//!         "branches": ["main", "dev"],
//!         "timeout": 120,
//!     }
//! }));
//! ```
//!
//! Template groups can bring their own filters and tests written in Lua or
//! in the expression language, see [`functions`].

pub mod config;
pub mod error;
pub mod format;
pub mod functions;
pub mod lua;
pub mod value;

mod deep;
mod formatter;
mod interpolate;

pub use config::{FormatterOptions, NullHandling};
pub use deep::NodeKind;
pub use error::{FormatError, Result};
pub use formatter::Formatter;
pub use functions::{
    Callable, Evaluator, ExpressionEvaluator, FunctionLookup, FunctionRegistry, FunctionSet,
    FunctionSpec, GroupFunctions, Lang,
};
pub use interpolate::TextKind;
pub use value::Params;
