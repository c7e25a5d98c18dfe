//! Recursive traversal of template trees

use serde_json::{Map, Value};

use crate::error::Result;
use crate::formatter::Formatter;
use crate::functions::FunctionSet;
use crate::value::Params;

/// What the traversal does with a node
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind<'a> {
    /// Interpolated as a single text value
    Text(&'a str),
    /// Rebuilt element by element
    Sequence(&'a [Value]),
    /// Rebuilt entry by entry, keys included
    Mapping(&'a Map<String, Value>),
    /// Returned unchanged
    Opaque(&'a Value),
}

impl<'a> NodeKind<'a> {
    pub fn of(node: &'a Value) -> Self {
        match node {
            Value::String(text) => NodeKind::Text(text),
            Value::Array(items) => NodeKind::Sequence(items),
            Value::Object(entries) => NodeKind::Mapping(entries),
            other => NodeKind::Opaque(other),
        }
    }
}

impl Formatter {
    /// Interpolate every text value and mapping key in `node`
    ///
    /// `depth` limits how many container levels are descended into; the
    /// children of a container reached with a budget of 0 are copied as
    /// they are. `None` traverses the whole tree. The first error aborts
    /// the traversal.
    pub fn transform(
        &self,
        node: &Value,
        params: &Params,
        group: &FunctionSet,
        lenient: bool,
        depth: Option<usize>,
    ) -> Result<Value> {
        match NodeKind::of(node) {
            NodeKind::Text(text) => self.interpolate(text, params, group, lenient),
            NodeKind::Sequence(items) => items
                .iter()
                .map(|item| self.transform_child(item, params, group, lenient, depth))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            NodeKind::Mapping(entries) => {
                let mut out = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.render_key(key, params, group, lenient)?;
                    let value = self.transform_child(value, params, group, lenient, depth)?;
                    // A later key rendering to the same text wins
                    out.insert(key, value);
                }
                Ok(Value::Object(out))
            }
            NodeKind::Opaque(value) => Ok(value.clone()),
        }
    }

    fn transform_child(
        &self,
        child: &Value,
        params: &Params,
        group: &FunctionSet,
        lenient: bool,
        depth: Option<usize>,
    ) -> Result<Value> {
        match depth {
            Some(0) => Ok(child.clone()),
            Some(n) => self.transform(child, params, group, lenient, Some(n - 1)),
            None => self.transform(child, params, group, lenient, None),
        }
    }
}
