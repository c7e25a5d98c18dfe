//! Per-group cache of compiled filters and tests

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::unsync::OnceCell;

use super::{Callable, Evaluator, ExpressionEvaluator, FunctionLookup, FunctionSet, FunctionSpec, Lang};
use crate::config::{FormatterOptions, NullHandling};
use crate::error::{FormatError, Result};
use crate::lua::LuaEvaluator;

/// Compiled filters and tests of one template group
pub struct GroupFunctions {
    group: String,
    filters: HashMap<String, Arc<dyn Callable>>,
    tests: HashMap<String, Arc<dyn Callable>>,
}

impl GroupFunctions {
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Names of the group's own filters, sorted
    pub fn filter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Names of the group's own tests, sorted
    pub fn test_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tests.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl FunctionLookup for GroupFunctions {
    fn filter(&self, name: &str) -> Option<&dyn Callable> {
        self.filters.get(name).map(|f| f.as_ref())
    }

    fn test(&self, name: &str) -> Option<&dyn Callable> {
        self.tests.get(name).map(|t| t.as_ref())
    }
}

impl std::fmt::Debug for GroupFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupFunctions")
            .field("group", &self.group)
            .field("filters", &self.filter_names())
            .field("tests", &self.test_names())
            .finish()
    }
}

/// Compiles each template group's functions once and hands out the result
pub struct FunctionRegistry {
    default_lang: Lang,
    null_handling: NullHandling,
    script_memory_limit: usize,
    groups: RwLock<HashMap<String, Arc<GroupFunctions>>>,
}

impl FunctionRegistry {
    pub fn new(options: &FormatterOptions) -> Self {
        FunctionRegistry {
            default_lang: options.default_lang,
            null_handling: options.null_handling,
            script_memory_limit: options.script_memory_limit,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// The cached functions of a group, if it has been built
    pub fn get(&self, group: &str) -> Option<Arc<GroupFunctions>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .cloned()
    }

    /// Return the group's functions, compiling them on first use
    ///
    /// The first set seen for a group name wins; later sets with the same
    /// name get the cached entry. On a compilation failure nothing is cached.
    pub fn get_or_build(&self, set: &FunctionSet) -> Result<Arc<GroupFunctions>> {
        let group = set.group();
        if let Some(functions) = self.get(group) {
            return Ok(functions);
        }

        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have built it while we waited for the lock
        if let Some(functions) = groups.get(group) {
            return Ok(Arc::clone(functions));
        }

        let functions = Arc::new(self.build(set)?);
        log::debug!(
            "compiled {} filter(s) and {} test(s) for template group '{}'",
            functions.filters.len(),
            functions.tests.len(),
            group
        );
        groups.insert(group.to_string(), Arc::clone(&functions));
        Ok(functions)
    }

    /// Number of groups built so far
    pub fn len(&self) -> usize {
        self.groups.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build(&self, set: &FunctionSet) -> Result<GroupFunctions> {
        let group = set.group();
        // Only groups with Lua functions pay for a runtime
        let lua = OnceCell::new();
        let expr = ExpressionEvaluator::new(self.null_handling);

        let mut filters = HashMap::with_capacity(set.filters.len());
        for spec in &set.filters {
            filters.insert(spec.name.clone(), self.compile(group, spec, &lua, &expr)?);
        }

        let mut tests = HashMap::with_capacity(set.tests.len());
        for spec in &set.tests {
            tests.insert(spec.name.clone(), self.compile(group, spec, &lua, &expr)?);
        }

        Ok(GroupFunctions {
            group: group.to_string(),
            filters,
            tests,
        })
    }

    fn compile(
        &self,
        group: &str,
        spec: &FunctionSpec,
        lua: &OnceCell<LuaEvaluator>,
        expr: &ExpressionEvaluator,
    ) -> Result<Arc<dyn Callable>> {
        let lang = spec.lang.unwrap_or(self.default_lang);
        let failure = |message: String| FormatError::FunctionCompilation {
            group: group.to_string(),
            name: spec.name.clone(),
            lang,
            message,
        };

        let evaluator: &dyn Evaluator = match lang {
            Lang::Lua => lua
                .get_or_try_init(|| LuaEvaluator::new(self.script_memory_limit))
                .map_err(|e| failure(format!("{:#}", e)))?,
            Lang::Expr => expr,
        };

        evaluator.compile(&spec.name, &spec.source).map_err(failure)
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&String> = groups.keys().collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("default_lang", &self.default_lang)
            .field("groups", &names)
            .finish()
    }
}
