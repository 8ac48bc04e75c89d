//! interpolation scope
use crate::value::{Map, Value};
use std::sync::Arc;

/// Variables visible to interpolation
///
/// A scope may be nested over a parent. Lookups fall back to the parent on a miss. Scopes are
/// immutable once built and cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: Arc<Map>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    pub fn new(vars: Map) -> Self {
        Self {
            vars: Arc::new(vars),
            parent: None,
        }
    }

    /// A scope that shadows `parent` with `vars`
    pub fn nested(parent: &Scope, vars: Map) -> Self {
        Self {
            vars: Arc::new(vars),
            parent: Some(Arc::new(parent.clone())),
        }
    }

    /// Get a variable. A leading `::` (top scope marker) is ignored.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = name.strip_prefix("::").unwrap_or(name);
        match self.vars.get(name) {
            Some(value) => Some(value),
            None => self.parent.as_deref().and_then(|parent| parent.get(name)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nested_scope_falls_back_to_parent() {
        let mut vars = Map::new();
        vars.insert("a".into(), Value::from(1));
        vars.insert("b".into(), Value::from(2));
        let parent = Scope::new(vars);

        let mut vars = Map::new();
        vars.insert("b".into(), Value::from(3));
        let child = Scope::nested(&parent, vars);

        assert_eq!(child.get("a"), Some(&Value::from(1)));
        assert_eq!(child.get("::b"), Some(&Value::from(3)));
        assert_eq!(child.get("c"), None);
        assert_eq!(parent.get("b"), Some(&Value::from(2)));
    }
}
