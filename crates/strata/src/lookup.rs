//! lookup entry points
use crate::error::LookupError;
use crate::explain::Explainer;
use crate::key::Key;
use crate::server_context::ServerContext;
use crate::session::Session;
use crate::value::{Map, Value};
use std::sync::Arc;

/// Options of a single lookup call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupOptions {
    /// Merge strategy overriding `lookup_options`, a name or `{strategy: .., ..}`
    pub merge: Option<Value>,
    /// Returned by [lookup] when nothing is found
    pub default: Option<Value>,
    /// Caller context, available as `%{module_name}` in hierarchy locations
    pub module_name: Option<String>,
}

impl LookupOptions {
    pub fn with_merge(mut self, merge: impl Into<Value>) -> Self {
        self.merge = Some(merge.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_module_name(mut self, module_name: impl Into<String>) -> Self {
        self.module_name = Some(module_name.into());
        self
    }

    /// Options as seen by the top-level provider
    pub(crate) fn provider_options(&self) -> Map {
        let mut options = Map::new();
        if let Some(merge) = &self.merge {
            options.insert("merge".to_string(), merge.clone());
        }
        if let Some(module_name) = &self.module_name {
            options.insert("module_name".to_string(), Value::from(module_name.as_str()));
        }
        options
    }
}

/// The default top-level provider: searches the session's hierarchy config
///
/// The `merge` option takes precedence over the `lookup_options` of the key, `module_name`
/// selects the caller context the config is resolved for.
#[tracing::instrument(level = "trace", skip(ctx))]
pub fn hierarchy_lookup(ctx: &mut ServerContext<'_>, root: &str) -> Result<Option<Value>, LookupError> {
    let key = Key::from_root(root);
    // candidates are interpolated by their providers before they are merged
    ctx.mark_interpolated();
    let merge = ctx.option("merge").cloned();
    let module_name = ctx.option("module_name").and_then(Value::as_str).map(str::to_string);

    let ic = ctx.invocation();
    let config = ic.config(None, module_name.as_deref())?;
    let lookup_options = ic.lookup_options_for(&config, &key)?;
    let strategy = ic.set_merge_strategy(merge.as_ref(), lookup_options)?;
    ic.lookup_and_convert_data(|ic| ic.merge_hierarchy(&key, config.providers(), &strategy))
}

/// Look up `key` in a fresh invocation of `session`
///
/// Falls back to `options.default` when nothing is found.
pub fn lookup(
    session: &Session,
    key: &str,
    options: &LookupOptions,
    explainer: Option<Arc<dyn Explainer>>,
) -> Result<Option<Value>, LookupError> {
    let key = Key::parse(key)?;
    let mut ic = session.invocation(None, explainer);
    let found = ic.with_lookup(&key, |ic| ic.lookup(&key, options))?;
    Ok(found.or_else(|| options.default.clone()))
}
