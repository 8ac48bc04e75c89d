//! context handed to provider functions
use crate::cache::ProviderCache;
use crate::error::LookupError;
use crate::invocation::Invocation;
use crate::value::{Map, Value};
use std::sync::Arc;

/// Capabilities available to a data provider (or the top provider) while it runs
///
/// Gives access to the options of the call, the provider's session scoped cache, the explain sink
/// and interpolation.
pub struct ServerContext<'a> {
    invocation: &'a mut Invocation,
    options: Map,
    cache: Arc<ProviderCache>,
    interpolated: bool,
}

impl<'a> ServerContext<'a> {
    pub fn new(invocation: &'a mut Invocation, options: Map, cache: Arc<ProviderCache>) -> Self {
        Self {
            invocation,
            options,
            cache,
            interpolated: false,
        }
    }

    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    pub fn each_option(&self, mut f: impl FnMut(&str, &Value)) {
        for (name, value) in &self.options {
            f(name, value);
        }
    }

    /// Add a message to the explanation. `message` is only called when explaining.
    pub fn explain(&self, message: impl FnOnce() -> String) {
        self.invocation.report_text(message);
    }

    /// Store `value` under `key`, returning the previous value if there was one
    pub fn cache(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.cache.cache(key, value)
    }

    pub fn cache_all(&self, map: Map) {
        self.cache.cache_all(map)
    }

    pub fn cached_value(&self, key: &str) -> Option<Value> {
        self.cache.cached_value(key)
    }

    pub fn cache_has_key(&self, key: &str) -> bool {
        self.cache.has_key(key)
    }

    pub fn cached_entries(&self, consumer: impl FnMut(&str, &Value)) {
        self.cache.cached_entries(consumer)
    }

    /// Resolve interpolation expressions in `value`
    pub fn interpolate(&mut self, value: Value) -> Result<Value, LookupError> {
        self.invocation.interpolate(value, true)
    }

    /// Declare that the value about to be returned is already interpolated
    ///
    /// Top-level providers that interpolate found data themselves (per merge candidate) call this
    /// so it is not interpolated a second time.
    pub fn mark_interpolated(&mut self) {
        self.interpolated = true;
    }

    pub(crate) fn is_interpolated(&self) -> bool {
        self.interpolated
    }

    /// The error a provider returns to state that it has no value
    ///
    /// ```
    /// # use strata::{LookupError, ServerContext, Value};
    /// fn only_even(ctx: &mut ServerContext<'_>, key: &str) -> Result<Option<Value>, LookupError> {
    ///     match key.parse::<i64>() {
    ///         Ok(n) if n % 2 == 0 => Ok(Some(Value::Integer(n))),
    ///         _ => Err(ctx.not_found()),
    ///     }
    /// }
    /// ```
    pub fn not_found(&self) -> LookupError {
        LookupError::NotFound
    }

    pub fn invocation(&mut self) -> &mut Invocation {
        &mut *self.invocation
    }
}

impl std::fmt::Debug for ServerContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
