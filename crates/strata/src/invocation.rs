//! per lookup state
//!
//! An [Invocation] carries everything specific to one in-flight lookup: the interpolation scope,
//! the keys currently being resolved (recursion detection), the merge strategy and
//! `lookup_options` of the current key, the redaction flag and the explain sink.
//!
//! Invocations are never shared between threads. Narrowed views ([Invocation::for_data],
//! [Invocation::for_config], [Invocation::for_lookup_options]) are copies with a few fields
//! overridden; the parent is never modified through them.
use crate::config::{Location, ResolvedConfig};
use crate::convert::Conversion;
use crate::error::{LookupError, RecoverNotFound};
use crate::explain::{Event, Explainer, Frame};
use crate::key::{Key, Segment, LOOKUP_OPTIONS};
use crate::lookup::LookupOptions;
use crate::merge::{DeepOptions, MergeStrategy};
use crate::provider::DataProvider;
use crate::scope::Scope;
use crate::server_context::ServerContext;
use crate::session::Session;
use crate::value::{Map, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    TopLevel,
    /// resolving `lookup_options`
    LookupOptions,
    /// interpolating and digging into found data
    Data,
}

type ConfigMemo = Arc<Mutex<HashMap<(PathBuf, Option<String>), Arc<ResolvedConfig>>>>;

/// Pops the explain frame it was created for
struct FrameGuard(Arc<dyn Explainer>);

impl Drop for FrameGuard {
    fn drop(&mut self) {
        self.0.pop();
    }
}

#[derive(Clone)]
pub struct Invocation {
    session: Session,
    scope: Scope,
    name_stack: Vec<String>,
    lookup_options: Option<Map>,
    strategy: MergeStrategy,
    default_strategy: Option<MergeStrategy>,
    module_name: Option<String>,
    configs: ConfigMemo,
    explainer: Option<Arc<dyn Explainer>>,
    mode: Mode,
    redacted: bool,
}

impl Invocation {
    pub(crate) fn new(session: Session, scope: Scope, explainer: Option<Arc<dyn Explainer>>) -> Self {
        Self {
            session,
            scope,
            name_stack: Vec::new(),
            lookup_options: None,
            strategy: MergeStrategy::default(),
            default_strategy: None,
            module_name: None,
            configs: ConfigMemo::default(),
            explainer,
            mode: Mode::TopLevel,
            redacted: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn explain_mode(&self) -> bool {
        self.explainer.is_some()
    }

    pub fn lookup_options_mode(&self) -> bool {
        self.mode == Mode::LookupOptions
    }

    pub fn data_mode(&self) -> bool {
        self.mode == Mode::Data
    }

    pub fn is_redacted(&self) -> bool {
        self.redacted
    }

    /// Keys currently being resolved, outermost first
    pub fn name_stack(&self) -> &[String] {
        &self.name_stack
    }

    /// `lookup_options` of the key currently being resolved
    pub fn lookup_options(&self) -> Option<&Map> {
        self.lookup_options.as_ref()
    }

    /// Caller context of the lookup in progress, inherited by sub lookups
    pub fn module_name(&self) -> Option<&str> {
        self.module_name.as_deref()
    }

    /// Strategy chosen for the key currently being resolved
    pub fn merge_strategy(&self) -> &MergeStrategy {
        &self.strategy
    }

    /// Strategy used when neither the call nor the key's `lookup_options` name one
    pub fn set_default_merge_strategy(&mut self, strategy: Option<MergeStrategy>) {
        self.default_strategy = strategy;
    }

    /// Look up `key`
    ///
    /// Returns `Ok(None)` when nothing is found. The reserved `lookup_options` key is never found.
    pub fn lookup(&mut self, key: &Key, options: &LookupOptions) -> Result<Option<Value>, LookupError> {
        if key.is_lookup_options() {
            self.with_invalid_key(key, |ic| ic.report_not_found(key));
            return Ok(None);
        }

        // sub lookups stay in the caller's module context
        let module_name = options.module_name.clone().or_else(|| self.module_name.clone());
        let mut provider_options = self.session.variables().clone();
        provider_options.extend(options.provider_options());
        if let Some(module_name) = &module_name {
            provider_options.insert("module_name".to_string(), Value::from(module_name.as_str()));
        }

        self.with_key(key, |ic| {
            tracing::trace!(key = %key, ?module_name, "lookup");
            let previous = std::mem::replace(&mut ic.module_name, module_name);
            let result = ic.lookup_root(key, provider_options);
            ic.module_name = previous;
            result
        })
    }

    /// Ask the top provider for the root of `key`, then interpolate and dig
    fn lookup_root(&mut self, key: &Key, provider_options: Map) -> Result<Option<Value>, LookupError> {
        let provider = self.session.top_provider();
        let cache = self.session.top_provider_cache();

        let (found, interpolated) = {
            let mut ctx = ServerContext::new(self, provider_options, cache);
            let found = provider(&mut ctx, key.root()).recover_not_found()?;
            (found, ctx.is_interpolated())
        };

        match found {
            Some(value) => {
                let mut data = self.for_data();
                let value = if interpolated {
                    value
                } else {
                    data.interpolate(value, true)?
                };
                Ok(key.dig(&mut data, value))
            }
            None => {
                self.report_not_found(key);
                Ok(None)
            }
        }
    }

    /// Run `f` with `key` pushed on the name stack
    ///
    /// Fails with [LookupError::CyclicLookup] if `key` is already being resolved.
    pub fn with_key<T>(
        &mut self,
        key: &Key,
        f: impl FnOnce(&mut Self) -> Result<T, LookupError>,
    ) -> Result<T, LookupError> {
        if self.name_stack.iter().any(|name| name == key.source()) {
            let mut chain = self.name_stack.clone();
            chain.push(key.source().to_string());
            tracing::debug!(?chain, "recursive lookup");
            return Err(LookupError::CyclicLookup { chain });
        }

        self.name_stack.push(key.source().to_string());
        let result = f(self);
        self.name_stack.pop();
        result
    }

    /// Resolve interpolation expressions in `value`
    ///
    /// With `allow_methods` unset only scope variables may be referenced.
    pub fn interpolate(&mut self, value: Value, allow_methods: bool) -> Result<Value, LookupError> {
        crate::interpolate::interpolate(self, value, allow_methods)
    }

    /// The hierarchy config at `path` (the session config if `None`) resolved for `module_name`
    ///
    /// The parsed config is shared by the whole session, the resolved config is remembered by this
    /// invocation and the views derived from it.
    pub fn config(
        &mut self,
        path: Option<&Path>,
        module_name: Option<&str>,
    ) -> Result<Arc<ResolvedConfig>, LookupError> {
        let path = path.unwrap_or_else(|| self.session.config_path()).to_path_buf();
        let memo_key = (path, module_name.map(str::to_string));
        if let Some(resolved) = self.configs.lock().get(&memo_key) {
            return Ok(Arc::clone(resolved));
        }

        let config = self.session.load_config(&memo_key.0)?;
        let mut ic = self.for_config();
        let resolved = Arc::new(ResolvedConfig::resolve(&mut ic, config, module_name)?);
        self.configs.lock().insert(memo_key, Arc::clone(&resolved));
        Ok(resolved)
    }

    /// The `lookup_options` entry for `key` found in `config`
    ///
    /// The `lookup_options` of the whole hierarchy are deep merged once per resolved config.
    pub fn lookup_options_for(
        &mut self,
        config: &ResolvedConfig,
        key: &Key,
    ) -> Result<Option<Map>, LookupError> {
        let all = match config.cached_lookup_options() {
            Some(all) => all,
            None => {
                let options_key = Key::from_root(LOOKUP_OPTIONS);
                let strategy = MergeStrategy::Deep(DeepOptions::default());
                let mut ic = self.for_lookup_options();
                let found = match ic
                    .merge_hierarchy(&options_key, config.providers(), &strategy)
                    .recover_not_found()
                {
                    Err(LookupError::MergeTypeMismatch { found, .. }) => {
                        tracing::warn!(found, "ignoring lookup_options that are not a mapping");
                        None
                    }
                    other => other?,
                };
                let all = match found {
                    Some(Value::Object(map)) => Some(map),
                    _ => None,
                };
                config.store_lookup_options(all.clone());
                all
            }
        };

        Ok(all.and_then(|mut all| match all.swap_remove(key.root()) {
            Some(Value::Object(options)) => Some(options),
            _ => None,
        }))
    }

    /// Choose the merge strategy for the current key and remember its `lookup_options`
    ///
    /// An explicit `merge` option wins over the `merge` entry of `lookup_options`, which wins over
    /// the default strategy of this invocation.
    pub fn set_merge_strategy(
        &mut self,
        merge: Option<&Value>,
        lookup_options: Option<Map>,
    ) -> Result<MergeStrategy, LookupError> {
        let strategy = if let Some(merge) = merge {
            self.report_merge_source("CLI option");
            MergeStrategy::from_value(merge)?
        } else if let Some(merge) = lookup_options.as_ref().and_then(|options| options.get("merge")) {
            self.report_merge_source("\"lookup_options\" hash");
            MergeStrategy::from_value(merge)?
        } else {
            self.default_strategy.clone().unwrap_or_default()
        };

        self.lookup_options = lookup_options;
        self.strategy = strategy.clone();
        Ok(strategy)
    }

    /// Run `f` and apply the `convert_to` of the current `lookup_options` to its result
    ///
    /// Converting to `Sensitive` runs `f` redacted.
    pub fn lookup_and_convert_data(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<Option<Value>, LookupError>,
    ) -> Result<Option<Value>, LookupError> {
        let conversion = match &self.lookup_options {
            Some(options) => Conversion::from_lookup_options(self.session.dialect(), options)?,
            None => None,
        };

        let value = match &conversion {
            Some(conversion) if conversion.is_sensitive() => self.do_redacted(f)?,
            _ => f(self)?,
        };

        match (value, conversion) {
            (Some(value), Some(conversion)) => Ok(Some(conversion.apply(value)?)),
            (value, _) => Ok(value),
        }
    }

    /// Merge the values of `key` found in `providers` (one per layer)
    pub fn merge_hierarchy(
        &mut self,
        key: &Key,
        providers: &[Arc<DataProvider>],
        strategy: &MergeStrategy,
    ) -> Result<Option<Value>, LookupError> {
        strategy.merge_lookup(providers, self, |ic, provider| {
            ic.merge_locations(key, provider, strategy)
        })
    }

    /// Merge the values of `key` found in the locations of `provider`
    pub fn merge_locations(
        &mut self,
        key: &Key,
        provider: &DataProvider,
        strategy: &MergeStrategy,
    ) -> Result<Option<Value>, LookupError> {
        self.with_data_provider(provider, |ic| match provider.locations() {
            [] => ic.invoke_with_location(provider, None, key),
            [location] => ic.invoke_with_location(provider, Some(location), key),
            locations => strategy.merge_lookup(locations, ic, |ic, location| {
                ic.invoke_with_location(provider, Some(location), key)
            }),
        })
    }

    fn invoke_with_location(
        &mut self,
        provider: &DataProvider,
        location: Option<&Location>,
        key: &Key,
    ) -> Result<Option<Value>, LookupError> {
        let Some(location) = location else {
            return provider.lookup_key(key, self, None);
        };

        self.with_location(location, |ic| {
            if location.exists() {
                provider.lookup_key(key, ic, Some(location))
            } else {
                ic.report_location_not_found();
                Ok(None)
            }
        })
    }

    /// Run `f` with redaction enabled
    pub fn do_redacted<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let redacted = std::mem::replace(&mut self.redacted, true);
        let result = f(self);
        self.redacted = redacted;
        result
    }

    /// Run `f` with `scope` as the interpolation scope
    pub fn do_with_scope<T>(&mut self, scope: Scope, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = std::mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = previous;
        result
    }

    /// View used to interpolate and dig into found data
    pub fn for_data(&self) -> Self {
        let mut ic = self.clone();
        if self.mode != Mode::Data {
            if self.explainer.as_ref().is_some_and(|e| e.only_options()) {
                ic.explainer = None;
            }
            ic.mode = Mode::Data;
        }
        ic
    }

    /// View used to resolve configs, never explained
    pub fn for_config(&self) -> Self {
        let mut ic = self.clone();
        ic.explainer = None;
        ic
    }

    /// View used to resolve `lookup_options`, explained only when asked for
    pub fn for_lookup_options(&self) -> Self {
        let mut ic = self.clone();
        if self.mode != Mode::LookupOptions {
            if !self.explainer.as_ref().is_some_and(|e| e.options() || e.only_options()) {
                ic.explainer = None;
            }
            ic.mode = Mode::LookupOptions;
        }
        ic
    }

    fn with_frame<T>(&mut self, frame: impl FnOnce() -> Frame, f: impl FnOnce(&mut Self) -> T) -> T {
        let Some(explainer) = self.explainer.clone() else {
            return f(self);
        };
        explainer.push(frame());
        let _guard = FrameGuard(explainer);
        f(self)
    }

    pub fn with_data_provider<T>(&mut self, provider: &DataProvider, f: impl FnOnce(&mut Self) -> T) -> T {
        self.with_frame(|| Frame::DataProvider(provider.name().to_string()), f)
    }

    pub fn with_location<T>(&mut self, location: &Location, f: impl FnOnce(&mut Self) -> T) -> T {
        self.with_frame(|| Frame::Location(location.to_string()), f)
    }

    pub fn with_interpolation<T>(&mut self, expression: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        self.with_frame(|| Frame::Interpolation(expression.to_string()), f)
    }

    pub fn with_lookup<T>(&mut self, key: &Key, f: impl FnOnce(&mut Self) -> T) -> T {
        self.with_frame(|| Frame::Lookup(key.to_string()), f)
    }

    pub fn with_merge<T>(&mut self, strategy: &MergeStrategy, f: impl FnOnce(&mut Self) -> T) -> T {
        self.with_frame(|| Frame::Merge(strategy.name().to_string()), f)
    }

    pub fn with_segment<T>(&mut self, segment: &Segment, f: impl FnOnce(&mut Self) -> T) -> T {
        self.with_frame(|| Frame::Segment(segment.to_string()), f)
    }

    pub fn with_sub_lookup<T>(&mut self, key: &Key, f: impl FnOnce(&mut Self) -> T) -> T {
        self.with_frame(|| Frame::SubLookup(key.to_string()), f)
    }

    pub fn with_invalid_key<T>(&mut self, key: &Key, f: impl FnOnce(&mut Self) -> T) -> T {
        self.with_frame(|| Frame::InvalidKey(key.to_string()), f)
    }

    fn report(&self, event: impl FnOnce() -> Event) {
        if let Some(explainer) = &self.explainer {
            explainer.accept(event());
        }
    }

    fn redact(&self, value: &Value) -> Value {
        if self.redacted && !value.is_sensitive() {
            value.clone().into_sensitive()
        } else {
            value.clone()
        }
    }

    pub fn report_found(&self, key: &str, value: &Value) {
        self.report(|| Event::Found {
            key: key.to_string(),
            value: self.redact(value),
        });
    }

    pub fn report_not_found(&self, key: impl Display) {
        self.report(|| Event::NotFound {
            key: key.to_string(),
        });
    }

    pub fn report_location_not_found(&self) {
        self.report(|| Event::LocationNotFound);
    }

    pub fn report_merge_result(&self, value: &Value) {
        self.report(|| Event::MergeResult(self.redact(value)));
    }

    pub fn report_merge_source(&self, source: &str) {
        self.report(|| Event::MergeSource(source.to_string()));
    }

    /// Add free text to the explanation, `message` is only called when explaining
    ///
    /// Text is dropped while redacted since it may contain any value.
    pub fn report_text(&self, message: impl FnOnce() -> String) {
        if !self.redacted {
            self.report(|| Event::Text(message()));
        }
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("name_stack", &self.name_stack)
            .field("strategy", &self.strategy)
            .field("module_name", &self.module_name)
            .field("mode", &self.mode)
            .field("redacted", &self.redacted)
            .field("explain", &self.explainer.is_some())
            .finish_non_exhaustive()
    }
}
