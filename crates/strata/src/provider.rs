//! data providers
//!
//! A [DataProvider] answers "which value does this key have in this layer (at this location)". It
//! wraps a [Function], which is either implemented in-process or supplied by a plugin; the engine
//! never looks behind that contract.
use crate::cache::ProviderCache;
use crate::config::{FunctionKind, Layer, Location};
use crate::error::{LookupError, RecoverNotFound};
use crate::invocation::Invocation;
use crate::key::Key;
use crate::server_context::ServerContext;
use crate::session::Session;
use crate::value::{Map, Value};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::sync::Arc;

pub type DataHashFn = dyn Fn(&mut ServerContext<'_>) -> Result<Map, LookupError> + Send + Sync;
pub type LookupKeyFn =
    dyn Fn(&mut ServerContext<'_>, &str) -> Result<Option<Value>, LookupError> + Send + Sync;

/// A data provider implementation
#[derive(Clone)]
pub enum Function {
    /// Produces the complete mapping for a location
    DataHash(Arc<DataHashFn>),
    /// Produces the value of a single key
    LookupKey(Arc<LookupKeyFn>),
}

impl Function {
    pub fn data_hash(
        f: impl Fn(&mut ServerContext<'_>) -> Result<Map, LookupError> + Send + Sync + 'static,
    ) -> Self {
        Function::DataHash(Arc::new(f))
    }

    pub fn lookup_key(
        f: impl Fn(&mut ServerContext<'_>, &str) -> Result<Option<Value>, LookupError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Function::LookupKey(Arc::new(f))
    }

    pub fn kind(&self) -> FunctionKind {
        match self {
            Function::DataHash(_) => FunctionKind::DataHash,
            Function::LookupKey(_) => FunctionKind::LookupKey,
        }
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Function({})", self.kind())
    }
}

/// Functions known by name: the built-ins, shadowed by session supplied ones
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: IndexMap<String, Function>,
}

impl FunctionRegistry {
    pub fn new(overrides: IndexMap<String, Function>) -> Self {
        let mut functions = IndexMap::new();
        functions.insert("yaml_data".to_string(), Function::data_hash(yaml_data));
        functions.insert("json_data".to_string(), Function::data_hash(json_data));
        functions.insert("environment".to_string(), Function::lookup_key(environment));
        functions.insert("scope_data".to_string(), Function::lookup_key(scope_data));
        functions.extend(overrides);
        Self { functions }
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new(IndexMap::new())
    }
}

fn location_path(ctx: &ServerContext<'_>, function: &str) -> Result<String, LookupError> {
    match ctx.option("path") {
        Some(Value::String(path)) => Ok(path.clone()),
        _ => Err(LookupError::provider(
            function,
            anyhow::anyhow!("no 'path' given, {function} requires a path location"),
        )),
    }
}

fn read_data_file(function: &str, path: &str) -> Result<Option<String>, LookupError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(LookupError::provider(
            function,
            anyhow::Error::new(e).context(format!("unable to read '{path}'")),
        )),
    }
}

fn expect_mapping(function: &str, path: &str, value: Value) -> Result<Map, LookupError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(LookupError::provider(
            function,
            anyhow::anyhow!("'{path}' must contain a mapping, found {}", other.type_name()),
        )),
    }
}

/// `data_hash` reading a YAML file
pub fn yaml_data(ctx: &mut ServerContext<'_>) -> Result<Map, LookupError> {
    let path = location_path(ctx, "yaml_data")?;
    let Some(text) = read_data_file("yaml_data", &path)? else {
        return Ok(Map::new());
    };
    let value: Value = serde_yaml::from_str(&text).map_err(|e| {
        LookupError::provider(
            "yaml_data",
            anyhow::Error::new(e).context(format!("unable to parse '{path}'")),
        )
    })?;
    expect_mapping("yaml_data", &path, value)
}

/// `data_hash` reading a JSON file
pub fn json_data(ctx: &mut ServerContext<'_>) -> Result<Map, LookupError> {
    let path = location_path(ctx, "json_data")?;
    let Some(text) = read_data_file("json_data", &path)? else {
        return Ok(Map::new());
    };
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
        LookupError::provider(
            "json_data",
            anyhow::Error::new(e).context(format!("unable to parse '{path}'")),
        )
    })?;
    expect_mapping("json_data", &path, value.into())
}

/// `lookup_key` resolving keys from the process environment
pub fn environment(_ctx: &mut ServerContext<'_>, key: &str) -> Result<Option<Value>, LookupError> {
    Ok(std::env::var(key).ok().map(Value::String))
}

/// `lookup_key` resolving keys from the invocation scope
pub fn scope_data(ctx: &mut ServerContext<'_>, key: &str) -> Result<Option<Value>, LookupError> {
    Ok(ctx.invocation().scope().get(key).cloned())
}

/// A layer of a resolved hierarchy, bound to its function and locations
pub struct DataProvider {
    name: String,
    identity: String,
    function: Function,
    locations: Vec<Location>,
    options: Map,
    cache: Arc<ProviderCache>,
    hashes: Arc<DashMap<String, Arc<Map>>>,
}

impl DataProvider {
    pub fn new(
        session: &Session,
        identity: String,
        layer: &Layer,
        function: Function,
        locations: Vec<Location>,
    ) -> Self {
        Self {
            name: layer.name.clone(),
            cache: session.provider_cache(&identity),
            hashes: session.data_hash_cache(&identity),
            identity,
            function,
            locations,
            options: layer.options.clone(),
        }
    }

    /// Name of the layer
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session wide unique name of this provider
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Look up `key` in this layer, optionally restricted to `location`
    ///
    /// A provider signalling [LookupError::NotFound] is reported as `None`. Found data is
    /// interpolated here, so merge strategies compare and combine final values.
    pub fn lookup_key(
        &self,
        key: &Key,
        invocation: &mut Invocation,
        location: Option<&Location>,
    ) -> Result<Option<Value>, LookupError> {
        let mut options = self.options.clone();
        if let Some(location) = location {
            let (name, value) = location.option();
            options.insert(name.to_string(), value);
        }

        let found = {
            let mut ctx = ServerContext::new(invocation, options, Arc::clone(&self.cache));
            let found = match &self.function {
                Function::DataHash(f) => self
                    .data_hash(&mut ctx, f.as_ref(), location)
                    .map(|hash| hash.get(key.root()).cloned()),
                Function::LookupKey(f) => f(&mut ctx, key.root()),
            };
            found.recover_not_found()?
        };

        // lookup_options are used as written
        let found = match found {
            Some(value) if !invocation.lookup_options_mode() => {
                Some(invocation.for_data().interpolate(value, true)?)
            }
            other => other,
        };

        match &found {
            Some(value) => invocation.report_found(key.root(), value),
            None => invocation.report_not_found(key.root()),
        }
        Ok(found)
    }

    fn data_hash(
        &self,
        ctx: &mut ServerContext<'_>,
        f: &DataHashFn,
        location: Option<&Location>,
    ) -> Result<Arc<Map>, LookupError> {
        let cache_key = location.map(ToString::to_string).unwrap_or_default();
        if let Some(hash) = self.hashes.get(&cache_key) {
            return Ok(Arc::clone(hash.value()));
        }

        // computed outside of any map lock, concurrent first readers may both read the location
        let hash = Arc::new(f(ctx)?);
        tracing::debug!(provider = %self.identity, location = %cache_key, keys = hash.len(), "data hash loaded");
        self.hashes.insert(cache_key, Arc::clone(&hash));
        Ok(hash)
    }
}

impl std::fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProvider")
            .field("identity", &self.identity)
            .field("function", &self.function)
            .field("locations", &self.locations)
            .finish()
    }
}

impl std::fmt::Display for DataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
