//! session: state shared by all lookups of one run
//!
//! A [Session] is created once per top-level run (a CLI call, an embedding application request
//! batch) and shared, by cloning, between any number of threads. It owns
//! - the frozen session options and scope
//! - the top-level provider
//! - the parsed hierarchy configs (each path parsed at most once, see [SingleFlight])
//! - the caches handed to data providers
//! - the registry of started plugins
//!
//! Everything that is specific to a single lookup lives in an [Invocation] instead.
use crate::cache::{ProviderCache, SingleFlight};
use crate::config::{Config, Layer};
use crate::convert::Dialect;
use crate::error::{ConfigError, LookupError};
use crate::explain::Explainer;
use crate::invocation::Invocation;
use crate::lookup::hierarchy_lookup;
use crate::plugin::{PluginLauncher, PluginRegistry};
use crate::provider::{Function, FunctionRegistry};
use crate::scope::Scope;
use crate::server_context::ServerContext;
use crate::value::{Map, Value};
use dashmap::DashMap;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable naming the config file when no name is given
pub const CONFIG_FILE_ENV: &str = "STRATA_CONFIGFILE";
/// Config file name used when neither an option nor the environment name one
pub const DEFAULT_CONFIG_FILE: &str = "strata.yaml";

/// The provider every lookup starts with
pub type TopProvider =
    Arc<dyn Fn(&mut ServerContext<'_>, &str) -> Result<Option<Value>, LookupError> + Send + Sync>;

/// Builds a [Config] from a path
pub type ConfigLoader = Arc<dyn Fn(&Path) -> Result<Config, ConfigError> + Send + Sync>;

/// Options recognized when creating a [Session]
#[derive(Clone, Default)]
pub struct SessionOptions {
    /// Path of the hierarchy config. Takes precedence over root and file name.
    pub config_path: Option<PathBuf>,
    /// Directory containing the hierarchy config, defaults to the working directory
    pub config_root: Option<PathBuf>,
    /// File name of the hierarchy config
    pub config_file_name: Option<String>,
    /// Variables available to interpolation
    pub scope: Map,
    /// Extra options handed to the top-level provider
    pub variables: Map,
    /// Functions shadowing the built-in ones
    pub functions: IndexMap<String, Function>,
    /// Type grammar for `convert_to`, `standard` if not given
    pub dialect: Option<String>,
    pub plugin_launcher: Option<Arc<dyn PluginLauncher>>,
    /// Replaces [hierarchy_lookup] as the top-level provider
    pub top_provider: Option<TopProvider>,
    /// Replaces [Config::load]
    pub config_loader: Option<ConfigLoader>,
}

impl SessionOptions {
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_config_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config_root = Some(root.into());
        self
    }

    pub fn with_config_file_name(mut self, name: impl Into<String>) -> Self {
        self.config_file_name = Some(name.into());
        self
    }

    pub fn with_scope_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scope.insert(name.into(), value.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_function(mut self, name: impl Into<String>, function: Function) -> Self {
        self.functions.insert(name.into(), function);
        self
    }

    pub fn with_dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = Some(dialect.into());
        self
    }

    pub fn with_plugin_launcher(mut self, launcher: Arc<dyn PluginLauncher>) -> Self {
        self.plugin_launcher = Some(launcher);
        self
    }

    pub fn with_top_provider(
        mut self,
        provider: impl Fn(&mut ServerContext<'_>, &str) -> Result<Option<Value>, LookupError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.top_provider = Some(Arc::new(provider));
        self
    }

    pub fn with_config_loader(
        mut self,
        loader: impl Fn(&Path) -> Result<Config, ConfigError> + Send + Sync + 'static,
    ) -> Self {
        self.config_loader = Some(Arc::new(loader));
        self
    }

    fn resolve_config_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.config_path {
            return Ok(path.clone());
        }

        let root = match &self.config_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().map_err(ConfigError::WorkingDirectory)?,
        };
        let file_name = self
            .config_file_name
            .clone()
            .or_else(|| std::env::var(CONFIG_FILE_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        Ok(root.join(file_name))
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("config_path", &self.config_path)
            .field("config_root", &self.config_root)
            .field("config_file_name", &self.config_file_name)
            .field("scope", &self.scope)
            .field("variables", &self.variables)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("dialect", &self.dialect)
            .field("plugin_launcher", &self.plugin_launcher.is_some())
            .field("top_provider", &self.top_provider.is_some())
            .finish()
    }
}

struct Inner {
    config_path: PathBuf,
    scope: Scope,
    variables: Map,
    dialect: Dialect,
    top_provider: TopProvider,
    config_loader: ConfigLoader,
    configs: SingleFlight<PathBuf, Arc<Config>>,
    top_provider_cache: Arc<ProviderCache>,
    provider_caches: DashMap<String, Arc<ProviderCache>>,
    data_hashes: DashMap<String, Arc<DashMap<String, Arc<Map>>>>,
    functions: FunctionRegistry,
    plugin_launcher: Option<Arc<dyn PluginLauncher>>,
    plugins: PluginRegistry,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.plugins.stop_all();
    }
}

/// Shared state of one run, cheap to clone
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Result<Self, ConfigError> {
        let config_path = options.resolve_config_path()?;
        let dialect = match options.dialect.as_deref() {
            Some(name) => Dialect::from_name(name)?,
            None => Dialect::default(),
        };
        tracing::debug!(config = %config_path.display(), ?dialect, "session created");

        let SessionOptions {
            scope,
            variables,
            functions,
            plugin_launcher,
            top_provider,
            config_loader,
            ..
        } = options;

        Ok(Self {
            inner: Arc::new(Inner {
                config_path,
                scope: Scope::new(scope),
                variables,
                dialect,
                top_provider: top_provider
                    .unwrap_or_else(|| Arc::new(hierarchy_lookup) as TopProvider),
                config_loader: config_loader
                    .unwrap_or_else(|| Arc::new(Config::load) as ConfigLoader),
                configs: SingleFlight::default(),
                top_provider_cache: Arc::default(),
                provider_caches: DashMap::new(),
                data_hashes: DashMap::new(),
                functions: FunctionRegistry::new(functions),
                plugin_launcher,
                plugins: PluginRegistry::default(),
            }),
        })
    }

    /// Start a new lookup
    ///
    /// `scope` shadows the session scope for this invocation only.
    pub fn invocation(&self, scope: Option<Map>, explainer: Option<Arc<dyn Explainer>>) -> Invocation {
        let scope = match scope {
            Some(vars) => Scope::nested(&self.inner.scope, vars),
            None => self.inner.scope.clone(),
        };
        Invocation::new(self.clone(), scope, explainer)
    }

    /// Path of the hierarchy config used when none is given explicitly
    pub fn config_path(&self) -> &Path {
        &self.inner.config_path
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    /// Session level options for the top-level provider
    pub fn variables(&self) -> &Map {
        &self.inner.variables
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    pub fn top_provider(&self) -> TopProvider {
        Arc::clone(&self.inner.top_provider)
    }

    pub fn top_provider_cache(&self) -> Arc<ProviderCache> {
        Arc::clone(&self.inner.top_provider_cache)
    }

    /// The cache of the provider with the given identity
    pub fn provider_cache(&self, identity: &str) -> Arc<ProviderCache> {
        Arc::clone(self.inner.provider_caches.entry(identity.to_string()).or_default().value())
    }

    pub(crate) fn data_hash_cache(&self, identity: &str) -> Arc<DashMap<String, Arc<Map>>> {
        Arc::clone(self.inner.data_hashes.entry(identity.to_string()).or_default().value())
    }

    /// The parsed config at `path`
    ///
    /// The config is parsed once per session. Concurrent first requests wait for the one doing the
    /// parsing.
    pub fn load_config(&self, path: &Path) -> Result<Arc<Config>, ConfigError> {
        self.inner
            .configs
            .get_or_try_init(path.to_path_buf(), || (self.inner.config_loader)(path).map(Arc::new))
    }

    /// The function bound to `layer`, from the registry or a plugin
    pub fn function(&self, layer: &Layer) -> Result<Function, LookupError> {
        let name = &layer.function.name;
        let function = match self.inner.functions.get(name) {
            Some(function) => function.clone(),
            None => {
                let Some(launcher) = &self.inner.plugin_launcher else {
                    return Err(ConfigError::UnknownFunction(name.clone()).into());
                };
                let plugin = self.inner.plugins.start(&layer.plugin_path(), launcher.as_ref())?;
                plugin
                    .function(name)
                    .ok_or_else(|| ConfigError::UnknownFunction(name.clone()))?
            }
        };

        if function.kind() != layer.function.kind {
            return Err(ConfigError::InvalidLayer {
                layer: layer.name.clone(),
                reason: format!("'{name}' is not a {} function", layer.function.kind),
            }
            .into());
        }
        Ok(function)
    }

    /// Number of plugins started and not yet stopped
    pub fn running_plugins(&self) -> usize {
        self.inner.plugins.running()
    }

    /// Stop all plugins started by this session
    ///
    /// Also happens when the last clone of the session is dropped.
    pub fn shutdown(&self) {
        tracing::info!(plugins = self.inner.plugins.running(), "session shutdown");
        self.inner.plugins.stop_all();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config_path", &self.inner.config_path)
            .field("dialect", &self.inner.dialect)
            .field("configs", &self.inner.configs.len())
            .field("plugins", &self.inner.plugins)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn config_path_from_root_and_name() {
        let session = Session::new(
            SessionOptions::default()
                .with_config_root("/srv")
                .with_config_file_name("data.yaml"),
        )
        .unwrap();
        assert_eq!(session.config_path(), Path::new("/srv/data.yaml"));

        let session =
            Session::new(SessionOptions::default().with_config_path("/etc/strata.yaml")).unwrap();
        assert_eq!(session.config_path(), Path::new("/etc/strata.yaml"));
    }

    #[test]
    fn unknown_dialect_is_rejected() {
        let result = Session::new(SessionOptions::default().with_dialect("pcore"));
        assert!(matches!(result, Err(ConfigError::UnknownDialect(_))));
    }

    #[test]
    fn provider_caches_are_per_identity() {
        let session = Session::new(SessionOptions::default()).unwrap();
        session.provider_cache("a").cache("x", Value::from(1));
        assert_eq!(session.provider_cache("a").cached_value("x"), Some(Value::from(1)));
        assert_eq!(session.provider_cache("b").cached_value("x"), None);
    }

    #[test]
    fn unknown_function_without_launcher() {
        let session = Session::new(SessionOptions::default()).unwrap();
        let mut layer = Config::default_for(Path::new("/x/strata.yaml")).layers.remove(0);
        layer.function.name = "nope".into();
        assert!(matches!(
            session.function(&layer),
            Err(LookupError::Configuration(ConfigError::UnknownFunction(_)))
        ));
    }
}
