//! hierarchy configuration
//!
//! A [Config] is the parsed form of a hierarchy file (`strata.yaml`). It is expensive to build
//! (file I/O and parsing) and is therefore cached per path for the lifetime of a
//! [crate::session::Session].
//!
//! A [ResolvedConfig] binds a [Config] to a caller: location templates are interpolated against
//! the invocation scope (plus `module_name`) and every layer is bound to its data provider
//! function. It is cheap to derive and cached per invocation.
//!
//! ```yaml
//! version: 5
//! defaults:
//!   datadir: data
//!   data_hash: yaml_data
//! hierarchy:
//!   - name: "Per node"
//!     path: "nodes/%{node}.yaml"
//!   - name: "Common"
//!     path: "common.yaml"
//! ```
use crate::error::{ConfigError, LookupError};
use crate::invocation::Invocation;
use crate::provider::DataProvider;
use crate::scope::Scope;
use crate::value::{Map, Value};
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_DATADIR: &str = "data";
const DEFAULT_PLUGINDIR: &str = "plugin";
const DEFAULT_FUNCTION: &str = "yaml_data";

/// How a layer's function is called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Produces the complete mapping of a location, the key is looked up in it
    DataHash,
    /// Called for each key
    LookupKey,
}

impl std::fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionKind::DataHash => f.write_str("data_hash"),
            FunctionKind::LookupKey => f.write_str("lookup_key"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    pub kind: FunctionKind,
    pub name: String,
}

/// A location before interpolation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationTemplate {
    Path(String),
    Uri(String),
}

/// One level of the hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub function: FunctionRef,
    pub datadir: PathBuf,
    pub locations: Vec<LocationTemplate>,
    pub options: Map,
    pub plugin_dir: PathBuf,
    pub plugin_file: Option<String>,
}

impl Layer {
    /// Path of the plugin implementing this layer's function
    pub fn plugin_path(&self) -> PathBuf {
        let file = self
            .plugin_file
            .clone()
            .unwrap_or_else(|| self.function.name.clone());
        let file = Path::new(&file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.plugin_dir.join(file)
        }
    }
}

/// Parsed hierarchy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub path: PathBuf,
    pub layers: Vec<Layer>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    version: Option<i64>,
    #[serde(default)]
    defaults: RawEntry,
    #[serde(default)]
    hierarchy: Vec<RawEntry>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    name: Option<String>,
    datadir: Option<String>,
    data_hash: Option<String>,
    lookup_key: Option<String>,
    path: Option<String>,
    paths: Option<Vec<String>>,
    uri: Option<String>,
    uris: Option<Vec<String>>,
    options: Option<Map>,
    plugindir: Option<String>,
    pluginfile: Option<String>,
}

impl RawEntry {
    fn function(&self) -> Result<Option<FunctionRef>, String> {
        match (&self.data_hash, &self.lookup_key) {
            (Some(_), Some(_)) => Err("only one of data_hash and lookup_key may be given".into()),
            (Some(name), None) => Ok(Some(FunctionRef {
                kind: FunctionKind::DataHash,
                name: name.clone(),
            })),
            (None, Some(name)) => Ok(Some(FunctionRef {
                kind: FunctionKind::LookupKey,
                name: name.clone(),
            })),
            (None, None) => Ok(None),
        }
    }

    fn locations(&self) -> Result<Vec<LocationTemplate>, String> {
        let given = [
            self.path.is_some(),
            self.paths.is_some(),
            self.uri.is_some(),
            self.uris.is_some(),
        ];
        if given.iter().filter(|g| **g).count() > 1 {
            return Err("only one of path, paths, uri and uris may be given".into());
        }

        let paths = self.path.iter().chain(self.paths.iter().flatten());
        let uris = self.uri.iter().chain(self.uris.iter().flatten());
        Ok(paths
            .cloned()
            .map(LocationTemplate::Path)
            .chain(uris.cloned().map(LocationTemplate::Uri))
            .collect())
    }
}

impl Config {
    /// Load the config at `path`, or the default config if there is no such file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            tracing::info!(path = %path.display(), "no hierarchy config found, using defaults");
            return Ok(Self::default_for(path));
        }

        tracing::info!(path = %path.display(), "loading hierarchy config");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    /// Parse `text` as if read from `path`. Relative directories are resolved against the
    /// directory of `path`.
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = if text.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };

        if let Some(version) = raw.version {
            if version != 5 {
                return Err(ConfigError::UnsupportedVersion(version));
            }
        }

        let root = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        let invalid = |layer: &str, reason: String| ConfigError::InvalidLayer {
            layer: layer.to_string(),
            reason,
        };

        let defaults = &raw.defaults;
        let default_function = defaults
            .function()
            .map_err(|reason| invalid("defaults", reason))?
            .unwrap_or(FunctionRef {
                kind: FunctionKind::DataHash,
                name: DEFAULT_FUNCTION.to_string(),
            });
        let default_datadir = defaults.datadir.as_deref().unwrap_or(DEFAULT_DATADIR);
        let default_options = defaults.options.clone().unwrap_or_default();

        if raw.hierarchy.is_empty() {
            let mut config = Self::default_for(path);
            for layer in &mut config.layers {
                layer.function = default_function.clone();
                layer.datadir = root.join(default_datadir);
                layer.options = default_options.clone();
            }
            return Ok(config);
        }

        let mut layers = Vec::with_capacity(raw.hierarchy.len());
        for (index, entry) in raw.hierarchy.iter().enumerate() {
            let Some(name) = entry.name.clone() else {
                return Err(invalid(&format!("#{index}"), "missing name".into()));
            };

            let function = entry
                .function()
                .map_err(|reason| invalid(&name, reason))?
                .unwrap_or_else(|| default_function.clone());
            let locations = entry.locations().map_err(|reason| invalid(&name, reason))?;

            let mut options = default_options.clone();
            options.extend(entry.options.clone().unwrap_or_default());

            layers.push(Layer {
                datadir: root.join(entry.datadir.as_deref().unwrap_or(default_datadir)),
                plugin_dir: root.join(
                    entry
                        .plugindir
                        .as_deref()
                        .or(defaults.plugindir.as_deref())
                        .unwrap_or(DEFAULT_PLUGINDIR),
                ),
                plugin_file: entry.pluginfile.clone().or_else(|| defaults.pluginfile.clone()),
                name,
                function,
                locations,
                options,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            layers,
        })
    }

    /// A single layer reading `data/common.yaml` next to `path`
    pub fn default_for(path: &Path) -> Self {
        let root = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        Self {
            path: path.to_path_buf(),
            layers: vec![Layer {
                name: "Common".to_string(),
                function: FunctionRef {
                    kind: FunctionKind::DataHash,
                    name: DEFAULT_FUNCTION.to_string(),
                },
                datadir: root.join(DEFAULT_DATADIR),
                locations: vec![LocationTemplate::Path("common.yaml".to_string())],
                options: Map::new(),
                plugin_dir: root.join(DEFAULT_PLUGINDIR),
                plugin_file: None,
            }],
        }
    }
}

/// A concrete data source within a layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Path { original: String, resolved: PathBuf },
    Uri { original: String, resolved: String },
}

impl Location {
    /// Whether the backing resource is present. URIs are assumed to be.
    pub fn exists(&self) -> bool {
        match self {
            Location::Path { resolved, .. } => resolved.exists(),
            Location::Uri { .. } => true,
        }
    }

    pub fn original(&self) -> &str {
        match self {
            Location::Path { original, .. } | Location::Uri { original, .. } => original,
        }
    }

    /// The option name and value handed to the provider function
    pub fn option(&self) -> (&'static str, Value) {
        match self {
            Location::Path { resolved, .. } => {
                ("path", Value::String(resolved.display().to_string()))
            }
            Location::Uri { resolved, .. } => ("uri", Value::String(resolved.clone())),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Path { resolved, .. } => write!(f, "{}", resolved.display()),
            Location::Uri { resolved, .. } => f.write_str(resolved),
        }
    }
}

/// A [Config] bound to a caller context
pub struct ResolvedConfig {
    config: Arc<Config>,
    module_name: Option<String>,
    providers: Vec<Arc<DataProvider>>,
    /// merged `lookup_options` of the whole hierarchy, once known
    lookup_options: Mutex<Option<Option<Map>>>,
}

impl ResolvedConfig {
    /// Bind `config` to the scope of `invocation` and `module_name`
    pub fn resolve(
        invocation: &mut Invocation,
        config: Arc<Config>,
        module_name: Option<&str>,
    ) -> Result<Self, LookupError> {
        let mut bindings = Map::new();
        if let Some(module_name) = module_name {
            bindings.insert("module_name".to_string(), Value::from(module_name));
        }
        let scope = Scope::nested(invocation.scope(), bindings);

        let providers = invocation.do_with_scope(scope, |invocation| {
            config
                .layers
                .iter()
                .enumerate()
                .map(|(index, layer)| {
                    let locations = layer
                        .locations
                        .iter()
                        .map(|template| resolve_location(invocation, layer, template))
                        .collect::<Result<Vec<_>, _>>()?;
                    let function = invocation.session().function(layer)?;
                    let identity = format!("{}#{index}:{}", config.path.display(), layer.name);
                    Ok(Arc::new(DataProvider::new(
                        invocation.session(),
                        identity,
                        layer,
                        function,
                        locations,
                    )))
                })
                .collect::<Result<Vec<_>, LookupError>>()
        })?;

        Ok(Self {
            module_name: module_name.map(str::to_string),
            config,
            providers,
            lookup_options: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn module_name(&self) -> Option<&str> {
        self.module_name.as_deref()
    }

    /// One provider per layer, in hierarchy order
    pub fn providers(&self) -> &[Arc<DataProvider>] {
        &self.providers
    }

    /// `Some(..)` once the merged lookup options were stored
    pub fn cached_lookup_options(&self) -> Option<Option<Map>> {
        self.lookup_options.lock().clone()
    }

    pub fn store_lookup_options(&self, lookup_options: Option<Map>) {
        *self.lookup_options.lock() = Some(lookup_options);
    }
}

impl std::fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("config", &self.config.path)
            .field("module_name", &self.module_name)
            .field("providers", &self.providers)
            .finish()
    }
}

impl PartialEq for ResolvedConfig {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config
            && self.module_name == other.module_name
            && self.providers.len() == other.providers.len()
            && self
                .providers
                .iter()
                .zip(&other.providers)
                .all(|(a, b)| a.name() == b.name() && a.locations() == b.locations())
    }
}

fn resolve_location(
    invocation: &mut Invocation,
    layer: &Layer,
    template: &LocationTemplate,
) -> Result<Location, LookupError> {
    let (LocationTemplate::Path(original) | LocationTemplate::Uri(original)) = template;
    let resolved = invocation.interpolate(Value::from(original.as_str()), false)?;
    let resolved = resolved.to_string();

    Ok(match template {
        LocationTemplate::Path(_) => Location::Path {
            original: original.clone(),
            resolved: layer.datadir.join(resolved),
        },
        LocationTemplate::Uri(_) => Location::Uri {
            original: original.clone(),
            resolved,
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> Result<Config, ConfigError> {
        Config::parse(Path::new("/etc/strata/strata.yaml"), text)
    }

    #[test]
    fn parses_layers_with_defaults() {
        let config = parse(
            r#"
version: 5
defaults:
  datadir: hieradata
  options:
    shared: 1
hierarchy:
  - name: Nodes
    paths: ["nodes/%{node}.yaml", "common.yaml"]
    options:
      own: 2
  - name: Env
    lookup_key: environment
  - name: Remote
    uri: "https://example.com/data"
    datadir: elsewhere
"#,
        )
        .unwrap();

        assert_eq!(config.layers.len(), 3);
        let nodes = &config.layers[0];
        assert_eq!(nodes.function.kind, FunctionKind::DataHash);
        assert_eq!(nodes.function.name, "yaml_data");
        assert_eq!(nodes.datadir, PathBuf::from("/etc/strata/hieradata"));
        assert_eq!(
            nodes.locations,
            vec![
                LocationTemplate::Path("nodes/%{node}.yaml".into()),
                LocationTemplate::Path("common.yaml".into()),
            ]
        );
        assert_eq!(nodes.options.len(), 2);

        let env = &config.layers[1];
        assert_eq!(env.function.kind, FunctionKind::LookupKey);
        assert!(env.locations.is_empty());

        let remote = &config.layers[2];
        assert_eq!(remote.datadir, PathBuf::from("/etc/strata/elsewhere"));
        assert_eq!(remote.plugin_path(), PathBuf::from("/etc/strata/plugin/yaml_data"));
    }

    #[test]
    fn rejects_invalid_configs() {
        assert!(matches!(parse("version: 4"), Err(ConfigError::UnsupportedVersion(4))));
        assert!(matches!(parse("hierarchy: [{path: x}]"), Err(ConfigError::InvalidLayer { .. })));
        assert!(matches!(
            parse("hierarchy: [{name: x, path: a, uri: b}]"),
            Err(ConfigError::InvalidLayer { .. })
        ));
        assert!(matches!(
            parse("hierarchy: [{name: x, data_hash: a, lookup_key: b}]"),
            Err(ConfigError::InvalidLayer { .. })
        ));
        assert!(matches!(parse("bogus: 1"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn empty_config_is_the_default() {
        let config = parse("").unwrap();
        assert_eq!(config, Config::default_for(Path::new("/etc/strata/strata.yaml")));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.yaml");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.layers[0].name, "Common");
        assert_eq!(config.layers[0].datadir, dir.path().join("data"));
    }
}
