//! error types
//!
//! [LookupError::NotFound] is a control signal rather than a failure. It is recovered wherever the
//! absence of a value is an expected outcome (provider boundaries, `lookup_options` resolution) and
//! turned into `None`. Every other variant travels unmodified to the caller of a lookup.
use crate::key::KeyError;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("not found")]
    NotFound,
    #[error("recursive lookup detected in [{}]", chain.join(", "))]
    CyclicLookup { chain: Vec<String> },
    #[error("{strategy} merge requires objects, got {found}")]
    MergeTypeMismatch {
        strategy: &'static str,
        found: &'static str,
    },
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
    #[error("unable to interpolate '{expression}': {reason}")]
    Interpolation { expression: String, reason: String },
    #[error("data provider '{name}' failed")]
    Provider {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl LookupError {
    /// Wrap an error raised by a data provider or plugin
    pub fn provider(name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        LookupError::Provider {
            name: name.into(),
            source: source.into(),
        }
    }

    pub(crate) fn interpolation(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        LookupError::Interpolation {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::NotFound)
    }
}

/// Turn [LookupError::NotFound] into `Ok(None)`
pub(crate) trait RecoverNotFound<T> {
    fn recover_not_found(self) -> Result<Option<T>, LookupError>;
}

impl<T> RecoverNotFound<T> for Result<Option<T>, LookupError> {
    fn recover_not_found(self) -> Result<Option<T>, LookupError> {
        match self {
            Err(LookupError::NotFound) => Ok(None),
            other => other,
        }
    }
}

/// Problems with the session setup or the hierarchy configuration
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("unable to read '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse '{}'", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unsupported hierarchy config version {0}, expected 5")]
    UnsupportedVersion(i64),
    #[error("hierarchy entry '{layer}': {reason}")]
    InvalidLayer { layer: String, reason: String },
    #[error("unknown dialect '{0}'")]
    UnknownDialect(String),
    #[error("unable to resolve function '{0}'")]
    UnknownFunction(String),
    #[error("unknown merge strategy '{0}'")]
    UnknownMergeStrategy(String),
    #[error("invalid merge options: {0}")]
    InvalidMergeOptions(String),
    #[error("unknown type '{0}' in convert_to")]
    UnknownType(String),
    #[error("unable to convert {found} to {target}")]
    Conversion { target: String, found: String },
    #[error("unable to determine the working directory")]
    WorkingDirectory(#[source] std::io::Error),
}
