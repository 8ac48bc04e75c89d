//! # strata - hierarchical data lookup
//!
//! `strata` resolves a key into a value by searching an ordered hierarchy of data sources, merging
//! what it finds and resolving interpolation expressions that reference other keys.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `strata` works internally.
//!
//! ### Terms
//!
//! - a **hierarchy** is an ordered list of **layers** (most specific first), read from `strata.yaml`
//! - a layer has zero or more **locations** (paths or URIs, possibly templated with `%{var}`)
//! - each layer is backed by a **function** (`yaml_data`, `environment`, ...) wrapped in a
//!   [provider::DataProvider]
//! - a **merge strategy** ([MergeStrategy]) combines values found in several places
//!
//! ```yaml
//! # strata.yaml
//! version: 5
//! hierarchy:
//!   - name: "Per node"
//!     path: "nodes/%{node}.yaml"
//!   - name: "Common"
//!     path: "common.yaml"
//! ```
//!
//! ### Sessions and invocations
//!
//! A [Session] lives as long as a run and is shared between threads. It owns everything that is
//! expensive to build: parsed configs, provider caches, started plugins. Configs are parsed at
//! most once per session even when many threads ask for the same one at the same time, see
//! [cache::SingleFlight].
//!
//! An [Invocation] is the state of one lookup: scope, recursion detection, explain sink,
//! redaction. It is never shared.
//!
//! ### Looking up a key
//!
//! see [Invocation::lookup]
//!
//! 1. the key (`users.alice.groups[0]`) is parsed into a root (`users`) and a path ([Key])
//! 2. the session's top-level provider is asked for the root, by default [hierarchy_lookup]:
//!    - the config is resolved for the caller (`module_name`, location templates)
//!    - the `lookup_options` of the whole hierarchy are merged and the entry for the root picked
//!    - the strategy is chosen: explicit `merge` option, then `lookup_options`, then `first`
//!    - every value found in a layer is interpolated (which may recursively look up other keys,
//!      in the same `module_name` context)
//!    - the strategy is applied across layers, and within a layer across its locations
//!    - `convert_to` is applied
//! 3. values from other top-level providers are interpolated unless already done
//! 4. the path is used to dig into the value
//!
//! "Not found" is not an error: lookups return `Ok(None)`. Providers may signal it with
//! [LookupError::NotFound], which is recovered at the provider boundary.
//!
//! ### Explaining
//!
//! An [explain::Explainer] attached to an invocation receives a tree of frames and events that
//! describe how the value was found. Nothing is built when no explainer is attached.
//! [ExplainTree] renders it as an indented report.
pub mod cache;
pub mod config;
pub mod convert;
pub mod error;
pub mod explain;
mod interpolate;
pub mod invocation;
pub mod key;
pub mod lookup;
pub mod merge;
pub mod plugin;
pub mod provider;
pub mod scope;
pub mod server_context;
pub mod session;
pub mod value;

pub use error::{ConfigError, LookupError};
pub use explain::{ExplainTree, Explainer};
pub use invocation::Invocation;
pub use key::Key;
pub use lookup::{hierarchy_lookup, lookup, LookupOptions};
pub use merge::MergeStrategy;
pub use provider::Function;
pub use server_context::ServerContext;
pub use session::{Session, SessionOptions};
pub use value::{Map, Value};
