//! plugin registry
//!
//! Functions that are not known in-process may be provided by plugins: external executables found
//! through a layer's `plugindir`/`pluginfile`. Starting a plugin and talking to it is the job of a
//! [PluginLauncher] supplied with the session options. The registry makes sure each plugin is
//! started at most once per session and stopped when the session ends.
use crate::cache::SingleFlight;
use crate::error::LookupError;
use crate::provider::Function;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A running plugin
pub trait Plugin: Send + Sync {
    /// The function called `name`, if this plugin provides it
    fn function(&self, name: &str) -> Option<Function>;

    /// Terminate the plugin. Called once per started plugin.
    fn stop(&self);
}

/// Starts plugins
pub trait PluginLauncher: Send + Sync {
    fn launch(&self, path: &Path) -> anyhow::Result<Arc<dyn Plugin>>;
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: SingleFlight<PathBuf, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// The plugin at `path`, started with `launcher` unless already running
    pub fn start(&self, path: &Path, launcher: &dyn PluginLauncher) -> Result<Arc<dyn Plugin>, LookupError> {
        self.plugins.get_or_try_init(path.to_path_buf(), || {
            tracing::info!(path = %path.display(), "starting plugin");
            launcher
                .launch(path)
                .map_err(|source| LookupError::provider(path.display().to_string(), source))
        })
    }

    /// Stop every started plugin
    pub fn stop_all(&self) {
        for plugin in self.plugins.drain() {
            plugin.stop();
        }
    }

    pub fn running(&self) -> usize {
        self.plugins.len()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("running", &self.running())
            .finish()
    }
}
