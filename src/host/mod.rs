//! The host side of the loader
//!
//! Everything the loader needs from the host that is not part of the public
//! plugin contract goes through [`HostInternals`]. Implementations resolve
//! their privileged entry points once and are injected at startup.

pub mod native;

use anyhow::Result;
use std::any::Any;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::error;

use crate::config::ModContext;
use crate::plugins::{ModuleHandle, Plugin, PluginEnv};

pub use native::NativeHost;

/// A plugin instance as held by the host
pub type SharedPlugin = Arc<Mutex<Box<dyn Plugin>>>;

/// Privileged host capabilities, one method each
pub trait HostInternals: Send + Sync {
    /// Register an ordered list of modules with the host's plugin registry
    ///
    /// # Errors
    /// May fail with a [`TypeLoadFailure`] somewhere in the error chain
    fn register_plugins(&self, env: &PluginEnv, modules: &[ModuleHandle]) -> Result<()>;

    /// The host's current plugin list
    fn plugins(&self) -> Vec<SharedPlugin>;

    /// Distribution ids of the mods in the active session, `None` if the
    /// session reports no mod list
    fn session_mods(&self) -> Option<Vec<u64>>;

    /// The host's per-mod script loading routine
    ///
    /// # Errors
    /// Returns whatever the host routine fails with
    fn load_scripts(&self, instance: &dyn Any, content_path: &Path, context: &ModContext)
        -> Result<()>;
}

/// Registration failure wrapping one cause per type that failed to load
#[derive(Debug, Error)]
#[error("{} plugin type(s) failed to load", causes.len())]
pub struct TypeLoadFailure {
    pub causes: Vec<anyhow::Error>,
}

impl TypeLoadFailure {
    pub fn new(causes: Vec<anyhow::Error>) -> Self {
        Self { causes }
    }
}

/// User-facing failure surface
pub trait Notifier: Send + Sync {
    /// Show a blocking error notice
    fn show_error(&self, title: &str, message: &str);
}

/// Notifier that reports through the diagnostic log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_error(&self, title: &str, message: &str) {
        error!("{}: {}", title, message);
    }
}

/// Notifier that prints to stderr, used by the command line host
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn show_error(&self, title: &str, message: &str) {
        eprintln!("\n{title}: {message}");
    }
}
