/// Plugin API definitions shared by the host, the loader and plugin modules
use anyhow::Result;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use crate::host::{HostInternals, Notifier};
use crate::log_file::Logger;
use crate::patch::{PatchRegistry, Patcher};
use crate::plugins::module_system::ModuleSystem;

/// Name of the symbol every code module exports
pub const MODULE_ENTRY_SYMBOL: &[u8] = b"_plugin_module";

/// Lifecycle contract every plugin implements
///
/// The host calls `init` once, `update` on every host tick and `dispose`
/// at teardown. `dispose` may be called without `init` ever having run.
pub trait Plugin: Send {
    /// Initialize the plugin with the host instance
    fn init(&mut self, host: &dyn Any);

    /// Called on every host tick
    fn update(&mut self);

    /// Release plugin resources
    fn dispose(&mut self);

    /// Fully qualified name of the implementing type
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Secondary capability, if this plugin exposes one
    fn as_secondary_mut(&mut self) -> Option<&mut dyn SecondaryPlugin> {
        None
    }
}

/// Richer entry point some plugins expose on top of [`Plugin`]
///
/// Invoked once after the host has registered the plugin, with a patch
/// handle and a logger both scoped to the plugin's type name.
pub trait SecondaryPlugin {
    /// # Errors
    /// Failures are logged by the caller and do not affect other plugins
    fn main(&mut self, patcher: Patcher, logger: Logger) -> Result<()>;
}

/// Constructor for a plugin type exposed by a module
pub type PluginCreate = fn(&PluginEnv) -> Result<Box<dyn Plugin>>;

/// A plugin type exported by a code module
#[derive(Clone, Copy)]
pub struct PluginType {
    pub name: &'static str,
    pub create: PluginCreate,
}

impl PluginType {
    #[must_use]
    pub const fn new(name: &'static str, create: PluginCreate) -> Self {
        Self { name, create }
    }
}

impl std::fmt::Debug for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginType").field("name", &self.name).finish()
    }
}

/// Everything a code module declares about itself
#[derive(Debug, Clone, Default)]
pub struct ModuleDeclaration {
    /// Module name used for dependency resolution
    pub name: String,
    /// Names of modules that must resolve before this one is usable
    pub dependencies: Vec<String>,
    /// Plugin types this module exposes
    pub types: Vec<PluginType>,
}

impl ModuleDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            types: Vec::new(),
        }
    }

    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, plugin_type: PluginType) -> Self {
        self.types.push(plugin_type);
        self
    }
}

/// Function signature for the module entry point
pub type ModuleEntry = unsafe fn() -> ModuleDeclaration;

/// Host services handed to every plugin constructor
///
/// There is exactly one of these per host process. It is built by the
/// process entry point and passed down explicitly.
#[derive(Clone)]
pub struct PluginEnv {
    /// Directory holding the loader's own modules
    pub module_dir: PathBuf,
    /// Directory holding the plugin catalog, log file and plugin modules
    pub plugins_dir: PathBuf,
    pub module_system: Arc<ModuleSystem>,
    pub host: Arc<dyn HostInternals>,
    pub patches: Arc<PatchRegistry>,
    pub notifier: Arc<dyn Notifier>,
    /// The host's diagnostic log. Modules link their own copy of `tracing`,
    /// so lines emitted from module code are routed here explicitly.
    pub diagnostics: tracing::Dispatch,
}

impl std::fmt::Debug for PluginEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEnv")
            .field("module_dir", &self.module_dir)
            .field("plugins_dir", &self.plugins_dir)
            .finish_non_exhaustive()
    }
}
