//! Bootstrap stub
//!
//! The plugin the host constructs directly. The real loader module depends on
//! the patching library, which the module system cannot find by name once it
//! has been loaded by path. The stub therefore loads the patching library
//! first, installs a resolver for it, and only then loads the loader module
//! and instantiates its loader type. Lifecycle calls are forwarded to that
//! instance. Nothing escapes into the host: on failure the stub stays usable
//! without an inner loader.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::log_file::LogFile;
use crate::plugins::{ModuleError, ModuleHandle, Plugin, PluginEnv};
use crate::resolver::{ResolverHook, LOADER_MODULE_NAME, PATCH_LIBRARY_NAME};

/// Loader types are recognised by this fragment of their declared name
pub const LOADER_TYPE_MARKER: &str = "Loader";

const LOG_PREFIX: &str = "Bootstrap";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to load the patching library")]
    PatchLibrary(#[source] ModuleError),

    #[error("failed to load the loader module")]
    LoaderModule(#[source] ModuleError),

    #[error("{module} contains no plugin type matching `{LOADER_TYPE_MARKER}`")]
    NoLoaderType { module: String },

    #[error("failed to construct {type_name}: {cause:#}")]
    Construct {
        type_name: &'static str,
        cause: anyhow::Error,
    },

    #[error("bootstrap panicked")]
    Panicked,
}

/// The stub plugin
pub struct Bootstrap {
    inner: Option<Box<dyn Plugin>>,
    resolver: Option<ResolverHook>,
    log: Arc<LogFile>,
}

impl Bootstrap {
    /// Load the patching library and the loader from `env.module_dir`
    pub fn new(env: &PluginEnv) -> Self {
        let log = LogFile::host_only(LOG_PREFIX).with_dispatch(env.diagnostics.clone());
        let mut stub = Self {
            inner: None,
            resolver: None,
            log: Arc::new(log),
        };

        stub.log.line("Loading plugin loader and dependencies...");
        let started = panic::catch_unwind(AssertUnwindSafe(|| stub.start(env)))
            .unwrap_or(Err(BootstrapError::Panicked));
        match started {
            Ok(type_name) => stub.log.line(format!("{type_name} started.")),
            Err(e) => stub.log.line(format!("Error: {}", error_chain(&e))),
        }
        stub
    }

    /// Whether the inner loader was created
    #[must_use]
    pub fn has_loader(&self) -> bool {
        self.inner.is_some()
    }

    fn start(&mut self, env: &PluginEnv) -> Result<&'static str, BootstrapError> {
        let patch_library = env
            .module_system
            .load_file(&module_path(&env.module_dir, PATCH_LIBRARY_NAME))
            .map_err(BootstrapError::PatchLibrary)?;

        let resolver = ResolverHook::new(env.module_system.clone(), self.log.clone())
            .with_target(PATCH_LIBRARY_NAME, patch_library);
        resolver.install();
        self.resolver = Some(resolver);

        let loader_module = env
            .module_system
            .load_file(&module_path(&env.module_dir, LOADER_MODULE_NAME))
            .map_err(BootstrapError::LoaderModule)?;

        let (type_name, loader) = instantiate_loader(&loader_module, env)?;
        self.inner = Some(loader);
        Ok(type_name)
    }
}

fn instantiate_loader(
    module: &ModuleHandle,
    env: &PluginEnv,
) -> Result<(&'static str, Box<dyn Plugin>), BootstrapError> {
    let plugin_type = module
        .plugin_types()
        .iter()
        .find(|t| t.name.contains(LOADER_TYPE_MARKER))
        .ok_or_else(|| BootstrapError::NoLoaderType {
            module: module.file_name(),
        })?;

    let plugin = (plugin_type.create)(env).map_err(|cause| BootstrapError::Construct {
        type_name: plugin_type.name,
        cause,
    })?;
    Ok((plugin_type.name, plugin))
}

/// Path of the platform library named `name` inside `dir`
#[must_use]
pub fn module_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(libloading::library_filename(name))
}

/// Directory holding the running executable
///
/// # Errors
/// Returns an error if the executable path cannot be determined
pub fn module_directory() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    Ok(dir)
}

fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

impl Plugin for Bootstrap {
    fn init(&mut self, host: &dyn Any) {
        if let Some(inner) = self.inner.as_mut() {
            inner.init(host);
        }
    }

    fn update(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.update();
        }
    }

    fn dispose(&mut self) {
        if let Some(resolver) = self.resolver.take() {
            resolver.uninstall();
        }
        if let Some(inner) = self.inner.as_mut() {
            inner.dispose();
        }
    }
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("has_loader", &self.inner.is_some())
            .field("resolver_installed", &self.resolver.is_some())
            .finish()
    }
}
