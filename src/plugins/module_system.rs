//! In-process module system
//!
//! Owns every code module loaded into the process and answers name based
//! dependency lookups. Resolution order for a dependency name:
//!
//! 1. modules previously resolved under that name
//! 2. the probe directories (platform library file name)
//! 3. failed-resolution handlers, in registration order
//!
//! Modules loaded by explicit path are not visible to name resolution. A
//! module that wants to satisfy lookups for such a module has to install a
//! [`ResolveHandler`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, trace};

use crate::plugins::api::{ModuleDeclaration, PluginType};

/// A code module loaded into the process
pub struct LoadedModule {
    name: String,
    path: PathBuf,
    dependencies: Vec<String>,
    types: Vec<PluginType>,
    /// Keeps the library mapped; dropped last so `types` never dangles
    _library: Option<libloading::Library>,
}

/// Shared handle to a loaded module
pub type ModuleHandle = Arc<LoadedModule>;

impl LoadedModule {
    /// Wrap a declaration together with the library backing it
    pub fn new(
        path: impl Into<PathBuf>,
        declaration: ModuleDeclaration,
        library: Option<libloading::Library>,
    ) -> Self {
        Self {
            name: declaration.name,
            path: path.into(),
            dependencies: declaration.dependencies,
            types: declaration.types,
            _library: library,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Plugin types exported by this module
    #[must_use]
    pub fn plugin_types(&self) -> &[PluginType] {
        &self.types
    }

    /// File name of the module, for log lines
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.name.clone(), |n| n.to_string_lossy().into_owned())
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("dependencies", &self.dependencies)
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}

/// Module loading errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("failed to open module {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("module {} has no `_plugin_module` entry point: {source}", path.display())]
    MissingEntryPoint {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("module {} panicked while declaring itself", path.display())]
    EntryPanicked { path: PathBuf },

    #[error("could not resolve dependency `{name}` requested by {}", requester.as_deref().unwrap_or("<unknown>"))]
    UnresolvedDependency {
        name: String,
        requester: Option<String>,
    },

    #[error("dependency cycle through `{name}`")]
    DependencyCycle { name: String },

    #[error("failed to load module {}: {source}", path.display())]
    Backend {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Turns a file into a [`LoadedModule`]
pub trait ModuleBackend: Send + Sync {
    /// Open the module at `path` and read its declaration
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or declares nothing
    fn open(&self, path: &Path) -> Result<LoadedModule, ModuleError>;
}

impl<T: ModuleBackend + ?Sized> ModuleBackend for Arc<T> {
    fn open(&self, path: &Path) -> Result<LoadedModule, ModuleError> {
        (**self).open(path)
    }
}

/// A dependency lookup that normal resolution could not satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    /// Requested module name
    pub name: String,
    /// Name of the module whose load triggered the lookup, if known
    pub requester: Option<String>,
}

impl ResolutionRequest {
    pub fn new(name: impl Into<String>, requester: Option<String>) -> Self {
        Self {
            name: name.into(),
            requester,
        }
    }
}

/// Callback consulted when a dependency name cannot be resolved normally
pub trait ResolveHandler: Send + Sync {
    /// Return a module for the request, or `None` to fall through
    fn resolve(&self, request: &ResolutionRequest) -> Option<ModuleHandle>;
}

impl<F> ResolveHandler for F
where
    F: Fn(&ResolutionRequest) -> Option<ModuleHandle> + Send + Sync,
{
    fn resolve(&self, request: &ResolutionRequest) -> Option<ModuleHandle> {
        self(request)
    }
}

/// Identifies an installed resolve handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct ModuleState {
    by_path: HashMap<PathBuf, ModuleHandle>,
    by_name: HashMap<String, ModuleHandle>,
    /// Paths and declared names of modules whose dependencies are being resolved
    loading_paths: HashSet<PathBuf>,
    loading_names: HashSet<String>,
}

/// Clears a module's in-progress marks however its load ends
struct LoadingGuard<'a> {
    system: &'a ModuleSystem,
    path: PathBuf,
    name: Option<String>,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.system.state();
        state.loading_paths.remove(&self.path);
        if let Some(name) = &self.name {
            state.loading_names.remove(name);
        }
    }
}

/// The process module system
pub struct ModuleSystem {
    backend: Box<dyn ModuleBackend>,
    probe_dirs: Vec<PathBuf>,
    state: Mutex<ModuleState>,
    handlers: Mutex<Vec<(HandlerId, Arc<dyn ResolveHandler>)>>,
    next_handler: AtomicU64,
}

impl ModuleSystem {
    /// Create a module system over `backend`
    pub fn new(backend: impl ModuleBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            probe_dirs: Vec::new(),
            state: Mutex::new(ModuleState::default()),
            handlers: Mutex::new(Vec::new()),
            next_handler: AtomicU64::new(1),
        }
    }

    /// Add a directory searched for dependencies by name
    #[must_use]
    pub fn with_probe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.probe_dirs.push(dir.into());
        self
    }

    /// Load the module at `path` and resolve its declared dependencies
    ///
    /// Loading the same path twice returns the same handle. A module that
    /// depends on itself, directly or through other modules, fails with
    /// [`ModuleError::DependencyCycle`].
    ///
    /// # Errors
    /// Returns an error if the backend fails or a dependency cannot be resolved
    pub fn load_file(&self, path: &Path) -> Result<ModuleHandle, ModuleError> {
        {
            let mut state = self.state();
            if let Some(existing) = state.by_path.get(path) {
                return Ok(existing.clone());
            }
            if !state.loading_paths.insert(path.to_path_buf()) {
                return Err(ModuleError::DependencyCycle {
                    name: path.display().to_string(),
                });
            }
        }
        let mut guard = LoadingGuard {
            system: self,
            path: path.to_path_buf(),
            name: None,
        };

        let module = Arc::new(self.backend.open(path)?);
        debug!("Opened module {} from {}", module.name(), path.display());
        if self.state().loading_names.insert(module.name().to_string()) {
            guard.name = Some(module.name().to_string());
        }

        for dependency in module.dependencies() {
            let in_progress = {
                let state = self.state();
                !state.by_name.contains_key(dependency)
                    && state.loading_names.contains(dependency)
            };
            if in_progress {
                return Err(ModuleError::DependencyCycle {
                    name: dependency.clone(),
                });
            }

            let request = ResolutionRequest::new(dependency.clone(), Some(module.name().to_string()));
            if self.resolve(&request).is_none() {
                return Err(ModuleError::UnresolvedDependency {
                    name: request.name,
                    requester: request.requester,
                });
            }
        }

        let handle = self
            .state()
            .by_path
            .entry(path.to_path_buf())
            .or_insert(module)
            .clone();
        Ok(handle)
    }

    /// Resolve a module by name
    ///
    /// Successful lookups are cached under the requested name.
    pub fn resolve(&self, request: &ResolutionRequest) -> Option<ModuleHandle> {
        if let Some(found) = self.state().by_name.get(&request.name) {
            return Some(found.clone());
        }

        let found = self
            .probe(&request.name)
            .or_else(|| self.run_handlers(request))?;
        self.state()
            .by_name
            .insert(request.name.clone(), found.clone());
        Some(found)
    }

    /// Find any loaded module by its declared name
    #[must_use]
    pub fn loaded(&self, name: &str) -> Option<ModuleHandle> {
        let state = self.state();
        state
            .by_path
            .values()
            .chain(state.by_name.values())
            .find(|m| m.name() == name)
            .cloned()
    }

    /// Every module loaded by explicit path
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleHandle> {
        self.state().by_path.values().cloned().collect()
    }

    /// Install a failed-resolution handler
    pub fn add_resolve_handler(&self, handler: Arc<dyn ResolveHandler>) -> HandlerId {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers_lock().push((id, handler));
        trace!("Installed resolve handler {:?}", id);
        id
    }

    /// Remove a handler; unknown ids are ignored
    pub fn remove_resolve_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers_lock();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        before != handlers.len()
    }

    /// Number of installed handlers
    #[must_use]
    pub fn resolve_handler_count(&self) -> usize {
        self.handlers_lock().len()
    }

    fn probe(&self, name: &str) -> Option<ModuleHandle> {
        let file_name = libloading::library_filename(name);
        for dir in &self.probe_dirs {
            let candidate = dir.join(&file_name);
            if !candidate.is_file() {
                continue;
            }
            match self.load_file(&candidate) {
                Ok(module) => return Some(module),
                Err(e) => debug!("Probe of {} failed: {}", candidate.display(), e),
            }
        }
        None
    }

    fn run_handlers(&self, request: &ResolutionRequest) -> Option<ModuleHandle> {
        // Snapshot so handlers may add or remove handlers themselves
        let handlers: Vec<_> = self
            .handlers_lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        handlers.iter().find_map(|h| h.resolve(request))
    }

    fn state(&self) -> MutexGuard<'_, ModuleState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn handlers_lock(&self) -> MutexGuard<'_, Vec<(HandlerId, Arc<dyn ResolveHandler>)>> {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for ModuleSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSystem")
            .field("probe_dirs", &self.probe_dirs)
            .finish_non_exhaustive()
    }
}
