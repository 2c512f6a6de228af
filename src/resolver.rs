//! Dependency resolver hook
//!
//! Satisfies failed dependency lookups for a fixed set of already loaded
//! modules. A request matches a target when the requested name contains the
//! target's marker.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::log_file::LogFile;
use crate::plugins::{HandlerId, ModuleHandle, ModuleSystem, ResolutionRequest, ResolveHandler};

/// Name of the patching library module
pub const PATCH_LIBRARY_NAME: &str = "patchwork";

/// Name of the loader module itself
pub const LOADER_MODULE_NAME: &str = "plugin_loader";

#[derive(Clone)]
struct ResolveTarget {
    marker: String,
    module: ModuleHandle,
}

#[derive(Clone)]
struct KnownModules {
    targets: Vec<ResolveTarget>,
    log: Arc<LogFile>,
}

impl ResolveHandler for KnownModules {
    fn resolve(&self, request: &ResolutionRequest) -> Option<ModuleHandle> {
        let target = self
            .targets
            .iter()
            .find(|t| request.name.contains(t.marker.as_str()))?;

        match &request.requester {
            Some(requester) => self
                .log
                .line(format!("Resolving {} for {}", target.marker, requester)),
            None => self.log.line(format!("Resolving {}", target.marker)),
        }
        Some(target.module.clone())
    }
}

/// Installs and removes the resolver on a [`ModuleSystem`]
pub struct ResolverHook {
    module_system: Arc<ModuleSystem>,
    handler: Arc<KnownModules>,
    installed: Mutex<Option<HandlerId>>,
}

impl ResolverHook {
    pub fn new(module_system: Arc<ModuleSystem>, log: Arc<LogFile>) -> Self {
        Self {
            module_system,
            handler: Arc::new(KnownModules {
                targets: Vec::new(),
                log,
            }),
            installed: Mutex::new(None),
        }
    }

    /// Serve `module` for any request whose name contains `marker`
    ///
    /// Targets are matched in the order they were added. Targets added after
    /// [`install`](Self::install) apply from the next install.
    #[must_use]
    pub fn with_target(mut self, marker: impl Into<String>, module: ModuleHandle) -> Self {
        let target = ResolveTarget {
            marker: marker.into(),
            module,
        };
        Arc::make_mut(&mut self.handler).targets.push(target);
        self
    }

    /// Install the handler; installing twice keeps a single registration
    pub fn install(&self) {
        let mut installed = self.installed();
        if installed.is_none() {
            *installed = Some(
                self.module_system
                    .add_resolve_handler(self.handler.clone()),
            );
        }
    }

    /// Remove the handler if installed
    pub fn uninstall(&self) {
        if let Some(id) = self.installed().take() {
            self.module_system.remove_resolve_handler(id);
        }
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.installed().is_some()
    }

    /// Answer a request directly, without going through the module system
    #[must_use]
    pub fn resolve(&self, request: &ResolutionRequest) -> Option<ModuleHandle> {
        self.handler.resolve(request)
    }

    fn installed(&self) -> MutexGuard<'_, Option<HandlerId>> {
        self.installed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for ResolverHook {
    fn drop(&mut self) {
        self.uninstall();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{LoadedModule, ModuleBackend, ModuleDeclaration, ModuleError};
    use std::path::Path;

    struct NoBackend;

    impl ModuleBackend for NoBackend {
        fn open(&self, path: &Path) -> Result<LoadedModule, ModuleError> {
            Err(ModuleError::Backend {
                path: path.to_path_buf(),
                source: "unavailable".into(),
            })
        }
    }

    fn module(name: &str) -> ModuleHandle {
        Arc::new(LoadedModule::new(
            format!("/dir/{name}"),
            ModuleDeclaration::new(name),
            None,
        ))
    }

    fn hook() -> (Arc<ModuleSystem>, ResolverHook, ModuleHandle, ModuleHandle) {
        let ms = Arc::new(ModuleSystem::new(NoBackend));
        let patch = module(PATCH_LIBRARY_NAME);
        let loader = module(LOADER_MODULE_NAME);
        let hook = ResolverHook::new(ms.clone(), Arc::new(LogFile::host_only("test")))
            .with_target(PATCH_LIBRARY_NAME, patch.clone())
            .with_target(LOADER_MODULE_NAME, loader.clone());
        (ms, hook, patch, loader)
    }

    #[test]
    fn test_marker_substring_matches() {
        let (_ms, hook, patch, loader) = hook();
        let req = ResolutionRequest::new("patchwork, Version=2.0", Some("demo".to_string()));
        assert!(Arc::ptr_eq(&hook.resolve(&req).unwrap(), &patch));

        let req = ResolutionRequest::new("plugin_loader", None);
        assert!(Arc::ptr_eq(&hook.resolve(&req).unwrap(), &loader));

        let req = ResolutionRequest::new("something_else", None);
        assert!(hook.resolve(&req).is_none());
    }

    #[test]
    fn test_install_is_idempotent() {
        let (ms, hook, _, _) = hook();
        hook.install();
        hook.install();
        assert_eq!(ms.resolve_handler_count(), 1);
        assert!(hook.is_installed());

        hook.uninstall();
        hook.uninstall();
        assert_eq!(ms.resolve_handler_count(), 0);
        assert!(!hook.is_installed());
    }

    #[test]
    fn test_installed_hook_serves_module_system() {
        let (ms, hook, patch, _) = hook();
        assert!(ms
            .resolve(&ResolutionRequest::new(PATCH_LIBRARY_NAME, None))
            .is_none());

        hook.install();
        let found = ms
            .resolve(&ResolutionRequest::new(PATCH_LIBRARY_NAME, None))
            .unwrap();
        assert!(Arc::ptr_eq(&found, &patch));
    }

    #[test]
    fn test_drop_uninstalls() {
        let (ms, hook, _, _) = hook();
        hook.install();
        drop(hook);
        assert_eq!(ms.resolve_handler_count(), 0);
    }

    #[test]
    fn test_log_line_names_requester_when_known() {
        let dir = tempfile::tempdir().unwrap();
        let ms = Arc::new(ModuleSystem::new(NoBackend));
        let log = Arc::new(LogFile::create(dir.path()).unwrap());
        let hook = ResolverHook::new(ms, log)
            .with_target(PATCH_LIBRARY_NAME, module(PATCH_LIBRARY_NAME));

        assert!(hook
            .resolve(&ResolutionRequest::new("patchwork, Version=2.0", None))
            .is_some());
        assert!(hook
            .resolve(&ResolutionRequest::new("patchwork", Some("demo".to_string())))
            .is_some());

        let contents =
            std::fs::read_to_string(dir.path().join(crate::log_file::LOG_FILE_NAME)).unwrap();
        let lines: Vec<&str> = contents
            .lines()
            .map(|l| l.split_once(' ').and_then(|(_, rest)| rest.split_once(' ')).unwrap().1)
            .collect();
        assert_eq!(lines, vec!["Resolving patchwork", "Resolving patchwork for demo"]);
    }
}
