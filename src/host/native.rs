//! A small native host
//!
//! Implements the privileged host surface for a Rust process that embeds the
//! loader directly. Used by the command line runner and the tests.

use anyhow::{anyhow, bail, Context, Result};
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::{HostInternals, SharedPlugin, TypeLoadFailure};
use crate::config::ModContext;
use crate::patch::{PatchRegistry, SCRIPT_MANAGER_LOAD_DATA};
use crate::plugins::{ModuleHandle, PluginEnv};

/// Relative directory holding a mod's scripts
const SCRIPTS_DIR: [&str; 2] = ["Data", "Scripts"];

/// Scripts loaded for one mod during a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedScripts {
    pub context: ModContext,
    pub files: Vec<PathBuf>,
}

/// The host's script manager, the instance handed to script loading postfixes
#[derive(Debug, Default)]
pub struct ScriptManager {
    loaded: Mutex<Vec<LoadedScripts>>,
}

impl ScriptManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts loaded so far, in load order
    #[must_use]
    pub fn loaded(&self) -> Vec<LoadedScripts> {
        self.lock().clone()
    }

    /// Distribution ids whose scripts were loaded
    #[must_use]
    pub fn loaded_ids(&self) -> Vec<u64> {
        self.lock().iter().map(|s| s.context.workshop_id).collect()
    }

    fn record(&self, scripts: LoadedScripts) {
        self.lock().push(scripts);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LoadedScripts>> {
        self.loaded
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// A mod the session itself provides
#[derive(Debug, Clone)]
pub struct SessionMod {
    pub workshop_id: u64,
    pub location: PathBuf,
}

/// In-process host
pub struct NativeHost {
    patches: Arc<PatchRegistry>,
    plugins: Mutex<Vec<(SharedPlugin, ModuleHandle)>>,
    session: Mutex<Option<Vec<SessionMod>>>,
    last_scripts: Mutex<Option<Arc<ScriptManager>>>,
}

impl NativeHost {
    pub fn new(patches: Arc<PatchRegistry>) -> Self {
        Self {
            patches,
            plugins: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            last_scripts: Mutex::new(None),
        }
    }

    /// Load a session with the given mod list, running script loading and
    /// every postfix installed on it
    ///
    /// # Errors
    /// Returns an error if the host's own script loading or a postfix fails
    pub fn load_session(&self, mods: Option<Vec<SessionMod>>) -> Result<Arc<ScriptManager>> {
        *lock(&self.session) = mods.clone();

        let manager = Arc::new(ScriptManager::new());
        *lock(&self.last_scripts) = Some(manager.clone());

        for session_mod in mods.unwrap_or_default() {
            let context = ModContext {
                id: session_mod.workshop_id.to_string(),
                workshop_id: session_mod.workshop_id,
                path: session_mod.location.clone(),
            };
            self.load_scripts(&*manager, &session_mod.location, &context)?;
        }

        self.patches
            .run_postfixes(SCRIPT_MANAGER_LOAD_DATA, &*manager)
            .context("Script loading postfix failed")?;

        info!(
            "Session loaded with scripts for {} mod(s)",
            manager.loaded().len()
        );
        Ok(manager)
    }

    /// Script manager of the most recent session
    #[must_use]
    pub fn last_scripts(&self) -> Option<Arc<ScriptManager>> {
        lock(&self.last_scripts).clone()
    }

    pub fn init_all(&self, host_instance: &dyn Any) {
        for plugin in self.plugins() {
            lock(&plugin).init(host_instance);
        }
    }

    pub fn update_all(&self) {
        for plugin in self.plugins() {
            lock(&plugin).update();
        }
    }

    /// Dispose and drop every registered plugin
    pub fn dispose_all(&self) {
        let registered: Vec<_> = lock(&self.plugins).drain(..).collect();
        for (plugin, _module) in registered {
            lock(&plugin).dispose();
        }
    }
}

impl HostInternals for NativeHost {
    fn register_plugins(&self, env: &PluginEnv, modules: &[ModuleHandle]) -> Result<()> {
        let mut created = Vec::new();
        let mut causes = Vec::new();

        for module in modules {
            for plugin_type in module.plugin_types() {
                let create = plugin_type.create;
                match panic::catch_unwind(AssertUnwindSafe(|| create(env))) {
                    Ok(Ok(plugin)) => {
                        debug!("Created {} from {}", plugin_type.name, module.file_name());
                        created.push((Arc::new(Mutex::new(plugin)), module.clone()));
                    }
                    Ok(Err(e)) => causes.push(e.context(format!(
                        "Could not create {} from {}",
                        plugin_type.name,
                        module.file_name()
                    ))),
                    Err(_) => causes.push(anyhow!(
                        "Constructor of {} in {} panicked",
                        plugin_type.name,
                        module.file_name()
                    )),
                }
            }
        }

        if !causes.is_empty() {
            for (plugin, _) in &created {
                lock(plugin).dispose();
            }
            return Err(anyhow::Error::new(TypeLoadFailure::new(causes))
                .context("Plugin registration failed"));
        }

        lock(&self.plugins).extend(created);
        Ok(())
    }

    fn plugins(&self) -> Vec<SharedPlugin> {
        lock(&self.plugins).iter().map(|(p, _)| p.clone()).collect()
    }

    fn session_mods(&self) -> Option<Vec<u64>> {
        lock(&self.session)
            .as_ref()
            .map(|mods| mods.iter().map(|m| m.workshop_id).collect())
    }

    fn load_scripts(
        &self,
        instance: &dyn Any,
        content_path: &Path,
        context: &ModContext,
    ) -> Result<()> {
        let Some(manager) = instance.downcast_ref::<ScriptManager>() else {
            bail!("load_scripts called with an instance that is not a ScriptManager");
        };

        let scripts_dir = SCRIPTS_DIR
            .iter()
            .fold(content_path.to_path_buf(), |dir, part| dir.join(part));
        let mut files = Vec::new();
        if scripts_dir.is_dir() {
            collect_files(&scripts_dir, &mut files)
                .with_context(|| format!("Failed to read {}", scripts_dir.display()))?;
        } else if scripts_dir.exists() {
            bail!("{} is not a directory", scripts_dir.display());
        } else {
            warn!("Mod {} has no scripts directory", context.workshop_id);
        }
        files.sort();

        manager.record(LoadedScripts {
            context: context.clone(),
            files,
        });
        Ok(())
    }
}

impl std::fmt::Debug for NativeHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHost")
            .field("plugins", &lock(&self.plugins).len())
            .field("session", &lock(&self.session))
            .finish_non_exhaustive()
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
