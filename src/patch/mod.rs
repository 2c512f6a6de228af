//! Interception of host routines
//!
//! The host consults a [`PatchRegistry`] after running each patchable routine
//! and runs every postfix registered for it. Plugins get a [`Patcher`] scoped
//! to their own id and can only remove what they registered.

pub mod script_manager;

use anyhow::Result;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub use script_manager::{ScriptLoadPatch, SCRIPT_MANAGER_LOAD_DATA};

/// Hook run after a host routine, receiving the routine's instance
pub type Postfix = Arc<dyn Fn(&dyn Any) -> Result<()> + Send + Sync>;

struct PatchEntry {
    owner: String,
    target: String,
    hook: Postfix,
}

/// Process-wide table of installed postfixes
#[derive(Default)]
pub struct PatchRegistry {
    patches: Mutex<Vec<PatchEntry>>,
}

impl PatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every postfix for `target` in registration order
    ///
    /// # Errors
    /// Stops at and returns the first postfix error
    pub fn run_postfixes(&self, target: &str, instance: &dyn Any) -> Result<()> {
        let hooks: Vec<Postfix> = self
            .lock()
            .iter()
            .filter(|p| p.target == target)
            .map(|p| p.hook.clone())
            .collect();

        for hook in hooks {
            hook(instance)?;
        }
        Ok(())
    }

    /// Number of postfixes installed on `target`
    #[must_use]
    pub fn postfix_count(&self, target: &str) -> usize {
        self.lock().iter().filter(|p| p.target == target).count()
    }

    fn add(&self, owner: &str, target: &str, hook: Postfix) {
        self.lock().push(PatchEntry {
            owner: owner.to_string(),
            target: target.to_string(),
            hook,
        });
    }

    fn remove_owner(&self, owner: &str) -> usize {
        let mut patches = self.lock();
        let before = patches.len();
        patches.retain(|p| p.owner != owner);
        before - patches.len()
    }

    fn targets_of(&self, owner: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|p| p.owner == owner)
            .map(|p| p.target.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PatchEntry>> {
        self.patches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchRegistry")
            .field("patches", &self.lock().len())
            .finish()
    }
}

/// Patch handle scoped to one owner
#[derive(Debug, Clone)]
pub struct Patcher {
    id: String,
    registry: Arc<PatchRegistry>,
}

impl Patcher {
    pub fn new(id: impl Into<String>, registry: Arc<PatchRegistry>) -> Self {
        Self {
            id: id.into(),
            registry,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run `hook` after every call of the host routine `target`
    pub fn postfix<F>(&self, target: &str, hook: F)
    where
        F: Fn(&dyn Any) -> Result<()> + Send + Sync + 'static,
    {
        debug!("{} patching {}", self.id, target);
        self.registry.add(&self.id, target, Arc::new(hook));
    }

    /// Remove every patch installed through this owner id
    pub fn unpatch_all(&self) -> usize {
        self.registry.remove_owner(&self.id)
    }

    /// Targets this owner currently patches
    #[must_use]
    pub fn patched_targets(&self) -> Vec<String> {
        self.registry.targets_of(&self.id)
    }
}
