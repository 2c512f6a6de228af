//! Client mod script injection
//!
//! Postfix on the host's session script loading. Every time it runs, scripts
//! of enabled mod plugins that the session did not bring along itself are
//! loaded through the host's own per-mod routine.

use anyhow::Result;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::{ModPlugin, PluginConfig, PluginData};
use crate::host::HostInternals;
use crate::log_file::LogFile;
use crate::patch::Patcher;

/// Host routine that loads scripts for the active session
pub const SCRIPT_MANAGER_LOAD_DATA: &str = "ScriptManager::load_data";

/// The script loading postfix
pub struct ScriptLoadPatch {
    config: Arc<PluginConfig>,
    host: Arc<dyn HostInternals>,
    log: Arc<LogFile>,
}

impl ScriptLoadPatch {
    pub fn new(config: Arc<PluginConfig>, host: Arc<dyn HostInternals>, log: Arc<LogFile>) -> Self {
        Self { config, host, log }
    }

    /// Install as a postfix on [`SCRIPT_MANAGER_LOAD_DATA`]
    pub fn install(self, patcher: &Patcher) {
        let patch = Arc::new(self);
        patcher.postfix(SCRIPT_MANAGER_LOAD_DATA, move |instance| patch.postfix(instance));
    }

    /// Load scripts for every enabled mod missing from the session
    ///
    /// # Errors
    /// Errors are logged and returned to the host unchanged. A panic in the
    /// host routine is logged the same way and then resumed.
    pub fn postfix(&self, instance: &dyn Any) -> Result<()> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.inject(instance))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.log_failure(&format!("{e:#}"));
                Err(e)
            }
            Err(payload) => {
                self.log_failure(panic_message(payload.as_ref()));
                panic::resume_unwind(payload)
            }
        }
    }

    fn log_failure(&self, reason: &str) {
        self.log
            .line(format!("An error occurred while loading client mods: {reason}"));
    }

    fn inject(&self, instance: &dyn Any) -> Result<()> {
        let current: HashSet<u64> = self
            .host
            .session_mods()
            .unwrap_or_default()
            .into_iter()
            .collect();

        for plugin in pending_mods(&self.config, &current) {
            if !plugin.exists() {
                continue;
            }
            self.log.line(format!(
                "Loading client mod scripts for {}",
                plugin.workshop_id()
            ));
            self.host
                .load_scripts(instance, plugin.mod_location(), &plugin.mod_context())?;
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("panicked")
}

/// Enabled mod plugins whose distribution id is not in `current`
///
/// Each distribution id appears at most once, first catalog entry wins.
pub fn pending_mods<'a>(config: &'a PluginConfig, current: &HashSet<u64>) -> Vec<ModPlugin<'a>> {
    let mut seen = HashSet::new();
    config
        .enabled_plugins()
        .filter_map(PluginData::as_mod)
        .filter(|m| !current.contains(&m.workshop_id()) && seen.insert(m.workshop_id()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModContext;
    use crate::host::native::{NativeHost, ScriptManager, SessionMod};
    use crate::host::SharedPlugin;
    use crate::log_file::LOG_FILE_NAME;
    use crate::patch::PatchRegistry;
    use crate::plugins::{ModuleHandle, PluginEnv};
    use std::path::Path;

    fn mod_entry(id: u64, dir: &std::path::Path) -> PluginData {
        let location = dir.join(id.to_string());
        std::fs::create_dir_all(&location).unwrap();
        PluginData::workshop_mod(format!("mod-{id}"), id, location, None)
    }

    #[test]
    fn test_pending_is_set_difference() {
        let dir = tempfile::tempdir().unwrap();
        let config = PluginConfig::new(vec![
            mod_entry(7, dir.path()),
            mod_entry(8, dir.path()),
            mod_entry(9, dir.path()).disabled(),
            PluginData::local("local", "/x.so"),
        ]);
        let current: HashSet<u64> = [7, 9].into_iter().collect();

        let ids: Vec<u64> = pending_mods(&config, &current)
            .iter()
            .map(ModPlugin::workshop_id)
            .collect();
        assert_eq!(ids, vec![8]);
    }

    #[test]
    fn test_duplicate_distribution_id_injected_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut second = mod_entry(5, dir.path());
        second.id = "again".to_string();
        let config = PluginConfig::new(vec![mod_entry(5, dir.path()), second]);

        assert_eq!(pending_mods(&config, &HashSet::new()).len(), 1);
    }

    #[test]
    fn test_postfix_loads_missing_mods_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(PluginConfig::new(vec![
            mod_entry(7, dir.path()),
            mod_entry(8, dir.path()),
        ]));
        let registry = Arc::new(PatchRegistry::new());
        let host = Arc::new(NativeHost::new(registry.clone()));
        let log = Arc::new(LogFile::host_only("test"));

        ScriptLoadPatch::new(config, host.clone(), log)
            .install(&Patcher::new("loader", registry.clone()));

        let session = vec![
            SessionMod { workshop_id: 7, location: dir.path().join("7") },
            SessionMod { workshop_id: 9, location: dir.path().join("9") },
        ];
        let scripts = host.load_session(Some(session)).unwrap();
        assert_eq!(scripts.loaded_ids(), vec![7, 9, 8]);
    }

    #[test]
    fn test_missing_content_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(PluginConfig::new(vec![PluginData::workshop_mod(
            "gone",
            4,
            dir.path().join("missing"),
            None,
        )]));
        let registry = Arc::new(PatchRegistry::new());
        let host = Arc::new(NativeHost::new(registry));
        let patch = ScriptLoadPatch::new(config, host, Arc::new(LogFile::host_only("test")));

        let manager = ScriptManager::new();
        patch.postfix(&manager).unwrap();
        assert!(manager.loaded().is_empty());
    }

    #[test]
    fn test_errors_are_returned_to_host() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(PluginConfig::new(vec![mod_entry(1, dir.path())]));
        let host = Arc::new(NativeHost::new(Arc::new(PatchRegistry::new())));
        let patch = ScriptLoadPatch::new(config, host, Arc::new(LogFile::host_only("test")));

        // Not a ScriptManager, the host routine rejects it
        assert!(patch.postfix(&"wrong instance").is_err());
    }

    /// Host whose per-mod script routine panics
    struct PanickingHost;

    impl HostInternals for PanickingHost {
        fn register_plugins(&self, _env: &PluginEnv, _modules: &[ModuleHandle]) -> Result<()> {
            Ok(())
        }

        fn plugins(&self) -> Vec<SharedPlugin> {
            Vec::new()
        }

        fn session_mods(&self) -> Option<Vec<u64>> {
            None
        }

        fn load_scripts(
            &self,
            _instance: &dyn Any,
            _content_path: &Path,
            _context: &ModContext,
        ) -> Result<()> {
            panic!("script table corrupted")
        }
    }

    #[test]
    fn test_panic_in_host_routine_is_logged_and_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(PluginConfig::new(vec![mod_entry(3, dir.path())]));
        let log = Arc::new(LogFile::create(dir.path()).unwrap());
        let patch = ScriptLoadPatch::new(config, Arc::new(PanickingHost), log);

        let manager = ScriptManager::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| patch.postfix(&manager)));
        assert!(outcome.is_err());

        let contents = std::fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert!(contents.lines().any(|l| l.ends_with(
            " An error occurred while loading client mods: script table corrupted"
        )));
    }
}
