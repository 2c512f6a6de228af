//! Secondary entry point scan
//!
//! Runs after registration. Every registered plugin exposing the secondary
//! capability gets its entry point called once, with a patch handle and a
//! logger scoped to its type name.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError};

use crate::log_file::{LogFile, Logger};
use crate::patch::Patcher;
use crate::plugins::PluginEnv;

/// Result of one scan
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Type names whose entry point was called, in plugin list order
    pub invoked: Vec<&'static str>,
    /// Type names whose entry point failed
    pub failed: Vec<&'static str>,
}

/// Call the secondary entry point of every capable registered plugin
pub fn scan(env: &PluginEnv, log: &Arc<LogFile>) -> ScanReport {
    let mut report = ScanReport::default();

    for plugin in env.host.plugins() {
        let mut plugin = plugin.lock().unwrap_or_else(PoisonError::into_inner);
        let name = plugin.type_name();
        let Some(secondary) = plugin.as_secondary_mut() else {
            continue;
        };

        log.line(format!("Executing Main of {name}"));
        report.invoked.push(name);

        let patcher = Patcher::new(name, env.patches.clone());
        let logger = Logger::new(name, log.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| secondary.main(patcher, logger)));

        let failure = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => format!("{e:#}"),
            Err(_) => "entry point panicked".to_string(),
        };
        log.line(format!("Error while calling Main of {name}: {failure}"));
        report.failed.push(name);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostInternals, NativeHost, TracingNotifier};
    use crate::patch::PatchRegistry;
    use crate::plugins::{
        LibraryBackend, LoadedModule, ModuleDeclaration, ModuleSystem, Plugin, PluginType,
        SecondaryPlugin,
    };
    use anyhow::{bail, Result};
    use std::any::Any;

    const TARGET: &str = "Session::update";

    #[derive(Default)]
    struct Good;
    #[derive(Default)]
    struct Failing;
    #[derive(Default)]
    struct Panicking;
    #[derive(Default)]
    struct Plain;

    macro_rules! plugin {
        ($ty:ident, secondary) => {
            impl Plugin for $ty {
                fn init(&mut self, _host: &dyn Any) {}
                fn update(&mut self) {}
                fn dispose(&mut self) {}
                fn as_secondary_mut(&mut self) -> Option<&mut dyn SecondaryPlugin> {
                    Some(self)
                }
            }
        };
        ($ty:ident) => {
            impl Plugin for $ty {
                fn init(&mut self, _host: &dyn Any) {}
                fn update(&mut self) {}
                fn dispose(&mut self) {}
            }
        };
    }

    plugin!(Good, secondary);
    plugin!(Failing, secondary);
    plugin!(Panicking, secondary);
    plugin!(Plain);

    impl SecondaryPlugin for Good {
        fn main(&mut self, patcher: Patcher, logger: Logger) -> Result<()> {
            logger.info("patching");
            patcher.postfix(TARGET, |_| Ok(()));
            Ok(())
        }
    }

    impl SecondaryPlugin for Failing {
        fn main(&mut self, _patcher: Patcher, _logger: Logger) -> Result<()> {
            bail!("missing game data")
        }
    }

    impl SecondaryPlugin for Panicking {
        fn main(&mut self, _patcher: Patcher, _logger: Logger) -> Result<()> {
            panic!("main blew up")
        }
    }

    fn env_with(types: Vec<PluginType>) -> PluginEnv {
        let patches = Arc::new(PatchRegistry::new());
        let host = Arc::new(NativeHost::new(patches.clone()));
        let env = PluginEnv {
            module_dir: "/host".into(),
            plugins_dir: "/host/Plugins".into(),
            module_system: Arc::new(ModuleSystem::new(LibraryBackend::new())),
            host: host.clone(),
            patches,
            notifier: Arc::new(TracingNotifier),
            diagnostics: tracing::dispatcher::get_default(tracing::Dispatch::clone),
        };
        let decl = types
            .into_iter()
            .fold(ModuleDeclaration::new("mixed"), ModuleDeclaration::with_type);
        let module = Arc::new(LoadedModule::new("/p/mixed.so", decl, None));
        host.register_plugins(&env, &[module]).unwrap();
        env
    }

    fn create<T: Plugin + Default + 'static>(_env: &PluginEnv) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(T::default()))
    }

    #[test]
    fn test_failures_do_not_stop_the_scan() {
        let env = env_with(vec![
            PluginType::new("Failing", create::<Failing>),
            PluginType::new("Plain", create::<Plain>),
            PluginType::new("Panicking", create::<Panicking>),
            PluginType::new("Good", create::<Good>),
        ]);
        let log = Arc::new(LogFile::host_only("test"));

        let report = scan(&env, &log);

        assert_eq!(report.invoked.len(), 3);
        assert!(report.invoked.iter().all(|n| !n.ends_with("Plain")));
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed[0].ends_with("Failing"));
        assert!(report.failed[1].ends_with("Panicking"));
        assert_eq!(env.patches.postfix_count(TARGET), 1);
    }

    #[test]
    fn test_patcher_scoped_to_type_name() {
        let env = env_with(vec![PluginType::new("Good", create::<Good>)]);
        let report = scan(&env, &Arc::new(LogFile::host_only("test")));

        let owner = Patcher::new(report.invoked[0], env.patches.clone());
        assert_eq!(owner.patched_targets(), vec![TARGET.to_string()]);
        assert_eq!(owner.unpatch_all(), 1);
        assert_eq!(env.patches.postfix_count(TARGET), 0);
    }
}
