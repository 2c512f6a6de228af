//! Hands the verified module set to the host's plugin registry

use std::panic::{self, AssertUnwindSafe};

use crate::host::TypeLoadFailure;
use crate::log_file::LogFile;
use crate::pipeline::LoadedModuleSet;
use crate::plugins::PluginEnv;

/// What happened to the registration call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Nothing to register, the host was not called
    Empty,
    /// The host accepted the modules
    Linked,
    /// The host's registration call failed
    Failed,
}

impl LinkOutcome {
    /// Whether the registration call completed
    #[must_use]
    pub fn completed(self) -> bool {
        self == Self::Linked
    }
}

/// Register `modules` with the host in one call
///
/// A [`TypeLoadFailure`] anywhere in the error chain is unwrapped and every
/// cause logged on its own line.
pub fn link(env: &PluginEnv, modules: &LoadedModuleSet, log: &LogFile) -> LinkOutcome {
    if modules.is_empty() {
        log.line("No modules to link!");
        return LinkOutcome::Empty;
    }

    log.line(format!("Linking {} modules to the host.", modules.len()));
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        env.host.register_plugins(env, modules.as_slice())
    }));

    match result {
        Ok(Ok(())) => LinkOutcome::Linked,
        Ok(Err(e)) => {
            log.line("An error occurred:");
            match e.chain().find_map(|c| c.downcast_ref::<TypeLoadFailure>()) {
                Some(failure) => {
                    for cause in &failure.causes {
                        log.line(format!("{cause:#}"));
                    }
                }
                None => log.line(format!("{e:#}")),
            }
            LinkOutcome::Failed
        }
        Err(_) => {
            log.line("An error occurred:\nplugin registration panicked");
            LinkOutcome::Failed
        }
    }
}
