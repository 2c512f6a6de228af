//! Plugin using the secondary entry point to patch session script loading

use anyhow::Result;
use std::any::Any;

use plugin_loader::log_file::Logger;
use plugin_loader::patch::{Patcher, SCRIPT_MANAGER_LOAD_DATA};
use plugin_loader::{ModuleDeclaration, Plugin, PluginEnv, PluginType, SecondaryPlugin};

#[derive(Debug, Default)]
pub struct SessionPatcher;

impl SessionPatcher {
    fn create(_env: &PluginEnv) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(Self))
    }
}

impl Plugin for SessionPatcher {
    fn init(&mut self, _host: &dyn Any) {}

    fn update(&mut self) {}

    fn dispose(&mut self) {}

    fn as_secondary_mut(&mut self) -> Option<&mut dyn SecondaryPlugin> {
        Some(self)
    }
}

impl SecondaryPlugin for SessionPatcher {
    fn main(&mut self, patcher: Patcher, logger: Logger) -> Result<()> {
        let session_logger = logger.clone();
        patcher.postfix(SCRIPT_MANAGER_LOAD_DATA, move |_instance| {
            session_logger.info("Session scripts loaded");
            Ok(())
        });
        logger.info("Watching session script loading");
        Ok(())
    }
}

#[no_mangle]
pub fn _plugin_module() -> ModuleDeclaration {
    ModuleDeclaration::new("session_patcher")
        .with_type(PluginType::new("session_patcher::SessionPatcher", SessionPatcher::create))
}
