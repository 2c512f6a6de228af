use std::any::Any;

use plugin_loader::{ModuleDeclaration, Plugin, PluginEnv, PluginType, PATCH_LIBRARY_NAME};

/// Hello World Plugin - prints its lifecycle to stdout
#[derive(Debug, Default)]
pub struct HelloWorldPlugin {
    initialized: bool,
    ticks: u64,
}

impl HelloWorldPlugin {
    fn create(_env: &PluginEnv) -> anyhow::Result<Box<dyn Plugin>> {
        Ok(Box::new(Self::default()))
    }
}

impl Plugin for HelloWorldPlugin {
    fn init(&mut self, _host: &dyn Any) {
        self.initialized = true;
        println!("[Hello World Plugin] Initialized!");
    }

    fn update(&mut self) {
        self.ticks += 1;
    }

    fn dispose(&mut self) {
        self.initialized = false;
        println!("[Hello World Plugin] Cleaned up after {} ticks!", self.ticks);
    }
}

/// Plugin entry point
#[no_mangle]
pub fn _plugin_module() -> ModuleDeclaration {
    ModuleDeclaration::new("hello_world")
        .depends_on(PATCH_LIBRARY_NAME)
        .with_type(PluginType::new("hello_world::HelloWorldPlugin", HelloWorldPlugin::create))
}
