//! Plugin Loader - a two-stage plugin bootstrap for native host processes
//!
//! This library loads third-party code modules listed in a plugin catalog,
//! verifies that each exposes the plugin contract, registers the survivors
//! with the host and patches the host's script loading so client-side mods
//! get their scripts loaded.
//!
//! # Modules
//!
//! - [`bootstrap`]: Stub plugin that loads the patching library and the loader
//! - [`resolver`]: Failed-dependency resolver for modules loaded by path
//! - [`loader`]: The loader plugin and its startup run
//! - [`pipeline`]: Per-entry module load and verification
//! - [`linker`]: Registration of the verified modules with the host
//! - [`scanner`]: Secondary entry point invocation
//! - [`patch`]: Postfix patch registry and the script loading patch
//! - [`config`]: Plugin catalog serialization
//! - [`log_file`]: Dual-sink log (loader file plus diagnostic log)
//! - [`host`]: Privileged host surface and a native host implementation
//! - [`plugins`]: Module ABI, dynamic loading and the module system
//!
//! # Module ABI
//!
//! The library builds as a `cdylib` too, which is the loader module itself.
//! Its [`_plugin_module`] export declares a dependency on the patching
//! library, so the module system can only load it once the bootstrap's
//! resolver is installed. Disable the `module-export` feature when linking
//! this crate into another plugin module.

pub mod bootstrap;
pub mod config;
pub mod host;
pub mod linker;
pub mod loader;
pub mod log_file;
pub mod patch;
pub mod pipeline;
pub mod plugins;
pub mod resolver;
pub mod scanner;

pub use bootstrap::Bootstrap;
pub use loader::Loader;
pub use plugins::{ModuleDeclaration, Plugin, PluginEnv, PluginType, SecondaryPlugin};
pub use resolver::{LOADER_MODULE_NAME, PATCH_LIBRARY_NAME};

/// Declaration of the loader module
#[must_use]
pub fn loader_module_declaration() -> ModuleDeclaration {
    ModuleDeclaration::new(LOADER_MODULE_NAME)
        .depends_on(PATCH_LIBRARY_NAME)
        .with_type(PluginType::new("plugin_loader::Loader", Loader::create))
}

/// Module entry point of the loader `cdylib`
#[cfg(feature = "module-export")]
#[no_mangle]
pub fn _plugin_module() -> ModuleDeclaration {
    loader_module_declaration()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_declaration_matches_bootstrap_lookup() {
        let decl = loader_module_declaration();
        assert_eq!(decl.name, LOADER_MODULE_NAME);
        assert_eq!(decl.dependencies, vec![PATCH_LIBRARY_NAME.to_string()]);
        assert!(decl
            .types
            .iter()
            .any(|t| t.name.contains(bootstrap::LOADER_TYPE_MARKER)));
    }
}
