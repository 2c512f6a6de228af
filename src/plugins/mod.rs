// Plugin system: module ABI, dynamic loading and the process module system
//
// - Dynamic loading with libloading
// - Name based dependency resolution with failed-resolution handlers
// - Plugin lifecycle contract shared with plugin modules
pub mod api;
pub mod loader;
pub mod module_system;

pub use api::{
    ModuleDeclaration, ModuleEntry, Plugin, PluginCreate, PluginEnv, PluginType, SecondaryPlugin,
    MODULE_ENTRY_SYMBOL,
};
pub use loader::LibraryBackend;
pub use module_system::{
    HandlerId, LoadedModule, ModuleBackend, ModuleError, ModuleHandle, ModuleSystem,
    ResolutionRequest, ResolveHandler,
};
