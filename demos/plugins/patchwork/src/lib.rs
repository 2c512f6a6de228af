//! Stand-in for the patching library the loader module depends on
//!
//! Install next to the loader module as `libpatchwork`. It exposes no plugin
//! types; the loader only needs it resolvable by name.

use plugin_loader::{ModuleDeclaration, PATCH_LIBRARY_NAME};

#[no_mangle]
pub fn _plugin_module() -> ModuleDeclaration {
    ModuleDeclaration::new(PATCH_LIBRARY_NAME)
}
