use libloading::{Library, Symbol};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::plugins::api::{ModuleEntry, MODULE_ENTRY_SYMBOL};
use crate::plugins::module_system::{LoadedModule, ModuleBackend, ModuleError};

/// Loads code modules from dynamic libraries on disk
///
/// A module is a `cdylib` built with the same toolchain as the host that
/// exports `_plugin_module`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibraryBackend;

impl LibraryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModuleBackend for LibraryBackend {
    fn open(&self, path: &Path) -> Result<LoadedModule, ModuleError> {
        // Safety: loading a library runs its initializers. Modules run with
        // full host privileges, there is nothing to verify beforehand.
        let library = unsafe { Library::new(path) }.map_err(|source| ModuleError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let declaration = {
            // Safety: the symbol type is the documented module ABI
            let entry: Symbol<ModuleEntry> = unsafe { library.get(MODULE_ENTRY_SYMBOL) }
                .map_err(|source| ModuleError::MissingEntryPoint {
                    path: path.to_path_buf(),
                    source,
                })?;
            let entry = *entry;

            // Safety: see above; a panic in the entry point is contained here
            panic::catch_unwind(AssertUnwindSafe(|| unsafe { entry() })).map_err(|_| {
                ModuleError::EntryPanicked {
                    path: path.to_path_buf(),
                }
            })?
        };

        Ok(LoadedModule::new(path, declaration, Some(library)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_open_error() {
        let backend = LibraryBackend::new();
        let err = backend
            .open(Path::new("/definitely/not/here/libnothing.so"))
            .unwrap_err();
        assert!(matches!(err, ModuleError::Open { .. }));
    }

    #[test]
    fn test_non_library_file_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(libloading::library_filename("garbage"));
        std::fs::write(&path, b"not a shared object").unwrap();

        let err = LibraryBackend::new().open(&path).unwrap_err();
        assert!(matches!(err, ModuleError::Open { .. }));
    }
}
