//! Module load/verify pipeline
//!
//! Walks the catalog in order, loads every enabled entry's code module and
//! keeps the ones exposing at least one plugin type. A failing entry is
//! marked and logged; the remaining entries are still processed.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{PluginConfig, PluginData};
use crate::log_file::LogFile;
use crate::plugins::{ModuleError, ModuleHandle, ModuleSystem};

/// Why one catalog entry could not be loaded
#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error("no code module file for {id}")]
    NoModuleFile { id: String },

    #[error("{} does not contain a plugin interface", file.display())]
    NoPluginInterface { file: PathBuf },

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error("loading {} panicked", file.display())]
    Panicked { file: PathBuf },
}

/// Successfully verified modules, in catalog order
#[derive(Debug, Clone, Default)]
pub struct LoadedModuleSet {
    modules: Vec<ModuleHandle>,
}

impl LoadedModuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, module: ModuleHandle) {
        self.modules.push(module);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ModuleHandle] {
        &self.modules
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleHandle> {
        self.modules.iter()
    }

    /// Declared module names, in order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }
}

/// Result of one pipeline run
#[derive(Debug, Default)]
pub struct LoadReport {
    pub modules: LoadedModuleSet,
    /// Entry id and failure, in catalog order
    pub failures: Vec<(String, LoadFailure)>,
    /// Ids of disabled entries
    pub skipped: Vec<String>,
}

impl LoadReport {
    /// Whether any entry failed
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Load and verify every enabled entry of `config`
pub fn load_all(module_system: &ModuleSystem, config: &mut PluginConfig, log: &LogFile) -> LoadReport {
    let mut report = LoadReport::default();

    for data in &mut config.plugins {
        if !data.enabled {
            log.line(format!("Skipped {}", data.id));
            report.skipped.push(data.id.clone());
            continue;
        }

        log.line(format!("Loading {}", data.id));
        match load_dll(module_system, data, log) {
            Ok(module) => report.modules.push(module),
            Err(failure) => {
                data.mark_error();
                report.failures.push((data.id.clone(), failure));
            }
        }
    }

    report
}

/// Load and verify the code module of a single entry
///
/// # Errors
/// Returns the reason the entry could not be loaded; the reason is already logged
pub fn load_dll(
    module_system: &ModuleSystem,
    data: &PluginData,
    log: &LogFile,
) -> Result<ModuleHandle, LoadFailure> {
    let Some(file) = data.dll_file() else {
        log.line(format!("Failed to load {}: no code module file", data.id));
        return Err(LoadFailure::NoModuleFile {
            id: data.id.clone(),
        });
    };

    let loaded = panic::catch_unwind(AssertUnwindSafe(|| module_system.load_file(&file)));
    let module = match loaded {
        Ok(Ok(module)) => module,
        Ok(Err(e)) => {
            log.line(format!("An error occurred:\n{e}"));
            return Err(e.into());
        }
        Err(_) => {
            let failure = LoadFailure::Panicked { file };
            log.line(format!("An error occurred:\n{failure}"));
            return Err(failure);
        }
    };

    if module.plugin_types().is_empty() {
        log.line(format!(
            "Failed to load {} because it does not contain a plugin interface.",
            module.file_name()
        ));
        return Err(LoadFailure::NoPluginInterface { file });
    }

    Ok(module)
}
