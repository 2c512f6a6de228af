use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::log_file::LogFile;

/// File name of the plugin catalog inside the plugins directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// The plugin catalog, in file order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub plugins: Vec<PluginData>,
}

/// One catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginData {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Set when loading this entry failed during the current run
    #[serde(skip)]
    pub error: bool,
    pub source: PluginSource,
}

/// Where a plugin comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginSource {
    /// A module placed in the plugins directory by hand
    Local { file: PathBuf },
    /// A mod distributed under a numeric distribution id
    Mod {
        workshop_id: u64,
        location: PathBuf,
        /// Code module inside `location`, if the mod ships one
        #[serde(default)]
        file: Option<PathBuf>,
    },
}

/// Mod-specific view of a [`PluginData`]
#[derive(Debug, Clone, Copy)]
pub struct ModPlugin<'a> {
    data: &'a PluginData,
    workshop_id: u64,
    location: &'a Path,
}

/// Loading context the host needs for a mod's scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModContext {
    pub id: String,
    pub workshop_id: u64,
    pub path: PathBuf,
}

fn default_true() -> bool {
    true
}

impl PluginData {
    pub fn local(id: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            error: false,
            source: PluginSource::Local { file: file.into() },
        }
    }

    pub fn workshop_mod(
        id: impl Into<String>,
        workshop_id: u64,
        location: impl Into<PathBuf>,
        file: Option<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            error: false,
            source: PluginSource::Mod {
                workshop_id,
                location: location.into(),
                file,
            },
        }
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Resolved path of this entry's code module
    #[must_use]
    pub fn dll_file(&self) -> Option<PathBuf> {
        match &self.source {
            PluginSource::Local { file } => Some(file.clone()),
            PluginSource::Mod { location, file, .. } => file.as_ref().map(|f| location.join(f)),
        }
    }

    /// Record that loading this entry failed
    pub fn mark_error(&mut self) {
        self.error = true;
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Mod view, for mod-sourced entries
    #[must_use]
    pub fn as_mod(&self) -> Option<ModPlugin<'_>> {
        match &self.source {
            PluginSource::Mod {
                workshop_id,
                location,
                ..
            } => Some(ModPlugin {
                data: self,
                workshop_id: *workshop_id,
                location,
            }),
            PluginSource::Local { .. } => None,
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        match &mut self.source {
            PluginSource::Local { file } => *file = absolutize(base, file),
            PluginSource::Mod { location, .. } => *location = absolutize(base, location),
        }
    }
}

impl ModPlugin<'_> {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.data.id
    }

    #[must_use]
    pub fn workshop_id(&self) -> u64 {
        self.workshop_id
    }

    /// Directory holding the mod content
    #[must_use]
    pub fn mod_location(&self) -> &Path {
        self.location
    }

    /// Whether the mod content is present on disk
    #[must_use]
    pub fn exists(&self) -> bool {
        self.location.is_dir()
    }

    #[must_use]
    pub fn mod_context(&self) -> ModContext {
        ModContext {
            id: self.data.id.clone(),
            workshop_id: self.workshop_id,
            path: self.location.to_path_buf(),
        }
    }
}

impl PluginConfig {
    pub fn new(plugins: Vec<PluginData>) -> Self {
        Self { plugins }
    }

    /// Load the catalog from `dir/config.yaml`
    ///
    /// A missing file yields an empty catalog. A malformed file is logged and
    /// also yields an empty catalog: a bad catalog must not stop the host.
    /// Relative paths are resolved against `dir`.
    pub fn load(dir: &Path, log: &LogFile) -> Self {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            log.line(format!("No {CONFIG_FILE_NAME} found, no plugins configured."));
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(mut config) => {
                config.resolve_paths(dir);
                for duplicate in config.dedup() {
                    log.line(format!("Ignoring duplicate plugin entry {duplicate}"));
                }
                config
            }
            Err(e) => {
                log.line(format!("An error occurred while loading the config: {e:#}"));
                Self::default()
            }
        }
    }

    /// Parse a catalog file without path resolution
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: PluginConfig =
            serde_yaml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    pub fn enabled_plugins(&self) -> impl Iterator<Item = &PluginData> {
        self.plugins.iter().filter(|p| p.enabled)
    }

    pub fn errored_plugins(&self) -> impl Iterator<Item = &PluginData> {
        self.plugins.iter().filter(|p| p.error)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PluginData> {
        self.plugins.iter().find(|p| p.id == id)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for plugin in &mut self.plugins {
            plugin.resolve_paths(base);
        }
    }

    /// Drop later entries with an id seen before; returns the dropped ids
    fn dedup(&mut self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dropped = Vec::new();
        self.plugins.retain(|p| {
            if seen.insert(p.id.clone()) {
                true
            } else {
                dropped.push(p.id.clone());
                false
            }
        });
        dropped
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
