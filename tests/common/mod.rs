//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use plugin_loader::bootstrap::module_path;
use plugin_loader::host::{NativeHost, Notifier};
use plugin_loader::log_file::LOG_FILE_NAME;
use plugin_loader::patch::PatchRegistry;
use plugin_loader::plugins::{
    LoadedModule, ModuleBackend, ModuleDeclaration, ModuleError, ModuleSystem, Plugin, PluginEnv,
    PluginType,
};
use plugin_loader::{LOADER_MODULE_NAME, PATCH_LIBRARY_NAME};
use tempfile::TempDir;

/// Serves declarations keyed by file name and records every open
#[derive(Default)]
pub struct FakeBackend {
    decls: Mutex<HashMap<String, ModuleDeclaration>>,
    opened: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn add(&self, file: impl Into<String>, decl: ModuleDeclaration) {
        self.decls.lock().unwrap().insert(file.into(), decl);
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl ModuleBackend for FakeBackend {
    fn open(&self, path: &Path) -> Result<LoadedModule, ModuleError> {
        let key = path.file_name().unwrap().to_string_lossy().into_owned();
        self.opened.lock().unwrap().push(key.clone());
        match self.decls.lock().unwrap().get(&key) {
            Some(decl) => Ok(LoadedModule::new(path, decl.clone(), None)),
            None => Err(ModuleError::Backend {
                path: path.to_path_buf(),
                source: "not a module".into(),
            }),
        }
    }
}

/// Records every notice instead of showing it, along with what `loader.log`
/// held at that moment
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(String, String)>>,
    log_path: Option<PathBuf>,
    log_at_notice: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn watching(log_path: PathBuf) -> Self {
        Self {
            log_path: Some(log_path),
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.notices.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Contents of `loader.log` read inside the last notice
    pub fn log_at_notice(&self) -> Option<String> {
        self.log_at_notice.lock().unwrap().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn show_error(&self, title: &str, message: &str) {
        if let Some(path) = &self.log_path {
            let contents = fs::read_to_string(path).unwrap_or_default();
            self.log_at_notice.lock().unwrap().push(contents);
        }
        self.notices
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}

/// Plugin that does nothing
#[derive(Default)]
pub struct Noop;

impl Plugin for Noop {
    fn init(&mut self, _host: &dyn Any) {}
    fn update(&mut self) {}
    fn dispose(&mut self) {}
}

pub fn create_noop(_env: &PluginEnv) -> anyhow::Result<Box<dyn Plugin>> {
    Ok(Box::new(Noop))
}

/// A module declaration exposing one [`Noop`] type
pub fn plugin_module(name: &str) -> ModuleDeclaration {
    ModuleDeclaration::new(name).with_type(PluginType::new("Noop", create_noop))
}

/// A host process with a fake module backend, rooted in a temp directory
pub struct Fixture {
    pub dir: TempDir,
    pub backend: Arc<FakeBackend>,
    pub host: Arc<NativeHost>,
    pub notifier: Arc<RecordingNotifier>,
    pub env: PluginEnv,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let patches = Arc::new(PatchRegistry::new());
        let host = Arc::new(NativeHost::new(patches.clone()));
        let notifier = Arc::new(RecordingNotifier::watching(
            dir.path().join("Plugins").join(LOG_FILE_NAME),
        ));
        let env = PluginEnv {
            module_dir: dir.path().to_path_buf(),
            plugins_dir: dir.path().join("Plugins"),
            module_system: Arc::new(ModuleSystem::new(backend.clone())),
            host: host.clone(),
            patches,
            notifier: notifier.clone(),
            diagnostics: tracing::dispatcher::get_default(tracing::Dispatch::clone),
        };
        Self {
            dir,
            backend,
            host,
            notifier,
            env,
        }
    }

    /// Make the patching library and the loader module available in the
    /// loader directory
    pub fn with_loader_modules(self) -> Self {
        let file_of = |name: &str| {
            module_path(&self.env.module_dir, name)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        };
        self.backend.add(
            file_of(PATCH_LIBRARY_NAME),
            ModuleDeclaration::new(PATCH_LIBRARY_NAME),
        );
        self.backend.add(
            file_of(LOADER_MODULE_NAME),
            plugin_loader::loader_module_declaration(),
        );
        self
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.env.plugins_dir.clone()
    }

    pub fn write_config(&self, yaml: &str) {
        fs::create_dir_all(self.plugins_dir()).unwrap();
        fs::write(self.plugins_dir().join("config.yaml"), yaml).unwrap();
    }

    /// Make a mod content directory with one script
    pub fn mod_dir(&self, workshop_id: u64) -> PathBuf {
        let location = self.dir.path().join("mods").join(workshop_id.to_string());
        let scripts = location.join("Data").join("Scripts");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(scripts.join("main.rs"), "").unwrap();
        location
    }

    /// Lines of `loader.log` without their timestamps
    pub fn log_lines(&self) -> Vec<String> {
        let text = fs::read_to_string(self.plugins_dir().join(LOG_FILE_NAME)).unwrap();
        text.lines()
            .map(|line| match line.get(19..20) {
                Some(" ") => line[20..].to_string(),
                _ => line.to_string(),
            })
            .collect()
    }
}
