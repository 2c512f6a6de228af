//! The plugin loader
//!
//! Constructing a [`Loader`] performs the whole startup run: catalog, module
//! pipeline, host registration, secondary entry points and the script
//! loading patch. At most one notice is shown, at the end, if anything failed.

use anyhow::{Context, Result};
use std::any::Any;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::PluginConfig;
use crate::linker::{self, LinkOutcome};
use crate::log_file::LogFile;
use crate::patch::{Patcher, ScriptLoadPatch};
use crate::pipeline;
use crate::plugins::{Plugin, PluginEnv};
use crate::resolver::{ResolverHook, LOADER_MODULE_NAME, PATCH_LIBRARY_NAME};
use crate::scanner::{self, ScanReport};

/// Owner id of the loader's own patches
pub const LOADER_PATCH_ID: &str = "plugin_loader";

/// Title of the startup failure notice
pub const NOTICE_TITLE: &str = "Plugin Loader";

const NOTICE_MESSAGE: &str = "There was an error while trying to load a plugin. \
Some or all of the plugins may not have been loaded. See loader.log or the host log for details.";

/// What one startup run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupSummary {
    /// Names of the modules handed to the host, in order
    pub linked: Vec<String>,
    /// Ids of catalog entries that failed to load
    pub failed: Vec<String>,
    /// Ids of disabled catalog entries
    pub skipped: Vec<String>,
    pub link: LinkOutcome,
    pub scan: ScanReport,
    /// Whether any error flag was raised during the run
    pub error: bool,
}

/// The loader plugin
pub struct Loader {
    log: Arc<LogFile>,
    config: Arc<PluginConfig>,
    resolver: ResolverHook,
    patcher: Patcher,
    summary: StartupSummary,
    disposed: bool,
}

impl Loader {
    /// Run startup against `env`
    ///
    /// # Errors
    /// Returns an error only if the plugins directory or the log file cannot
    /// be created; every later failure is isolated and logged
    pub fn new(env: &PluginEnv) -> Result<Self> {
        fs::create_dir_all(&env.plugins_dir).with_context(|| {
            format!(
                "Failed to create plugins directory {}",
                env.plugins_dir.display()
            )
        })?;

        let log = LogFile::create(&env.plugins_dir)?.with_dispatch(env.diagnostics.clone());
        let log = Arc::new(log);
        log.line("Starting.");

        let resolver = install_resolver(env, &log);

        log.line("Loading config.");
        let mut config = PluginConfig::load(&env.plugins_dir, &log);

        let report = pipeline::load_all(&env.module_system, &mut config, &log);
        let mut error = report.has_errors();

        let config = Arc::new(config);
        let patcher = Patcher::new(LOADER_PATCH_ID, env.patches.clone());
        ScriptLoadPatch::new(config.clone(), env.host.clone(), log.clone()).install(&patcher);

        let link = linker::link(env, &report.modules, &log);
        if link == LinkOutcome::Failed {
            error = true;
        }
        let scan = if link.completed() {
            scanner::scan(env, &log)
        } else {
            ScanReport::default()
        };

        log.line("Finished startup.");
        log.flush();

        if error {
            env.notifier.show_error(NOTICE_TITLE, &notice_message(&config));
        }

        let summary = StartupSummary {
            linked: report.modules.names().into_iter().map(String::from).collect(),
            failed: report.failures.iter().map(|(id, _)| id.clone()).collect(),
            skipped: report.skipped,
            link,
            scan,
            error,
        };

        Ok(Self {
            log,
            config,
            resolver,
            patcher,
            summary,
            disposed: false,
        })
    }

    /// Plugin constructor exported by the loader module
    ///
    /// # Errors
    /// See [`Loader::new`]
    pub fn create(env: &PluginEnv) -> Result<Box<dyn Plugin>> {
        Ok(Box::new(Self::new(env)?))
    }

    #[must_use]
    pub fn config(&self) -> &Arc<PluginConfig> {
        &self.config
    }

    #[must_use]
    pub fn summary(&self) -> &StartupSummary {
        &self.summary
    }

    #[must_use]
    pub fn log_path(&self) -> Option<&Path> {
        self.log.path()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

/// Serve the patching library and the loader module to plugins that depend on them
fn install_resolver(env: &PluginEnv, log: &Arc<LogFile>) -> ResolverHook {
    let mut resolver = ResolverHook::new(env.module_system.clone(), log.clone());
    for name in [PATCH_LIBRARY_NAME, LOADER_MODULE_NAME] {
        match env.module_system.loaded(name) {
            Some(module) => resolver = resolver.with_target(name, module),
            None => log.line(format!("{name} is not loaded, requests for it will not resolve")),
        }
    }
    resolver.install();
    resolver
}

fn notice_message(config: &PluginConfig) -> String {
    let errored: Vec<&str> = config.errored_plugins().map(|p| p.id.as_str()).collect();
    if errored.is_empty() {
        NOTICE_MESSAGE.to_string()
    } else {
        format!("{NOTICE_MESSAGE}\nFailed: {}", errored.join(", "))
    }
}

impl Plugin for Loader {
    fn init(&mut self, _host: &dyn Any) {}

    fn update(&mut self) {}

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.resolver.uninstall();
        self.patcher.unpatch_all();
        self.log.line("Disposed.");
        self.log.close();
        self.disposed = true;
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("summary", &self.summary)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}
