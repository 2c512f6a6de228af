//! Dual-sink loader log
//!
//! Every line goes to `loader.log` in the plugins directory and to the host's
//! diagnostic log. Lines are written through to the file as they are logged,
//! so the file is complete even when the host goes down right after.
//!
//! A log built inside a module must be given the host's dispatcher with
//! [`LogFile::with_dispatch`]: the module's own copy of `tracing` has no
//! subscriber installed.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{dispatcher, info, Dispatch};

/// File name of the durable log inside the plugins directory
pub const LOG_FILE_NAME: &str = "loader.log";

const DEFAULT_HOST_PREFIX: &str = "PluginLoader";

/// Process-wide loader log
pub struct LogFile {
    writer: Mutex<Option<LineWriter<File>>>,
    path: Option<PathBuf>,
    host_prefix: String,
    dispatch: Option<Dispatch>,
}

impl LogFile {
    /// Create `loader.log` in `dir`, truncating any previous run
    ///
    /// # Errors
    /// Returns an error if the file cannot be created
    pub fn create(dir: &Path) -> Result<Self> {
        let path = dir.join(LOG_FILE_NAME);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(Some(LineWriter::new(file))),
            path: Some(path),
            host_prefix: DEFAULT_HOST_PREFIX.to_string(),
            dispatch: None,
        })
    }

    /// A log that only writes to the host diagnostic log
    pub fn host_only(prefix: impl Into<String>) -> Self {
        Self {
            writer: Mutex::new(None),
            path: None,
            host_prefix: prefix.into(),
            dispatch: None,
        }
    }

    /// Send host log lines to `dispatch` instead of the caller's default
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Path of the durable sink, if there is one
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write one line to both sinks
    ///
    /// Durable format: `<timestamp> [<prefix>] <message>`, prefix omitted when `None`.
    pub fn write_line(&self, text: &str, prefix: Option<&str>) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        if let Some(writer) = self.writer().as_mut() {
            // Durable sink failures are ignored
            let _ = match prefix {
                Some(prefix) => writeln!(writer, "{timestamp} [{prefix}] {text}"),
                None => writeln!(writer, "{timestamp} {text}"),
            };
        }

        let host_prefix = prefix.unwrap_or(&self.host_prefix);
        match &self.dispatch {
            Some(dispatch) => dispatcher::with_default(dispatch, || {
                info!("[{}] {}", host_prefix, text);
            }),
            None => info!("[{}] {}", host_prefix, text),
        }
    }

    /// Write a line without a prefix
    pub fn line(&self, text: impl AsRef<str>) {
        self.write_line(text.as_ref(), None);
    }

    /// Flush the durable sink
    pub fn flush(&self) {
        if let Some(writer) = self.writer().as_mut() {
            let _ = writer.flush();
        }
    }

    /// Flush and close the durable sink; later writes only reach the host log
    pub fn close(&self) {
        if let Some(mut writer) = self.writer().take() {
            let _ = writer.flush();
        }
    }

    /// Whether the durable sink is still open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.writer().is_some()
    }

    fn writer(&self) -> MutexGuard<'_, Option<LineWriter<File>>> {
        self.writer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for LogFile {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("path", &self.path)
            .field("host_prefix", &self.host_prefix)
            .field("dispatch", &self.dispatch.is_some())
            .finish_non_exhaustive()
    }
}

/// Logger scoped to one plugin, handed to secondary entry points
#[derive(Debug, Clone)]
pub struct Logger {
    name: String,
    log: Arc<LogFile>,
}

impl Logger {
    pub fn new(name: impl Into<String>, log: Arc<LogFile>) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self, text: impl AsRef<str>) {
        self.log.write_line(text.as_ref(), Some(&self.name));
    }

    pub fn error(&self, text: impl AsRef<str>) {
        self.log
            .write_line(&format!("ERROR: {}", text.as_ref()), Some(&self.name));
    }
}
