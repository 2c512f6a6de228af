use anyhow::{Context, Result};
use clap::Parser;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use plugin_loader::bootstrap::{self, Bootstrap};
use plugin_loader::host::native::SessionMod;
use plugin_loader::host::{NativeHost, StderrNotifier};
use plugin_loader::patch::PatchRegistry;
use plugin_loader::plugins::{LibraryBackend, ModuleSystem};
use plugin_loader::{Plugin, PluginEnv};

/// Plugin Loader - runs the plugin bootstrap inside a minimal native host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Plugins directory holding config.yaml [default: <loader dir>/Plugins]
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Directory holding the patching library and the loader module
    /// [default: directory of this executable]
    #[arg(long)]
    loader_dir: Option<PathBuf>,

    /// Directory the host searches for modules by name (repeatable)
    #[arg(long = "probe-dir")]
    probe_dirs: Vec<PathBuf>,

    /// Mod in the simulated session, as ID or ID=PATH (repeatable)
    #[arg(long = "session-mod", value_parser = parse_session_mod)]
    session_mods: Vec<SessionMod>,

    /// Number of host ticks to run before the session loads
    #[arg(long, default_value_t = 1)]
    ticks: u32,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn parse_session_mod(value: &str) -> Result<SessionMod, String> {
    let (id, location) = match value.split_once('=') {
        Some((id, path)) => (id, PathBuf::from(path)),
        None => (value, PathBuf::new()),
    };
    let workshop_id = id
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid mod id `{id}`: {e}"))?;
    Ok(SessionMod {
        workshop_id,
        location,
    })
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Log to stderr so stdout stays free for the host
    let log_level = if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;

    let module_dir = match args.loader_dir {
        Some(dir) => dir,
        None => bootstrap::module_directory().context("Failed to locate the loader directory")?,
    };
    let plugins_dir = args.dir.unwrap_or_else(|| module_dir.join("Plugins"));

    let module_system = args
        .probe_dirs
        .into_iter()
        .fold(ModuleSystem::new(LibraryBackend::new()), |ms, dir| {
            ms.with_probe_dir(dir)
        });

    let patches = Arc::new(PatchRegistry::new());
    let host = Arc::new(NativeHost::new(patches.clone()));
    let env = PluginEnv {
        module_dir,
        plugins_dir,
        module_system: Arc::new(module_system),
        host: host.clone(),
        patches,
        notifier: Arc::new(StderrNotifier),
        diagnostics: tracing::dispatcher::get_default(tracing::Dispatch::clone),
    };
    info!(
        "Starting host with loader modules from {}",
        env.module_dir.display()
    );

    let mut stub = Bootstrap::new(&env);
    let host_instance: &dyn Any = &*host;
    stub.init(host_instance);
    host.init_all(host_instance);

    for _ in 0..args.ticks {
        stub.update();
        host.update_all();
    }

    match host.load_session(Some(args.session_mods)) {
        Ok(scripts) => info!("Scripts loaded for mods {:?}", scripts.loaded_ids()),
        Err(e) => error!("Session failed to load: {:#}", e),
    }

    host.dispose_all();
    stub.dispose();
    Ok(())
}
