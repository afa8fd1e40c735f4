//! Modhost Server: long-running host for runtime-loadable plugins.
//!
//! Main entry point that wires configuration, logging and the plugin
//! manager together, then waits for a shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use modhost_core::config::AppConfig;
use modhost_core::error::AppError;
use modhost_plugin::{
    EntryPointResolver, HostEnvironment, LifecycleSettings, LoadOutcome, PluginManager,
};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from `config/` and the environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("MODHOST_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Modhost v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Plugin manager ───────────────────────────────────
    let host = HostEnvironment::from_config(&config.host)?;
    tracing::info!(
        "Host version {} (setup mode: {})",
        host.version(),
        host.is_setup_mode()
    );
    let manager = PluginManager::builder(LifecycleSettings::from_config(&config.plugins))
        .host(host)
        .resolver(build_resolver())
        .build()?;
    let manager = Arc::new(manager);
    manager.start().await?;

    // ── Step 2: Initial load pass ────────────────────────────────
    if config.plugins.auto_load {
        load_installed(&manager).await?;
    }
    manager.notify_monitor_cycle_complete().await;
    tracing::info!(
        "Modhost ready with {} plugin(s)",
        manager.list_plugins().await.len()
    );

    // ── Step 3: Graceful shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, unloading plugins...");
    manager.shutdown().await;

    tracing::info!("Modhost shut down cleanly");
    Ok(())
}

/// Resolver for plugin entry points
#[cfg(feature = "dynamic")]
fn build_resolver() -> Arc<dyn EntryPointResolver> {
    Arc::new(modhost_plugin::resolver::DynamicLibraryResolver::new())
}

/// Resolver for plugin entry points
#[cfg(not(feature = "dynamic"))]
fn build_resolver() -> Arc<dyn EntryPointResolver> {
    Arc::new(modhost_plugin::FactoryResolver::new())
}

/// Load every plugin directory in the install root.
///
/// Passes repeat while they make progress, so children declared before
/// their parents still load.
async fn load_installed(manager: &PluginManager) -> Result<(), AppError> {
    let mut pending = plugin_directories(manager).await?;
    tracing::info!("Found {} plugin directory(ies)", pending.len());

    loop {
        let mut deferred = Vec::new();
        let before = pending.len();
        for path in pending {
            match manager.load(&path).await {
                LoadOutcome::Success => {}
                LoadOutcome::PermanentFailure => {}
                LoadOutcome::TransientFailure => deferred.push(path),
            }
        }
        if deferred.is_empty() || deferred.len() == before {
            if !deferred.is_empty() {
                tracing::warn!("{} plugin(s) could not be loaded", deferred.len());
            }
            return Ok(());
        }
        pending = deferred;
    }
}

/// Subdirectories of the install root, sorted by name
async fn plugin_directories(manager: &PluginManager) -> Result<Vec<PathBuf>, AppError> {
    let mut entries = tokio::fs::read_dir(manager.plugins_directory()).await?;
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
