//! vFlow trigger engine daemon
//!
//! Reads platform events as JSON lines on stdin, runs them through the
//! trigger handlers and prints every workflow execution as a JSON line on
//! stdout. Logs go to stderr.

mod bridge;
mod executor;

use anyhow::{Context as _, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vf_config::{load_config, EngineConfig, VflowConfig};
use vf_core::MemoryWorkflowStore;
use vf_event_bus::EventBus;
use vf_subscription::{Fetch, HttpFetcher, OfflineFetcher};
use vf_triggers::{
    ForegroundSlot, JsonFileGeofenceState, ScreenSlot, TriggerEngine, TriggerRegistry, TriggerServices,
};

use crate::bridge::Bridge;
use crate::executor::LoggingExecutor;

#[derive(Debug, Parser)]
#[command(name = "vflowd", version, about = "vFlow trigger engine")]
struct Args {
    /// Directory holding the configuration, secrets and relative paths
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Configuration file inside the config directory
    #[arg(long, default_value = "vflow.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config_dir, &args.config)
        .with_context(|| format!("loading {}", args.config_dir.join(&args.config).display()))?;

    init_tracing(&config.engine)?;
    info!(workflows = config.workflows.len(), "Starting vFlow");

    let VflowConfig { mut engine, workflows } = config;
    anchor_paths(&mut engine, &args.config_dir);

    let bus = Arc::new(EventBus::new());
    let store = Arc::new(MemoryWorkflowStore::with_workflows(workflows));
    let screen = Arc::new(ScreenSlot::new());
    let foreground = Arc::new(ForegroundSlot::new());

    let fetcher: Arc<dyn Fetch> = match HttpFetcher::new(engine.subscription.request_timeout()) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            warn!(error = %e, "HTTP client unavailable, subscriptions load from cache only");
            Arc::new(OfflineFetcher)
        }
    };

    let state_file = engine.geofence.state_file.clone();
    let mut services = TriggerServices::new(bus.clone(), Arc::new(LoggingExecutor), engine)
        .with_screen(screen.clone())
        .with_foreground(foreground.clone())
        .with_fetcher(fetcher);
    if let Some(path) = state_file {
        let state = JsonFileGeofenceState::open(&path)
            .with_context(|| format!("opening geofence state {}", path.display()))?;
        services = services.with_geofence_state(Arc::new(state));
    }

    let engine = TriggerEngine::new(store, &TriggerRegistry::with_defaults(), &services);
    engine.start().await;
    info!("vFlow is running");

    let bridge = Bridge::new(bus, screen, foreground);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        bridge.handle_line(&line);
                    }
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read input");
                        break;
                    }
                }
            }
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                break;
            }
        }
    }

    info!("Shutting down...");
    engine.stop().await;

    Ok(())
}

/// Log to stderr; `RUST_LOG` wins over the configured default level
fn init_tracing(engine: &EngineConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&engine.logger.default))
        .context("invalid log filter")?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Resolve relative cache and state paths against the config directory
fn anchor_paths(engine: &mut EngineConfig, config_dir: &Path) {
    if engine.subscription.cache_dir.is_relative() {
        engine.subscription.cache_dir = config_dir.join(&engine.subscription.cache_dir);
    }
    if let Some(path) = engine.geofence.state_file.as_mut() {
        if path.is_relative() {
            *path = config_dir.join(&*path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_paths() {
        let mut engine = EngineConfig::default();
        engine.subscription.cache_dir = PathBuf::from("cache");
        engine.geofence.state_file = Some(PathBuf::from("/var/lib/vflow/fences.json"));

        anchor_paths(&mut engine, Path::new("/etc/vflow"));

        assert_eq!(engine.subscription.cache_dir, PathBuf::from("/etc/vflow/cache"));
        assert_eq!(
            engine.geofence.state_file,
            Some(PathBuf::from("/var/lib/vflow/fences.json"))
        );
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["vflowd"]);
        assert_eq!(args.config_dir, PathBuf::from("."));
        assert_eq!(args.config, PathBuf::from("vflow.yaml"));
    }

    #[test]
    fn test_loads_config_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("vflow.yaml"),
            "workflows:\n  - id: calls\n    trigger_config:\n      type: vflow.trigger.call\n",
        )
        .unwrap();

        let config = load_config(dir.path(), "vflow.yaml").unwrap();
        assert_eq!(config.workflows.len(), 1);
        assert_eq!(config.workflows[0].id, "calls");
    }
}
