use bosun_core::{
    install_signal_handler, register_catalog_configurators, BosunConfig, CancelToken, Catalog,
    ConfiguratorRegistry, FileCatalog, Orchestrator,
};
use bosun_runtime::EngineClient;
use bosun_server::AppServer;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "bosun-server",
    version,
    about = "Serve the bosun app API and event stream"
)]
struct Cli {
    /// Path to the bosun configuration file [env: BOSUN_CONFIG].
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the state directory from the configuration file.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Listen address, overriding `[server] listen`.
    #[arg(long)]
    listen: Option<String>,
}

fn build_orchestrator(config: BosunConfig) -> Result<Orchestrator, String> {
    let catalog = FileCatalog::load(&config.catalog_dir).map_err(|e| e.to_string())?;
    let cancel = CancelToken::new();
    let registry = ConfiguratorRegistry::new();
    let registered = register_catalog_configurators(&registry, &catalog, &cancel);
    info!("{} catalog app(s), {registered} configurator(s)", catalog.list().len());

    let engine_socket = config.engine_socket.clone();
    let mut orch =
        Orchestrator::new(config, Arc::new(catalog), Arc::new(registry)).with_cancel(cancel);
    if engine_socket.exists() {
        let engine = EngineClient::new(&engine_socket).map_err(|e| e.to_string())?;
        orch = orch.with_runtime(Arc::new(engine));
    } else {
        info!("no container engine at {}", engine_socket.display());
    }
    Ok(orch)
}

fn run(cli: Cli) -> Result<(), String> {
    let path = BosunConfig::resolve_path(cli.config.as_deref());
    let mut config = BosunConfig::load(&path).map_err(|e| e.to_string())?;
    if let Some(dir) = cli.state_dir {
        config = config.with_state_dir(dir);
    }
    let listen = cli.listen.unwrap_or_else(|| config.server.listen.clone());
    let interval = Duration::from_secs(config.server.metrics_interval_secs.max(1));
    info!("state directory: {}", config.state_dir.display());

    let orchestrator = build_orchestrator(config)?;
    let server = AppServer::bind(&listen, orchestrator, interval).map_err(|e| e.to_string())?;
    info!("starting bosun-server on {listen}");
    server.run();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BOSUN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    install_signal_handler();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            error!("{msg}");
            ExitCode::FAILURE
        }
    }
}
