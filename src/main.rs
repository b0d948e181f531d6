use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use assembly_captions::{
    config::Config,
    database::Database,
    dictionary::Dictionary,
    hub::SubscriberHub,
    refiner::CaptionRefiner,
    spacing::SpacingEngine,
    status::StatusService,
    stt::{LiveCaptionService, WorkerContext},
    supervisor::AutoSttSupervisor,
    vod::VodSttService,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "assembly-captions")]
#[command(version = "0.1.0")]
#[command(about = "Real-time and VOD caption engine for assembly live streams")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("assembly_captions={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting assembly captions service v{}",
        env!("CARGO_PKG_VERSION")
    );

    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!("Using database: {}", config.database.url);
    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and schema applied");

    let dictionary = Arc::new(Dictionary::with_parliament_defaults());
    let spacing = SpacingEngine::load(&config.spacing);
    let hub = SubscriberHub::new();
    let status = StatusService::new(config.status.clone())?;

    let refiner = CaptionRefiner::spawn(config.refiner.clone(), hub.clone());
    let stt = LiveCaptionService::new(WorkerContext {
        hub: hub.clone(),
        dictionary: dictionary.clone(),
        spacing,
        refiner: refiner.as_ref().map(|r| r.handle()),
        asr: config.asr.clone(),
        stt: config.stt.clone(),
    });

    let vod = VodSttService::new(
        Arc::new(database.clone()),
        dictionary.clone(),
        config.asr.clone(),
    );

    let supervisor = AutoSttSupervisor::new(
        status.clone(),
        stt.clone(),
        config.asr_enabled(),
        config.stt.auto_start,
    );
    supervisor.start().await;
    info!("Startup complete (auto_stt enabled={})", supervisor.enabled());

    let web_server = WebServer::new(AppState {
        config,
        status,
        stt,
        hub,
        vod,
        supervisor: supervisor.clone(),
    })?;

    let server = tokio::spawn(web_server.serve());

    // A server that exits on its own (e.g. the port is taken) is fatal;
    // otherwise run until the shutdown signal.
    let result = tokio::select! {
        r = server => r.map_err(anyhow::Error::from).and_then(|inner| inner),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    supervisor.shutdown().await;
    if let Some(refiner) = &refiner {
        refiner.shutdown();
    }
    info!("Shutdown complete");
    result
}
