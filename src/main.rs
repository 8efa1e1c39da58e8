use anyhow::Result;
use clap::Parser;
use mixtap::{
    AppState, CaptureController, Config, DeviceBackendFactory, HttpSessionClient, NullMonitorSink,
    TabRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "mixtap", about = "Dual-source audio capture and analysis pipeline")]
struct Cli {
    /// Path to the configuration file (without extension)
    #[arg(long, default_value = "config/mixtap")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("mixtap v0.1.0");
    info!("Loaded config: {}", cfg.service.name);
    info!("Analysis backend: {}", cfg.backend.base_url);

    let backend = Arc::new(HttpSessionClient::new(
        &cfg.backend.base_url,
        Duration::from_secs(cfg.backend.request_timeout_secs),
    )?);

    let factory = Arc::new(DeviceBackendFactory {
        sample_rate: cfg.audio.sample_rate,
        ..DeviceBackendFactory::default()
    });

    let tabs = Arc::new(TabRegistry::new());
    let controller = Arc::new(CaptureController::new(
        cfg.session_config(),
        backend,
        factory,
        Arc::clone(&tabs),
        Arc::new(NullMonitorSink),
    ));
    let _tab_watcher = controller.watch_tabs();

    let router = mixtap::create_router(AppState::new(controller, tabs));
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Control API listening on {}", addr);

    axum::serve(listener, router).await?;

    Ok(())
}
