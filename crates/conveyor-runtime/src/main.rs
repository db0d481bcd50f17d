use clap::Parser;
use tracing::info;

mod app;

/// Buffered delivery queue and job scheduler host.
#[derive(Debug, Parser)]
#[command(name = "conveyor", version, about)]
struct Cli {
    /// Path to conveyor.toml (falls back to CONVEYOR_CONFIG, then ~/.conveyor/conveyor.toml).
    #[arg(long)]
    config: Option<String>,

    /// Register sample jobs that feed the queue and log what they produce.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "conveyor_runtime=info,conveyor_core=info,conveyor_queue=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > CONVEYOR_CONFIG env > ~/.conveyor/conveyor.toml
    let config_path = cli.config.or_else(|| std::env::var("CONVEYOR_CONFIG").ok());
    let config = conveyor_core::config::ConveyorConfig::load(config_path.as_deref())?;

    let mut app = app::App::build(config)?;
    if cli.demo {
        app.register_demo_jobs()?;
        app.spawn_consumer();
        info!("demo jobs registered");
    }

    info!(
        queue = %app.config.queue.name,
        jobs = app.scheduler().len(),
        "conveyor running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    app.shutdown().await
}
