pub mod cli;
pub mod clients;
pub mod config;
pub mod db;
pub mod domain;
pub mod entities;
pub mod services;
pub mod state;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, cmd_check, cmd_leads, cmd_scrape, cmd_search, cmd_status};
pub use config::Config;
use state::SharedState;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Init)) {
        if Config::create_default_if_missing()? {
            println!("✓ Config file created. Edit config.toml and run again.");
        } else {
            println!("config.toml already exists.");
        }
        return Ok(());
    }

    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    config.apply_env()?;
    config.validate()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        if let Some(port) = config.observability.metrics_port {
            // Spawns the scrape endpoint on the current runtime.
            builder
                .with_http_listener(([0, 0, 0, 0], port))
                .install()
                .context("Failed to install Prometheus exporter")?;
            None
        } else {
            Some(
                builder
                    .install_recorder()
                    .context("Failed to install Prometheus recorder")?,
            )
        }
    } else {
        None
    };

    init_tracing(&config)?;

    match cli.command {
        Some(Commands::Daemon) => run_daemon(config, prometheus_handle).await,
        Some(Commands::Check) => cmd_check(&config).await,
        Some(Commands::Scrape { id }) => cmd_scrape(&config, &id).await,
        Some(Commands::Status { id }) => cmd_status(&config, &id).await,
        Some(Commands::Search { command }) => cmd_search(&config, command).await,
        Some(Commands::Leads { id, limit }) => cmd_leads(&config, &id, limit).await,
        Some(Commands::Init) => Ok(()),
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder().label("app", "leadharvest")?;
        for (key, value) in &config.observability.loki_labels {
            if key != "app" {
                builder = builder.label(key.as_str(), value.as_str())?;
            }
        }
        let (layer, task) = builder
            .extra_field("version", env!("CARGO_PKG_VERSION"))?
            .build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    Ok(())
}

async fn run_daemon(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        "leadharvest v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let state = SharedState::new(config).await?;
    state.store.ping().await?;

    let scheduler = state.scheduler.clone();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!("Scheduler error: {}", e);
        }
    });

    if let Some(port) = state.config.observability.metrics_port {
        info!(port, "Prometheus exporter listening");
    }

    info!("Daemon running. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!("Error listening for shutdown: {}", e);
        }
    }

    state.scheduler.stop().await;
    scheduler_handle.abort();

    if let Some(handle) = prometheus_handle {
        debug!("Final metrics:\n{}", handle.render());
    }

    let summary = state.metrics.summary(24);
    info!(
        runs = summary.total_runs,
        items = summary.total_items_fetched,
        errors = summary.total_errors,
        "Daemon stopped"
    );

    Ok(())
}
