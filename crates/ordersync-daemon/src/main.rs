use clap::Parser;
use ordersync_core::config::OrderSyncConfig;

mod app;
mod cli;
mod commands;
mod sink;
mod source;
mod target;

const DEFAULT_LOG_FILTER: &str = "ordersync_daemon=info,ordersync_scheduler=info,ordersync_runner=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries command output; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    // load config: explicit path > ORDERSYNC_CONFIG env > ~/.ordersync/ordersync.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("ORDERSYNC_CONFIG").ok());
    let config = OrderSyncConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        OrderSyncConfig::default()
    });

    let app = app::App::build(&config, cli.dry_run)?;
    commands::dispatch(&app, cli.command).await
}
