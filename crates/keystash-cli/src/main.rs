mod cli;
mod commands;
mod config;
mod store;

use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use keystash_core::{storage::DocumentDriver, KeyStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand};

/// Sentinel user id probed by `keystash health`; never written.
const HEALTH_PROBE_USER: &str = "keystash/health-probe";

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Health => {
            let mut store = store::store_from_config(&config, cli.connection_string)?;
            run_health_check(&mut store).await?;
            println!("Storage: ok");
        }
        Command::Keys(cmd) => {
            let mut store = store::store_from_config(&config, cli.connection_string)?;
            let output = commands::handle(cmd, &mut store).await?;
            println!("{output}");
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("keystash {}", env!("CARGO_PKG_VERSION"));
}

/// Connect (which also ensures the `userId` index) and run one read against the collection.
async fn run_health_check<D: DocumentDriver>(store: &mut KeyStore<D>) -> Result<()> {
    store.connect().await.wrap_err("failed to connect to key store")?;
    let probe = store.data_exists(HEALTH_PROBE_USER).await;
    store.close().await;
    probe.wrap_err("key collection probe failed")?;
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
