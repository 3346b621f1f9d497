use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cdc_pg::{HistoryWriter, SlotAdapter, SlotConfig};
use cdc_state::SqliteStateStore;
use tracing_subscriber::EnvFilter;

use cdc_controller::actor::{self, ControllerDeps};
use cdc_controller::cli::{Cli, Command};
use cdc_controller::config::Config;
use cdc_controller::env;
use cdc_controller::http;
use cdc_controller::notifier::LoggingNotifier;

#[tokio::main]
async fn main() -> Result<()> {
    env::load_dotenv_from_ancestors();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config).with_context(|| format!("loading config from {}", cli.config))?;

    let slot_adapter = Arc::new(SlotAdapter::new(SlotConfig {
        connection_string: config.connection_string.clone(),
        slot_name: config.slot.clone(),
    }));
    let history = Arc::new(HistoryWriter::new(config.connection_string.clone()));
    let state = Arc::new(
        SqliteStateStore::open(&config.state_db_path)
            .with_context(|| format!("opening state db at {}", config.state_db_path))?,
    );
    let notifier = Arc::new(LoggingNotifier);

    let deps = ControllerDeps {
        slot: slot_adapter.clone(),
        status_slot: slot_adapter,
        history: history.clone(),
        state: state.clone(),
        registry: state,
        notifier,
        config: config.clone(),
    };

    match cli.command {
        Command::Run => {
            history.ensure_schema().await.context("ensuring change_history schema")?;
            let handle = actor::spawn(deps);
            handle.init().await.map_err(anyhow::Error::msg).context("initializing replication slot")?;

            let app = http::router(handle);
            let listener = tokio::net::TcpListener::bind(&config.admin_bind_addr)
                .await
                .with_context(|| format!("binding admin surface on {}", config.admin_bind_addr))?;
            tracing::info!(addr = %config.admin_bind_addr, "admin surface listening");
            axum::serve(listener, app).await.context("admin surface exited")?;
        }

        Command::Status => {
            let handle = actor::spawn(deps);
            let result = handle.status().await.map_err(anyhow::Error::msg)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            handle.shutdown().await;
        }

        Command::Init => {
            let handle = actor::spawn(deps);
            let result = handle.init().await.map_err(anyhow::Error::msg)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            handle.shutdown().await;
        }

        Command::Verify => {
            let handle = actor::spawn(deps);
            let result = handle.verify().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            handle.shutdown().await;
            if !result.ok {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
