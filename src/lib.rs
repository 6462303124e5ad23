pub mod cli;
pub mod core;
pub mod providers;
pub mod store;
pub mod sync;

use crate::core::config::AppConfig;
use crate::core::sink::{NullSink, PresentationSink};
use crate::providers::CoinGeckoProvider;
use crate::store::CoinStore;
use crate::sync::{SyncOrchestrator, SyncSettings};
use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Prices {
        currency: Option<String>,
        search: Option<String>,
    },
    Portfolio {
        currency: Option<String>,
        offline: bool,
    },
    Hold {
        id: String,
        quantity: Decimal,
    },
    Watch {
        currency: Option<String>,
        search: Option<String>,
    },
}

fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    if let Some(path) = config_path {
        return AppConfig::load_from_path(path);
    }
    let path = AppConfig::default_config_path()?;
    if path.exists() {
        AppConfig::load_from_path(&path)
    } else {
        debug!("No config at {}, using defaults", path.display());
        Ok(AppConfig::default())
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("coinpulse starting...");

    let config = load_config(config_path)?;
    debug!("Loaded config: {config:#?}");

    let currency = match &command {
        AppCommand::Prices { currency, .. }
        | AppCommand::Portfolio { currency, .. }
        | AppCommand::Watch { currency, .. } => currency.clone(),
        AppCommand::Hold { .. } => None,
    }
    .unwrap_or_else(|| config.currency.clone());

    let source = Arc::new(CoinGeckoProvider::new(&config.providers.coingecko)?);
    let store = Arc::new(CoinStore::open_default(&config).await);
    let sink: Arc<dyn PresentationSink> = match &command {
        AppCommand::Watch { .. } => Arc::new(cli::render::TerminalSink::live()),
        AppCommand::Hold { .. } => Arc::new(NullSink),
        _ => Arc::new(cli::render::TerminalSink::quiet()),
    };
    let orchestrator = SyncOrchestrator::new(
        source,
        store,
        sink,
        &currency,
        SyncSettings::from(&config.refresh),
    );

    match command {
        AppCommand::Prices { search, .. } => {
            cli::prices::run(&orchestrator, &currency, search.as_deref()).await
        }
        AppCommand::Portfolio { offline, .. } => {
            cli::portfolio::run(&orchestrator, &currency, offline).await
        }
        AppCommand::Hold { id, quantity } => cli::hold::run(&orchestrator, &id, quantity).await,
        AppCommand::Watch { search, .. } => {
            cli::watch::run(orchestrator, config.refresh.auto, search.as_deref()).await
        }
    }
}
