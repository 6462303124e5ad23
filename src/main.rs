use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use coinpulse::cli::setup::{setup, setup_at_path};
use coinpulse::core::log::init_logging;
use rust_decimal::Decimal;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for coinpulse::AppCommand {
    fn from(cmd: Commands) -> coinpulse::AppCommand {
        match cmd {
            Commands::Prices { currency, search } => {
                coinpulse::AppCommand::Prices { currency, search }
            }
            Commands::Portfolio { currency, offline } => {
                coinpulse::AppCommand::Portfolio { currency, offline }
            }
            Commands::Hold { id, quantity } => coinpulse::AppCommand::Hold { id, quantity },
            Commands::Watch { currency, search } => {
                coinpulse::AppCommand::Watch { currency, search }
            }
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch and display the top coins by market cap
    Prices {
        /// Quote currency, e.g. usd or eur
        #[arg(long)]
        currency: Option<String>,
        /// Only show coins whose name or symbol contains this text
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Display held coins and the portfolio total
    Portfolio {
        #[arg(long)]
        currency: Option<String>,
        /// Use cached prices without contacting the network
        #[arg(long)]
        offline: bool,
    },
    /// Set the held quantity of a coin, e.g. `hold bitcoin 0.5`
    Hold {
        /// Coin id as listed by CoinGecko
        id: String,
        quantity: Decimal,
    },
    /// Keep prices fresh and accept interactive commands
    Watch {
        #[arg(long)]
        currency: Option<String>,
        #[arg(short, long)]
        search: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => setup_at_path(path),
            None => setup(),
        },
        Some(cmd) => coinpulse::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
