use super::ui;
use crate::sync::SyncOrchestrator;
use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

const HELP: &str = "\
Commands:
  <text> or /search <text>   filter coins by name or symbol (empty clears)
  /currency <code>           switch the quote currency, e.g. /currency eur
  /hold <coin-id> <qty>      set how much of a coin you hold
  /refresh                   fetch fresh prices now
  /auto on|off               toggle periodic refresh
  /help                      show this help
  /quit                      exit (Ctrl-C works too)";

#[derive(Debug, Clone, PartialEq)]
pub enum WatchCommand {
    Search(String),
    Currency(String),
    Hold { id: String, quantity: Decimal },
    Refresh,
    Auto(bool),
    Help,
    Quit,
}

/// Parses one line typed at the watch prompt. Plain text is a search.
pub fn parse_command(line: &str) -> Result<WatchCommand> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(WatchCommand::Search(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default().to_lowercase();
    let args: Vec<&str> = parts.collect();

    let command = match (name.as_str(), args.as_slice()) {
        ("search" | "s", args) => WatchCommand::Search(args.join(" ")),
        ("currency" | "c", [code]) => WatchCommand::Currency(code.to_string()),
        ("currency" | "c", _) => bail!("Usage: /currency <code>"),
        ("hold" | "h", [id, quantity]) => WatchCommand::Hold {
            id: id.to_string(),
            quantity: Decimal::from_str(quantity)
                .with_context(|| format!("Invalid quantity: {quantity}"))?,
        },
        ("hold" | "h", _) => bail!("Usage: /hold <coin-id> <quantity>"),
        ("refresh" | "r", _) => WatchCommand::Refresh,
        ("auto", ["on"]) => WatchCommand::Auto(true),
        ("auto", ["off"]) => WatchCommand::Auto(false),
        ("auto", _) => bail!("Usage: /auto on|off"),
        ("help" | "?", _) => WatchCommand::Help,
        ("quit" | "q" | "exit", _) => WatchCommand::Quit,
        (other, _) => bail!("Unknown command: /{other}. Type /help for a list"),
    };
    Ok(command)
}

fn spawn_refresh(orchestrator: &SyncOrchestrator) {
    let orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        let currency = orchestrator.selected_currency();
        orchestrator.request_refresh(&currency).await;
    });
}

fn apply(orchestrator: &SyncOrchestrator, command: WatchCommand) {
    match command {
        WatchCommand::Search(text) => {
            orchestrator.set_search_text(&text);
        }
        WatchCommand::Currency(code) => orchestrator.set_currency(&code),
        WatchCommand::Hold { id, quantity } => {
            if let Err(e) = orchestrator.set_held_amount(&id, quantity) {
                eprintln!("{}", ui::style_text(&e.to_string(), ui::StyleType::Error));
            }
        }
        WatchCommand::Refresh => spawn_refresh(orchestrator),
        WatchCommand::Auto(enabled) => {
            orchestrator.set_auto_refresh(enabled);
            let state = if enabled { "on" } else { "off" };
            println!("Auto refresh {state}");
        }
        WatchCommand::Help => println!("{HELP}"),
        WatchCommand::Quit => {}
    }
}

/// Runs the interactive loop until `/quit`, end of input or Ctrl-C.
pub async fn run(
    orchestrator: SyncOrchestrator,
    auto_refresh: bool,
    search: Option<&str>,
) -> Result<()> {
    println!("{HELP}");
    if let Some(text) = search {
        orchestrator.set_search_text(text);
    }
    spawn_refresh(&orchestrator);
    orchestrator.set_auto_refresh(auto_refresh);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => line.context("Failed to read from stdin")?,
        };
        let Some(line) = line else {
            debug!("End of input");
            break;
        };

        match parse_command(&line) {
            Ok(WatchCommand::Quit) => break,
            Ok(command) => apply(&orchestrator, command),
            Err(e) => eprintln!("{}", ui::style_text(&e.to_string(), ui::StyleType::Error)),
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
