use super::ui;
use crate::core::error::SyncError;
use crate::sync::SyncOrchestrator;
use anyhow::{Result, anyhow};
use rust_decimal::Decimal;

/// Sets the held quantity of a cached coin and waits until it is persisted.
pub async fn run(orchestrator: &SyncOrchestrator, id: &str, quantity: Decimal) -> Result<()> {
    let result = orchestrator.set_held_amount(id, quantity);
    // Flushes the background write before the process exits
    orchestrator.shutdown().await;

    let view = result.map_err(|e| match e {
        SyncError::NotFound(id) => anyhow!(
            "Unknown coin '{id}'. Run `coinpulse prices` to fill the cache and list coin ids"
        ),
        other => other.into(),
    })?;

    let value = view
        .coins
        .iter()
        .find(|coin| coin.id() == id)
        .and_then(|coin| {
            let symbol = coin.price_symbol(&view.currency_symbol);
            coin.holding_value().map(|v| ui::format_money(&symbol, v))
        })
        .unwrap_or_else(|| "N/A".to_string());

    println!(
        "Holding {} {}: {}",
        quantity.normalize(),
        id,
        ui::style_text(&value, ui::StyleType::TotalValue)
    );
    println!(
        "{} {}",
        ui::style_text("Portfolio total:", ui::StyleType::TotalLabel),
        ui::style_text(
            &ui::format_money(&view.currency_symbol, view.portfolio_total),
            ui::StyleType::TotalValue
        )
    );
    Ok(())
}
