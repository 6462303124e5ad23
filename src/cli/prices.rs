use super::render;
use crate::sync::SyncOrchestrator;
use anyhow::Result;
use tracing::debug;

/// Refreshes once and prints the market table.
pub async fn run(
    orchestrator: &SyncOrchestrator,
    currency: &str,
    search: Option<&str>,
) -> Result<()> {
    let outcome = orchestrator.request_refresh(currency).await;
    debug!(?outcome, "Refresh finished");

    let view = match search {
        Some(text) => orchestrator.set_search_text(text),
        None => orchestrator.view(),
    };
    println!("{}", render::render_view(&view));

    orchestrator.shutdown().await;
    Ok(())
}
