use super::render;
use crate::sync::SyncOrchestrator;
use anyhow::Result;

/// Prints the held coins with their values and the portfolio total.
///
/// With `offline` set, values come from the cached prices only.
pub async fn run(orchestrator: &SyncOrchestrator, currency: &str, offline: bool) -> Result<()> {
    let view = if offline {
        let status = if orchestrator.store().is_empty() {
            "Offline: cache is empty"
        } else {
            "Offline: showing cached prices"
        };
        orchestrator.reload_from_cache(status)
    } else {
        orchestrator.request_refresh(currency).await;
        orchestrator.view()
    };

    println!("{}", render::render_holdings(&view));
    orchestrator.shutdown().await;
    Ok(())
}
