use crate::core::coin::{CachedCoin, CoinSnapshot, HeldPosition};
use crate::store::{BatchWrite, CoinBackend, MarketBatch};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct MarketRow {
    market: CoinSnapshot,
    currency: String,
    fetched_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    markets: HashMap<String, MarketRow>,
    holdings: HashMap<String, HeldPosition>,
}

/// Backend that keeps everything in process memory. Nothing survives a restart.
pub struct MemoryBackend {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Tables::default())),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoinBackend for MemoryBackend {
    async fn load(&self) -> Result<Vec<CachedCoin>> {
        let tables = self.inner.lock().await;
        Ok(tables
            .markets
            .iter()
            .map(|(id, row)| CachedCoin {
                market: row.market.clone(),
                held: tables.holdings.get(id).copied().unwrap_or_default(),
                quote_currency: Some(row.currency.clone()),
                fetched_at: Some(row.fetched_at),
            })
            .collect())
    }

    async fn write_markets(
        &self,
        batch: &MarketBatch<'_>,
        cancel: &CancellationToken,
    ) -> Result<BatchWrite> {
        let mut tables = self.inner.lock().await;
        if cancel.is_cancelled() {
            return Ok(BatchWrite::Skipped);
        }
        for snapshot in batch.snapshots {
            let row = MarketRow {
                market: snapshot.clone(),
                currency: batch.currency.to_string(),
                fetched_at: batch.fetched_at,
            };
            tables.markets.insert(snapshot.id.clone(), row);
        }
        debug!("Memory PUT of {} market rows", batch.snapshots.len());
        Ok(BatchWrite::Committed)
    }

    async fn write_holding(&self, id: &str, held: HeldPosition) -> Result<()> {
        let mut tables = self.inner.lock().await;
        tables.holdings.insert(id.to_string(), held);
        Ok(())
    }
}
