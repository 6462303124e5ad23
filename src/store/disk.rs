use crate::core::coin::{CachedCoin, CoinSnapshot, HeldPosition};
use crate::store::{BatchWrite, CoinBackend, MarketBatch};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const MARKETS_PARTITION: &str = "markets";
const HOLDINGS_PARTITION: &str = "holdings";

#[derive(Serialize, Deserialize)]
struct MarketEntry {
    market: CoinSnapshot,
    /// Missing on rows written before quote currencies were recorded.
    #[serde(default)]
    currency: Option<String>,
    fetched_at: DateTime<Utc>,
}

/// Coin cache persisted in a fjall keyspace.
///
/// Market rows and holdings live in separate partitions, both keyed by coin id.
pub struct DiskBackend {
    keyspace: Keyspace,
    markets: PartitionHandle,
    holdings: PartitionHandle,
}

impl DiskBackend {
    pub fn new(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create cache directory: {}", path.display()))?;

        let keyspace = fjall::Config::new(path)
            .open()
            .with_context(|| format!("Failed to open cache at {}", path.display()))?;
        let markets =
            keyspace.open_partition(MARKETS_PARTITION, PartitionCreateOptions::default())?;
        let holdings =
            keyspace.open_partition(HOLDINGS_PARTITION, PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            markets,
            holdings,
        })
    }

    fn read_holding(&self, id: &[u8]) -> Result<HeldPosition> {
        match self.holdings.get(id)? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Ok(HeldPosition::default()),
        }
    }
}

#[async_trait]
impl CoinBackend for DiskBackend {
    async fn load(&self) -> Result<Vec<CachedCoin>> {
        let mut coins = Vec::new();
        for item in self.markets.iter() {
            let (key, value) = item?;
            let entry: MarketEntry = match serde_json::from_slice(&value) {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable market row");
                    continue;
                }
            };
            coins.push(CachedCoin {
                held: self.read_holding(&key)?,
                market: entry.market,
                quote_currency: entry.currency,
                fetched_at: Some(entry.fetched_at),
            });
        }
        debug!("Disk LOAD of {} coins", coins.len());
        Ok(coins)
    }

    async fn write_markets(
        &self,
        batch: &MarketBatch<'_>,
        cancel: &CancellationToken,
    ) -> Result<BatchWrite> {
        // Serialize everything up front so a bad row discards the whole batch
        let rows = batch
            .snapshots
            .iter()
            .map(|market| {
                let entry = MarketEntry {
                    market: market.clone(),
                    currency: Some(batch.currency.to_string()),
                    fetched_at: batch.fetched_at,
                };
                Ok((market.id.clone(), serde_json::to_vec(&entry)?))
            })
            .collect::<Result<Vec<(String, Vec<u8>)>>>()?;

        let keyspace = self.keyspace.clone();
        let markets = self.markets.clone();
        let cancel = cancel.clone();
        let count = rows.len();
        let written = tokio::task::spawn_blocking(move || -> Result<BatchWrite> {
            let mut batch = keyspace.batch();
            for (id, value) in rows {
                batch.insert(&markets, id.as_bytes(), value);
            }
            if cancel.is_cancelled() {
                return Ok(BatchWrite::Skipped);
            }
            batch.commit()?;
            keyspace.persist(PersistMode::SyncAll)?;
            Ok(BatchWrite::Committed)
        })
        .await
        .context("Cache write task failed")??;

        match written {
            BatchWrite::Committed => debug!("Disk PUT of {} market rows", count),
            BatchWrite::Skipped => debug!("Disk PUT of {} market rows skipped", count),
        }
        Ok(written)
    }

    async fn write_holding(&self, id: &str, held: HeldPosition) -> Result<()> {
        let value = serde_json::to_vec(&held)?;
        let keyspace = self.keyspace.clone();
        let holdings = self.holdings.clone();
        let key = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            holdings.insert(key.as_bytes(), value)?;
            keyspace.persist(PersistMode::SyncAll)?;
            Ok(())
        })
        .await
        .context("Holding write task failed")??;
        Ok(())
    }
}
