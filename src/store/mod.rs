pub mod disk;
pub mod memory;

use crate::core::coin::{CachedCoin, CoinSnapshot, HeldPosition};
use crate::core::config::AppConfig;
use crate::core::currency;
use crate::core::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use disk::DiskBackend;
use memory::MemoryBackend;
use rust_decimal::Decimal;
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One fetched set of market rows, all quoted in the same currency.
#[derive(Debug, Clone, Copy)]
pub struct MarketBatch<'a> {
    pub snapshots: &'a [CoinSnapshot],
    pub currency: &'a str,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchWrite {
    Committed,
    /// The batch was cancelled before commit. Nothing was written.
    Skipped,
}

/// Durable storage behind the coin cache.
///
/// Market rows and holdings are written separately so a refresh and a held amount
/// update never overwrite each other.
#[async_trait]
pub trait CoinBackend: Send + Sync {
    /// Reads every stored coin joined with its holding.
    async fn load(&self) -> Result<Vec<CachedCoin>>;

    /// Writes a whole batch of market rows, or nothing at all.
    ///
    /// Checks `cancel` right before committing and returns [`BatchWrite::Skipped`]
    /// if it has fired.
    async fn write_markets(
        &self,
        batch: &MarketBatch<'_>,
        cancel: &CancellationToken,
    ) -> Result<BatchWrite>;

    async fn write_holding(&self, id: &str, held: HeldPosition) -> Result<()>;
}

type Snapshot = Arc<HashMap<String, CachedCoin>>;

/// Coin cache with snapshot reads and serialized batch writes.
pub struct CoinStore {
    backend: Arc<dyn CoinBackend>,
    snapshot: RwLock<Snapshot>,
    batch_lock: Mutex<()>,
    holding_lock: Mutex<()>,
}

impl CoinStore {
    /// Opens the store and loads whatever the backend has persisted.
    pub async fn open(backend: Arc<dyn CoinBackend>) -> Result<Self> {
        let rows = backend.load().await?;
        debug!("Loaded {} cached coins", rows.len());
        let map = rows
            .into_iter()
            .map(|coin| (coin.market.id.clone(), coin))
            .collect();

        Ok(Self {
            backend,
            snapshot: RwLock::new(Arc::new(map)),
            batch_lock: Mutex::new(()),
            holding_lock: Mutex::new(()),
        })
    }

    /// Store backed by the on-disk cache under the configured data path.
    ///
    /// Falls back to a memory-only store when the disk cache cannot be opened.
    pub async fn open_default(config: &AppConfig) -> Self {
        let disk = config
            .default_data_path()
            .and_then(|path| DiskBackend::new(&path.join("cache")));

        let backend: Arc<dyn CoinBackend> = match disk {
            Ok(disk) => Arc::new(disk),
            Err(e) => {
                warn!(error = %e, "Persistent cache unavailable, using memory only");
                Arc::new(MemoryBackend::new())
            }
        };

        match Self::open(Arc::clone(&backend)).await {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Failed to load persistent cache, starting empty");
                Self::with_backend_unloaded(backend)
            }
        }
    }

    fn with_backend_unloaded(backend: Arc<dyn CoinBackend>) -> Self {
        Self {
            backend,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            batch_lock: Mutex::new(()),
            holding_lock: Mutex::new(()),
        }
    }

    fn current(&self) -> Snapshot {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Applies `update` to a copy of the snapshot and publishes the copy.
    fn swap<T>(&self, update: impl FnOnce(&mut HashMap<String, CachedCoin>) -> T) -> T {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = (**guard).clone();
        let out = update(&mut next);
        *guard = Arc::new(next);
        out
    }

    /// Merges fresh market data quoted in `currency`, keeping held quantities.
    ///
    /// Returns [`SyncError::Cancelled`] without touching memory or disk when `cancel`
    /// fires before the batch is committed. A committed batch always reaches the
    /// in-memory snapshot too. A failed write leaves the persisted cache at its
    /// previous batch, still advances memory and is reported as
    /// [`SyncError::CacheWrite`].
    pub async fn upsert_all(
        &self,
        snapshots: &[CoinSnapshot],
        currency: &str,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let _batch = self.batch_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let currency = currency::normalize(currency);
        let batch = MarketBatch {
            snapshots,
            currency: &currency,
            fetched_at: Utc::now(),
        };

        let persisted = match self.backend.write_markets(&batch, cancel).await {
            Ok(BatchWrite::Committed) => Ok(()),
            Ok(BatchWrite::Skipped) => return Err(SyncError::Cancelled),
            Err(_) if cancel.is_cancelled() => return Err(SyncError::Cancelled),
            Err(e) => Err(SyncError::CacheWrite(e)),
        };

        self.swap(|coins| {
            for snapshot in snapshots {
                coins
                    .entry(snapshot.id.clone())
                    .and_modify(|coin| {
                        coin.market = snapshot.clone();
                        coin.quote_currency = Some(currency.clone());
                        coin.fetched_at = Some(batch.fetched_at);
                    })
                    .or_insert_with(|| CachedCoin {
                        market: snapshot.clone(),
                        held: HeldPosition::default(),
                        quote_currency: Some(currency.clone()),
                        fetched_at: Some(batch.fetched_at),
                    });
            }
        });
        debug!("Cache UPSERT of {} coins in {}", snapshots.len(), currency);

        persisted
    }

    /// Updates the held quantity in memory only. See [`CoinStore::persist_held_amount`].
    pub fn apply_held_amount(&self, id: &str, quantity: Decimal) -> Result<CachedCoin, SyncError> {
        if quantity.is_sign_negative() && !quantity.is_zero() {
            return Err(SyncError::InvalidQuantity {
                id: id.to_string(),
                quantity,
            });
        }

        self.swap(|coins| match coins.get_mut(id) {
            Some(coin) => {
                coin.held.quantity = quantity;
                Ok(coin.clone())
            }
            None => Err(SyncError::NotFound(id.to_string())),
        })
    }

    /// Writes the current held quantity of `id` to the backend.
    ///
    /// Always writes the latest in-memory value, so out of order calls still leave
    /// the newest quantity on disk.
    pub async fn persist_held_amount(&self, id: &str) -> Result<(), SyncError> {
        let _holding = self.holding_lock.lock().await;
        let held = self
            .get(id)
            .map(|coin| coin.held)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;

        self.backend
            .write_holding(id, held)
            .await
            .map_err(SyncError::CacheWrite)?;
        debug!("Cache PUT holding for {}: {}", id, held.quantity);
        Ok(())
    }

    pub async fn set_held_amount(&self, id: &str, quantity: Decimal) -> Result<(), SyncError> {
        self.apply_held_amount(id, quantity)?;
        self.persist_held_amount(id).await
    }

    pub fn get(&self, id: &str) -> Option<CachedCoin> {
        self.current().get(id).cloned()
    }

    /// All cached coins, largest market cap first.
    pub fn list_all(&self) -> Vec<CachedCoin> {
        let mut coins: Vec<CachedCoin> = self.current().values().cloned().collect();
        coins.sort_by(|a, b| {
            b.market
                .market_cap
                .cmp(&a.market.market_cap)
                .then_with(|| a.market.id.cmp(&b.market.id))
        });
        coins
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }
}
