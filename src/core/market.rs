//! Market data source abstraction

use crate::core::coin::CoinSnapshot;
use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetches the top coins priced in `currency`, ordered by market cap.
    ///
    /// Implementations abort the underlying request once `cancel` fires.
    async fn fetch_top_coins(
        &self,
        currency: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CoinSnapshot>>;
}
