use super::util::with_retry;
use crate::core::coin::CoinSnapshot;
use crate::core::config::CoinGeckoProviderConfig;
use crate::core::market::MarketDataSource;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct Sparkline {
    price: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct CoinMarketItem {
    id: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    name: String,
    image: Option<String>,
    current_price: Option<Decimal>,
    // Sent as integers, but occasionally with a fractional part
    market_cap: Option<f64>,
    total_volume: Option<f64>,
    high_24h: Option<Decimal>,
    low_24h: Option<Decimal>,
    price_change_percentage_24h: Option<f64>,
    sparkline_in_7d: Option<Sparkline>,
}

impl From<CoinMarketItem> for CoinSnapshot {
    fn from(item: CoinMarketItem) -> Self {
        CoinSnapshot {
            id: item.id,
            symbol: item.symbol,
            name: item.name,
            image: item.image.unwrap_or_default(),
            current_price: item.current_price,
            market_cap: item.market_cap.map(|v| v as i64),
            total_volume: item.total_volume.map(|v| v as i64),
            high_24h: item.high_24h,
            low_24h: item.low_24h,
            price_change_percentage_24h: item.price_change_percentage_24h,
            sparkline_7d: item.sparkline_in_7d.and_then(|s| s.price),
        }
    }
}

/// Top coins by market cap from the CoinGecko `/coins/markets` endpoint.
pub struct CoinGeckoProvider {
    base_url: String,
    per_page: u32,
    retries: usize,
    retry_delay_ms: u64,
    client: reqwest::Client,
}

impl CoinGeckoProvider {
    pub fn new(config: &CoinGeckoProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("coinpulse/1.0")
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(CoinGeckoProvider {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            per_page: config.per_page,
            retries: config.retries,
            retry_delay_ms: config.retry_delay_ms,
            client,
        })
    }

    fn markets_url(&self, currency: &str) -> Result<Url> {
        let per_page = self.per_page.to_string();
        Url::parse_with_params(
            &format!("{}/coins/markets", self.base_url),
            &[
                ("vs_currency", currency),
                ("order", "market_cap_desc"),
                ("per_page", per_page.as_str()),
                ("page", "1"),
                ("sparkline", "true"),
            ],
        )
        .with_context(|| format!("Invalid base url: {}", self.base_url))
    }

    async fn request(&self, currency: &str) -> Result<Vec<CoinSnapshot>> {
        let url = self.markets_url(currency)?;
        debug!("Requesting market data from {}", url);

        let response = with_retry(
            || self.client.get(url.clone()).send(),
            self.retries,
            self.retry_delay_ms,
        )
        .await
        .with_context(|| format!("Request failed for currency: {currency}"))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP error: {} for currency: {}",
                response.status(),
                currency
            ));
        }

        let text = response.text().await?;
        let items: Vec<CoinMarketItem> = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", currency, e))?;

        Ok(items.into_iter().map(CoinSnapshot::from).collect())
    }
}

#[async_trait]
impl MarketDataSource for CoinGeckoProvider {
    #[instrument(
        name = "CoinGeckoFetch",
        skip(self, cancel),
        fields(currency = %currency)
    )]
    async fn fetch_top_coins(
        &self,
        currency: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<CoinSnapshot>> {
        tokio::select! {
            _ = cancel.cancelled() => Err(anyhow!("Request cancelled for currency: {currency}")),
            result = self.request(currency) => result,
        }
    }
}
