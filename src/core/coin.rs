//! Coin market data and held positions

use crate::core::currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market data for a single coin as returned by one fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinSnapshot {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image: String,
    pub current_price: Option<Decimal>,
    pub market_cap: Option<i64>,
    pub total_volume: Option<i64>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub price_change_percentage_24h: Option<f64>,
    pub sparkline_7d: Option<Vec<f64>>,
}

impl CoinSnapshot {
    /// Creates a snapshot with only identity and price set.
    pub fn new(id: &str, symbol: &str, name: &str, current_price: Option<Decimal>) -> Self {
        Self {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            image: String::new(),
            current_price,
            market_cap: None,
            total_volume: None,
            high_24h: None,
            low_24h: None,
            price_change_percentage_24h: None,
            sparkline_7d: None,
        }
    }
}

/// The user's quantity of a coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeldPosition {
    pub quantity: Decimal,
}

/// One cache row: the last known market data plus the held position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCoin {
    pub market: CoinSnapshot,
    pub held: HeldPosition,
    /// Currency the prices in `market` are quoted in, e.g. `usd`.
    #[serde(default)]
    pub quote_currency: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Unknown,
}

impl CachedCoin {
    pub fn new(market: CoinSnapshot) -> Self {
        Self {
            market,
            held: HeldPosition::default(),
            quote_currency: None,
            fetched_at: None,
        }
    }

    /// Row whose prices are known to be in `currency`.
    pub fn quoted(market: CoinSnapshot, currency: &str) -> Self {
        Self {
            quote_currency: Some(currency::normalize(currency)),
            ..Self::new(market)
        }
    }

    pub fn is_quoted_in(&self, currency: &str) -> bool {
        self.quote_currency.as_deref() == Some(currency::normalize(currency).as_str())
    }

    pub fn id(&self) -> &str {
        &self.market.id
    }

    /// Ticker as shown to the user, e.g. `BTC`.
    pub fn display_symbol(&self) -> String {
        self.market.symbol.to_uppercase()
    }

    pub fn is_held(&self) -> bool {
        self.held.quantity > Decimal::ZERO
    }

    /// Value of the holding at the current price. `None` when the price is unknown.
    pub fn holding_value(&self) -> Option<Decimal> {
        self.market
            .current_price
            .map(|price| price * self.held.quantity)
    }

    /// Symbol of the quote currency, or `fallback` for rows with none recorded.
    pub fn price_symbol(&self, fallback: &str) -> String {
        self.quote_currency
            .as_deref()
            .map_or_else(|| fallback.to_string(), currency::display_symbol)
    }

    /// Holding value, but only when the price is quoted in `currency`.
    pub fn holding_value_in(&self, currency: &str) -> Option<Decimal> {
        self.holding_value().filter(|_| self.is_quoted_in(currency))
    }

    pub fn trend(&self) -> Trend {
        match self.market.price_change_percentage_24h {
            Some(change) if change >= 0.0 => Trend::Up,
            Some(_) => Trend::Down,
            None => Trend::Unknown,
        }
    }

    /// Lowest and highest points of the 7 day series.
    pub fn sparkline_range(&self) -> Option<(f64, f64)> {
        let prices = self.market.sparkline_7d.as_ref()?;
        prices.iter().fold(None, |acc, &p| match acc {
            None => Some((p, p)),
            Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
        })
    }
}
