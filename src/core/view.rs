//! Derived view state: search filtering and portfolio aggregation

use crate::core::coin::CachedCoin;
use crate::core::currency;
use rust_decimal::Decimal;

pub const STATUS_READY: &str = "Ready to update";
pub const STATUS_FETCHING: &str = "Fetching data...";
pub const STATUS_NO_DATA: &str = "No data received";

/// Everything the presentation layer needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub currency: String,
    pub currency_symbol: String,
    pub search_text: String,
    pub coins: Vec<CachedCoin>,
    pub portfolio_total: Decimal,
    pub status_message: String,
    pub is_loading: bool,
}

impl ViewState {
    pub fn new(currency_code: &str) -> Self {
        let code = currency::normalize(currency_code);
        Self {
            currency_symbol: currency::display_symbol(&code),
            currency: code,
            search_text: String::new(),
            coins: Vec::new(),
            portfolio_total: Decimal::ZERO,
            status_message: STATUS_READY.to_string(),
            is_loading: false,
        }
    }

    /// Coins with a nonzero holding, out of the filtered list.
    pub fn holdings(&self) -> impl Iterator<Item = &CachedCoin> {
        self.coins.iter().filter(|c| c.is_held())
    }
}

fn matches(coin: &CachedCoin, needle: &str) -> bool {
    coin.market.name.to_lowercase().contains(needle)
        || coin.market.symbol.to_lowercase().contains(needle)
}

/// Case-insensitive substring match on name or symbol. Blank text keeps everything.
pub fn filter_coins(coins: &[CachedCoin], search_text: &str) -> Vec<CachedCoin> {
    let needle = search_text.trim().to_lowercase();
    if needle.is_empty() {
        return coins.to_vec();
    }
    coins
        .iter()
        .filter(|coin| matches(coin, &needle))
        .cloned()
        .collect()
}

/// Sum of quantity times price over held coins, in `currency`.
///
/// Coins without a price, or priced in another currency, add nothing.
pub fn portfolio_total(coins: &[CachedCoin], currency: &str) -> Decimal {
    coins
        .iter()
        .filter(|coin| coin.is_held())
        .filter_map(|coin| coin.holding_value_in(currency))
        .sum()
}
