//! Core data model and engine abstractions

pub mod coin;
pub mod config;
pub mod currency;
pub mod error;
pub mod log;
pub mod market;
pub mod sink;
pub mod view;

// Re-export main types for cleaner imports
pub use coin::{CachedCoin, CoinSnapshot, HeldPosition, Trend};
pub use error::SyncError;
pub use market::MarketDataSource;
pub use sink::{NullSink, PresentationSink};
pub use view::ViewState;
