//! Refresh orchestration: fetch, reconcile, derive the view

pub mod task;

use crate::core::coin::CachedCoin;
use crate::core::config::RefreshConfig;
use crate::core::currency;
use crate::core::error::SyncError;
use crate::core::market::MarketDataSource;
use crate::core::sink::PresentationSink;
use crate::core::view::{self, STATUS_FETCHING, STATUS_NO_DATA, ViewState};
use crate::store::CoinStore;
use chrono::Local;
use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use task::ScheduledTask;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Quiet period after a currency change before refreshing.
    pub debounce: Duration,
    pub auto_refresh_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            auto_refresh_interval: Duration::from_secs(60),
        }
    }
}

impl From<&RefreshConfig> for SyncSettings {
    fn from(config: &RefreshConfig) -> Self {
        Self {
            debounce: config.debounce(),
            auto_refresh_interval: config.interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Reconciling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fresh data was merged into the cache. Holds the number of fetched coins.
    Updated(usize),
    /// The fetch failed or came back empty; the view shows the last known cache.
    Fallback,
    /// A newer refresh or shutdown took over. Nothing was applied.
    Superseded,
}

struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

struct State {
    selected_currency: String,
    view: ViewState,
    /// Last merged cache contents, unfiltered.
    coins: Vec<CachedCoin>,
    phase: SyncPhase,
    next_generation: u64,
    in_flight: Option<InFlight>,
    debounce: Option<ScheduledTask>,
    auto_refresh: Option<ScheduledTask>,
    pending_writes: Vec<JoinHandle<()>>,
}

impl State {
    fn recompute(&mut self) {
        self.view.coins = view::filter_coins(&self.coins, &self.view.search_text);
        self.view.portfolio_total = view::portfolio_total(&self.coins, &self.view.currency);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation && !f.cancel.is_cancelled())
    }
}

struct Inner {
    source: Arc<dyn MarketDataSource>,
    store: Arc<CoinStore>,
    sink: Arc<dyn PresentationSink>,
    settings: SyncSettings,
    state: Mutex<State>,
    reconcile_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Renders while the state lock is held so views reach the sink in order.
    fn publish(&self, state: &State) {
        self.sink.render(&state.view);
    }
}

/// Coordinates refreshes of the coin cache and keeps the derived view current.
///
/// Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Creates an idle orchestrator showing whatever `store` already holds.
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        store: Arc<CoinStore>,
        sink: Arc<dyn PresentationSink>,
        currency_code: &str,
        settings: SyncSettings,
    ) -> Self {
        let view = ViewState::new(currency_code);
        let mut state = State {
            selected_currency: view.currency.clone(),
            view,
            coins: store.list_all(),
            phase: SyncPhase::Idle,
            next_generation: 0,
            in_flight: None,
            debounce: None,
            auto_refresh: None,
            pending_writes: Vec::new(),
        };
        state.recompute();

        Self {
            inner: Arc::new(Inner {
                source,
                store,
                sink,
                settings,
                state: Mutex::new(state),
                reconcile_lock: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn view(&self) -> ViewState {
        self.inner.lock().view.clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.inner.lock().phase
    }

    pub fn selected_currency(&self) -> String {
        self.inner.lock().selected_currency.clone()
    }

    pub fn store(&self) -> &Arc<CoinStore> {
        &self.inner.store
    }

    /// Fetches fresh market data for `currency_code` and merges it into the cache.
    ///
    /// Cancels any refresh already in flight. Fetch failures fall back to the cached
    /// data and only show up in the status message.
    pub async fn request_refresh(&self, currency_code: &str) -> RefreshOutcome {
        if self.inner.shutdown.is_cancelled() {
            return RefreshOutcome::Superseded;
        }
        let currency = currency::normalize(currency_code);
        let cancel = self.inner.shutdown.child_token();

        let generation = {
            let mut state = self.inner.lock();
            state.next_generation += 1;
            let generation = state.next_generation;
            let previous = state.in_flight.replace(InFlight {
                generation,
                cancel: cancel.clone(),
            });
            if let Some(previous) = previous {
                debug!(
                    superseded = previous.generation,
                    generation, "Cancelling in-flight refresh"
                );
                previous.cancel.cancel();
            }
            state.phase = SyncPhase::Fetching;
            state.view.is_loading = true;
            state.view.status_message = STATUS_FETCHING.to_string();
            self.inner.publish(&state);
            generation
        };

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return self.discard(generation),
            result = self.inner.source.fetch_top_coins(&currency, &cancel) => result,
        };

        // Newer refreshes wait here, so a stale batch never lands after them
        let _reconcile = self.inner.reconcile_lock.lock().await;
        if !self.inner.lock().is_current(generation) {
            return self.discard(generation);
        }

        let (status, outcome) = match fetched {
            Ok(snapshots) if !snapshots.is_empty() => {
                self.inner.lock().phase = SyncPhase::Reconciling;
                match self.inner.store.upsert_all(&snapshots, &currency, &cancel).await {
                    Ok(()) => {}
                    Err(SyncError::Cancelled) => return self.discard(generation),
                    Err(e) => warn!(error = %e, "Cache write failed, keeping in-memory data"),
                }
                info!(currency = %currency, count = snapshots.len(), "Market data refreshed");
                (
                    format!("Updated: {}", Local::now().format("%H:%M:%S")),
                    RefreshOutcome::Updated(snapshots.len()),
                )
            }
            Ok(_) => {
                info!(currency = %currency, "No market data received, showing cached data");
                (STATUS_NO_DATA.to_string(), RefreshOutcome::Fallback)
            }
            Err(e) => {
                let error = SyncError::Fetch(e);
                warn!(error = %error, "Fetch failed, showing cached data");
                (
                    error.status_message().unwrap_or_default(),
                    RefreshOutcome::Fallback,
                )
            }
        };

        let mut state = self.inner.lock();
        if !state.is_current(generation) {
            return self.discard(generation);
        }
        state.in_flight = None;
        state.phase = SyncPhase::Idle;
        state.coins = self.inner.store.list_all();
        state.view.currency_symbol = currency::display_symbol(&currency);
        state.view.currency = currency;
        state.view.status_message = status;
        state.view.is_loading = false;
        state.recompute();
        self.inner.publish(&state);
        outcome
    }

    fn discard(&self, generation: u64) -> RefreshOutcome {
        debug!(generation, "Discarding superseded refresh");
        RefreshOutcome::Superseded
    }

    /// Re-filters the cached coins. Never touches the network.
    pub fn set_search_text(&self, text: &str) -> ViewState {
        let mut state = self.inner.lock();
        state.view.search_text = text.to_string();
        state.recompute();
        self.inner.publish(&state);
        state.view.clone()
    }

    /// Updates a held quantity, recomputes the portfolio total and persists the
    /// quantity in the background.
    pub fn set_held_amount(&self, id: &str, quantity: Decimal) -> Result<ViewState, SyncError> {
        let updated = self.inner.store.apply_held_amount(id, quantity)?;

        let mut state = self.inner.lock();
        match state.coins.iter_mut().find(|coin| coin.id() == id) {
            Some(coin) => coin.held = updated.held,
            None => state.coins = self.inner.store.list_all(),
        }
        state.recompute();
        self.inner.publish(&state);

        let store = Arc::clone(&self.inner.store);
        let id = id.to_string();
        let write = tokio::spawn(async move {
            if let Err(e) = store.persist_held_amount(&id).await {
                warn!(error = %e, coin = %id, "Failed to persist held amount");
            }
        });
        state.pending_writes.retain(|handle| !handle.is_finished());
        state.pending_writes.push(write);

        Ok(state.view.clone())
    }

    /// Switches the display currency now and refreshes once changes settle.
    pub fn set_currency(&self, currency_code: &str) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        let code = currency::normalize(currency_code);
        let mut state = self.inner.lock();
        state.selected_currency = code.clone();
        state.view.currency = code.clone();
        state.view.currency_symbol = currency::display_symbol(&code);
        state.recompute();
        self.inner.publish(&state);

        if let Some(pending) = state.debounce.take() {
            pending.cancel();
        }
        let weak = Arc::downgrade(&self.inner);
        state.debounce = Some(ScheduledTask::after(
            self.inner.settings.debounce,
            move || async move {
                if let Some(orchestrator) = Self::from_weak(&weak) {
                    debug!(currency = %code, "Currency settled, refreshing");
                    tokio::spawn(async move {
                        orchestrator.request_refresh(&code).await;
                    });
                }
            },
        ));
    }

    /// Starts or stops refreshing on the configured interval.
    pub fn set_auto_refresh(&self, enabled: bool) {
        let mut state = self.inner.lock();
        if !enabled {
            if let Some(task) = state.auto_refresh.take() {
                task.cancel();
                info!("Auto refresh disabled");
            }
            return;
        }
        if self.inner.shutdown.is_cancelled()
            || state.auto_refresh.as_ref().is_some_and(|t| !t.is_finished())
        {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.settings.auto_refresh_interval;
        state.auto_refresh = Some(ScheduledTask::every(period, move || {
            let orchestrator = Self::from_weak(&weak);
            async move {
                let Some(orchestrator) = orchestrator else {
                    return false;
                };
                tokio::spawn(async move {
                    let currency = orchestrator.selected_currency();
                    orchestrator.request_refresh(&currency).await;
                });
                true
            }
        }));
        info!(?period, "Auto refresh enabled");
    }

    pub fn is_auto_refresh_enabled(&self) -> bool {
        self.inner.lock().auto_refresh.is_some()
    }

    /// Recomputes the view from the cache alone, e.g. when starting offline.
    pub fn reload_from_cache(&self, status: &str) -> ViewState {
        let mut state = self.inner.lock();
        state.coins = self.inner.store.list_all();
        state.view.status_message = status.to_string();
        state.recompute();
        self.inner.publish(&state);
        state.view.clone()
    }

    /// Cancels timers and the in-flight refresh, then waits for pending held amount
    /// writes. Safe to call more than once.
    pub async fn shutdown(&self) {
        let writes = {
            let mut state = self.inner.lock();
            if let Some(task) = state.debounce.take() {
                task.cancel();
            }
            if let Some(task) = state.auto_refresh.take() {
                task.cancel();
            }
            self.inner.shutdown.cancel();
            state.in_flight = None;
            state.phase = SyncPhase::Idle;
            state.view.is_loading = false;
            std::mem::take(&mut state.pending_writes)
        };

        for result in join_all(writes).await {
            if let Err(e) = result {
                warn!(error = %e, "Held amount write task failed");
            }
        }
        debug!("Sync orchestrator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coin::{CoinSnapshot, HeldPosition};
    use crate::store::CoinBackend;
    use crate::store::memory::MemoryBackend;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use crate::store::{BatchWrite, MarketBatch};
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    type Scripted = (Duration, Result<Vec<CoinSnapshot>, String>);

    /// Source replaying canned responses. Ignores cancellation unless told otherwise,
    /// so late responses can be simulated.
    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<Scripted>>,
        currencies: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn push(&self, delay_ms: u64, response: Result<Vec<CoinSnapshot>, &str>) {
            self.responses.lock().unwrap().push_back((
                Duration::from_millis(delay_ms),
                response.map_err(str::to_string),
            ));
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn currencies(&self) -> Vec<String> {
            self.currencies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        async fn fetch_top_coins(
            &self,
            currency: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<CoinSnapshot>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.currencies.lock().unwrap().push(currency.to_string());
            let next = self.responses.lock().unwrap().pop_front();
            let (delay, response) = next.unwrap_or((Duration::ZERO, Ok(Vec::new())));
            tokio::time::sleep(delay).await;
            response.map_err(|e| anyhow!(e))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        views: Mutex<Vec<ViewState>>,
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.views.lock().unwrap().len()
        }

        fn last(&self) -> ViewState {
            self.views.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl PresentationSink for RecordingSink {
        fn render(&self, view: &ViewState) {
            self.views.lock().unwrap().push(view.clone());
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        inner: MemoryBackend,
        market_writes: AtomicUsize,
        holding_writes: AtomicUsize,
        fail: AtomicBool,
        write_delay_ms: AtomicUsize,
    }

    #[async_trait]
    impl CoinBackend for CountingBackend {
        async fn load(&self) -> Result<Vec<CachedCoin>> {
            self.inner.load().await
        }

        async fn write_markets(
            &self,
            batch: &MarketBatch<'_>,
            cancel: &CancellationToken,
        ) -> Result<BatchWrite> {
            self.market_writes.fetch_add(1, Ordering::SeqCst);
            let delay = self.write_delay_ms.load(Ordering::SeqCst) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("read-only file system"));
            }
            self.inner.write_markets(batch, cancel).await
        }

        async fn write_holding(&self, id: &str, held: HeldPosition) -> Result<()> {
            self.holding_writes.fetch_add(1, Ordering::SeqCst);
            self.inner.write_holding(id, held).await
        }
    }

    struct Harness {
        source: Arc<ScriptedSource>,
        backend: Arc<CountingBackend>,
        sink: Arc<RecordingSink>,
        orchestrator: SyncOrchestrator,
    }

    async fn harness(settings: SyncSettings) -> Harness {
        let source = Arc::new(ScriptedSource::default());
        let backend = Arc::new(CountingBackend::default());
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(CoinStore::open(backend.clone()).await.unwrap());
        let orchestrator =
            SyncOrchestrator::new(source.clone(), store, sink.clone(), "usd", settings);
        Harness {
            source,
            backend,
            sink,
            orchestrator,
        }
    }

    fn coin(id: &str, symbol: &str, name: &str, price: i64, market_cap: i64) -> CoinSnapshot {
        let mut s = CoinSnapshot::new(id, symbol, name, Some(Decimal::from(price)));
        s.market_cap = Some(market_cap);
        s
    }

    fn top_coins(btc_price: i64) -> Vec<CoinSnapshot> {
        vec![
            coin("bitcoin", "btc", "Bitcoin", btc_price, 1000),
            coin("ethereum", "eth", "Ethereum", 3000, 500),
        ]
    }

    fn price_of(view: &ViewState, id: &str) -> Option<Decimal> {
        view.coins
            .iter()
            .find(|c| c.id() == id)
            .and_then(|c| c.market.current_price)
    }

    #[tokio::test]
    async fn test_refresh_populates_cache_and_view() {
        let h = harness(SyncSettings::default()).await;
        h.source.push(0, Ok(top_coins(50000)));

        let outcome = h.orchestrator.request_refresh("USD").await;

        assert_eq!(outcome, RefreshOutcome::Updated(2));
        let view = h.orchestrator.view();
        assert_eq!(view.coins.len(), 2);
        assert!(view.status_message.starts_with("Updated: "));
        assert!(!view.is_loading);
        assert_eq!(view.currency_symbol, "$");
        assert_eq!(h.orchestrator.phase(), SyncPhase::Idle);
        assert_eq!(h.orchestrator.store().list_all().len(), 2);
        assert_eq!(h.source.currencies(), vec!["usd"]);
        // One render for loading, one for the result
        assert_eq!(h.sink.count(), 2);
    }

    #[tokio::test]
    async fn test_refresh_keeps_holdings() {
        let h = harness(SyncSettings::default()).await;
        h.source.push(0, Ok(top_coins(50000)));
        h.orchestrator.request_refresh("usd").await;
        h.orchestrator
            .set_held_amount("bitcoin", Decimal::from(2))
            .unwrap();

        h.source.push(0, Ok(top_coins(60000)));
        h.orchestrator.request_refresh("usd").await;

        let btc = h.orchestrator.store().get("bitcoin").unwrap();
        assert_eq!(btc.held.quantity, Decimal::from(2));
        assert_eq!(btc.market.current_price, Some(Decimal::from(60000)));
        assert_eq!(h.orchestrator.view().portfolio_total, Decimal::from(120000));
    }

    #[tokio::test]
    async fn test_stale_response_is_discarded() {
        let h = harness(SyncSettings::default()).await;
        // A answers slowly with an old price, B answers quickly
        h.source.push(200, Ok(top_coins(1)));
        h.source.push(10, Ok(top_coins(2)));

        let a = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.request_refresh("usd").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b = h.orchestrator.request_refresh("usd").await;
        let a = a.await.unwrap();

        assert_eq!(b, RefreshOutcome::Updated(2));
        assert_eq!(a, RefreshOutcome::Superseded);
        assert_eq!(
            price_of(&h.orchestrator.view(), "bitcoin"),
            Some(Decimal::from(2))
        );
        assert_eq!(
            h.orchestrator
                .store()
                .get("bitcoin")
                .unwrap()
                .market
                .current_price,
            Some(Decimal::from(2))
        );
        assert_eq!(h.backend.market_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_falls_back_to_cache() {
        let h = harness(SyncSettings::default()).await;
        h.source.push(0, Ok(top_coins(50000)));
        h.orchestrator.request_refresh("usd").await;
        let before = h.orchestrator.store().list_all();

        h.source.push(0, Err("HTTP error: 429 Too Many Requests"));
        let outcome = h.orchestrator.request_refresh("usd").await;

        assert_eq!(outcome, RefreshOutcome::Fallback);
        assert_eq!(h.orchestrator.store().list_all(), before);
        let view = h.orchestrator.view();
        assert_eq!(view.coins, before);
        assert!(view.status_message.starts_with("Error: "));
        assert!(view.status_message.contains("429"));
        assert!(!view.is_loading);
        assert_eq!(h.backend.market_writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_result_falls_back_to_cache() {
        let h = harness(SyncSettings::default()).await;
        h.source.push(0, Ok(top_coins(50000)));
        h.orchestrator.request_refresh("usd").await;

        h.source.push(0, Ok(Vec::new()));
        let outcome = h.orchestrator.request_refresh("usd").await;

        assert_eq!(outcome, RefreshOutcome::Fallback);
        let view = h.orchestrator.view();
        assert_eq!(view.coins.len(), 2);
        assert_eq!(view.status_message, STATUS_NO_DATA);
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_updates_view() {
        let h = harness(SyncSettings::default()).await;
        h.backend.fail.store(true, Ordering::SeqCst);
        h.source.push(0, Ok(top_coins(50000)));

        let outcome = h.orchestrator.request_refresh("usd").await;

        assert_eq!(outcome, RefreshOutcome::Updated(2));
        assert_eq!(h.orchestrator.view().coins.len(), 2);
        assert!(h.backend.inner.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_superseded_during_cache_write_is_not_applied() {
        let h = harness(SyncSettings::default()).await;
        h.backend.write_delay_ms.store(200, Ordering::SeqCst);
        // A fetches at once but its cache write is slow, B fails
        h.source.push(0, Ok(top_coins(50000)));
        h.source.push(0, Err("boom"));

        let a = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.request_refresh("usd").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let b = h.orchestrator.request_refresh("usd").await;
        let a = a.await.unwrap();

        assert_eq!(a, RefreshOutcome::Superseded);
        assert_eq!(b, RefreshOutcome::Fallback);
        assert_eq!(h.backend.market_writes.load(Ordering::SeqCst), 1);
        assert!(h.orchestrator.store().list_all().is_empty());
        assert!(h.backend.inner.load().await.unwrap().is_empty());
        let view = h.orchestrator.view();
        assert!(view.coins.is_empty());
        assert!(view.status_message.starts_with("Error"));
    }

    #[tokio::test]
    async fn test_total_only_counts_prices_in_view_currency() {
        let h = harness(SyncSettings::default()).await;
        h.source.push(0, Ok(top_coins(50000)));
        h.orchestrator.request_refresh("usd").await;
        h.orchestrator
            .set_held_amount("bitcoin", Decimal::from(2))
            .unwrap();
        h.orchestrator
            .set_held_amount("ethereum", Decimal::ONE)
            .unwrap();
        assert_eq!(h.orchestrator.view().portfolio_total, Decimal::from(103000));

        // Only ethereum comes back in euros; bitcoin keeps its dollar price
        h.source
            .push(0, Ok(vec![coin("ethereum", "eth", "Ethereum", 2700, 500)]));
        h.orchestrator.request_refresh("EUR").await;

        let view = h.orchestrator.view();
        assert_eq!(view.currency, "eur");
        assert_eq!(view.currency_symbol, "€");
        assert_eq!(view.portfolio_total, Decimal::from(2700));
        let btc = h.orchestrator.store().get("bitcoin").unwrap();
        assert!(btc.is_quoted_in("usd"));
        h.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_search_filters_without_fetching() {
        let h = harness(SyncSettings::default()).await;
        h.source.push(0, Ok(top_coins(50000)));
        h.orchestrator.request_refresh("usd").await;

        let view = h.orchestrator.set_search_text("ETH");
        assert_eq!(view.coins.len(), 1);
        assert_eq!(view.coins[0].market.name, "Ethereum");

        let view = h.orchestrator.set_search_text("");
        assert_eq!(view.coins.len(), 2);
        assert_eq!(h.source.calls(), 1);

        // The filter sticks across refreshes
        h.orchestrator.set_search_text("bit");
        h.source.push(0, Ok(top_coins(51000)));
        h.orchestrator.request_refresh("usd").await;
        assert_eq!(h.orchestrator.view().coins.len(), 1);
    }

    #[tokio::test]
    async fn test_held_amount_recomputes_total_without_fetching() {
        let h = harness(SyncSettings::default()).await;
        h.source.push(0, Ok(top_coins(50000)));
        h.orchestrator.request_refresh("usd").await;

        let view = h
            .orchestrator
            .set_held_amount("bitcoin", Decimal::from(2))
            .unwrap();
        assert_eq!(view.portfolio_total, Decimal::from(100000));

        let renders = h.sink.count();
        let view = h
            .orchestrator
            .set_held_amount("ethereum", Decimal::ONE)
            .unwrap();
        assert_eq!(view.portfolio_total, Decimal::from(103000));
        assert_eq!(h.sink.count(), renders + 1);
        assert_eq!(h.sink.last().portfolio_total, Decimal::from(103000));
        assert_eq!(h.source.calls(), 1);

        h.orchestrator.shutdown().await;
        assert_eq!(h.backend.holding_writes.load(Ordering::SeqCst), 2);
        let persisted = h.backend.inner.load().await.unwrap();
        let eth = persisted.iter().find(|c| c.id() == "ethereum").unwrap();
        assert_eq!(eth.held.quantity, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_held_amount_for_unknown_coin() {
        let h = harness(SyncSettings::default()).await;
        h.source.push(0, Ok(top_coins(50000)));
        h.orchestrator.request_refresh("usd").await;
        let renders = h.sink.count();

        let result = h.orchestrator.set_held_amount("dogecoin", Decimal::TEN);

        assert!(matches!(result, Err(SyncError::NotFound(_))));
        assert_eq!(h.sink.count(), renders);
        assert_eq!(h.orchestrator.view().portfolio_total, Decimal::ZERO);
        h.orchestrator.shutdown().await;
        assert_eq!(h.backend.holding_writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_currency_changes_are_debounced() {
        let h = harness(SyncSettings::default()).await;
        h.source.push(0, Ok(top_coins(46000)));

        h.orchestrator.set_currency("EUR");
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.orchestrator.set_currency("GBP");
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.orchestrator.set_currency("JPY");

        // Symbol follows the selection right away
        assert_eq!(h.orchestrator.view().currency_symbol, "¥");
        assert_eq!(h.source.calls(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.source.calls(), 1);
        assert_eq!(h.source.currencies(), vec!["jpy"]);
        assert_eq!(h.orchestrator.selected_currency(), "jpy");
        assert_eq!(h.orchestrator.view().coins.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_interval() {
        let h = harness(SyncSettings {
            debounce: Duration::from_secs(1),
            auto_refresh_interval: Duration::from_secs(60),
        })
        .await;

        h.orchestrator.set_auto_refresh(true);
        h.orchestrator.set_auto_refresh(true);
        assert!(h.orchestrator.is_auto_refresh_enabled());

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(h.source.calls(), 2);

        h.orchestrator.set_auto_refresh(false);
        assert!(!h.orchestrator.is_auto_refresh_enabled());
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.source.calls(), 2);

        // Manual refreshes keep working
        h.orchestrator.request_refresh("usd").await;
        assert_eq!(h.source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_everything() {
        let h = harness(SyncSettings::default()).await;
        h.source.push(10_000, Ok(top_coins(50000)));
        h.orchestrator.set_auto_refresh(true);

        let pending = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.request_refresh("usd").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.orchestrator.set_currency("eur");

        h.orchestrator.shutdown().await;
        h.orchestrator.shutdown().await;

        assert_eq!(pending.await.unwrap(), RefreshOutcome::Superseded);
        assert_eq!(h.orchestrator.phase(), SyncPhase::Idle);
        assert!(!h.orchestrator.view().is_loading);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.source.calls(), 1);
        assert!(h.orchestrator.store().is_empty());
        assert_eq!(
            h.orchestrator.request_refresh("usd").await,
            RefreshOutcome::Superseded
        );
    }

    #[tokio::test]
    async fn test_starts_from_cached_data() {
        let backend = Arc::new(MemoryBackend::new());
        let snapshots = top_coins(50000);
        let batch = MarketBatch {
            snapshots: &snapshots,
            currency: "usd",
            fetched_at: Utc::now(),
        };
        backend
            .write_markets(&batch, &CancellationToken::new())
            .await
            .unwrap();
        let store = Arc::new(CoinStore::open(backend).await.unwrap());
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = SyncOrchestrator::new(
            Arc::new(ScriptedSource::default()),
            store,
            sink.clone(),
            "usd",
            SyncSettings::default(),
        );

        assert_eq!(orchestrator.view().coins.len(), 2);
        let view = orchestrator.reload_from_cache("Offline");
        assert_eq!(view.status_message, "Offline");
        assert_eq!(sink.count(), 1);
    }
}
