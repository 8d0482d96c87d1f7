//! # Trade Service
//!
//! Owns the current trade request and publishes its [`TradeState`] through a
//! `watch` channel. Every input change bumps a generation counter; a refresh that
//! finishes after the inputs moved on is discarded instead of published.

use crate::aggregator::AggregatorClient;
use crate::metrics;
use crate::multicall::BatchReader;
use crate::normalization::Percent;
use crate::pair_graph::{candidate_pairs, RoutingBases};
use crate::pair_state::{PairSnapshot, PairStateCache};
use crate::router::{best_trade, RoutingGraph, SearchOptions};
use crate::scheduler::{RefreshTick, RefreshTrigger};
use crate::settings::{QuoteSource, RoutingContext};
use crate::trade::{RouteQuote, TradeState, TradeType};
use crate::types::{Currency, PairKey};
use arc_swap::ArcSwapOption;
use ethers::types::U256;
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// User inputs of one trade. `amount` is the input for exact-in and the wanted output
/// for exact-out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradeRequest {
    pub input: Option<Currency>,
    pub output: Option<Currency>,
    pub amount: Option<U256>,
    pub trade_type: TradeType,
}

impl TradeRequest {
    pub fn exact_in(input: Currency, output: Currency, amount: U256) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
            amount: Some(amount),
            trade_type: TradeType::ExactIn,
        }
    }

    pub fn exact_out(input: Currency, output: Currency, amount: U256) -> Self {
        Self {
            trade_type: TradeType::ExactOut,
            ..Self::exact_in(input, output, amount)
        }
    }

    /// Absent or zero amounts never leave `Idle`.
    pub fn has_amount(&self) -> bool {
        self.amount.map_or(false, |a| !a.is_zero())
    }
}

/// Injected routing configuration.
#[derive(Debug, Clone)]
pub struct TradeServiceConfig {
    pub chain_id: Option<u64>,
    pub bases: RoutingBases,
    pub search: SearchOptions,
    pub slippage: Percent,
    pub quote_source: QuoteSource,
    pub cache_capacity: usize,
}

impl Default for TradeServiceConfig {
    fn default() -> Self {
        Self {
            chain_id: None,
            bases: RoutingBases::default(),
            search: SearchOptions::default(),
            slippage: Percent::from_bps(50),
            quote_source: QuoteSource::OnChain,
            cache_capacity: 64,
        }
    }
}

impl From<&RoutingContext> for TradeServiceConfig {
    fn from(context: &RoutingContext) -> Self {
        Self {
            chain_id: context.chain_id,
            bases: context.bases.clone(),
            search: context.search,
            slippage: context.slippage,
            quote_source: context.quote_source,
            cache_capacity: context.trade_cache_capacity,
        }
    }
}

/// Results of the current snapshot epoch, keyed by request.
struct TradeCache {
    epoch: u64,
    entries: LruCache<TradeRequest, TradeState>,
}

impl TradeCache {
    fn for_epoch(&mut self, epoch: u64) -> &mut LruCache<TradeRequest, TradeState> {
        if self.epoch != epoch {
            self.entries.clear();
            self.epoch = epoch;
        }
        &mut self.entries
    }
}

pub struct TradeService<R: BatchReader + ?Sized> {
    config: TradeServiceConfig,
    pairs: Arc<PairStateCache<R>>,
    aggregator: Option<AggregatorClient>,
    trigger: Option<RefreshTrigger>,
    generation: AtomicU64,
    request: ArcSwapOption<TradeRequest>,
    state: watch::Sender<TradeState>,
    trades: Mutex<TradeCache>,
}

impl<R: BatchReader + ?Sized> TradeService<R> {
    pub fn new(pairs: Arc<PairStateCache<R>>, config: TradeServiceConfig) -> Self {
        let (state, _) = watch::channel(TradeState::Idle);
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            pairs,
            aggregator: None,
            trigger: None,
            generation: AtomicU64::new(0),
            request: ArcSwapOption::empty(),
            state,
            trades: Mutex::new(TradeCache {
                epoch: 0,
                entries: LruCache::new(capacity),
            }),
        }
    }

    pub fn with_aggregator(mut self, client: AggregatorClient) -> Self {
        self.aggregator = Some(client);
        self
    }

    /// Fired on every actionable input change.
    pub fn with_trigger(mut self, trigger: RefreshTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<TradeState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> TradeState {
        self.state.borrow().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn request(&self) -> Option<Arc<TradeRequest>> {
        self.request.load_full()
    }

    /// Replaces the inputs and returns the new generation.
    pub fn set_request(&self, request: Option<TradeRequest>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        match request {
            Some(request) if request.has_amount() => {
                debug!(generation, trade_type = ?request.trade_type, "trade request updated");
                self.request.store(Some(Arc::new(request)));
                self.pairs.invalidate();
                self.publish(TradeState::Loading);
                if let Some(trigger) = &self.trigger {
                    trigger.fire();
                }
            }
            other => {
                debug!(generation, "trade request cleared");
                self.request.store(other.map(Arc::new));
                self.publish(TradeState::Idle);
            }
        }
        generation
    }

    /// Recomputes the trade for the current inputs. Returns the published state, or
    /// `None` when the inputs changed while the refresh was in flight.
    pub async fn refresh(&self) -> Option<TradeState> {
        let generation = self.generation.load(Ordering::SeqCst);
        let request = match self.request.load_full() {
            Some(request) if request.has_amount() => request,
            _ => return self.publish_if_current(generation, TradeState::Idle),
        };

        let state = self.compute(&request).await;
        self.publish_if_current(generation, state)
    }

    /// Drives `refresh()` from scheduler ticks until the tick stream ends.
    pub async fn run(&self, mut ticks: mpsc::Receiver<RefreshTick>) {
        while let Some(tick) = ticks.recv().await {
            debug!(epoch = tick.epoch, reason = ?tick.reason, "refreshing trade");
            match self.refresh().await {
                Some(TradeState::Ready(trade)) => info!(
                    epoch = tick.epoch,
                    hops = trade.hop_count(),
                    amount_in = %trade.amount_in,
                    amount_out = %trade.amount_out,
                    "trade ready"
                ),
                Some(state) => debug!(epoch = tick.epoch, ?state, "trade refreshed"),
                None => {}
            }
        }
        info!("trade service stopped");
    }

    /// Searches the current pair snapshot without fetching. Results are cached per
    /// snapshot epoch. `Loading` while the snapshot does not cover the request's pairs.
    pub fn quote(&self, request: &TradeRequest) -> TradeState {
        if !request.has_amount() {
            return TradeState::Idle;
        }
        let snapshot = self.pairs.snapshot();
        if !self.covers(request, &snapshot) {
            return TradeState::Loading;
        }
        if let Some(hit) = self.cache().for_epoch(snapshot.epoch).get(request).cloned() {
            metrics::increment_trade_cache_hit();
            return hit;
        }
        metrics::increment_trade_cache_miss();
        let state = self.search_snapshot(request, &snapshot);
        self.remember(request, snapshot.epoch, &state);
        state
    }

    async fn compute(&self, request: &TradeRequest) -> TradeState {
        let (Some(input), Some(output), Some(amount)) = (&request.input, &request.output, request.amount)
        else {
            return self.no_route("incomplete");
        };

        if self.config.quote_source == QuoteSource::Aggregator && request.trade_type == TradeType::ExactIn {
            if let Some(client) = &self.aggregator {
                let single_hop = self.config.search.max_hops == 1;
                return match client.quote(input, output, amount, single_hop).await {
                    Ok(quote) => self.finish(RouteQuote::Aggregator(quote), input, output),
                    Err(_) => self.no_route("aggregator"),
                };
            }
        }

        let candidates = candidate_pairs(self.config.chain_id, Some(input), Some(output), &self.config.bases);
        if candidates.is_empty() {
            return self.no_route("no_candidates");
        }
        let snapshot = self.pairs.refresh(&candidates).await;
        let state = self.search_snapshot(request, &snapshot);
        self.remember(request, snapshot.epoch, &state);
        state
    }

    /// Whether every candidate pair of `request` was resolved into `snapshot`.
    fn covers(&self, request: &TradeRequest, snapshot: &PairSnapshot) -> bool {
        let candidates = candidate_pairs(
            self.config.chain_id,
            request.input.as_ref(),
            request.output.as_ref(),
            &self.config.bases,
        );
        let resolved: HashSet<PairKey> = snapshot.pairs.iter().filter_map(|p| p.key()).collect();
        candidates.iter().all(|pair| resolved.contains(&pair.key()))
    }

    fn search_snapshot(&self, request: &TradeRequest, snapshot: &PairSnapshot) -> TradeState {
        let (Some(input), Some(output), Some(amount)) = (&request.input, &request.output, request.amount)
        else {
            return self.no_route("incomplete");
        };
        let graph = RoutingGraph::from_snapshot(snapshot);
        match best_trade(
            &graph,
            request.trade_type,
            input.wrapped(),
            output.wrapped(),
            amount,
            self.config.search,
        ) {
            Some(route) => self.finish(RouteQuote::OnChain(route), input, output),
            None => self.no_route("no_route"),
        }
    }

    fn finish(&self, quote: RouteQuote, input: &Currency, output: &Currency) -> TradeState {
        match quote.into_trade(input, output, self.config.slippage) {
            Ok(trade) => {
                metrics::increment_trade_search("found");
                TradeState::Ready(Arc::new(trade))
            }
            Err(e) => {
                warn!(error = %e, %input, %output, "route rejected");
                self.no_route("invalid_route")
            }
        }
    }

    fn no_route(&self, outcome: &str) -> TradeState {
        metrics::increment_trade_search(outcome);
        TradeState::NoRoute
    }

    fn remember(&self, request: &TradeRequest, epoch: u64, state: &TradeState) {
        self.cache().for_epoch(epoch).put(request.clone(), state.clone());
    }

    fn cache(&self) -> MutexGuard<'_, TradeCache> {
        self.trades.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish_if_current(&self, generation: u64, state: TradeState) -> Option<TradeState> {
        let current = self.generation.load(Ordering::SeqCst);
        if current != generation {
            metrics::increment_stale_discarded();
            debug!(generation, current, "discarding stale trade result");
            return None;
        }
        self.publish(state.clone());
        Some(state)
    }

    fn publish(&self, state: TradeState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multicall::Call;
    use crate::types::Token;
    use async_trait::async_trait;
    use ethers::abi::{self, Token as AbiToken};
    use ethers::types::{Address, Bytes};
    use tokio::sync::Notify;

    /// Factory that knows no pairs. Optionally holds every batch until released.
    struct EmptyFactory {
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl BatchReader for EmptyFactory {
        async fn aggregate(&self, calls: Vec<Call>) -> anyhow::Result<Vec<Option<Bytes>>> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let zero = Bytes::from(abi::encode(&[AbiToken::Address(Address::zero())]));
            Ok(calls.iter().map(|_| Some(zero.clone())).collect())
        }
    }

    fn token(byte: u8) -> Currency {
        Token::new(1, Address::repeat_byte(byte), 18, None, None).unwrap().into()
    }

    fn service(gate: Option<Arc<Notify>>) -> TradeService<EmptyFactory> {
        let cache = PairStateCache::new(
            Arc::new(EmptyFactory { gate }),
            Some(Address::repeat_byte(0xF0)),
            vec![],
            30,
        );
        let config = TradeServiceConfig {
            chain_id: Some(1),
            ..Default::default()
        };
        TradeService::new(Arc::new(cache), config)
    }

    #[tokio::test]
    async fn test_zero_or_missing_amount_is_idle() {
        let service = service(None);
        let mut request = TradeRequest::exact_in(token(1), token(2), U256::zero());
        service.set_request(Some(request.clone()));
        assert_eq!(service.current(), TradeState::Idle);

        request.amount = None;
        service.set_request(Some(request));
        assert_eq!(service.refresh().await, Some(TradeState::Idle));
        service.set_request(None);
        assert_eq!(service.current(), TradeState::Idle);
    }

    #[tokio::test]
    async fn test_loading_then_no_route() {
        let service = service(None);
        let mut states = service.subscribe();
        service.set_request(Some(TradeRequest::exact_in(token(1), token(2), U256::from(10))));
        assert!(states.borrow_and_update().is_loading());

        assert_eq!(service.refresh().await, Some(TradeState::NoRoute));
        assert_eq!(*states.borrow_and_update(), TradeState::NoRoute);
    }

    #[tokio::test]
    async fn test_identical_currencies_have_no_route() {
        let service = service(None);
        service.set_request(Some(TradeRequest::exact_in(token(1), token(1), U256::from(10))));
        assert_eq!(service.refresh().await, Some(TradeState::NoRoute));
    }

    #[tokio::test]
    async fn test_stale_result_is_discarded() {
        let gate = Arc::new(Notify::new());
        let service = Arc::new(service(Some(gate.clone())));
        service.set_request(Some(TradeRequest::exact_in(token(1), token(2), U256::from(10))));

        let in_flight = {
            let service = service.clone();
            tokio::spawn(async move { service.refresh().await })
        };
        tokio::task::yield_now().await;
        service.set_request(Some(TradeRequest::exact_in(token(1), token(3), U256::from(10))));
        gate.notify_one();

        assert_eq!(in_flight.await.unwrap(), None);
        assert!(service.current().is_loading());
    }

    #[tokio::test]
    async fn test_quote_before_any_fetch_is_loading() {
        let service = service(None);
        let request = TradeRequest::exact_in(token(1), token(2), U256::from(10));
        assert!(service.quote(&request).is_loading());
        assert_eq!(service.cache().for_epoch(service.pairs.epoch()).len(), 0);

        // pairs of another request do not cover this one
        service.set_request(Some(TradeRequest::exact_in(token(1), token(3), U256::from(10))));
        service.refresh().await;
        assert!(service.quote(&request).is_loading());
    }

    #[tokio::test]
    async fn test_quote_is_cached_per_epoch() {
        let service = service(None);
        let request = TradeRequest::exact_in(token(1), token(2), U256::from(10));
        service.set_request(Some(request.clone()));
        assert_eq!(service.refresh().await, Some(TradeState::NoRoute));
        assert_eq!(service.quote(&request), TradeState::NoRoute);
        assert_eq!(service.quote(&request), TradeState::NoRoute);
        let epoch = service.pairs.epoch();
        assert_eq!(service.cache().for_epoch(epoch).len(), 1);
    }
}
