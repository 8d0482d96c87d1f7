//! # AMM Route SDK
//!
//! Trade routing over constant-product and stable-swap pools.
//!
//! ## Pipeline
//!
//! 1. **Pair graph**: [`pair_graph::candidate_pairs`] expands a currency pair into every
//!    pool that could take part in a route through the configured bases.
//! 2. **Existence**: [`pair_existence::filter_existing`] asks the factory which of those
//!    pools are deployed, in one multicall round.
//! 3. **State**: [`pair_state::PairStateCache`] reads reserves and stable-pool balances
//!    and publishes an immutable snapshot.
//! 4. **Search**: [`router::best_trade`] finds the best hop-bounded route.
//! 5. **Trade**: [`trade::RouteQuote::into_trade`] validates the path and derives prices,
//!    price impact and slippage bounds ([`normalization`]).
//!
//! [`trade_service::TradeService`] runs the pipeline for the current request, driven by
//! [`scheduler::RefreshScheduler`] ticks (interval, new blocks, input changes).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use amm_route_sdk::{
//!     multicall::Multicall, pair_state::PairStateCache, settings::Settings,
//!     trade_service::{TradeRequest, TradeService, TradeServiceConfig},
//! };
//! use ethers::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = Settings::new()?;
//! let context = settings.routing_context()?;
//! let provider = Arc::new(Provider::<Http>::try_from("http://localhost:8545")?);
//! let multicall = Arc::new(Multicall::new(
//!     provider,
//!     context.multicall.ok_or_else(|| anyhow::anyhow!("chain.multicall is not set"))?,
//!     settings.rpc.multicall_batch_size,
//! ));
//! let pairs = Arc::new(PairStateCache::new(
//!     multicall,
//!     context.factory,
//!     context.stable_pools.clone(),
//!     context.v2_fee_bps,
//! ));
//! let service = TradeService::new(pairs, TradeServiceConfig::from(&context));
//! if let (Some(a), Some(b)) = (context.resolve_currency("ETH"), context.resolve_currency("USDC")) {
//!     service.set_request(Some(TradeRequest::exact_in(a, b, U256::exp10(18))));
//!     println!("{:?}", service.refresh().await);
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod block_number_websocket;
pub mod block_stream;
pub mod metrics;
pub mod multicall;
pub mod normalization;
pub mod pair_existence;
pub mod pair_graph;
pub mod pair_state;
pub mod pools;
pub mod router;
pub mod scheduler;
pub mod settings;
pub mod trade;
pub mod trade_service;
pub mod types;

pub use pair_graph::{candidate_pairs, RoutingBases};
pub use pair_state::{PairInfo, PairSnapshot, PairState, PairStateCache, StablePoolConfig};
pub use router::{best_trade, RoutingGraph, SearchOptions};
pub use trade::{Trade, TradeState, TradeType};
pub use trade_service::{TradeRequest, TradeService};
pub use types::{Currency, NativeCurrency, PairTokens, Token};
