//! # Router Module
//!
//! Path primitives and the best-trade search over the tradable pools of a pair snapshot.

pub mod search;

pub use crate::pools::PoolKind;
pub use search::{
    best_trade, dedupe_pools, is_trade_better, RoutingGraph, SearchOptions,
    BETTER_TRADE_LESS_HOPS_THRESHOLD_BPS, DEFAULT_MAX_HOPS,
};

use crate::pools::PoolModel;
use crate::trade::TradeType;
use crate::types::Token;
use ethers::prelude::Address;
use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// One hop of a trade path as exchanged with clients and the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStep {
    pub source: Address,
    pub target: Address,
    pub pool_id: Address,
    #[serde(rename = "type")]
    pub kind: PoolKind,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// One priced hop of a found route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub pool: PoolModel,
    pub token_in: Token,
    pub token_out: Token,
}

impl Hop {
    pub fn to_path_step(&self) -> PathStep {
        PathStep {
            source: self.token_in.address,
            target: self.token_out.address,
            pool_id: self.pool.address(),
            kind: self.pool.kind(),
            meta: self.pool.meta(self.token_in.address),
        }
    }

    /// Fee-less value of `amount` through this hop.
    pub fn spot_quote(&self, amount: U256) -> Option<U256> {
        self.pool
            .spot_quote(self.token_in.address, self.token_out.address, amount)
    }
}

/// A route found by the search together with its valuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteCandidate {
    pub trade_type: TradeType,
    pub hops: Vec<Hop>,
    pub amount_in: U256,
    pub amount_out: U256,
}

impl RouteCandidate {
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    pub fn path(&self) -> Vec<PathStep> {
        self.hops.iter().map(Hop::to_path_step).collect()
    }

    /// Output of `amount_in` at every hop's spot price, chained.
    pub fn mid_quote(&self) -> Option<U256> {
        self.hops
            .iter()
            .try_fold(self.amount_in, |amount, hop| hop.spot_quote(amount))
    }
}
