//! Exhaustive hop-bounded search.
//!
//! For every hop bound `1..=max_hops` the search finds the best route within that bound
//! (no pool used twice in one path) and keeps a running best. A route with more hops
//! only displaces the running best when it beats it by more than the threshold.

use super::{Hop, RouteCandidate};
use crate::pair_state::PairSnapshot;
use crate::pools::PoolModel;
use crate::trade::TradeType;
use crate::types::Token;
use ethers::types::{Address, U256};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_MAX_HOPS: usize = 3;
/// Minimum relative improvement, in bps, before a longer route replaces a shorter one.
pub const BETTER_TRADE_LESS_HOPS_THRESHOLD_BPS: u32 = 50;

const BPS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub max_hops: usize,
    pub better_trade_threshold_bps: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
            better_trade_threshold_bps: BETTER_TRADE_LESS_HOPS_THRESHOLD_BPS,
        }
    }
}

impl SearchOptions {
    pub fn single_hop() -> Self {
        Self {
            max_hops: 1,
            ..Default::default()
        }
    }
}

/// Tradable pools of one snapshot plus the tokens they connect.
#[derive(Debug, Clone, Default)]
pub struct RoutingGraph {
    pub pools: Vec<PoolModel>,
    pub tokens: HashMap<Address, Token>,
}

impl RoutingGraph {
    pub fn from_snapshot(snapshot: &PairSnapshot) -> Self {
        let mut tokens = HashMap::new();
        let mut pools = Vec::new();
        for info in snapshot.tradable() {
            for token in [&info.token_a, &info.token_b].into_iter().flatten() {
                tokens.entry(token.address).or_insert_with(|| token.clone());
            }
            if let Some(pool) = &info.pool {
                pools.push(pool.clone());
            }
        }
        Self {
            pools: dedupe_pools(pools),
            tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    fn neighbours(&self, pool: &PoolModel, token: Address) -> Vec<Address> {
        let members: Vec<Address> = match pool {
            PoolModel::ConstantProduct(p) => vec![p.token0, p.token1],
            PoolModel::StableSwap(p) => p.tokens.clone(),
        };
        members
            .into_iter()
            .filter(|t| *t != token && self.tokens.contains_key(t))
            .collect()
    }
}

/// Keeps the first pool seen per address.
pub fn dedupe_pools(pools: Vec<PoolModel>) -> Vec<PoolModel> {
    let mut seen = HashSet::new();
    pools
        .into_iter()
        .filter(|pool| seen.insert(pool.address()))
        .collect()
}

/// `true` when `candidate` should replace `best`.
pub fn is_trade_better(
    best: Option<&RouteCandidate>,
    candidate: Option<&RouteCandidate>,
    threshold_bps: u32,
) -> bool {
    let (best, candidate) = match (best, candidate) {
        (_, None) => return false,
        (None, Some(_)) => return true,
        (Some(best), Some(candidate)) => (best, candidate),
    };
    let bps = U256::from(BPS);
    let bps_plus_t = U256::from(BPS + u64::from(threshold_bps));
    let more_hops = candidate.hop_count() > best.hop_count();
    match candidate.trade_type {
        TradeType::ExactIn => {
            if more_hops {
                candidate.amount_out.full_mul(bps) > best.amount_out.full_mul(bps_plus_t)
            } else {
                candidate.amount_out >= best.amount_out
            }
        }
        TradeType::ExactOut => {
            if more_hops {
                candidate.amount_in.full_mul(bps_plus_t) < best.amount_in.full_mul(bps)
            } else {
                candidate.amount_in <= best.amount_in
            }
        }
    }
}

/// Best trade of `amount` between `token_in` and `token_out`. For exact-in `amount` is
/// the input, for exact-out it is the wanted output.
pub fn best_trade(
    graph: &RoutingGraph,
    trade_type: TradeType,
    token_in: &Token,
    token_out: &Token,
    amount: U256,
    options: SearchOptions,
) -> Option<RouteCandidate> {
    if amount.is_zero() || graph.is_empty() || token_in == token_out || options.max_hops == 0 {
        return None;
    }
    if options.max_hops == 1 {
        return search_within(graph, trade_type, token_in, token_out, amount, 1);
    }

    let mut best: Option<RouteCandidate> = None;
    for hops in 1..=options.max_hops {
        let candidate = search_within(graph, trade_type, token_in, token_out, amount, hops);
        if is_trade_better(best.as_ref(), candidate.as_ref(), options.better_trade_threshold_bps) {
            best = candidate;
        }
    }
    best
}

type RawHop = (usize, Address, Address);

struct Search<'a> {
    graph: &'a RoutingGraph,
    trade_type: TradeType,
    goal: Address,
    amount: U256,
    best: Option<(Vec<RawHop>, U256)>,
}

impl<'a> Search<'a> {
    /// The valuation at the far end: output for exact-in, input for exact-out.
    fn improves(&self, value: U256, hops: usize) -> bool {
        match &self.best {
            None => true,
            Some((path, best)) => match self.trade_type {
                TradeType::ExactIn => value > *best || (value == *best && hops < path.len()),
                TradeType::ExactOut => value < *best || (value == *best && hops < path.len()),
            },
        }
    }

    fn walk(
        &mut self,
        current: Address,
        amount: U256,
        hops_left: usize,
        used: &mut Vec<usize>,
        path: &mut Vec<RawHop>,
    ) {
        let graph = self.graph;
        for (index, pool) in graph.pools.iter().enumerate() {
            if used.contains(&index) || !pool.involves(current) {
                continue;
            }
            for next in graph.neighbours(pool, current) {
                let (hop, quoted) = match self.trade_type {
                    TradeType::ExactIn => (
                        (index, current, next),
                        pool.get_amount_out(current, next, amount),
                    ),
                    TradeType::ExactOut => (
                        (index, next, current),
                        pool.get_amount_in(next, current, amount),
                    ),
                };
                let Some(quoted) = quoted else { continue };

                path.push(hop);
                if next == self.goal {
                    if self.improves(quoted, path.len()) {
                        self.best = Some((path.clone(), quoted));
                    }
                } else if hops_left > 1 {
                    used.push(index);
                    self.walk(next, quoted, hops_left - 1, used, path);
                    used.pop();
                }
                path.pop();
            }
        }
    }

    fn into_candidate(self) -> Option<RouteCandidate> {
        let (mut raw, value) = self.best?;
        if self.trade_type == TradeType::ExactOut {
            // walked backwards from the output
            raw.reverse();
        }
        let hops = raw
            .into_iter()
            .map(|(index, token_in, token_out)| {
                Some(Hop {
                    pool: self.graph.pools.get(index)?.clone(),
                    token_in: self.graph.tokens.get(&token_in)?.clone(),
                    token_out: self.graph.tokens.get(&token_out)?.clone(),
                })
            })
            .collect::<Option<Vec<Hop>>>()?;
        let (amount_in, amount_out) = match self.trade_type {
            TradeType::ExactIn => (self.amount, value),
            TradeType::ExactOut => (value, self.amount),
        };
        Some(RouteCandidate {
            trade_type: self.trade_type,
            hops,
            amount_in,
            amount_out,
        })
    }
}

fn search_within(
    graph: &RoutingGraph,
    trade_type: TradeType,
    token_in: &Token,
    token_out: &Token,
    amount: U256,
    max_hops: usize,
) -> Option<RouteCandidate> {
    let (start, goal) = match trade_type {
        TradeType::ExactIn => (token_in.address, token_out.address),
        TradeType::ExactOut => (token_out.address, token_in.address),
    };
    let mut search = Search {
        graph,
        trade_type,
        goal,
        amount,
        best: None,
    };
    search.walk(start, amount, max_hops, &mut Vec::new(), &mut Vec::new());
    search.into_candidate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::ConstantProductPool;

    fn token(byte: u8) -> Token {
        Token::new(1, Address::repeat_byte(byte), 18, None, None).unwrap()
    }

    fn e18(v: u64) -> U256 {
        U256::from(v) * U256::exp10(18)
    }

    /// Pool between `x` and `y` holding `rx` of x and `ry` of y.
    fn pool(addr: u8, x: &Token, rx: U256, y: &Token, ry: U256) -> PoolModel {
        let (token0, reserve0, token1, reserve1) = if x.sorts_before(y) {
            (x.address, rx, y.address, ry)
        } else {
            (y.address, ry, x.address, rx)
        };
        PoolModel::ConstantProduct(ConstantProductPool {
            address: Address::repeat_byte(addr),
            token0,
            token1,
            reserve0,
            reserve1,
            fee_bps: 30,
        })
    }

    fn graph(pools: Vec<PoolModel>, tokens: &[&Token]) -> RoutingGraph {
        RoutingGraph {
            pools: dedupe_pools(pools),
            tokens: tokens.iter().map(|t| (t.address, (*t).clone())).collect(),
        }
    }

    fn candidate(trade_type: TradeType, hops: usize, amount_in: u64, amount_out: u64) -> RouteCandidate {
        let a = token(1);
        let b = token(2);
        let hop = Hop {
            pool: pool(0xAA, &a, e18(1), &b, e18(1)),
            token_in: a,
            token_out: b,
        };
        RouteCandidate {
            trade_type,
            hops: vec![hop; hops],
            amount_in: U256::from(amount_in),
            amount_out: U256::from(amount_out),
        }
    }

    #[test]
    fn test_longer_route_must_clear_threshold() {
        let one_hop = candidate(TradeType::ExactIn, 1, 100, 10_000);
        // 0.5% exactly is not enough
        let at_threshold = candidate(TradeType::ExactIn, 2, 100, 10_050);
        let above = candidate(TradeType::ExactIn, 2, 100, 10_051);
        assert!(!is_trade_better(Some(&one_hop), Some(&at_threshold), 50));
        assert!(is_trade_better(Some(&one_hop), Some(&above), 50));
    }

    #[test]
    fn test_shorter_or_equal_route_replaces_when_not_worse() {
        let two_hop = candidate(TradeType::ExactIn, 2, 100, 10_000);
        let one_hop_equal = candidate(TradeType::ExactIn, 1, 100, 10_000);
        let one_hop_worse = candidate(TradeType::ExactIn, 1, 100, 9_999);
        assert!(is_trade_better(Some(&two_hop), Some(&one_hop_equal), 50));
        assert!(!is_trade_better(Some(&two_hop), Some(&one_hop_worse), 50));
        assert!(is_trade_better(None, Some(&one_hop_worse), 50));
        assert!(!is_trade_better(Some(&two_hop), None, 50));
    }

    #[test]
    fn test_exact_out_threshold_applies_to_input() {
        let one_hop = candidate(TradeType::ExactOut, 1, 10_000, 100);
        let marginal = candidate(TradeType::ExactOut, 2, 9_960, 100);
        let clear = candidate(TradeType::ExactOut, 2, 9_900, 100);
        assert!(!is_trade_better(Some(&one_hop), Some(&marginal), 50));
        assert!(is_trade_better(Some(&one_hop), Some(&clear), 50));
    }

    #[test]
    fn test_routes_through_base_when_no_direct_pool() {
        let (weth, a, b) = (token(0x10), token(0x01), token(0x02));
        let g = graph(
            vec![
                pool(0xA1, &weth, e18(100), &a, e18(200)),
                pool(0xA2, &weth, e18(200), &b, e18(100)),
            ],
            &[&weth, &a, &b],
        );
        let options = SearchOptions {
            max_hops: 2,
            ..Default::default()
        };
        let trade = best_trade(&g, TradeType::ExactIn, &a, &b, e18(10), options).unwrap();
        assert_eq!(trade.hop_count(), 2);
        assert_eq!(trade.hops[0].token_in, a);
        assert_eq!(trade.hops[0].token_out, weth);
        assert_eq!(trade.hops[1].token_out, b);
        assert!(trade.amount_out > U256::zero());

        assert!(best_trade(&g, TradeType::ExactIn, &a, &b, e18(10), SearchOptions::single_hop()).is_none());
    }

    #[test]
    fn test_exact_out_path_is_in_trade_order() {
        let (weth, a, b) = (token(0x10), token(0x01), token(0x02));
        let g = graph(
            vec![
                pool(0xA1, &weth, e18(1_000), &a, e18(1_000)),
                pool(0xA2, &weth, e18(1_000), &b, e18(1_000)),
            ],
            &[&weth, &a, &b],
        );
        let trade = best_trade(&g, TradeType::ExactOut, &a, &b, e18(1), SearchOptions::default()).unwrap();
        assert_eq!(trade.amount_out, e18(1));
        assert_eq!(trade.hops[0].token_in, a);
        assert_eq!(trade.hops[1].token_out, b);
        assert!(trade.amount_in > e18(1));
    }

    #[test]
    fn test_direct_wins_small_orders_and_base_route_wins_large() {
        let (weth, a, b) = (token(0x10), token(0x01), token(0x02));
        // direct pool is shallow, the base route pays two fees
        let g = graph(
            vec![
                pool(0xA0, &a, e18(1_000), &b, e18(1_000)),
                pool(0xA1, &a, e18(1_000_000), &weth, e18(1_000_000)),
                pool(0xA2, &weth, e18(1_000_000), &b, e18(1_000_000)),
            ],
            &[&weth, &a, &b],
        );
        let small = best_trade(&g, TradeType::ExactIn, &a, &b, e18(1), SearchOptions::default()).unwrap();
        assert_eq!(small.hop_count(), 1);

        // a large order moves the shallow pool enough for the base route to win
        let large = best_trade(&g, TradeType::ExactIn, &a, &b, e18(100), SearchOptions::default()).unwrap();
        assert_eq!(large.hop_count(), 2);
    }

    #[test]
    fn test_identical_tokens_zero_amount_and_unfillable_hops_have_no_route() {
        let (a, b) = (token(0x01), token(0x02));
        let g = graph(vec![pool(0xA0, &a, U256::from(10), &b, U256::from(10))], &[&a, &b]);
        assert!(best_trade(&g, TradeType::ExactIn, &a, &a, e18(1), SearchOptions::default()).is_none());
        assert!(best_trade(&g, TradeType::ExactIn, &a, &b, U256::zero(), SearchOptions::default()).is_none());
        assert!(best_trade(&g, TradeType::ExactOut, &a, &b, U256::from(10), SearchOptions::default()).is_none());
        assert!(best_trade(&RoutingGraph::default(), TradeType::ExactIn, &a, &b, e18(1), SearchOptions::default()).is_none());
    }

    #[test]
    fn test_duplicate_pool_addresses_keep_first() {
        let (a, b) = (token(0x01), token(0x02));
        let deep = pool(0xA0, &a, e18(1_000), &b, e18(1_000));
        let shallow = pool(0xA0, &a, e18(1), &b, e18(1));
        let pools = dedupe_pools(vec![deep.clone(), shallow]);
        assert_eq!(pools, vec![deep]);
    }
}
