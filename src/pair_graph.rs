//! # Pair Graph Builder
//!
//! Produces the candidate pairs worth investigating for a trade between two currencies:
//! the direct pair plus one leg from each routing base to each side.
//!
//! ## Rules
//!
//! 1. Native currencies are replaced by their wrapped token.
//! 2. A side that is itself a base gets no base legs.
//! 3. Pairs of a token with itself are dropped.
//! 4. Custom-base restrictions: a token with an allow-list only pairs with tokens on it.
//! 5. Output is canonical (`PairTokens`) and deduplicated, first occurrence wins.
//!
//! An unknown chain, a missing currency, or a currency from another chain yields no
//! candidates.

use crate::types::{Currency, PairKey, PairTokens, Token};
use ethers::types::Address;
use indexmap::IndexMap;
use log::debug;
use std::collections::HashMap;

/// Per-chain routing bases injected by the caller.
#[derive(Debug, Clone, Default)]
pub struct RoutingBases {
    /// Ordered intermediate tokens tried on both sides of every trade.
    pub bases: Vec<Token>,
    /// `token → allowed counter-tokens`. A listed token never pairs outside its list.
    pub custom_bases: HashMap<Address, Vec<Token>>,
    /// `token → extra bases` appended to the base list whenever that token is traded.
    pub additional_bases: HashMap<Address, Vec<Token>>,
}

impl RoutingBases {
    pub fn new(bases: Vec<Token>) -> Self {
        Self {
            bases,
            ..Default::default()
        }
    }

    pub fn with_custom_bases(mut self, token: Address, allowed: Vec<Token>) -> Self {
        self.custom_bases.insert(token, allowed);
        self
    }

    pub fn with_additional_bases(mut self, token: Address, extra: Vec<Token>) -> Self {
        self.additional_bases.insert(token, extra);
        self
    }

    pub fn is_base(&self, token: &Token) -> bool {
        self.bases.contains(token)
    }

    /// Chain bases followed by the additional bases of either side, without repeats.
    fn bases_for(&self, a: &Token, b: &Token) -> Vec<Token> {
        let mut all = self.bases.clone();
        for extra in [a, b]
            .iter()
            .filter_map(|t| self.additional_bases.get(&t.address))
            .flatten()
        {
            if !all.contains(extra) {
                all.push(extra.clone());
            }
        }
        all
    }

    fn passes_custom_bases(&self, x: &Token, y: &Token) -> bool {
        if let Some(allowed) = self.custom_bases.get(&x.address) {
            if !allowed.contains(y) {
                return false;
            }
        }
        if let Some(allowed) = self.custom_bases.get(&y.address) {
            if !allowed.contains(x) {
                return false;
            }
        }
        true
    }
}

/// Builds the deduplicated candidate pair set for a trade between `currency_a` and
/// `currency_b` on `chain_id`.
pub fn candidate_pairs(
    chain_id: Option<u64>,
    currency_a: Option<&Currency>,
    currency_b: Option<&Currency>,
    bases: &RoutingBases,
) -> Vec<PairTokens> {
    let (Some(chain_id), Some(currency_a), Some(currency_b)) = (chain_id, currency_a, currency_b)
    else {
        return Vec::new();
    };
    if currency_a.chain_id() != chain_id || currency_b.chain_id() != chain_id {
        debug!(
            "candidate_pairs: currency chain mismatch (active {}, got {} / {})",
            chain_id,
            currency_a.chain_id(),
            currency_b.chain_id()
        );
        return Vec::new();
    }

    let token_a = currency_a.wrapped();
    let token_b = currency_b.wrapped();
    if token_a.address == token_b.address {
        // native and its wrapped token included
        return Vec::new();
    }
    let route_bases: Vec<Token> = bases
        .bases_for(token_a, token_b)
        .into_iter()
        .filter(|base| base.chain_id == chain_id)
        .collect();

    let mut raw: Vec<(&Token, &Token)> = vec![(token_a, token_b)];
    for side in [token_a, token_b] {
        if route_bases.contains(side) {
            continue;
        }
        raw.extend(route_bases.iter().map(|base| (base, side)));
    }

    let mut unique: IndexMap<PairKey, PairTokens> = IndexMap::new();
    for (x, y) in raw {
        if x.address == y.address || !bases.passes_custom_bases(x, y) {
            continue;
        }
        if let Some(pair) = PairTokens::new(x.clone(), y.clone()) {
            unique.entry(pair.key()).or_insert(pair);
        }
    }

    debug!(
        "candidate_pairs: {} -> {} yields {} candidates over {} bases",
        token_a,
        token_b,
        unique.len(),
        route_bases.len()
    );
    unique.into_values().collect()
}
