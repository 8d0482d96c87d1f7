//! # Pair State Cache
//!
//! Resolves candidate pairs into tradable pool state in one multicall round per refresh
//! and publishes the result as an immutable [`PairSnapshot`].
//!
//! ## Flow
//!
//! 1. Pairs covered by a configured stable pool use that pool directly.
//! 2. The remaining pairs go through the factory existence filter.
//! 3. One batch reads `getReserves`/`token0`/`totalSupply` per standard pair and
//!    `getTokenBalances`/`getA`/LP `totalSupply` per stable pool.
//! 4. Reserves are stored in canonical (A, B) order.
//!
//! Readers take the snapshot through `ArcSwap` without locking. The entry map keeps the
//! latest [`PairInfo`] per key of the current candidate set so `invalidate()` can flip
//! everything back to `Loading`. Keys that drop out of the candidate set are pruned on
//! the next refresh.

use crate::metrics;
use crate::multicall::{BatchReader, Call};
use crate::pair_existence::{decode_address, filter_existing};
use crate::pools::{ConstantProductPool, PoolModel, StableSwapPool};
use crate::types::{PairKey, PairTokens, Token};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::abi::{self, ParamType};
use ethers::types::{Address, Bytes, U256};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const GET_RESERVES: &str = "getReserves()";
const TOKEN0: &str = "token0()";
const TOTAL_SUPPLY: &str = "totalSupply()";
const GET_TOKEN_BALANCES: &str = "getTokenBalances()";
const GET_A: &str = "getA()";
/// Width of a `uint112` reserve slot.
const MAX_RESERVE_BITS: usize = 112;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairState {
    Loading,
    NotExists,
    Exists,
    Invalid,
}

impl PairState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairState::Loading => "loading",
            PairState::NotExists => "not_exists",
            PairState::Exists => "exists",
            PairState::Invalid => "invalid",
        }
    }
}

/// Resolved state of one pair. Reserves are in `(token_a, token_b)` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairInfo {
    pub token_a: Option<Token>,
    pub token_b: Option<Token>,
    pub state: PairState,
    pub liquidity_token: Option<Address>,
    pub reserve_a: Option<U256>,
    pub reserve_b: Option<U256>,
    pub liquidity_token_supply: Option<U256>,
    pub is_stable_pool: bool,
    pub pool: Option<PoolModel>,
}

impl PairInfo {
    fn with_state(pair: &PairTokens, state: PairState) -> Self {
        Self {
            token_a: Some(pair.token_a().clone()),
            token_b: Some(pair.token_b().clone()),
            state,
            liquidity_token: None,
            reserve_a: None,
            reserve_b: None,
            liquidity_token_supply: None,
            is_stable_pool: false,
            pool: None,
        }
    }

    pub fn loading(pair: &PairTokens) -> Self {
        Self::with_state(pair, PairState::Loading)
    }

    pub fn not_exists(pair: &PairTokens) -> Self {
        Self::with_state(pair, PairState::NotExists)
    }

    /// Missing or identical tokens.
    pub fn invalid(token_a: Option<Token>, token_b: Option<Token>) -> Self {
        Self {
            token_a,
            token_b,
            state: PairState::Invalid,
            liquidity_token: None,
            reserve_a: None,
            reserve_b: None,
            liquidity_token_supply: None,
            is_stable_pool: false,
            pool: None,
        }
    }

    pub fn is_tradable(&self) -> bool {
        self.state == PairState::Exists && self.pool.is_some()
    }

    pub fn key(&self) -> Option<PairKey> {
        let (a, b) = (self.token_a.as_ref()?, self.token_b.as_ref()?);
        PairTokens::new(a.clone(), b.clone()).map(|p| p.key())
    }
}

/// Configured stable pool. `tokens` follow the on-chain coin index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StablePoolConfig {
    pub address: Address,
    pub lp_token: Address,
    pub tokens: Vec<Token>,
    /// Used when `getA()` cannot be read.
    pub amplification: U256,
    pub fee_bps: u32,
}

impl StablePoolConfig {
    pub fn covers(&self, pair: &PairTokens) -> bool {
        self.tokens.contains(pair.token_a()) && self.tokens.contains(pair.token_b())
    }

    fn index_of(&self, token: &Token) -> Option<usize> {
        self.tokens.iter().position(|t| t == token)
    }
}

/// Immutable result of one refresh.
#[derive(Debug, Clone)]
pub struct PairSnapshot {
    pub epoch: u64,
    pub fetched_at: DateTime<Utc>,
    pub pairs: Arc<Vec<PairInfo>>,
}

impl PairSnapshot {
    fn empty(epoch: u64) -> Self {
        Self {
            epoch,
            fetched_at: Utc::now(),
            pairs: Arc::new(Vec::new()),
        }
    }

    pub fn tradable(&self) -> impl Iterator<Item = &PairInfo> {
        self.pairs.iter().filter(|p| p.is_tradable())
    }

    pub fn count(&self, state: PairState) -> usize {
        self.pairs.iter().filter(|p| p.state == state).count()
    }
}

/// One pool read planned into the multicall round.
enum PlannedRead<'a> {
    Standard { pair: &'a PairTokens, pool: Address },
    Stable { pair: &'a PairTokens, config: &'a StablePoolConfig },
}

pub struct PairStateCache<R: BatchReader + ?Sized> {
    reader: Arc<R>,
    factory: Option<Address>,
    stable_pools: Vec<StablePoolConfig>,
    v2_fee_bps: u32,
    entries: DashMap<PairKey, PairInfo>,
    snapshot: ArcSwap<PairSnapshot>,
    epoch: AtomicU64,
}

impl<R: BatchReader + ?Sized> PairStateCache<R> {
    pub fn new(
        reader: Arc<R>,
        factory: Option<Address>,
        stable_pools: Vec<StablePoolConfig>,
        v2_fee_bps: u32,
    ) -> Self {
        Self {
            reader,
            factory,
            stable_pools,
            v2_fee_bps,
            entries: DashMap::new(),
            snapshot: ArcSwap::from_pointee(PairSnapshot::empty(0)),
            epoch: AtomicU64::new(0),
        }
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<PairSnapshot> {
        self.snapshot.load_full()
    }

    pub fn epoch(&self) -> u64 {
        self.snapshot.load().epoch
    }

    pub fn entry(&self, key: &PairKey) -> Option<PairInfo> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Marks every cached pair `Loading`. `Invalid` entries stay as they are.
    pub fn invalidate(&self) {
        for mut entry in self.entries.iter_mut() {
            if entry.state != PairState::Invalid {
                entry.state = PairState::Loading;
            }
        }
        debug!("PairStateCache: invalidated {} entries", self.entries.len());
    }

    /// Resolves a fixed list of possibly incomplete pairs. Missing or identical tokens
    /// become `Invalid` entries of the published snapshot.
    pub async fn refresh_official(
        &self,
        pairs: &[(Option<Token>, Option<Token>)],
    ) -> Arc<PairSnapshot> {
        let mut valid = Vec::with_capacity(pairs.len());
        let mut invalid = Vec::new();
        for (a, b) in pairs {
            match (a, b) {
                (Some(a), Some(b)) => match PairTokens::new(a.clone(), b.clone()) {
                    Some(pair) => valid.push(pair),
                    None => invalid.push(PairInfo::invalid(Some(a.clone()), Some(b.clone()))),
                },
                _ => invalid.push(PairInfo::invalid(a.clone(), b.clone())),
            }
        }
        self.refresh_inner(&valid, invalid).await
    }

    /// Resolves the candidate set of one refresh tick and publishes a new snapshot.
    pub async fn refresh(&self, candidates: &[PairTokens]) -> Arc<PairSnapshot> {
        self.refresh_inner(candidates, Vec::new()).await
    }

    async fn refresh_inner(
        &self,
        candidates: &[PairTokens],
        invalid: Vec<PairInfo>,
    ) -> Arc<PairSnapshot> {
        let current: HashSet<PairKey> = candidates.iter().map(|p| p.key()).collect();
        self.entries.retain(|key, _| current.contains(key));
        for pair in candidates {
            self.entries
                .entry(pair.key())
                .and_modify(|e| e.state = PairState::Loading)
                .or_insert_with(|| PairInfo::loading(pair));
        }

        let (stable, standard): (Vec<&PairTokens>, Vec<&PairTokens>) = candidates
            .iter()
            .partition(|pair| self.stable_pool_for(pair).is_some());

        let standard_owned: Vec<PairTokens> = standard.iter().map(|p| (*p).clone()).collect();
        let existing = match filter_existing(self.reader.as_ref(), self.factory, &standard_owned).await
        {
            Ok(existing) => existing,
            Err(e) => {
                // entries stay Loading: a failed lookup says nothing about deployment
                warn!("PairStateCache: existence lookup failed: {}", e);
                return self.publish(Vec::new());
            }
        };

        let mut plan: Vec<PlannedRead<'_>> = Vec::with_capacity(stable.len() + existing.len());
        for pair in stable.iter().copied() {
            if let Some(config) = self.stable_pool_for(pair) {
                plan.push(PlannedRead::Stable { pair, config });
            }
        }
        for found in &existing {
            if let Some(pair) = standard
                .iter()
                .copied()
                .find(|p| p.key() == found.tokens.key())
            {
                plan.push(PlannedRead::Standard {
                    pair,
                    pool: found.pool,
                });
            }
        }

        let mut resolved: Vec<PairInfo> = Vec::with_capacity(candidates.len() + invalid.len());
        if !plan.is_empty() {
            let calls: Vec<Call> = plan.iter().flat_map(Self::calls_for).collect();
            let results = match self.reader.aggregate(calls).await {
                Ok(results) if results.len() == plan.len() * 3 => results,
                Ok(results) => {
                    warn!(
                        "PairStateCache: expected {} results, got {}",
                        plan.len() * 3,
                        results.len()
                    );
                    metrics::increment_multicall_fetch_failed("pair_state");
                    return self.publish(Vec::new());
                }
                Err(e) => {
                    warn!("PairStateCache: state batch failed: {}", e);
                    metrics::increment_multicall_fetch_failed("pair_state");
                    return self.publish(Vec::new());
                }
            };

            for (read, chunk) in plan.iter().zip(results.chunks(3)) {
                let info = match read {
                    PlannedRead::Standard { pair, pool } => {
                        self.decode_standard(pair, *pool, chunk)
                    }
                    PlannedRead::Stable { pair, config } => decode_stable(pair, config, chunk),
                };
                resolved.push(info);
            }
        }

        // Candidates the factory does not know
        for pair in candidates {
            if !resolved.iter().any(|info| info.key() == Some(pair.key())) {
                resolved.push(PairInfo::not_exists(pair));
            }
        }

        for info in &resolved {
            if let Some(key) = info.key() {
                self.entries.insert(key, info.clone());
            }
        }
        resolved.extend(invalid);
        self.publish(resolved)
    }

    fn stable_pool_for(&self, pair: &PairTokens) -> Option<&StablePoolConfig> {
        self.stable_pools.iter().find(|config| config.covers(pair))
    }

    fn calls_for(read: &PlannedRead<'_>) -> Vec<Call> {
        match read {
            PlannedRead::Standard { pool, .. } => vec![
                Call::new(*pool, GET_RESERVES, &[]),
                Call::new(*pool, TOKEN0, &[]),
                Call::new(*pool, TOTAL_SUPPLY, &[]),
            ],
            PlannedRead::Stable { config, .. } => vec![
                Call::new(config.address, GET_TOKEN_BALANCES, &[]),
                Call::new(config.address, GET_A, &[]),
                Call::new(config.lp_token, TOTAL_SUPPLY, &[]),
            ],
        }
    }

    fn decode_standard(&self, pair: &PairTokens, pool: Address, chunk: &[Option<Bytes>]) -> PairInfo {
        let reserves = chunk.first().and_then(|r| decode_reserves(r.as_ref()?));
        let token0 = chunk.get(1).and_then(|r| decode_address(r.as_ref()?));
        let supply = chunk.get(2).and_then(|r| decode_uint(r.as_ref()?));

        let (Some((reserve0, reserve1)), Some(token0)) = (reserves, token0) else {
            debug!("PairStateCache: {} at {:?} returned no reserves", pair, pool);
            return PairInfo::not_exists(pair);
        };
        let (reserve_a, reserve_b) = if token0 == pair.token_a().address {
            (reserve0, reserve1)
        } else if token0 == pair.token_b().address {
            (reserve1, reserve0)
        } else {
            warn!(
                "PairStateCache: pool {:?} token0 {:?} does not belong to {}",
                pool, token0, pair
            );
            return PairInfo::not_exists(pair);
        };
        if reserve_a.is_zero() || reserve_b.is_zero() {
            return PairInfo::not_exists(pair);
        }

        PairInfo {
            token_a: Some(pair.token_a().clone()),
            token_b: Some(pair.token_b().clone()),
            state: PairState::Exists,
            liquidity_token: Some(pool),
            reserve_a: Some(reserve_a),
            reserve_b: Some(reserve_b),
            liquidity_token_supply: supply,
            is_stable_pool: false,
            pool: Some(PoolModel::ConstantProduct(ConstantProductPool {
                address: pool,
                token0: pair.token_a().address,
                token1: pair.token_b().address,
                reserve0: reserve_a,
                reserve1: reserve_b,
                fee_bps: self.v2_fee_bps,
            })),
        }
    }

    fn publish(&self, pairs: Vec<PairInfo>) -> Arc<PairSnapshot> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(PairSnapshot {
            epoch,
            fetched_at: Utc::now(),
            pairs: Arc::new(pairs),
        });
        for state in [PairState::Exists, PairState::NotExists, PairState::Invalid] {
            metrics::increment_pair_state(state.as_str(), snapshot.count(state) as u64);
        }
        info!(
            "PairStateCache: epoch {} published {} pairs ({} tradable)",
            epoch,
            snapshot.pairs.len(),
            snapshot.count(PairState::Exists)
        );
        self.snapshot.store(snapshot.clone());
        snapshot
    }
}

fn decode_stable(pair: &PairTokens, config: &StablePoolConfig, chunk: &[Option<Bytes>]) -> PairInfo {
    let balances = chunk.first().and_then(|r| decode_uint_array(r.as_ref()?));
    let amplification = chunk
        .get(1)
        .and_then(|r| decode_uint(r.as_ref()?))
        .filter(|a| !a.is_zero())
        .unwrap_or(config.amplification);
    let supply = chunk.get(2).and_then(|r| decode_uint(r.as_ref()?));

    let Some(balances) = balances.filter(|b| b.len() == config.tokens.len()) else {
        debug!("PairStateCache: stable pool {:?} returned no balances", config.address);
        return PairInfo::not_exists(pair);
    };
    let (Some(index_a), Some(index_b)) = (config.index_of(pair.token_a()), config.index_of(pair.token_b()))
    else {
        return PairInfo::not_exists(pair);
    };
    let (reserve_a, reserve_b) = (balances[index_a], balances[index_b]);
    if reserve_a.is_zero() || reserve_b.is_zero() {
        return PairInfo::not_exists(pair);
    }

    let model = match StableSwapPool::new(
        config.address,
        config.lp_token,
        config.tokens.iter().map(|t| t.address).collect(),
        config.tokens.iter().map(|t| t.decimals).collect(),
        balances,
        amplification,
        config.fee_bps,
    ) {
        Ok(model) => model,
        Err(e) => {
            warn!("PairStateCache: stable pool {:?} rejected: {}", config.address, e);
            return PairInfo::not_exists(pair);
        }
    };

    PairInfo {
        token_a: Some(pair.token_a().clone()),
        token_b: Some(pair.token_b().clone()),
        state: PairState::Exists,
        liquidity_token: Some(config.lp_token),
        reserve_a: Some(reserve_a),
        reserve_b: Some(reserve_b),
        liquidity_token_supply: supply,
        is_stable_pool: true,
        pool: Some(PoolModel::StableSwap(model)),
    }
}

fn decode_reserves(data: &Bytes) -> Option<(U256, U256)> {
    let mut tokens = abi::decode(
        &[ParamType::Uint(112), ParamType::Uint(112), ParamType::Uint(32)],
        &data[..],
    )
    .ok()?
    .into_iter();
    let reserve0 = tokens.next()?.into_uint()?;
    let reserve1 = tokens.next()?.into_uint()?;
    if reserve0.bits() > MAX_RESERVE_BITS || reserve1.bits() > MAX_RESERVE_BITS {
        return None;
    }
    Some((reserve0, reserve1))
}

fn decode_uint(data: &Bytes) -> Option<U256> {
    abi::decode(&[ParamType::Uint(256)], &data[..])
        .ok()?
        .into_iter()
        .next()?
        .into_uint()
}

fn decode_uint_array(data: &Bytes) -> Option<Vec<U256>> {
    abi::decode(&[ParamType::Array(Box::new(ParamType::Uint(256)))], &data[..])
        .ok()?
        .into_iter()
        .next()?
        .into_array()?
        .into_iter()
        .map(|t| t.into_uint())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethers::abi::Token as AbiToken;
    use std::sync::Mutex;

    /// Answers every call from a queue of canned batches.
    struct ScriptedReader {
        batches: Mutex<Vec<anyhow::Result<Vec<Option<Bytes>>>>>,
    }

    impl ScriptedReader {
        fn new(mut batches: Vec<anyhow::Result<Vec<Option<Bytes>>>>) -> Self {
            batches.reverse();
            Self {
                batches: Mutex::new(batches),
            }
        }
    }

    #[async_trait]
    impl BatchReader for ScriptedReader {
        async fn aggregate(&self, _calls: Vec<Call>) -> anyhow::Result<Vec<Option<Bytes>>> {
            self.batches
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted batch left")))
        }
    }

    fn token(byte: u8) -> Token {
        Token::new(1, Address::repeat_byte(byte), 18, None, None).unwrap()
    }

    fn enc(tokens: &[AbiToken]) -> Option<Bytes> {
        Some(Bytes::from(abi::encode(tokens)))
    }

    fn reserves(r0: u64, r1: u64) -> Option<Bytes> {
        enc(&[
            AbiToken::Uint(r0.into()),
            AbiToken::Uint(r1.into()),
            AbiToken::Uint(0u64.into()),
        ])
    }

    #[tokio::test]
    async fn test_reserves_reordered_to_canonical_order() {
        let pair = PairTokens::new(token(1), token(2)).unwrap();
        let pool = Address::repeat_byte(0xA0);
        // pool reports token0 = token_b
        let reader = ScriptedReader::new(vec![
            Ok(vec![enc(&[AbiToken::Address(pool)])]),
            Ok(vec![
                reserves(500, 900),
                enc(&[AbiToken::Address(token(2).address)]),
                enc(&[AbiToken::Uint(77u64.into())]),
            ]),
        ]);
        let cache = PairStateCache::new(Arc::new(reader), Some(Address::repeat_byte(0xF0)), vec![], 30);
        let snapshot = cache.refresh(&[pair.clone()]).await;

        let info = &snapshot.pairs[0];
        assert_eq!(info.state, PairState::Exists);
        assert_eq!(info.reserve_a, Some(U256::from(900)));
        assert_eq!(info.reserve_b, Some(U256::from(500)));
        assert_eq!(info.liquidity_token, Some(pool));
        assert_eq!(info.liquidity_token_supply, Some(U256::from(77)));
        assert_eq!(snapshot.epoch, 1);
    }

    #[tokio::test]
    async fn test_zero_reserves_and_unknown_pairs_do_not_exist() {
        let known = PairTokens::new(token(1), token(2)).unwrap();
        let unknown = PairTokens::new(token(1), token(3)).unwrap();
        let pool = Address::repeat_byte(0xA0);
        let reader = ScriptedReader::new(vec![
            Ok(vec![enc(&[AbiToken::Address(pool)]), enc(&[AbiToken::Address(Address::zero())])]),
            Ok(vec![
                reserves(0, 900),
                enc(&[AbiToken::Address(token(1).address)]),
                enc(&[AbiToken::Uint(1u64.into())]),
            ]),
        ]);
        let cache = PairStateCache::new(Arc::new(reader), Some(Address::repeat_byte(0xF0)), vec![], 30);
        let snapshot = cache.refresh(&[known.clone(), unknown.clone()]).await;
        assert_eq!(snapshot.count(PairState::NotExists), 2);
        assert_eq!(snapshot.tradable().count(), 0);
        assert_eq!(cache.entry(&unknown.key()).map(|e| e.state), Some(PairState::NotExists));
    }

    #[tokio::test]
    async fn test_batch_failure_publishes_empty_snapshot() {
        let pair = PairTokens::new(token(1), token(2)).unwrap();
        let reader = ScriptedReader::new(vec![
            Ok(vec![enc(&[AbiToken::Address(Address::repeat_byte(0xA0))])]),
            Err(anyhow::anyhow!("timeout")),
        ]);
        let cache = PairStateCache::new(Arc::new(reader), Some(Address::repeat_byte(0xF0)), vec![], 30);
        let snapshot = cache.refresh(&[pair]).await;
        assert!(snapshot.pairs.is_empty());
        assert_eq!(cache.epoch(), 1);
    }

    #[tokio::test]
    async fn test_reserves_wider_than_uint112_are_rejected() {
        let pair = PairTokens::new(token(1), token(2)).unwrap();
        let too_wide = U256::one() << 112;
        let reader = ScriptedReader::new(vec![
            Ok(vec![enc(&[AbiToken::Address(Address::repeat_byte(0xA0))])]),
            Ok(vec![
                enc(&[
                    AbiToken::Uint(too_wide),
                    AbiToken::Uint(900u64.into()),
                    AbiToken::Uint(0u64.into()),
                ]),
                enc(&[AbiToken::Address(token(1).address)]),
                enc(&[AbiToken::Uint(1u64.into())]),
            ]),
        ]);
        let cache = PairStateCache::new(Arc::new(reader), Some(Address::repeat_byte(0xF0)), vec![], 30);
        let snapshot = cache.refresh(&[pair]).await;
        assert_eq!(snapshot.count(PairState::NotExists), 1);
        assert_eq!(snapshot.tradable().count(), 0);

        let max = (U256::one() << 112) - 1;
        assert_eq!(
            decode_reserves(&Bytes::from(abi::encode(&[
                AbiToken::Uint(max),
                AbiToken::Uint(max),
                AbiToken::Uint(0u64.into()),
            ]))),
            Some((max, max))
        );
    }

    #[tokio::test]
    async fn test_existence_failure_publishes_empty_snapshot_and_keeps_loading() {
        let pair = PairTokens::new(token(1), token(2)).unwrap();
        let reader = ScriptedReader::new(vec![Err(anyhow::anyhow!("connection reset"))]);
        let cache = PairStateCache::new(Arc::new(reader), Some(Address::repeat_byte(0xF0)), vec![], 30);
        let snapshot = cache.refresh(&[pair.clone()]).await;
        assert!(snapshot.pairs.is_empty());
        assert_eq!(snapshot.count(PairState::NotExists), 0);
        assert_eq!(cache.entry(&pair.key()).map(|e| e.state), Some(PairState::Loading));
    }

    #[tokio::test]
    async fn test_entries_outside_current_candidates_are_pruned() {
        let first = PairTokens::new(token(1), token(2)).unwrap();
        let second = PairTokens::new(token(3), token(4)).unwrap();
        let reader = ScriptedReader::new(vec![
            Ok(vec![enc(&[AbiToken::Address(Address::zero())])]),
            Ok(vec![enc(&[AbiToken::Address(Address::zero())])]),
        ]);
        let cache = PairStateCache::new(Arc::new(reader), Some(Address::repeat_byte(0xF0)), vec![], 30);
        cache.refresh(&[first.clone()]).await;
        assert!(cache.entry(&first.key()).is_some());

        cache.refresh(&[second.clone()]).await;
        assert!(cache.entry(&first.key()).is_none());
        assert_eq!(cache.entry(&second.key()).map(|e| e.state), Some(PairState::NotExists));
    }

    #[tokio::test]
    async fn test_stable_pool_skips_factory_and_uses_index_order() {
        let usdc = Token::new(1, Address::repeat_byte(0x09), 6, None, None).unwrap();
        let dai = token(0x03);
        let config = StablePoolConfig {
            address: Address::repeat_byte(0x5A),
            lp_token: Address::repeat_byte(0x5B),
            tokens: vec![usdc.clone(), dai.clone()],
            amplification: U256::from(100),
            fee_bps: 4,
        };
        let balances = enc(&[AbiToken::Array(vec![
            AbiToken::Uint(U256::from(2_000_000u64)),
            AbiToken::Uint(U256::exp10(18) * 2),
        ])]);
        // no factory round: the only batch is the state read
        let reader = ScriptedReader::new(vec![Ok(vec![
            balances,
            enc(&[AbiToken::Uint(200u64.into())]),
            enc(&[AbiToken::Uint(5u64.into())]),
        ])]);
        let cache = PairStateCache::new(Arc::new(reader), None, vec![config], 30);
        let pair = PairTokens::new(usdc, dai).unwrap();
        let snapshot = cache.refresh(&[pair]).await;

        let info = &snapshot.pairs[0];
        assert_eq!(info.state, PairState::Exists);
        assert!(info.is_stable_pool);
        // token_a is dai (0x03..) which is coin index 1
        assert_eq!(info.reserve_a, Some(U256::exp10(18) * 2));
        assert_eq!(info.reserve_b, Some(U256::from(2_000_000u64)));
        match &info.pool {
            Some(PoolModel::StableSwap(p)) => assert_eq!(p.amplification, U256::from(200)),
            other => panic!("expected stable model, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalidate_marks_entries_loading_and_official_invalid() {
        let pair = PairTokens::new(token(1), token(2)).unwrap();
        let reader = ScriptedReader::new(vec![Ok(vec![enc(&[AbiToken::Address(Address::zero())])])]);
        let cache = PairStateCache::new(Arc::new(reader), Some(Address::repeat_byte(0xF0)), vec![], 30);
        let snapshot = cache
            .refresh_official(&[
                (Some(token(1)), Some(token(2))),
                (Some(token(4)), Some(token(4))),
                (None, Some(token(5))),
            ])
            .await;
        assert_eq!(snapshot.count(PairState::Invalid), 2);
        assert_eq!(snapshot.count(PairState::NotExists), 1);

        cache.invalidate();
        assert_eq!(cache.entry(&pair.key()).map(|e| e.state), Some(PairState::Loading));
    }
}
