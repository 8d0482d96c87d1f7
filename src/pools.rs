// src/pools.rs

use ethers::types::{Address, U256, U512};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::TryInto;

const BPS_DENOMINATOR: u64 = 10_000;
/// StableSwap math works on balances normalized to this many decimals.
const STABLE_PRECISION_DECIMALS: u8 = 18;
const STABLE_MAX_ITERATIONS: usize = 255;

/// Pool family of one hop, serialized as the `type` tag of a path step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    #[serde(rename = "uniswapv2")]
    ConstantProduct,
    #[serde(rename = "stableswap")]
    StableSwap,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::ConstantProduct => "uniswapv2",
            PoolKind::StableSwap => "stableswap",
        }
    }
}

/// Pricing model of a tradable pool.
///
/// ## Supported Models
///
/// - **Constant product**: Uniswap V2 `x * y = k` with a proportional input fee
/// - **StableSwap**: Curve-style amplified invariant for like-valued assets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolModel {
    ConstantProduct(ConstantProductPool),
    StableSwap(StableSwapPool),
}

/// Uniswap V2-style pool. `token0`/`reserve0` follow the canonical pair order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantProductPool {
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub reserve0: U256,
    pub reserve1: U256,
    pub fee_bps: u32,
}

impl ConstantProductPool {
    fn reserves_for(&self, token_in: Address, token_out: Address) -> Option<(U256, U256)> {
        if token_in == self.token0 && token_out == self.token1 {
            Some((self.reserve0, self.reserve1))
        } else if token_in == self.token1 && token_out == self.token0 {
            Some((self.reserve1, self.reserve0))
        } else {
            None
        }
    }

    fn fee_multiplier(&self) -> Option<U256> {
        BPS_DENOMINATOR
            .checked_sub(u64::from(self.fee_bps))
            .filter(|m| *m > 0)
            .map(U256::from)
    }

    /// `out = in·(1-f)·R_out / (R_in + in·(1-f))`. `None` when the pool cannot fill.
    pub fn get_amount_out(&self, token_in: Address, token_out: Address, amount_in: U256) -> Option<U256> {
        let (reserve_in, reserve_out) = self.reserves_for(token_in, token_out)?;
        if reserve_in.is_zero() || reserve_out.is_zero() || amount_in.is_zero() {
            return None;
        }
        let amount_in_with_fee = amount_in.checked_mul(self.fee_multiplier()?)?;
        let numerator = amount_in_with_fee.full_mul(reserve_out);
        let denominator = reserve_in.full_mul(U256::from(BPS_DENOMINATOR))
            + U512::from(amount_in_with_fee);
        let amount_out: U256 = (numerator / denominator).try_into().ok()?;
        if amount_out.is_zero() {
            return None;
        }
        Some(amount_out)
    }

    /// `in = R_in·out / ((R_out - out)·(1-f)) + 1`. Fails when `out >= R_out`.
    pub fn get_amount_in(&self, token_in: Address, token_out: Address, amount_out: U256) -> Option<U256> {
        let (reserve_in, reserve_out) = self.reserves_for(token_in, token_out)?;
        if reserve_in.is_zero() || reserve_out.is_zero() || amount_out.is_zero() {
            return None;
        }
        if amount_out >= reserve_out {
            return None;
        }
        let numerator = reserve_in
            .full_mul(amount_out)
            .checked_mul(U512::from(BPS_DENOMINATOR))?;
        let denominator = (reserve_out - amount_out).full_mul(self.fee_multiplier()?);
        let amount_in: U256 = (numerator / denominator).try_into().ok()?;
        amount_in.checked_add(U256::one())
    }

    /// Fee-less value of `amount` at the current reserve ratio.
    pub fn spot_quote(&self, token_in: Address, token_out: Address, amount: U256) -> Option<U256> {
        let (reserve_in, reserve_out) = self.reserves_for(token_in, token_out)?;
        if reserve_in.is_zero() {
            return None;
        }
        (amount.full_mul(reserve_out) / U512::from(reserve_in)).try_into().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StableSwapError {
    #[error("stable pool needs at least two coins with matching balances and decimals")]
    MalformedPool,
    #[error("invariant did not converge")]
    NoConvergence,
    #[error("arithmetic overflow in invariant math")]
    Overflow,
}

/// Curve-style StableSwap pool over `tokens` (on-chain coin index order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StableSwapPool {
    pub address: Address,
    pub lp_token: Address,
    pub tokens: Vec<Address>,
    pub decimals: Vec<u8>,
    /// Raw on-chain balances, same order as `tokens`.
    pub balances: Vec<U256>,
    pub amplification: U256,
    pub fee_bps: u32,
}

impl StableSwapPool {
    pub fn new(
        address: Address,
        lp_token: Address,
        tokens: Vec<Address>,
        decimals: Vec<u8>,
        balances: Vec<U256>,
        amplification: U256,
        fee_bps: u32,
    ) -> Result<Self, StableSwapError> {
        if tokens.len() < 2
            || tokens.len() != decimals.len()
            || tokens.len() != balances.len()
            || amplification.is_zero()
            || u64::from(fee_bps) >= BPS_DENOMINATOR
        {
            return Err(StableSwapError::MalformedPool);
        }
        Ok(Self {
            address,
            lp_token,
            tokens,
            decimals,
            balances,
            amplification,
            fee_bps,
        })
    }

    pub fn index_of(&self, token: Address) -> Option<usize> {
        self.tokens.iter().position(|t| *t == token)
    }

    fn n_coins(&self) -> U256 {
        U256::from(self.tokens.len())
    }

    fn normalize(&self, index: usize, amount: U256) -> Option<U256> {
        let decimals = *self.decimals.get(index)?;
        if decimals <= STABLE_PRECISION_DECIMALS {
            amount.checked_mul(U256::exp10((STABLE_PRECISION_DECIMALS - decimals) as usize))
        } else {
            Some(amount / U256::exp10((decimals - STABLE_PRECISION_DECIMALS) as usize))
        }
    }

    fn denormalize(&self, index: usize, amount: U256) -> Option<U256> {
        let decimals = *self.decimals.get(index)?;
        if decimals <= STABLE_PRECISION_DECIMALS {
            Some(amount / U256::exp10((STABLE_PRECISION_DECIMALS - decimals) as usize))
        } else {
            amount.checked_mul(U256::exp10((decimals - STABLE_PRECISION_DECIMALS) as usize))
        }
    }

    fn xp(&self) -> Option<Vec<U256>> {
        self.balances
            .iter()
            .enumerate()
            .map(|(i, b)| self.normalize(i, *b))
            .collect()
    }

    /// Invariant `D` by Newton iteration.
    pub fn get_d(&self, xp: &[U256]) -> Result<U256, StableSwapError> {
        let n = self.n_coins();
        let sum = xp
            .iter()
            .try_fold(U256::zero(), |acc, x| acc.checked_add(*x))
            .ok_or(StableSwapError::Overflow)?;
        if sum.is_zero() {
            return Ok(U256::zero());
        }
        let ann = self.amplification.checked_mul(n).ok_or(StableSwapError::Overflow)?;
        let mut d = sum;
        for _ in 0..STABLE_MAX_ITERATIONS {
            let mut d_p = d;
            for x in xp {
                let denom = x.checked_mul(n).ok_or(StableSwapError::Overflow)?;
                if denom.is_zero() {
                    return Err(StableSwapError::MalformedPool);
                }
                d_p = mul_div(d_p, d, denom)?;
            }
            let d_prev = d;
            let numerator = ann
                .checked_mul(sum)
                .and_then(|v| v.checked_add(d_p.checked_mul(n)?))
                .ok_or(StableSwapError::Overflow)?;
            let denominator = (ann - U256::one())
                .checked_mul(d)
                .and_then(|v| v.checked_add((n + U256::one()).checked_mul(d_p)?))
                .ok_or(StableSwapError::Overflow)?;
            d = mul_div(numerator, d, denominator)?;
            if abs_diff(d, d_prev) <= U256::one() {
                return Ok(d);
            }
        }
        Err(StableSwapError::NoConvergence)
    }

    /// Balance of coin `j` that keeps `D` when coin `i` holds `x`.
    pub fn get_y(&self, i: usize, j: usize, x: U256, xp: &[U256], d: U256) -> Result<U256, StableSwapError> {
        if i == j || i >= xp.len() || j >= xp.len() {
            return Err(StableSwapError::MalformedPool);
        }
        let n = self.n_coins();
        let ann = self.amplification.checked_mul(n).ok_or(StableSwapError::Overflow)?;
        let mut c = d;
        let mut s = U256::zero();
        for (k, balance) in xp.iter().enumerate() {
            let x_k = if k == i {
                x
            } else if k != j {
                *balance
            } else {
                continue;
            };
            s = s.checked_add(x_k).ok_or(StableSwapError::Overflow)?;
            let denom = x_k.checked_mul(n).ok_or(StableSwapError::Overflow)?;
            if denom.is_zero() {
                return Err(StableSwapError::MalformedPool);
            }
            c = mul_div(c, d, denom)?;
        }
        c = mul_div(c, d, ann.checked_mul(n).ok_or(StableSwapError::Overflow)?)?;
        let b = s.checked_add(d / ann).ok_or(StableSwapError::Overflow)?;

        let mut y = d;
        for _ in 0..STABLE_MAX_ITERATIONS {
            let y_prev = y;
            let numerator = y
                .checked_mul(y)
                .and_then(|v| v.checked_add(c))
                .ok_or(StableSwapError::Overflow)?;
            let denominator = y
                .checked_mul(U256::from(2))
                .and_then(|v| v.checked_add(b))
                .and_then(|v| v.checked_sub(d))
                .ok_or(StableSwapError::Overflow)?;
            if denominator.is_zero() {
                return Err(StableSwapError::NoConvergence);
            }
            y = numerator / denominator;
            if abs_diff(y, y_prev) <= U256::one() {
                return Ok(y);
            }
        }
        Err(StableSwapError::NoConvergence)
    }

    /// Normalized output before fees for `dx_norm` of coin `i`.
    fn dy_before_fee(&self, i: usize, j: usize, dx_norm: U256) -> Option<U256> {
        let xp = self.xp()?;
        let d = self.get_d(&xp).ok()?;
        let x = xp[i].checked_add(dx_norm)?;
        let y = self.get_y(i, j, x, &xp, d).ok()?;
        // one wei rounding in favor of the pool
        xp[j].checked_sub(y)?.checked_sub(U256::one())
    }

    pub fn get_amount_out(&self, token_in: Address, token_out: Address, amount_in: U256) -> Option<U256> {
        let (i, j) = (self.index_of(token_in)?, self.index_of(token_out)?);
        if i == j || amount_in.is_zero() {
            return None;
        }
        let dy = self.dy_before_fee(i, j, self.normalize(i, amount_in)?)?;
        let fee = mul_div(dy, U256::from(self.fee_bps), U256::from(BPS_DENOMINATOR)).ok()?;
        let out = self.denormalize(j, dy - fee)?;
        if out.is_zero() {
            return None;
        }
        Some(out)
    }

    pub fn get_amount_in(&self, token_in: Address, token_out: Address, amount_out: U256) -> Option<U256> {
        let (i, j) = (self.index_of(token_in)?, self.index_of(token_out)?);
        if i == j || amount_out.is_zero() {
            return None;
        }
        let xp = self.xp()?;
        let dy_norm = self.normalize(j, amount_out)?;
        let fee_multiplier = U256::from(BPS_DENOMINATOR - u64::from(self.fee_bps));
        let dy_with_fee = mul_div(dy_norm, U256::from(BPS_DENOMINATOR), fee_multiplier).ok()?;
        let y = xp[j].checked_sub(dy_with_fee)?.checked_sub(U256::one())?;
        if y.is_zero() {
            return None;
        }
        let d = self.get_d(&xp).ok()?;
        let x = self.get_y(j, i, y, &xp, d).ok()?;
        let dx_norm = x.checked_sub(xp[i])?;
        self.denormalize(i, dx_norm)?.checked_add(U256::one())
    }

    /// Fee-less marginal value of `amount`, measured with a trial swap of one millionth of
    /// the input balance.
    pub fn spot_quote(&self, token_in: Address, token_out: Address, amount: U256) -> Option<U256> {
        let (i, j) = (self.index_of(token_in)?, self.index_of(token_out)?);
        let xp = self.xp()?;
        let sample = (xp[i] / U256::from(1_000_000u64)).max(U256::one());
        let dy_sample = self.dy_before_fee(i, j, sample)?;
        let amount_norm = self.normalize(i, amount)?;
        let quote_norm = mul_div(amount_norm, dy_sample, sample).ok()?;
        self.denormalize(j, quote_norm)
    }
}

fn mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, StableSwapError> {
    if denominator.is_zero() {
        return Err(StableSwapError::Overflow);
    }
    (a.full_mul(b) / U512::from(denominator))
        .try_into()
        .map_err(|_| StableSwapError::Overflow)
}

fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

impl PoolModel {
    pub fn address(&self) -> Address {
        match self {
            PoolModel::ConstantProduct(p) => p.address,
            PoolModel::StableSwap(p) => p.address,
        }
    }

    pub fn kind(&self) -> PoolKind {
        match self {
            PoolModel::ConstantProduct(_) => PoolKind::ConstantProduct,
            PoolModel::StableSwap(_) => PoolKind::StableSwap,
        }
    }

    pub fn involves(&self, token: Address) -> bool {
        match self {
            PoolModel::ConstantProduct(p) => p.token0 == token || p.token1 == token,
            PoolModel::StableSwap(p) => p.tokens.contains(&token),
        }
    }

    pub fn get_amount_out(&self, token_in: Address, token_out: Address, amount_in: U256) -> Option<U256> {
        match self {
            PoolModel::ConstantProduct(p) => p.get_amount_out(token_in, token_out, amount_in),
            PoolModel::StableSwap(p) => p.get_amount_out(token_in, token_out, amount_in),
        }
    }

    pub fn get_amount_in(&self, token_in: Address, token_out: Address, amount_out: U256) -> Option<U256> {
        match self {
            PoolModel::ConstantProduct(p) => p.get_amount_in(token_in, token_out, amount_out),
            PoolModel::StableSwap(p) => p.get_amount_in(token_in, token_out, amount_out),
        }
    }

    pub fn spot_quote(&self, token_in: Address, token_out: Address, amount: U256) -> Option<U256> {
        match self {
            PoolModel::ConstantProduct(p) => p.spot_quote(token_in, token_out, amount),
            PoolModel::StableSwap(p) => p.spot_quote(token_in, token_out, amount),
        }
    }

    /// Pool parameters attached to a path step.
    pub fn meta(&self, token_in: Address) -> serde_json::Value {
        match self {
            PoolModel::ConstantProduct(p) => {
                let (reserve_in, reserve_out) = if token_in == p.token0 {
                    (p.reserve0, p.reserve1)
                } else {
                    (p.reserve1, p.reserve0)
                };
                json!({
                    "reserveIn": reserve_in.to_string(),
                    "reserveOut": reserve_out.to_string(),
                    "feeBps": p.fee_bps,
                })
            }
            PoolModel::StableSwap(p) => json!({
                "lpToken": format!("{:?}", p.lp_token),
                "amplification": p.amplification.to_string(),
                "feeBps": p.fee_bps,
                "tokenIndex": p.index_of(token_in),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e18(v: u64) -> U256 {
        U256::from(v) * U256::exp10(18)
    }

    fn cp_pool(r0: U256, r1: U256) -> ConstantProductPool {
        ConstantProductPool {
            address: Address::repeat_byte(0xAA),
            token0: Address::repeat_byte(1),
            token1: Address::repeat_byte(2),
            reserve0: r0,
            reserve1: r1,
            fee_bps: 30,
        }
    }

    fn stable_pool(b0: U256, b1: U256, d0: u8, d1: u8) -> StableSwapPool {
        StableSwapPool::new(
            Address::repeat_byte(0xBB),
            Address::repeat_byte(0xBC),
            vec![Address::repeat_byte(1), Address::repeat_byte(2)],
            vec![d0, d1],
            vec![b0, b1],
            U256::from(200),
            4,
        )
        .unwrap()
    }

    #[test]
    fn test_full_width_reserves_do_not_overflow() {
        let half = U256::MAX / 2;
        let pool = cp_pool(half, half);
        let (a, b) = (Address::repeat_byte(1), Address::repeat_byte(2));
        assert_eq!(pool.get_amount_in(a, b, U256::MAX / 4), None);
        assert_eq!(pool.get_amount_out(a, b, U256::MAX / 4), None);
        assert!(pool.get_amount_out(a, b, e18(1)).is_some());
        assert!(pool.spot_quote(a, b, U256::MAX).is_some());
    }

    #[test]
    fn test_constant_product_matches_uniswap_v2_formula() {
        let pool = cp_pool(U256::from(1000), U256::from(1000));
        let (a, b) = (pool.token0, pool.token1);
        // 100 * 997 * 1000 / (1000 * 1000 + 100 * 997) = 90
        assert_eq!(pool.get_amount_out(a, b, U256::from(100)), Some(U256::from(90)));
        // 1000 * 90 * 1000 / (910 * 997) + 1 = 100
        assert_eq!(pool.get_amount_in(a, b, U256::from(90)), Some(U256::from(100)));
    }

    #[test]
    fn test_constant_product_rejects_unfillable_hops() {
        let pool = cp_pool(U256::from(1000), U256::from(1000));
        let (a, b) = (pool.token0, pool.token1);
        assert_eq!(pool.get_amount_in(a, b, U256::from(1000)), None);
        assert_eq!(pool.get_amount_in(a, b, U256::from(5000)), None);
        assert_eq!(pool.get_amount_out(a, b, U256::zero()), None);
        assert_eq!(cp_pool(U256::zero(), U256::from(5)).get_amount_out(a, b, U256::one()), None);
        assert_eq!(pool.get_amount_out(a, Address::repeat_byte(9), U256::one()), None);
    }

    #[test]
    fn test_spot_quote_uses_reserve_ratio() {
        let pool = cp_pool(e18(100), e18(200));
        assert_eq!(pool.spot_quote(pool.token0, pool.token1, e18(1)), Some(e18(2)));
        assert_eq!(pool.spot_quote(pool.token1, pool.token0, e18(2)), Some(e18(1)));
    }

    #[test]
    fn test_stable_swap_balanced_pool_trades_near_parity() {
        let pool = stable_pool(e18(1_000_000), e18(1_000_000), 18, 18);
        let out = pool
            .get_amount_out(Address::repeat_byte(1), Address::repeat_byte(2), e18(1000))
            .unwrap();
        // 4 bps fee plus a sliver of curvature
        assert!(out < e18(1000));
        assert!(out > e18(999));
    }

    #[test]
    fn test_stable_swap_handles_mixed_decimals() {
        let pool = stable_pool(
            U256::from(1_000_000u64) * U256::exp10(6),
            e18(1_000_000),
            6,
            18,
        );
        let out = pool
            .get_amount_out(
                Address::repeat_byte(1),
                Address::repeat_byte(2),
                U256::from(100u64) * U256::exp10(6),
            )
            .unwrap();
        assert!(out > e18(99) && out < e18(100));
    }

    #[test]
    fn test_stable_swap_exact_out_covers_requested_output() {
        let pool = stable_pool(e18(500_000), e18(700_000), 18, 18);
        let (a, b) = (Address::repeat_byte(1), Address::repeat_byte(2));
        let wanted = e18(1_000);
        let needed = pool.get_amount_in(a, b, wanted).unwrap();
        let got = pool.get_amount_out(a, b, needed).unwrap();
        // Newton iterations stop within one wei of the root
        assert!(got + U256::from(10) >= wanted);
        assert!(got < wanted + e18(1));
        assert!(pool.get_amount_in(a, b, e18(700_000)).is_none());
    }

    #[test]
    fn test_invariant_of_balanced_pool_is_sum() {
        let pool = stable_pool(e18(10), e18(10), 18, 18);
        let d = pool.get_d(&[e18(10), e18(10)]).unwrap();
        assert!(abs_diff(d, e18(20)) <= U256::from(2));
    }

    #[test]
    fn test_stable_pool_rejects_malformed_definitions() {
        let err = StableSwapPool::new(
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            vec![Address::repeat_byte(3)],
            vec![18],
            vec![U256::one()],
            U256::from(100),
            4,
        );
        assert_eq!(err, Err(StableSwapError::MalformedPool));
    }

    #[test]
    fn test_pool_kind_serializes_as_type_tag() {
        assert_eq!(
            serde_json::to_string(&PoolKind::ConstantProduct).unwrap(),
            "\"uniswapv2\""
        );
        assert_eq!(
            serde_json::from_str::<PoolKind>("\"stableswap\"").unwrap(),
            PoolKind::StableSwap
        );
    }
}
