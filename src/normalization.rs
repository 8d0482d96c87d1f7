// src/normalization.rs
//
// Fixed-point price derivation for trades between tokens with different decimals, plus
// price impact and slippage bounds.

use crate::types::conversions::u256_to_decimal;
use ethers::types::{U256, U512};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::convert::TryInto;
use std::fmt;

/// Headroom added on top of the wider token's decimals while dividing.
const WORKING_EXTRA_DECIMALS: u8 = 18;
/// Widest scale `rust_decimal` represents.
const DECIMAL_MAX_SCALE: u8 = 28;
/// Percentages are computed at this scale.
const PERCENT_DECIMALS: u8 = 18;
const BPS: u32 = 10_000;

/// Human-unit price as fixed point: `value / 10^decimals`. Prices keep the working
/// scale they were divided at, so very small prices do not truncate to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    pub value: U256,
    pub decimals: u8,
}

impl Price {
    pub fn raw(&self) -> U256 {
        self.value
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Truncated to 28 decimals when the scale is wider.
    pub fn to_decimal(&self) -> Option<Decimal> {
        if self.decimals <= DECIMAL_MAX_SCALE {
            return u256_to_decimal(self.value, self.decimals).ok();
        }
        let excess = usize::from(self.decimals - DECIMAL_MAX_SCALE);
        u256_to_decimal(self.value / U256::exp10(excess), DECIMAL_MAX_SCALE).ok()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_decimal() {
            Some(d) if !d.is_zero() || self.value.is_zero() => write!(f, "{}", d),
            _ => write!(f, "{}e-{}", self.value, self.decimals),
        }
    }
}

/// A percentage expressed in basis points (`50` = 0.5%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Percent {
    pub bps: u32,
}

impl Percent {
    pub fn from_bps(bps: u32) -> Self {
        Self { bps }
    }

    pub fn as_decimal(&self) -> Decimal {
        Decimal::new(i64::from(self.bps), 2)
    }
}

#[inline]
fn pow10(n: u32) -> U512 {
    U512::exp10(n as usize)
}

/// Forward and inverse execution prices of `amount_in → amount_out`.
///
/// Returns `(output per input, input per output)`, both at `W = max(d_in, d_out) + 18`
/// decimals. They come from one division so `forward · inverse ≈ 10^(2W)`.
/// `None` for zero amounts, when the forward price is below `10^-W` or when a value
/// does not fit in `U256`.
pub fn execution_prices(
    amount_in: U256,
    decimals_in: u8,
    amount_out: U256,
    decimals_out: u8,
) -> Option<(Price, Price)> {
    if amount_in.is_zero() || amount_out.is_zero() {
        return None;
    }
    let w = u32::from(decimals_in.max(decimals_out) + WORKING_EXTRA_DECIMALS);
    let d_in = u32::from(decimals_in);
    let d_out = u32::from(decimals_out);

    let numerator = U512::from(amount_out).checked_mul(pow10(w + d_in))?;
    let denominator = U512::from(amount_in).checked_mul(pow10(d_out))?;
    let scaled = numerator / denominator;
    if scaled.is_zero() {
        return None;
    }
    let inverse = pow10(2 * w) / scaled;
    if inverse.is_zero() {
        return None;
    }

    let decimals = u8::try_from(w).ok()?;
    let forward: U256 = scaled.try_into().ok()?;
    let backward: U256 = inverse.try_into().ok()?;
    Some((
        Price { value: forward, decimals },
        Price { value: backward, decimals },
    ))
}

/// `(mid_quote - amount_out) / mid_quote * 100`. Negative when the execution beats the
/// mid price.
pub fn price_impact(mid_quote: U256, amount_out: U256) -> Option<Decimal> {
    if mid_quote.is_zero() {
        return None;
    }
    let (diff, negative) = if mid_quote >= amount_out {
        (mid_quote - amount_out, false)
    } else {
        (amount_out - mid_quote, true)
    };
    let percent_e18 = diff.full_mul(U256::from(100u64)) * U512::from(U256::exp10(PERCENT_DECIMALS as usize))
        / U512::from(mid_quote);
    let percent_e18: U256 = percent_e18.try_into().ok()?;
    let magnitude = u256_to_decimal(percent_e18, PERCENT_DECIMALS).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// `amount_out · (1 - slippage)`.
pub fn min_amount_out(amount_out: U256, slippage: Percent) -> U256 {
    let keep = BPS.saturating_sub(slippage.bps);
    scale_bps(amount_out, keep)
}

/// `amount_in · (1 + slippage)`.
pub fn max_amount_in(amount_in: U256, slippage: Percent) -> U256 {
    scale_bps(amount_in, BPS.saturating_add(slippage.bps))
}

fn scale_bps(amount: U256, bps: u32) -> U256 {
    let scaled = amount.full_mul(U256::from(bps)) / U512::from(BPS);
    scaled.try_into().unwrap_or(U256::MAX)
}
