//! # Trade
//!
//! The executable result of a quote. Whatever produced the route (the on-chain search or
//! the aggregator API) a `Trade` is only ever built through [`RouteQuote::into_trade`],
//! which validates the path before deriving prices and slippage bounds.

use crate::aggregator::AggregatorQuote;
use crate::normalization::{self, Percent, Price};
use crate::router::{PathStep, RouteCandidate};
use crate::types::Currency;
use ethers::types::U256;
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeType {
    ExactIn,
    ExactOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSource {
    OnChain,
    Aggregator,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TradeError {
    #[error("trade path is empty")]
    EmptyPath,
    #[error("path step {index} does not start where the previous step ends")]
    BrokenChain { index: usize },
    #[error("path endpoints do not match the requested currencies")]
    CurrencyMismatch,
    #[error("trade amounts must be non-zero")]
    ZeroAmount,
    #[error("execution price of {amount_in} -> {amount_out} is not representable")]
    PriceUnavailable { amount_in: U256, amount_out: U256 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub trade_type: TradeType,
    pub input_currency: Currency,
    pub output_currency: Currency,
    pub amount_in: U256,
    pub amount_out: U256,
    pub min_amount_out: U256,
    pub max_amount_in: U256,
    /// Signed percentage, negative when better than the mid price.
    pub price_impact: Decimal,
    pub path: Vec<PathStep>,
    pub price_input_per_output: Price,
    pub price_output_per_input: Price,
    pub source: TradeSource,
}

impl Trade {
    pub fn hop_count(&self) -> usize {
        self.path.len()
    }
}

/// Observable state of the current trade request.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeState {
    /// No request, or an absent/zero amount.
    Idle,
    Loading,
    NoRoute,
    Ready(Arc<Trade>),
}

impl TradeState {
    pub fn trade(&self) -> Option<&Arc<Trade>> {
        match self {
            TradeState::Ready(trade) => Some(trade),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, TradeState::Loading)
    }
}

/// A route from either quote source, before validation.
#[derive(Debug, Clone)]
pub enum RouteQuote {
    OnChain(RouteCandidate),
    Aggregator(AggregatorQuote),
}

/// Checks the path is non-empty, chained hop to hop, and runs from `input` to `output`.
pub fn validate_path(path: &[PathStep], input: &Currency, output: &Currency) -> Result<(), TradeError> {
    let (first, last) = match (path.first(), path.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(TradeError::EmptyPath),
    };
    for (index, window) in path.windows(2).enumerate() {
        if window[0].target != window[1].source {
            return Err(TradeError::BrokenChain { index: index + 1 });
        }
    }
    if first.source != input.wrapped().address || last.target != output.wrapped().address {
        return Err(TradeError::CurrencyMismatch);
    }
    Ok(())
}

impl RouteQuote {
    pub fn source(&self) -> TradeSource {
        match self {
            RouteQuote::OnChain(_) => TradeSource::OnChain,
            RouteQuote::Aggregator(_) => TradeSource::Aggregator,
        }
    }

    pub fn into_trade(self, input: &Currency, output: &Currency, slippage: Percent) -> Result<Trade, TradeError> {
        let source = self.source();
        let (trade_type, amount_in, amount_out, path, price_impact) = match self {
            RouteQuote::OnChain(route) => {
                let impact = route
                    .mid_quote()
                    .and_then(|mid| normalization::price_impact(mid, route.amount_out));
                if impact.is_none() {
                    debug!("into_trade: no mid price for {}-hop route", route.hop_count());
                }
                let path = route.path();
                (
                    route.trade_type,
                    route.amount_in,
                    route.amount_out,
                    path,
                    impact.unwrap_or_default(),
                )
            }
            RouteQuote::Aggregator(quote) => (
                TradeType::ExactIn,
                quote.amount_in,
                quote.amount_out,
                quote.path,
                quote.price_impact,
            ),
        };

        validate_path(&path, input, output)?;
        if amount_in.is_zero() || amount_out.is_zero() {
            return Err(TradeError::ZeroAmount);
        }
        let (price_output_per_input, price_input_per_output) =
            normalization::execution_prices(amount_in, input.decimals(), amount_out, output.decimals())
                .ok_or(TradeError::PriceUnavailable { amount_in, amount_out })?;

        let (min_amount_out, max_amount_in) = match trade_type {
            TradeType::ExactIn => (normalization::min_amount_out(amount_out, slippage), amount_in),
            TradeType::ExactOut => (amount_out, normalization::max_amount_in(amount_in, slippage)),
        };

        Ok(Trade {
            trade_type,
            input_currency: input.clone(),
            output_currency: output.clone(),
            amount_in,
            amount_out,
            min_amount_out,
            max_amount_in,
            price_impact,
            path,
            price_input_per_output,
            price_output_per_input,
            source,
        })
    }
}
