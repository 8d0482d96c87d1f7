//! # Pair Existence Filter
//!
//! Asks the factory which candidate pairs have a deployed pool, in one batched round.

use crate::metrics;
use crate::multicall::{BatchReader, Call};
use crate::types::PairTokens;
use ethers::abi::{self, ParamType, Token as AbiToken};
use ethers::types::Address;
use log::{debug, warn};

pub const GET_PAIR_SIGNATURE: &str = "getPair(address,address)";

#[derive(Debug, thiserror::Error)]
pub enum ExistenceError {
    #[error("getPair batch failed: {0}")]
    Batch(anyhow::Error),
    #[error("{got} results for {expected} candidates")]
    LengthMismatch { expected: usize, got: usize },
}

/// A candidate pair with its deployed pool address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingPair {
    pub tokens: PairTokens,
    pub pool: Address,
}

/// Decodes a single ABI `address` return value.
pub(crate) fn decode_address(data: &[u8]) -> Option<Address> {
    abi::decode(&[ParamType::Address], data)
        .ok()?
        .into_iter()
        .next()?
        .into_address()
}

/// Keeps only the candidates the factory reports a non-zero pool for.
///
/// No factory means no pools. A failed batch is an error so callers can tell it apart
/// from pairs that are not deployed.
pub async fn filter_existing<R: BatchReader + ?Sized>(
    reader: &R,
    factory: Option<Address>,
    candidates: &[PairTokens],
) -> Result<Vec<ExistingPair>, ExistenceError> {
    let Some(factory) = factory else {
        debug!("filter_existing: no factory configured");
        return Ok(Vec::new());
    };
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let calls: Vec<Call> = candidates
        .iter()
        .map(|pair| {
            Call::new(
                factory,
                GET_PAIR_SIGNATURE,
                &[
                    AbiToken::Address(pair.token_a().address),
                    AbiToken::Address(pair.token_b().address),
                ],
            )
        })
        .collect();

    let results = match reader.aggregate(calls).await {
        Ok(results) if results.len() == candidates.len() => results,
        Ok(results) => {
            warn!(
                "filter_existing: {} results for {} candidates, dropping batch",
                results.len(),
                candidates.len()
            );
            metrics::increment_multicall_fetch_failed("get_pair");
            return Err(ExistenceError::LengthMismatch {
                expected: candidates.len(),
                got: results.len(),
            });
        }
        Err(e) => {
            warn!("filter_existing: getPair batch failed: {}", e);
            metrics::increment_multicall_fetch_failed("get_pair");
            return Err(ExistenceError::Batch(e));
        }
    };

    let existing: Vec<ExistingPair> = candidates
        .iter()
        .zip(results)
        .filter_map(|(pair, result)| {
            let bytes = result?;
            let pool = decode_address(&bytes[..])?;
            (!pool.is_zero()).then(|| ExistingPair {
                tokens: pair.clone(),
                pool,
            })
        })
        .collect();

    debug!(
        "filter_existing: {}/{} candidates have a pool",
        existing.len(),
        candidates.len()
    );
    Ok(existing)
}
