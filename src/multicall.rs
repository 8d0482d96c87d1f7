use crate::metrics;
pub use anyhow::Result;
use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::prelude::*;
use ethers::utils::keccak256;
use log::{debug, warn};
use std::sync::Arc;

/// A single read-only contract call to be batched in a multicall.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Call {
    pub target: Address,
    pub call_data: Bytes,
}

impl Call {
    /// Builds `selector(signature) ++ abi.encode(args)`.
    pub fn new(target: Address, signature: &str, args: &[Token]) -> Self {
        Self {
            target,
            call_data: encode_call(signature, args),
        }
    }
}

/// Encodes a function call from its canonical signature, e.g. `getPair(address,address)`.
pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut data = keccak256(signature.as_bytes())[..4].to_vec();
    data.extend_from_slice(&abi::encode(args));
    Bytes::from(data)
}

/// Executes batches of read calls in one round trip.
///
/// Each element of the result lines up with the input call; `None` marks a call that
/// reverted (`allowFailure = true`). A transport failure fails the whole batch.
#[async_trait]
pub trait BatchReader: Send + Sync {
    async fn aggregate(&self, calls: Vec<Call>) -> Result<Vec<Option<Bytes>>>;
}

/// Multicall3 `aggregate3` executor.
///
/// ## Example
///
/// ```rust,ignore
/// let multicall = Multicall::new(provider, multicall_address, 100);
/// let calls = vec![Call::new(pair, "getReserves()", &[])];
/// let results = multicall.aggregate(calls).await?;
/// ```
#[derive(Clone)]
pub struct Multicall<M: Middleware> {
    pub provider: Arc<M>,
    multicall_address: Address,
    batch_size: usize,
    block: Option<BlockId>,
}

impl<M: Middleware + 'static> Multicall<M> {
    pub fn new(provider: Arc<M>, multicall_address: Address, batch_size: usize) -> Self {
        // RPC providers reject oversized eth_call payloads
        let validated_batch_size = batch_size.clamp(1, 500);
        if batch_size > 500 {
            warn!(
                "Batch size {} exceeds recommended maximum (500), capping to 500",
                batch_size
            );
        }

        Self {
            provider,
            multicall_address,
            batch_size: validated_batch_size,
            block: None,
        }
    }

    /// Pins every read to a specific block.
    pub fn at_block(mut self, block: BlockId) -> Self {
        self.block = Some(block);
        self
    }

    pub async fn run(&self, calls: Vec<Call>) -> Result<Vec<Option<Bytes>>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        // Coalesce identical calls to reduce load
        let mut unique_calls = indexmap::IndexMap::new();
        let mut original_indices = vec![0; calls.len()];
        for (i, call) in calls.iter().enumerate() {
            let (index, _) = unique_calls.insert_full(call.clone(), ());
            original_indices[i] = index;
        }
        let unique_call_vec: Vec<Call> = unique_calls.into_keys().collect();
        debug!(
            "Multicall coalesced {} calls into {}",
            calls.len(),
            unique_call_vec.len()
        );

        let mut all_results_unique: Vec<Option<Bytes>> = Vec::with_capacity(unique_call_vec.len());
        for call_chunk in unique_call_vec.chunks(self.batch_size) {
            metrics::record_multicall_batch_size(call_chunk.len() as f64);
            let return_data = self.execute_multicall3(call_chunk).await?;
            if return_data.len() != call_chunk.len() {
                return Err(anyhow::anyhow!(
                    "multicall returned {} results for {} calls",
                    return_data.len(),
                    call_chunk.len()
                ));
            }
            all_results_unique.extend(return_data);
        }

        // Reconstruct the full result set in the original order
        Ok(original_indices
            .into_iter()
            .map(|index| all_results_unique[index].clone())
            .collect())
    }

    async fn execute_multicall3(&self, calls: &[Call]) -> Result<Vec<Option<Bytes>>> {
        // aggregate3((address target, bool allowFailure, bytes callData)[])
        let call_tokens = calls
            .iter()
            .map(|call| {
                Token::Tuple(vec![
                    Token::Address(call.target),
                    Token::Bool(true),
                    Token::Bytes(call.call_data.to_vec()),
                ])
            })
            .collect();
        let calldata = encode_call(
            "aggregate3((address,bool,bytes)[])",
            &[Token::Array(call_tokens)],
        );

        let tx_request = TransactionRequest::new()
            .to(self.multicall_address)
            .data(calldata);
        let typed_tx: ethers::types::transaction::eip2718::TypedTransaction = tx_request.into();
        let response = self
            .provider
            .call(&typed_tx, self.block)
            .await
            .map_err(|e| anyhow::anyhow!("aggregate3 eth_call failed: {}", e))?;

        decode_aggregate3(&response)
    }
}

/// Decodes `(bool success, bytes returnData)[]`.
pub fn decode_aggregate3(response: &[u8]) -> Result<Vec<Option<Bytes>>> {
    let decoded = abi::decode(
        &[ParamType::Array(Box::new(ParamType::Tuple(vec![
            ParamType::Bool,
            ParamType::Bytes,
        ])))],
        response,
    )?;

    let results_array = decoded
        .into_iter()
        .next()
        .and_then(|t| t.into_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid multicall response format"))?;

    let mut return_data = Vec::with_capacity(results_array.len());
    for result_token in results_array {
        match result_token {
            Token::Tuple(tuple) => match tuple.as_slice() {
                [Token::Bool(true), Token::Bytes(data)] => {
                    return_data.push(Some(Bytes::from(data.clone())))
                }
                [Token::Bool(false), _] => return_data.push(None),
                _ => return Err(anyhow::anyhow!("Malformed aggregate3 result tuple")),
            },
            _ => return Err(anyhow::anyhow!("Malformed aggregate3 result entry")),
        }
    }
    Ok(return_data)
}

#[async_trait]
impl<M: Middleware + 'static> BatchReader for Multicall<M> {
    async fn aggregate(&self, calls: Vec<Call>) -> Result<Vec<Option<Bytes>>> {
        self.run(calls).await
    }
}

#[async_trait]
impl<T: BatchReader + ?Sized> BatchReader for Arc<T> {
    async fn aggregate(&self, calls: Vec<Call>) -> Result<Vec<Option<Bytes>>> {
        (**self).aggregate(calls).await
    }
}
