//! HTTP quote source backed by an external routing API.
//!
//! `GET <api_base>?from=<addr>&to=<addr>&amountIn=<uint>[&maxHop=1]` answers
//! `{ "amountOut": "<uint>", "path": [PathStep], "priceImpact": <number> }`.
//! Only exact-input quotes are supported.

use crate::metrics;
use crate::router::PathStep;
use crate::types::conversions::{address_to_string, string_to_u256};
use crate::types::Currency;
use ethers::types::U256;
use log::{debug, warn};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::convert::TryFrom;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("invalid aggregator base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("aggregator request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("aggregator answered HTTP {0}")]
    Status(u16),
    #[error("malformed aggregator response: {0}")]
    Malformed(String),
    #[error("aggregator returned no output amount")]
    ZeroAmount,
}

impl AggregatorError {
    fn reason(&self) -> &'static str {
        match self {
            AggregatorError::InvalidBaseUrl(_) => "config",
            AggregatorError::Http(_) => "http",
            AggregatorError::Status(_) => "status",
            AggregatorError::Malformed(_) => "malformed",
            AggregatorError::ZeroAmount => "zero_amount",
        }
    }
}

/// A successful aggregator answer, not yet validated against the request.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorQuote {
    pub amount_in: U256,
    pub amount_out: U256,
    pub path: Vec<PathStep>,
    pub price_impact: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    amount_out: Option<String>,
    #[serde(default)]
    path: Vec<PathStep>,
    #[serde(default)]
    price_impact: Option<f64>,
}

#[derive(Clone)]
pub struct AggregatorClient {
    client: reqwest::Client,
    api_base: Url,
}

impl AggregatorClient {
    pub fn new(api_base: &str) -> Result<Self, AggregatorError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: Url::parse(api_base)?,
        })
    }

    pub fn quote_url(&self, input: &Currency, output: &Currency, amount_in: U256, single_hop: bool) -> Url {
        let mut url = self.api_base.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("from", &address_to_string(input.wrapped().address))
                .append_pair("to", &address_to_string(output.wrapped().address))
                .append_pair("amountIn", &amount_in.to_string());
            if single_hop {
                query.append_pair("maxHop", "1");
            }
        }
        url
    }

    /// Fetches an exact-input quote.
    pub async fn quote(
        &self,
        input: &Currency,
        output: &Currency,
        amount_in: U256,
        single_hop: bool,
    ) -> Result<AggregatorQuote, AggregatorError> {
        let url = self.quote_url(input, output, amount_in, single_hop);
        debug!("aggregator: GET {}", url);
        let result = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            let body = response.text().await?;
            parse_quote_response(status, &body, amount_in)
        }
        .await;
        if let Err(e) = &result {
            warn!("aggregator: {} -> {} quote failed: {}", input, output, e);
            metrics::increment_aggregator_failure(e.reason());
        }
        result
    }
}

/// Interprets one aggregator HTTP answer.
pub fn parse_quote_response(
    status: StatusCode,
    body: &str,
    amount_in: U256,
) -> Result<AggregatorQuote, AggregatorError> {
    if status != StatusCode::OK {
        return Err(AggregatorError::Status(status.as_u16()));
    }
    let parsed: QuoteResponse =
        serde_json::from_str(body).map_err(|e| AggregatorError::Malformed(e.to_string()))?;
    let amount_out = match parsed.amount_out.as_deref() {
        Some(raw) => string_to_u256(raw).map_err(|e| AggregatorError::Malformed(e.to_string()))?,
        None => return Err(AggregatorError::ZeroAmount),
    };
    if amount_out.is_zero() {
        return Err(AggregatorError::ZeroAmount);
    }
    let price_impact = match parsed.price_impact {
        Some(value) => Decimal::try_from(value).map_err(|e| AggregatorError::Malformed(e.to_string()))?,
        None => Decimal::ZERO,
    };
    Ok(AggregatorQuote {
        amount_in,
        amount_out,
        path: parsed.path,
        price_impact,
    })
}
