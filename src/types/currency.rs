//! # Currency Model
//!
//! Value objects for the assets a trade can move: the chain's native gas asset and
//! ERC-20-like tokens. Only tokens are poolable, so every routing component works on
//! [`Currency::wrapped`].

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Largest decimal count accepted for a token. Keeps `10^(2 * (decimals + 18))` inside
/// the 512-bit intermediates used by the price deriver.
pub const MAX_TOKEN_DECIMALS: u8 = 36;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurrencyError {
    #[error("token {0:?} declares {1} decimals (max {MAX_TOKEN_DECIMALS})")]
    UnsupportedDecimals(Address, u8),
    #[error("zero address is not a token")]
    ZeroAddress,
}

/// An ERC-20-like token. Equality and hashing only look at `(chain_id, address)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub chain_id: u64,
    pub address: Address,
    pub decimals: u8,
    pub symbol: Option<String>,
    pub name: Option<String>,
}

impl Token {
    pub fn new(
        chain_id: u64,
        address: Address,
        decimals: u8,
        symbol: Option<String>,
        name: Option<String>,
    ) -> Result<Self, CurrencyError> {
        if address.is_zero() {
            return Err(CurrencyError::ZeroAddress);
        }
        if decimals > MAX_TOKEN_DECIMALS {
            return Err(CurrencyError::UnsupportedDecimals(address, decimals));
        }
        Ok(Self {
            chain_id,
            address,
            decimals,
            symbol,
            name,
        })
    }

    /// Canonical pool ordering: lower address first (Uniswap V2 `token0 < token1`).
    pub fn sorts_before(&self, other: &Token) -> bool {
        self.address < other.address
    }

    pub fn symbol_or_address(&self) -> String {
        match &self.symbol {
            Some(symbol) => symbol.clone(),
            None => format!("{:#x}", self.address),
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.chain_id == other.chain_id && self.address == other.address
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chain_id.hash(state);
        self.address.hash(state);
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        self.chain_id
            .cmp(&other.chain_id)
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol_or_address())
    }
}

/// The chain gas asset. Not poolable itself; routes through `wrapped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub chain_id: u64,
    pub symbol: String,
    pub decimals: u8,
    pub wrapped: Token,
}

impl PartialEq for NativeCurrency {
    fn eq(&self, other: &Self) -> bool {
        self.chain_id == other.chain_id
    }
}

impl Eq for NativeCurrency {}

impl Hash for NativeCurrency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chain_id.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Native(NativeCurrency),
    Token(Token),
}

impl Currency {
    pub fn chain_id(&self) -> u64 {
        match self {
            Currency::Native(native) => native.chain_id,
            Currency::Token(token) => token.chain_id,
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            Currency::Native(native) => native.decimals,
            Currency::Token(token) => token.decimals,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Currency::Native(_))
    }

    /// The token form used for pool lookups.
    pub fn wrapped(&self) -> &Token {
        match self {
            Currency::Native(native) => &native.wrapped,
            Currency::Token(token) => token,
        }
    }

    pub fn symbol(&self) -> String {
        match self {
            Currency::Native(native) => native.symbol.clone(),
            Currency::Token(token) => token.symbol_or_address(),
        }
    }
}

impl From<Token> for Currency {
    fn from(token: Token) -> Self {
        Currency::Token(token)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}
