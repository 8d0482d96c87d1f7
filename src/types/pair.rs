use super::currency::Token;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Canonical dedup/lookup key of a pair: `(lower address, higher address)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey(pub Address, pub Address);

/// Two distinct tokens in canonical pool order (`token_a` sorts before `token_b`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairTokens {
    token_a: Token,
    token_b: Token,
}

impl PairTokens {
    /// Returns `None` when both sides have the same address.
    pub fn new(x: Token, y: Token) -> Option<Self> {
        match x.address.cmp(&y.address) {
            Ordering::Less => Some(Self {
                token_a: x,
                token_b: y,
            }),
            Ordering::Equal => None,
            Ordering::Greater => Some(Self {
                token_a: y,
                token_b: x,
            }),
        }
    }

    pub fn token_a(&self) -> &Token {
        &self.token_a
    }

    pub fn token_b(&self) -> &Token {
        &self.token_b
    }

    pub fn key(&self) -> PairKey {
        PairKey(self.token_a.address, self.token_b.address)
    }

    pub fn involves(&self, token: &Token) -> bool {
        &self.token_a == token || &self.token_b == token
    }

    /// The counter-token of `token` in this pair.
    pub fn other(&self, token: &Token) -> Option<&Token> {
        if &self.token_a == token {
            Some(&self.token_b)
        } else if &self.token_b == token {
            Some(&self.token_a)
        } else {
            None
        }
    }
}

impl fmt::Display for PairTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.token_a, self.token_b)
    }
}
