//! Common value types shared by every routing component.

pub mod conversions;
pub mod currency;
pub mod pair;

pub use currency::{Currency, CurrencyError, NativeCurrency, Token, MAX_TOKEN_DECIMALS};
pub use pair::{PairKey, PairTokens};
