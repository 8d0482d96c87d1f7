use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::str::FromStr;

// Raw base-unit amounts to human units (display and logs only, never for routing math)
pub fn u256_to_decimal(value: U256, decimals: u8) -> Result<Decimal, ConversionError> {
    if decimals > 28 {
        return Err(ConversionError::Overflow);
    }
    let value: u128 = value.try_into().map_err(|_| ConversionError::Overflow)?;
    let value: i128 = value.try_into().map_err(|_| ConversionError::Overflow)?;
    Decimal::try_from_i128_with_scale(value, decimals as u32)
        .map(|d| d.normalize())
        .map_err(|e| ConversionError::InvalidDecimal(e.to_string()))
}

pub fn address_to_string(addr: Address) -> String {
    format!("{:?}", addr).to_lowercase()
}

pub fn string_to_address(s: &str) -> Result<Address, ConversionError> {
    Address::from_str(s.trim()).map_err(|e| ConversionError::InvalidAddress(e.to_string()))
}

/// Parses a decimal uint string (as returned by JSON APIs) into `U256`.
pub fn string_to_u256(s: &str) -> Result<U256, ConversionError> {
    U256::from_dec_str(s.trim()).map_err(|e| ConversionError::InvalidAmount(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),
    #[error("Overflow in conversion")]
    Overflow,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}
