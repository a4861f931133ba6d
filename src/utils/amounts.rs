//! Integer amount arithmetic.
//!
//! Every monetary value in the system is an integer in the token's smallest
//! unit, up to 78 decimal digits (uint256 range). `BigDecimal` carries them
//! through the database boundary; the helpers here keep all math in exact
//! integer arithmetic - scale shifts instead of floating point division.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, Signed, Zero};

/// Maximum digits accepted at the boundary (uint256 is 78 digits).
const MAX_AMOUNT_DIGITS: usize = 78;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AmountError {
    #[error("amount is not a valid integer: {0}")]
    NotAnInteger(String),

    #[error("amount is negative: {0}")]
    Negative(String),

    #[error("amount exceeds {MAX_AMOUNT_DIGITS} digits: {0}")]
    TooLarge(String),
}

/// Parse a numeric string into a non-negative integer amount.
///
/// This is the only entry point for externally supplied amounts; repository
/// mappers and request handlers must go through it.
pub fn parse_amount(raw: &str) -> Result<BigDecimal, AmountError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        // A leading '-' falls through here as well; report sign separately.
        if trimmed.starts_with('-') && trimmed[1..].chars().all(|c| c.is_ascii_digit()) {
            return Err(AmountError::Negative(raw.to_string()));
        }
        return Err(AmountError::NotAnInteger(raw.to_string()));
    }
    if trimmed.trim_start_matches('0').len() > MAX_AMOUNT_DIGITS {
        return Err(AmountError::TooLarge(raw.to_string()));
    }
    let int: BigInt = trimmed
        .parse()
        .map_err(|_| AmountError::NotAnInteger(raw.to_string()))?;
    Ok(BigDecimal::from(int))
}

/// 10^exp as an exact `BigDecimal`.
pub fn pow10(exp: u32) -> BigDecimal {
    BigDecimal::new(BigInt::from(1), -(exp as i64))
}

/// Truncate towards zero to an integer value.
pub fn truncate(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(0, bigdecimal::RoundingMode::Down)
}

/// Quote-side value of a trade: `quantity * price / 10^base_decimals`,
/// truncated to an integer in the quote token's smallest unit.
pub fn quote_amount(quantity: &BigDecimal, price: &BigDecimal, base_decimals: u32) -> BigDecimal {
    let shifted = (quantity * price) * BigDecimal::new(BigInt::from(1), base_decimals as i64);
    truncate(&shifted)
}

/// Basis-point fee on an integer value, truncated. 25 bp = 0.25 %.
pub fn fee_bps(value: &BigDecimal, bps: u32) -> BigDecimal {
    let scaled = value * BigDecimal::from(bps) * BigDecimal::new(BigInt::from(1), 4);
    truncate(&scaled)
}

/// True when the value is a non-negative integer.
pub fn is_valid_amount(value: &BigDecimal) -> bool {
    !value.is_negative() && value.is_integer()
}

/// True when the value is a strictly positive integer.
pub fn is_positive_amount(value: &BigDecimal) -> bool {
    is_valid_amount(value) && !value.is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn amt(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn parses_plain_integers() {
        assert_eq!(parse_amount("0").unwrap(), amt("0"));
        assert_eq!(parse_amount("10000000000000000000").unwrap(), amt("10000000000000000000"));
    }

    #[test]
    fn rejects_non_integers() {
        assert!(matches!(parse_amount("1.5"), Err(AmountError::NotAnInteger(_))));
        assert!(matches!(parse_amount("1e18"), Err(AmountError::NotAnInteger(_))));
        assert!(matches!(parse_amount(""), Err(AmountError::NotAnInteger(_))));
        assert!(matches!(parse_amount("-5"), Err(AmountError::Negative(_))));
    }

    #[test]
    fn rejects_beyond_uint256_width() {
        let too_big = "9".repeat(79);
        assert!(matches!(parse_amount(&too_big), Err(AmountError::TooLarge(_))));
        let just_fits = "9".repeat(78);
        assert!(parse_amount(&just_fits).is_ok());
    }

    #[test]
    fn quote_amount_divides_by_base_decimals() {
        // qty = 4e18, price = 2e18, base decimals 18 -> 8e18
        let qty = amt("4000000000000000000");
        let price = amt("2000000000000000000");
        assert_eq!(quote_amount(&qty, &price, 18), amt("8000000000000000000"));
    }

    #[test]
    fn quote_amount_truncates_remainder() {
        // 3 * 1 / 10^1 = 0.3 -> 0
        assert_eq!(quote_amount(&amt("3"), &amt("1"), 1), amt("0"));
    }

    #[test]
    fn fee_is_25_bps_of_value() {
        // 8e18 * 25 / 10000 = 0.02e18
        let value = amt("8000000000000000000");
        assert_eq!(fee_bps(&value, 25), amt("20000000000000000"));
        // Truncation: 39 * 25 / 10000 = 0.0975 -> 0
        assert_eq!(fee_bps(&amt("39"), 25), amt("0"));
    }

    #[test]
    fn validity_checks() {
        assert!(is_valid_amount(&amt("0")));
        assert!(is_positive_amount(&amt("1")));
        assert!(!is_positive_amount(&amt("0")));
        assert!(!is_valid_amount(&amt("-1")));
    }
}
