//! Conversion between `Decimal` USD amounts and the integer nano-USD
//! representation used in storage.

use crate::error::{MeteringError, MeteringResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept in storage
pub const STORAGE_SCALE: u32 = 9;

const NANOS_PER_USD: i64 = 1_000_000_000;

/// Round half-even to nine places and scale to an integer
pub fn to_nanos(amount: Decimal) -> MeteringResult<i64> {
    let rounded = amount.round_dp_with_strategy(STORAGE_SCALE, RoundingStrategy::MidpointNearestEven);
    rounded
        .checked_mul(Decimal::from(NANOS_PER_USD))
        .and_then(|scaled| scaled.to_i64())
        .ok_or_else(|| MeteringError::invalid(format!("amount {amount} is out of range")))
}

pub fn from_nanos(nanos: i64) -> Decimal {
    Decimal::new(nanos, STORAGE_SCALE).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_nanos_exact() {
        assert_eq!(to_nanos(dec!(0.01)).unwrap(), 10_000_000);
        assert_eq!(to_nanos(dec!(0.013)).unwrap(), 13_000_000);
        assert_eq!(to_nanos(Decimal::ZERO).unwrap(), 0);
        assert_eq!(to_nanos(dec!(12.5)).unwrap(), 12_500_000_000);
    }

    #[test]
    fn test_to_nanos_rounds_half_even() {
        assert_eq!(to_nanos(dec!(0.0000000005)).unwrap(), 0);
        assert_eq!(to_nanos(dec!(0.0000000015)).unwrap(), 2);
        assert_eq!(to_nanos(dec!(0.0000000025)).unwrap(), 2);
    }

    #[test]
    fn test_to_nanos_overflow_is_rejected() {
        let err = to_nanos(Decimal::MAX).unwrap_err();
        assert!(matches!(err, MeteringError::InvalidInput(_)));
    }

    #[test]
    fn test_from_nanos() {
        assert_eq!(from_nanos(13_000_000), dec!(0.013));
        assert_eq!(from_nanos(0), Decimal::ZERO);
        assert_eq!(from_nanos(-1), dec!(-0.000000001));
    }
}
