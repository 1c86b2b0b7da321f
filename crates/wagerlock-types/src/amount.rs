//! Monetary amounts.
//!
//! Off-chain code works in whole-coin [`Decimal`]s; the wire carries
//! unsigned nano-units. Conversion is exact or it fails.

use rust_decimal::Decimal;

use crate::{EscrowError, Result, constants};

/// Convert a coin amount into nano-units.
///
/// # Errors
/// Returns [`EscrowError::InvalidAmount`] for negative amounts or amounts
/// with more than [`constants::COIN_DECIMALS`] fractional digits.
pub fn to_nano(amount: Decimal) -> Result<u128> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(EscrowError::InvalidAmount {
            amount,
            reason: "amount is negative".to_string(),
        });
    }
    let normalized = amount.normalize();
    if normalized.scale() > constants::COIN_DECIMALS {
        return Err(EscrowError::InvalidAmount {
            amount,
            reason: format!(
                "more than {} fractional digits",
                constants::COIN_DECIMALS
            ),
        });
    }
    let mantissa = u128::try_from(normalized.mantissa()).map_err(|_| EscrowError::InvalidAmount {
        amount,
        reason: "mantissa out of range".to_string(),
    })?;
    let scale_up = 10u128.pow(constants::COIN_DECIMALS - normalized.scale());
    mantissa
        .checked_mul(scale_up)
        .ok_or_else(|| EscrowError::InvalidAmount {
            amount,
            reason: "amount overflows nano-units".to_string(),
        })
}

/// Convert nano-units back into a coin amount.
///
/// # Errors
/// Returns [`EscrowError::InvalidAmount`] if the value exceeds what a
/// [`Decimal`] can hold.
pub fn from_nano(nano: u128) -> Result<Decimal> {
    let mantissa = i128::try_from(nano).map_err(|_| EscrowError::InvalidAmount {
        amount: Decimal::MAX,
        reason: format!("{nano} nano-units out of range"),
    })?;
    Decimal::try_from_i128_with_scale(mantissa, constants::COIN_DECIMALS)
        .map(|d| d.normalize())
        .map_err(|e| EscrowError::InvalidAmount {
            amount: Decimal::MAX,
            reason: e.to_string(),
        })
}

/// Truncate an amount to wire precision (never rounds up).
#[must_use]
pub fn to_wire_precision(amount: Decimal) -> Decimal {
    amount.trunc_with_scale(constants::COIN_DECIMALS).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_and_fractional_amounts() {
        assert_eq!(to_nano(Decimal::ONE).unwrap(), 1_000_000_000);
        assert_eq!(to_nano(Decimal::new(12, 1)).unwrap(), 1_200_000_000);
        assert_eq!(to_nano(Decimal::new(1, 9)).unwrap(), 1);
        assert_eq!(to_nano(Decimal::ZERO).unwrap(), 0);
    }

    #[test]
    fn trailing_zeros_do_not_count_as_precision() {
        // 0.5000000000 has scale 10 but is exactly representable.
        let amount = Decimal::new(5_000_000_000, 10);
        assert_eq!(to_nano(amount).unwrap(), 500_000_000);
    }

    #[test]
    fn rejects_negative_and_too_precise() {
        assert!(matches!(
            to_nano(Decimal::new(-1, 0)),
            Err(EscrowError::InvalidAmount { .. })
        ));
        assert!(matches!(
            to_nano(Decimal::new(1, 10)),
            Err(EscrowError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn from_nano_inverts() {
        assert_eq!(from_nano(380_000_000).unwrap(), Decimal::new(38, 2));
        assert_eq!(from_nano(0).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn wire_precision_truncates() {
        let third = Decimal::ONE / Decimal::new(3, 0);
        assert_eq!(to_wire_precision(third), Decimal::new(333_333_333, 9));
    }
}
