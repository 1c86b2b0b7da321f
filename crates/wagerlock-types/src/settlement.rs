//! Payout arithmetic and per-winner settlement results.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, EscrowError, Result, amount, constants};

/// How a pot is divided between the house and the winners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSplit {
    pub total_pot: Decimal,
    pub fee: Decimal,
    pub per_winner: Decimal,
    pub winner_count: usize,
}

impl PayoutSplit {
    /// `fee = pot * fee_rate`, `per_winner = (pot - fee) / winners`.
    ///
    /// `per_winner` is truncated to wire precision so the payouts never sum
    /// past the pot; any dust stays in the contract with the fee.
    ///
    /// # Errors
    /// - [`EscrowError::InvalidWinnerCount`] for zero or more than four winners
    /// - [`EscrowError::InvalidAmount`] for a negative pot
    pub fn compute(total_pot: Decimal, fee_rate: Decimal, winner_count: usize) -> Result<Self> {
        if winner_count == 0 || winner_count > constants::MAX_WINNERS {
            return Err(EscrowError::InvalidWinnerCount {
                count: winner_count,
            });
        }
        if total_pot.is_sign_negative() && !total_pot.is_zero() {
            return Err(EscrowError::InvalidAmount {
                amount: total_pot,
                reason: "pot is negative".to_string(),
            });
        }
        let fee = total_pot * fee_rate;
        let per_winner = amount::to_wire_precision((total_pot - fee) / Decimal::from(winner_count));
        Ok(Self {
            total_pot,
            fee,
            per_winner,
            winner_count,
        })
    }

    /// Amount left in the contract beyond the fee (rounding dust).
    #[must_use]
    pub fn dust(&self) -> Decimal {
        self.total_pot - self.fee - self.per_winner * Decimal::from(self.winner_count)
    }
}

/// Outcome of a payout for one winner.
///
/// Failures are reported as data, never as an error, so the caller can
/// always show a per-winner outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResult {
    pub address: Address,
    pub amount: Decimal,
    pub failed: bool,
    /// The ledger was seen applying the payout. `false` on a soft success:
    /// the message was sent but its landing could not be confirmed.
    pub confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SettlementResult {
    #[must_use]
    pub fn paid(address: Address, amount: Decimal, confirmed: bool) -> Self {
        Self {
            address,
            amount,
            failed: false,
            confirmed,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(address: Address, error: impl Into<String>) -> Self {
        Self {
            address,
            amount: Decimal::ZERO,
            failed: true,
            confirmed: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_way_split_with_five_percent_fee() {
        let split =
            PayoutSplit::compute(Decimal::new(12, 1), Decimal::new(5, 2), 3).unwrap();
        assert_eq!(split.fee, Decimal::new(6, 2));
        assert_eq!(split.per_winner, Decimal::new(38, 2));
        assert_eq!(split.dust(), Decimal::ZERO);
    }

    #[test]
    fn uneven_split_truncates() {
        let split = PayoutSplit::compute(Decimal::ONE, Decimal::ZERO, 3).unwrap();
        assert_eq!(split.per_winner, Decimal::new(333_333_333, 9));
        assert!(split.dust() > Decimal::ZERO);
    }

    #[test]
    fn winner_bounds() {
        assert!(PayoutSplit::compute(Decimal::ONE, Decimal::ZERO, 0).is_err());
        assert!(PayoutSplit::compute(Decimal::ONE, Decimal::ZERO, 4).is_ok());
        assert!(PayoutSplit::compute(Decimal::ONE, Decimal::ZERO, 5).is_err());
    }

    #[test]
    fn failed_result_has_zero_amount() {
        let r = SettlementResult::failed(Address::ZERO, "boom");
        assert!(r.failed);
        assert!(!r.confirmed);
        assert_eq!(r.amount, Decimal::ZERO);
        assert_eq!(r.error.as_deref(), Some("boom"));
    }
}
