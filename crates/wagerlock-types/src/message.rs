//! The four escrow message bodies understood by the ledger program.
//!
//! ```text
//! CreateGame    op:32 | settlement_id:64 | bet:Coins | player_count:8
//! Settle        op:32 | settlement_id:64 | winner1:Addr | winner2:Addr | winner_count:8
//!                 └─ ref: winner3:Addr | winner4:Addr
//! Refund        op:32 | settlement_id:64
//! WithdrawFees  op:32 | amount:Coins
//! ```
//!
//! Absent winner slots carry [`Address::ZERO`]. Amounts are nano-units.

use std::fmt;

use crate::{
    Address, Cell, CellBuilder, EscrowError, Result, SettlementId,
    constants::{self, OP_CREATE_GAME, OP_REFUND, OP_SETTLE, OP_WITHDRAW_FEES},
};

/// A decoded escrow message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowMessage {
    CreateGame {
        settlement_id: SettlementId,
        bet_nano: u128,
        player_count: u8,
    },
    Settle {
        settlement_id: SettlementId,
        /// One to four winners, in payout order (no padding).
        winners: Vec<Address>,
    },
    Refund {
        settlement_id: SettlementId,
    },
    /// Zero means "everything available".
    WithdrawFees { amount_nano: u128 },
}

impl EscrowMessage {
    /// The 32-bit operation tag.
    #[must_use]
    pub fn op(&self) -> u32 {
        match self {
            Self::CreateGame { .. } => OP_CREATE_GAME,
            Self::Settle { .. } => OP_SETTLE,
            Self::Refund { .. } => OP_REFUND,
            Self::WithdrawFees { .. } => OP_WITHDRAW_FEES,
        }
    }

    /// The settlement id this message operates on, if any.
    #[must_use]
    pub fn settlement_id(&self) -> Option<SettlementId> {
        match self {
            Self::CreateGame { settlement_id, .. }
            | Self::Settle { settlement_id, .. }
            | Self::Refund { settlement_id } => Some(*settlement_id),
            Self::WithdrawFees { .. } => None,
        }
    }

    /// Encode into a message body cell.
    ///
    /// # Errors
    /// - [`EscrowError::InvalidWinnerCount`] for zero or more than four winners
    /// - [`EscrowError::CellOverflow`] if an amount exceeds the coins field
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_cell(&self) -> Result<Cell> {
        let mut b = CellBuilder::new();
        b.store_uint(u128::from(self.op()), 32)?;
        match self {
            Self::CreateGame {
                settlement_id,
                bet_nano,
                player_count,
            } => {
                b.store_uint(u128::from(settlement_id.0), 64)?
                    .store_coins(*bet_nano)?
                    .store_uint(u128::from(*player_count), 8)?;
            }
            Self::Settle {
                settlement_id,
                winners,
            } => {
                if winners.is_empty() || winners.len() > constants::MAX_WINNERS {
                    return Err(EscrowError::InvalidWinnerCount {
                        count: winners.len(),
                    });
                }
                let mut slots = [Address::ZERO; constants::MAX_WINNERS];
                slots[..winners.len()].copy_from_slice(winners);
                let (inline, continued) = slots.split_at(constants::INLINE_WINNER_SLOTS);

                let mut tail = CellBuilder::new();
                for addr in continued {
                    tail.store_address(addr)?;
                }

                b.store_uint(u128::from(settlement_id.0), 64)?;
                for addr in inline {
                    b.store_address(addr)?;
                }
                b.store_uint(winners.len() as u128, 8)?
                    .store_ref(tail.build())?;
            }
            Self::Refund { settlement_id } => {
                b.store_uint(u128::from(settlement_id.0), 64)?;
            }
            Self::WithdrawFees { amount_nano } => {
                b.store_coins(*amount_nano)?;
            }
        }
        Ok(b.build())
    }

    /// Decode a message body cell.
    ///
    /// # Errors
    /// Returns [`EscrowError::Wire`] for unknown op tags, truncated bodies,
    /// trailing data, or a winner count that disagrees with the slots.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_cell(cell: &Cell) -> Result<Self> {
        let mut s = cell.parse();
        let op = s.load_uint(32)? as u32;
        let msg = match op {
            OP_CREATE_GAME => Self::CreateGame {
                settlement_id: SettlementId(s.load_uint(64)? as u64),
                bet_nano: s.load_coins()?,
                player_count: s.load_uint(8)? as u8,
            },
            OP_SETTLE => {
                let settlement_id = SettlementId(s.load_uint(64)? as u64);
                let mut slots = Vec::with_capacity(constants::MAX_WINNERS);
                for _ in 0..constants::INLINE_WINNER_SLOTS {
                    slots.push(s.load_address()?);
                }
                let count = s.load_uint(8)? as usize;
                let tail_cell = s.load_ref()?;
                let mut tail = tail_cell.parse();
                while slots.len() < constants::MAX_WINNERS {
                    slots.push(tail.load_address()?);
                }
                tail.end()?;
                if count == 0 || count > constants::MAX_WINNERS {
                    return Err(EscrowError::Wire {
                        reason: format!("winner count {count} out of range"),
                    });
                }
                if slots[count..].iter().any(|a| !a.is_zero()) {
                    return Err(EscrowError::Wire {
                        reason: format!("non-zero address past winner count {count}"),
                    });
                }
                slots.truncate(count);
                Self::Settle {
                    settlement_id,
                    winners: slots,
                }
            }
            OP_REFUND => Self::Refund {
                settlement_id: SettlementId(s.load_uint(64)? as u64),
            },
            OP_WITHDRAW_FEES => Self::WithdrawFees {
                amount_nano: s.load_coins()?,
            },
            other => {
                return Err(EscrowError::Wire {
                    reason: format!("unknown op tag {other:#010x}"),
                });
            }
        };
        s.end()?;
        Ok(msg)
    }
}

impl fmt::Display for EscrowMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateGame {
                settlement_id,
                player_count,
                ..
            } => write!(f, "CREATE_GAME[{settlement_id}] players={player_count}"),
            Self::Settle {
                settlement_id,
                winners,
            } => write!(f, "SETTLE[{settlement_id}] winners={}", winners.len()),
            Self::Refund { settlement_id } => write!(f, "REFUND[{settlement_id}]"),
            Self::WithdrawFees { amount_nano } => write!(f, "WITHDRAW_FEES nano={amount_nano}"),
        }
    }
}
