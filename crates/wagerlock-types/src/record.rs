//! Read-only views of ledger state and the player roster.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, SettlementId};

/// One game's escrow state as reported by the ledger.
///
/// The orchestrator never mutates this; it only observes it through polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerGameRecord {
    pub settlement_id: SettlementId,
    /// Per-player bet.
    pub bet_amount: Decimal,
    /// Players expected to deposit.
    pub player_count: u8,
    /// Deposits confirmed so far.
    pub deposits: u8,
    /// Created and not yet settled or refunded.
    pub active: bool,
    /// Paid out.
    pub settled: bool,
    pub created_at: DateTime<Utc>,
    pub total_deposited: Decimal,
}

impl LedgerGameRecord {
    /// Every expected player has deposited.
    #[must_use]
    pub fn has_quorum(&self) -> bool {
        self.deposits >= self.player_count
    }

    /// No longer accepting deposits or payouts.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.settled || !self.active
    }
}

/// A seated player as known to the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Player {
    /// Lobby-side player identifier.
    pub id: String,
    /// Settlement-facing ledger address.
    pub address: Address,
}

impl Player {
    #[must_use]
    pub fn new(id: impl Into<String>, address: Address) -> Self {
        Self {
            id: id.into(),
            address,
        }
    }
}

/// Player id → has deposited.
pub type DepositStatus = BTreeMap<String, bool>;
