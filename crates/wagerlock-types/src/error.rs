//! Error types for the Wagerlock escrow orchestrator.
//!
//! All errors use the `WG_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Identifier / input errors
//! - 2xx: Ledger / transport errors
//! - 3xx: Settlement errors
//! - 4xx: Wire format errors
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{RoomCode, Seqno, SettlementId};

/// Central error enum for all Wagerlock operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    // =================================================================
    // Identifier / Input Errors (1xx)
    // =================================================================
    /// The room code is empty, too long, or outside the base-36 alphabet.
    #[error("WG_ERR_100: Invalid room code: {reason}")]
    InvalidRoomCode { reason: String },

    /// The room has used up every sequence slot of the id encoding.
    #[error("WG_ERR_101: Settlement sequence exhausted for room {room} at {counter}")]
    SequenceExhausted { room: RoomCode, counter: u32 },

    /// The address string could not be parsed.
    #[error("WG_ERR_102: Invalid address: {reason}")]
    InvalidAddress { reason: String },

    /// The amount is negative or too precise for the wire.
    #[error("WG_ERR_103: Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: String },

    /// The player roster is outside the supported range.
    #[error("WG_ERR_104: Invalid player count: {count}")]
    InvalidPlayerCount { count: usize },

    /// The winner list is empty or longer than the settle message allows.
    #[error("WG_ERR_105: Invalid winner count: {count}")]
    InvalidWinnerCount { count: usize },

    // =================================================================
    // Ledger / Transport Errors (2xx)
    // =================================================================
    /// The remote endpoint signalled a rate limit. Always transient.
    #[error("WG_ERR_200: Rate limited by ledger endpoint: {reason}")]
    RateLimited { reason: String },

    /// Any other RPC failure (bad response, connection error).
    #[error("WG_ERR_201: Ledger RPC failed: {reason}")]
    Rpc { reason: String },

    /// The wallet seqno did not advance past the last submitted value.
    #[error("WG_ERR_202: Stale seqno {observed}, last submitted {last_submitted}")]
    StaleSequence { observed: Seqno, last_submitted: Seqno },

    /// The transaction sequencer has shut down.
    #[error("WG_ERR_203: Transaction sequencer closed")]
    SequencerClosed,

    /// The signed message was rejected by the endpoint.
    #[error("WG_ERR_204: Message rejected: {reason}")]
    MessageRejected { reason: String },

    // =================================================================
    // Settlement Errors (3xx)
    // =================================================================
    /// The room has no open settlement id.
    #[error("WG_ERR_300: No active settlement for room {0}")]
    NoActiveSettlement(RoomCode),

    /// The room already has an open settlement id.
    #[error("WG_ERR_301: Settlement {id} already open for room {room}")]
    SettlementAlreadyOpen { room: RoomCode, id: SettlementId },

    /// The create message never became observable as an active game.
    #[error("WG_ERR_302: Game {0} not activated on ledger")]
    GameNotActivated(SettlementId),

    /// No deposit monitor is running for the room.
    #[error("WG_ERR_303: No deposit monitor for room {0}")]
    MonitorNotFound(RoomCode),

    // =================================================================
    // Wire Format Errors (4xx)
    // =================================================================
    /// A cell would exceed its bit or reference capacity.
    #[error("WG_ERR_400: Cell overflow: {reason}")]
    CellOverflow { reason: String },

    /// A cell could not be decoded into a known message.
    #[error("WG_ERR_401: Wire decode failed: {reason}")]
    Wire { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("WG_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("WG_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (missing contract, missing signer, bad values).
    #[error("WG_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (state file).
    #[error("WG_ERR_903: I/O error: {0}")]
    Io(String),
}

impl EscrowError {
    /// Whether this error is a rate-limit signal that warrants backoff.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, EscrowError>;

impl From<std::io::Error> for EscrowError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EscrowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
