//! System-wide constants for the Wagerlock escrow orchestrator.

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Radix of the room-code alphabet (`0-9`, `A-Z`).
pub const ROOM_CODE_RADIX: u64 = 36;

/// Longest room code whose encoding still leaves room for the sequence
/// suffix inside a `u64` (36^10 * 1000 < 2^64).
pub const MAX_ROOM_CODE_LEN: usize = 10;

/// Multiplier reserving three decimal digits for the per-room sequence.
pub const SETTLEMENT_SEQUENCE_SPAN: u64 = 1000;

/// Highest sequence counter before the id encoding must be widened.
pub const MAX_SETTLEMENT_SEQUENCE: u32 = 999;

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// Fractional digits carried on the wire (nano-units).
pub const COIN_DECIMALS: u32 = 9;

/// Nano-units per whole coin.
pub const NANO_PER_COIN: u128 = 1_000_000_000;

/// Largest byte length a `Coins` field can declare (4-bit length prefix).
pub const MAX_COINS_BYTES: usize = 15;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Maximum data bits in a single cell.
pub const MAX_CELL_BITS: usize = 1023;

/// Maximum references held by a single cell.
pub const MAX_CELL_REFS: usize = 4;

/// Operation tag: open a new escrow game.
pub const OP_CREATE_GAME: u32 = 0x0000_0001;

/// Operation tag: pay out winners and close the game.
pub const OP_SETTLE: u32 = 0x0000_0002;

/// Operation tag: return every deposit and close the game.
pub const OP_REFUND: u32 = 0x0000_0003;

/// Operation tag: withdraw accumulated house fees to the owner.
pub const OP_WITHDRAW_FEES: u32 = 0x0000_0004;

/// Winner slots in a settle message (two inline, two in the continuation cell).
pub const MAX_WINNERS: usize = 4;

/// Winner slots carried by the primary cell of a settle message.
pub const INLINE_WINNER_SLOTS: usize = 2;

/// Minimum players for an escrow game.
pub const MIN_PLAYERS: u8 = 2;

/// Domain separator for signed outbound messages.
pub const SIGNING_DOMAIN: &[u8] = b"wagerlock:msg:v1:";

// ---------------------------------------------------------------------------
// Defaults (milliseconds unless stated otherwise)
// ---------------------------------------------------------------------------

/// Default retry attempts for a rate-limited RPC.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff.
pub const DEFAULT_RETRY_BASE_MS: u64 = 1000;

/// Default pause between reading the seqno and sending (burst limiter).
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1500;

/// Default confirmation polls after a send.
pub const DEFAULT_CONFIRM_ATTEMPTS: u32 = 10;

/// Default interval between confirmation polls.
pub const DEFAULT_CONFIRM_INTERVAL_MS: u64 = 2000;

/// Default signed-message validity window, in seconds.
pub const DEFAULT_MESSAGE_TTL_SECS: u32 = 60;

/// Default deposit poll interval.
pub const DEFAULT_DEPOSIT_POLL_MS: u64 = 5000;

/// Default hard deadline for all deposits to land.
pub const DEFAULT_DEPOSIT_TIMEOUT_MS: u64 = 120_000;

/// Default grace delay before a manual "check now" poll.
pub const DEFAULT_CHECK_NOW_GRACE_MS: u64 = 3000;

/// Default activation polls after a create message.
pub const DEFAULT_ACTIVATION_ATTEMPTS: u32 = 15;

/// Default interval between activation polls.
pub const DEFAULT_ACTIVATION_INTERVAL_MS: u64 = 2000;

/// Default house fee rate (5%), expressed in basis points.
pub const DEFAULT_FEE_RATE_BPS: i64 = 500;

/// Default value attached to every outbound message to cover execution, in
/// nano-units (0.05 coin).
pub const DEFAULT_OPERATION_VALUE_NANO: i64 = 50_000_000;

/// Default path of the persisted counter state.
pub const DEFAULT_STATE_FILE: &str = "escrow-state.json";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "Wagerlock";
