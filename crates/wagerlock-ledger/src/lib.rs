//! # wagerlock-ledger
//!
//! Transport plane of the **Wagerlock** escrow orchestrator.
//!
//! - [`LedgerClient`]: the async seam to the remote ledger (queries and
//!   signed-message submission)
//! - [`WalletIdentity`]: the one wallet every message is signed by
//! - [`RetryPolicy`]: exponential backoff on rate limits only
//! - [`TransactionSequencer`]: single-writer queue that serializes the
//!   read-seqno / sign / send / confirm cycle
//!
//! With the `test-helpers` feature, [`mock::MockLedger`] provides an
//! in-memory ledger that applies escrow messages.

pub mod client;
pub mod retry;
pub mod sequencer;
pub mod wallet;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use client::*;
pub use retry::*;
pub use sequencer::*;
pub use wallet::*;
