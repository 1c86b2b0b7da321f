//! # wagerlock-types
//!
//! Shared types, errors, and configuration for the **Wagerlock** escrow
//! settlement orchestrator.
//!
//! This crate is the leaf dependency of the workspace: every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`RoomCode`], [`SettlementId`], [`Address`], [`Seqno`]
//! - **Amounts**: whole-coin [`rust_decimal::Decimal`] ↔ wire nano-units ([`amount`])
//! - **Wire codec**: [`Cell`], [`CellBuilder`], [`CellSlice`], [`EscrowMessage`]
//! - **Ledger view**: [`LedgerGameRecord`], [`Player`], [`DepositStatus`]
//! - **Settlement**: [`PayoutSplit`], [`SettlementResult`]
//! - **Configuration**: [`EscrowConfig`] and its sections
//! - **Errors**: [`EscrowError`] with `WG_ERR_` prefix codes
//! - **Constants**: op tags, limits, and defaults

pub mod amount;
pub mod cell;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod message;
pub mod record;
pub mod settlement;

pub use cell::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use message::*;
pub use record::*;
pub use settlement::*;

// Constants and amount helpers are accessed via their module paths
// (`wagerlock_types::constants::FOO`, `wagerlock_types::amount::to_nano`).
