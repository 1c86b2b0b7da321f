//! # wagerlock-escrow
//!
//! **Orchestration plane** of the Wagerlock escrow settlement orchestrator.
//!
//! ## Architecture
//!
//! [`EscrowOrchestrator`] is the single entry point. For each room it:
//! 1. Allocates a settlement id from the persisted room counter
//!    ([`SettlementAllocator`] over [`CounterStore`])
//! 2. Creates the escrow game through the single-writer transaction sequencer
//! 3. Watches deposits until quorum, timeout, or cancellation
//!    ([`DepositMonitor`])
//! 4. Pays winners (minus the house fee) or refunds, then releases the id
//!    with a guarded clear
//!
//! [`EscrowOrchestrator::reconcile`] compares persisted open ids with the
//! ledger after a restart.

pub mod allocator;
pub mod counter_store;
pub mod monitor;
pub mod orchestrator;

pub use allocator::SettlementAllocator;
pub use counter_store::CounterStore;
pub use monitor::{DepositListener, DepositMonitor, MonitorOutcome, PendingDeposit, TimeoutRefund};
pub use orchestrator::{ActiveGame, EscrowOrchestrator, ReconcileReport};
