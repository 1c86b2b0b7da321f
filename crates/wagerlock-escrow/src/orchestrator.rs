//! Settlement orchestrator.
//!
//! The entry point the game server talks to. It owns the settlement-id
//! allocator, the transaction sequencer, and the deposit monitor, and turns
//! lobby-level requests (open a game, pay the winners, refund) into escrow
//! messages sent from the single house wallet.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use wagerlock_ledger::{
    LedgerClient, RetryPolicy, SubmitReceipt, TransactionSequencer, Transfer, WalletIdentity,
};
use wagerlock_types::{
    Address, EscrowConfig, EscrowError, EscrowMessage, LedgerGameRecord, PayoutSplit, Player,
    Result, RoomCode, SettlementId, SettlementResult, amount, constants,
};

use crate::{
    allocator::SettlementAllocator,
    monitor::{DepositListener, DepositMonitor, PendingDeposit, TimeoutRefund},
};

/// A persisted open game the ledger still reports as active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveGame {
    pub room: RoomCode,
    pub settlement_id: SettlementId,
    pub record: LedgerGameRecord,
}

/// Outcome of comparing persisted active ids against the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ids cleared because the ledger shows the game closed or unknown.
    pub cleared: Vec<(RoomCode, SettlementId)>,
    /// Still active and not monitored: re-establish monitoring or refund.
    pub needs_attention: Vec<ActiveGame>,
    /// The ledger could not be queried; left as they were.
    pub unresolved: Vec<(RoomCode, SettlementId)>,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.cleared.is_empty() && self.needs_attention.is_empty() && self.unresolved.is_empty()
    }
}

/// Cheaply cloneable handle to the orchestrator.
#[derive(Clone)]
pub struct EscrowOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: EscrowConfig,
    contract: Address,
    client: Arc<dyn LedgerClient>,
    retry: RetryPolicy,
    allocator: SettlementAllocator,
    sequencer: TransactionSequencer,
    monitor: DepositMonitor,
}

impl EscrowOrchestrator {
    /// Validate `config`, load the counter state, and start the sequencer.
    ///
    /// Must be called from inside a tokio runtime.
    ///
    /// # Errors
    /// Returns [`EscrowError::Configuration`] if the configuration is invalid
    /// or no signing wallet is given.
    pub fn new(
        config: EscrowConfig,
        client: Arc<dyn LedgerClient>,
        wallet: Option<WalletIdentity>,
    ) -> Result<Self> {
        config.validate()?;
        let contract = config.contract()?;
        let wallet = wallet
            .ok_or_else(|| EscrowError::Configuration("no signing wallet configured".into()))?;

        let retry = RetryPolicy::from(&config.retry);
        let allocator = SettlementAllocator::load(&config.state_file);
        let monitor = DepositMonitor::new(
            client.clone(),
            contract,
            retry.clone(),
            config.monitor.clone(),
        );
        let sequencer = TransactionSequencer::spawn(
            client.clone(),
            wallet,
            retry.clone(),
            config.sequencer.clone(),
        );

        tracing::info!(
            engine = constants::ENGINE_NAME,
            version = constants::VERSION,
            contract = %contract,
            wallet = %sequencer.wallet().address(),
            fee_rate = %config.fee_rate,
            "Escrow orchestrator started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                contract,
                client,
                retry,
                allocator,
                sequencer,
                monitor,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EscrowConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn wallet_address(&self) -> Address {
        self.inner.sequencer.wallet().address()
    }

    // -----------------------------------------------------------------
    // Ledger-writing operations
    // -----------------------------------------------------------------

    /// Allocate a settlement id for `room`, create the escrow game, and wait
    /// until the ledger shows it active.
    ///
    /// # Errors
    /// - [`EscrowError::InvalidAmount`] / [`EscrowError::InvalidPlayerCount`]
    ///   for bad input (nothing is allocated)
    /// - [`EscrowError::SettlementAlreadyOpen`] if the room has an open game
    /// - [`EscrowError::GameNotActivated`] if the game never became active;
    ///   the allocated id is released
    pub async fn open_game(
        &self,
        room: &RoomCode,
        bet_amount: Decimal,
        player_count: usize,
    ) -> Result<SettlementId> {
        if bet_amount <= Decimal::ZERO {
            return Err(EscrowError::InvalidAmount {
                amount: bet_amount,
                reason: "bet must be positive".into(),
            });
        }
        let bet_nano = amount::to_nano(bet_amount)?;
        let player_count = u8::try_from(player_count)
            .ok()
            .filter(|n| *n >= constants::MIN_PLAYERS)
            .ok_or(EscrowError::InvalidPlayerCount {
                count: player_count,
            })?;

        let id = self.inner.allocator.next_id(room)?;
        let message = EscrowMessage::CreateGame {
            settlement_id: id,
            bet_nano,
            player_count,
        };
        if let Err(e) = self.inner.submit(&message).await {
            tracing::warn!(room = %room, settlement_id = %id, error = %e, "Create game failed");
            self.inner.release(room, id);
            return Err(e);
        }

        if self.inner.await_activation(id).await {
            tracing::info!(
                room = %room,
                settlement_id = %id,
                bet = %bet_amount,
                players = player_count,
                "Escrow game active"
            );
            return Ok(id);
        }
        tracing::warn!(room = %room, settlement_id = %id, "Game never became active on ledger");
        self.inner.release(room, id);
        Err(EscrowError::GameNotActivated(id))
    }

    /// Pay `total_pot` minus the house fee to `winners` in equal shares.
    ///
    /// Never fails as a whole: every problem comes back as one failed
    /// [`SettlementResult`] per winner. An empty winner list yields an empty
    /// result list.
    pub async fn settle(
        &self,
        room: &RoomCode,
        winners: &[Address],
        total_pot: Decimal,
    ) -> Vec<SettlementResult> {
        if winners.is_empty() {
            tracing::warn!(room = %room, "Settle called with no winners");
            return Vec::new();
        }
        match self.inner.try_settle(room, winners, total_pot).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(room = %room, winners = winners.len(), error = %e, "Settlement failed");
                let reason = e.to_string();
                winners
                    .iter()
                    .map(|w| SettlementResult::failed(*w, reason.clone()))
                    .collect()
            }
        }
    }

    /// Refund every deposit of the room's open game.
    ///
    /// # Errors
    /// Returns [`EscrowError::NoActiveSettlement`] if the room has no open
    /// game, or the submission error.
    pub async fn refund(&self, room: &RoomCode) -> Result<SubmitReceipt> {
        let id = self
            .inner
            .allocator
            .active_id(room)
            .ok_or_else(|| EscrowError::NoActiveSettlement(room.clone()))?;
        self.inner.refund_id(room, id).await
    }

    /// Withdraw accumulated house fees to the owner. Zero withdraws all.
    pub async fn withdraw_fees(&self, amount: Decimal) -> Result<SubmitReceipt> {
        let amount_nano = amount::to_nano(amount)?;
        let receipt = self
            .inner
            .submit(&EscrowMessage::WithdrawFees { amount_nano })
            .await?;
        tracing::info!(amount = %amount, seqno = %receipt.seqno, "Fee withdrawal submitted");
        Ok(receipt)
    }

    // -----------------------------------------------------------------
    // Deposit monitoring
    // -----------------------------------------------------------------

    /// Watch the room's open game until every player has deposited or the
    /// deadline passes (which refunds). Replaces any running monitor.
    ///
    /// # Errors
    /// Returns [`EscrowError::NoActiveSettlement`] if the room has no open game.
    pub fn start_deposit_monitor(
        &self,
        room: &RoomCode,
        bet_amount: Decimal,
        players: Vec<Player>,
        listener: Arc<dyn DepositListener>,
    ) -> Result<()> {
        let id = self
            .inner
            .allocator
            .active_id(room)
            .ok_or_else(|| EscrowError::NoActiveSettlement(room.clone()))?;
        let refunder: Arc<dyn TimeoutRefund> = self.inner.clone();
        self.inner.monitor.start(
            room.clone(),
            id,
            PendingDeposit::new(bet_amount, players),
            listener,
            refunder,
        );
        Ok(())
    }

    /// Ask the room's monitor for an extra poll after the grace delay.
    pub fn check_deposits_now(&self, room: &RoomCode) -> Result<()> {
        self.inner.monitor.check_now(room)
    }

    /// Stop monitoring the room and refund its open game.
    pub async fn cancel_deposit_monitor(&self, room: &RoomCode) -> Result<SubmitReceipt> {
        if let Err(e) = self.inner.monitor.stop(room) {
            tracing::debug!(room = %room, error = %e, "No monitor to cancel, refunding anyway");
        }
        self.refund(room).await
    }

    /// Stop monitoring the room without touching the ledger.
    pub fn stop_deposit_monitor(&self, room: &RoomCode) -> Result<()> {
        self.inner.monitor.stop(room)
    }

    #[must_use]
    pub fn monitored_rooms(&self) -> Vec<RoomCode> {
        self.inner.monitor.active_rooms()
    }

    // -----------------------------------------------------------------
    // Queries and recovery
    // -----------------------------------------------------------------

    /// Id for the room's current counter (open or not).
    #[must_use]
    pub fn current_id(&self, room: &RoomCode) -> Option<SettlementId> {
        self.inner.allocator.current_id(room)
    }

    /// The room's open settlement id, if any.
    #[must_use]
    pub fn active_id(&self, room: &RoomCode) -> Option<SettlementId> {
        self.inner.allocator.active_id(room)
    }

    /// Ledger record for the room's open game, or its last game.
    ///
    /// # Errors
    /// Returns [`EscrowError::NoActiveSettlement`] if the room never opened a
    /// game, or the query error once retries are spent.
    pub async fn game_record(&self, room: &RoomCode) -> Result<Option<LedgerGameRecord>> {
        let id = self
            .active_id(room)
            .or_else(|| self.current_id(room))
            .ok_or_else(|| EscrowError::NoActiveSettlement(room.clone()))?;
        self.inner.query(id).await
    }

    /// Drop the room's open id without touching the ledger.
    pub fn forget_room(&self, room: &RoomCode) -> Result<Option<SettlementId>> {
        self.inner.allocator.forget(room)
    }

    /// Compare every persisted open id with the ledger.
    ///
    /// Closed or unknown games are cleared. Active games without a running
    /// monitor are reported for the caller to resume or refund.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for (room, id) in self.inner.allocator.active_ids() {
            match self.inner.query(id).await {
                Ok(Some(record)) if !record.is_closed() => {
                    if !self.inner.monitor.is_monitoring(&room) {
                        tracing::warn!(
                            room = %room,
                            settlement_id = %id,
                            deposits = record.deposits,
                            expected = record.player_count,
                            "Open game has no deposit monitor"
                        );
                        report.needs_attention.push(ActiveGame {
                            room,
                            settlement_id: id,
                            record,
                        });
                    }
                }
                Ok(found) => {
                    tracing::warn!(
                        room = %room,
                        settlement_id = %id,
                        on_ledger = found.is_some(),
                        "Persisted id is closed on ledger, clearing"
                    );
                    self.inner.release(&room, id);
                    report.cleared.push((room, id));
                }
                Err(e) => {
                    tracing::warn!(room = %room, settlement_id = %id, error = %e, "Reconcile query failed");
                    report.unresolved.push((room, id));
                }
            }
        }
        tracing::info!(
            cleared = report.cleared.len(),
            needs_attention = report.needs_attention.len(),
            unresolved = report.unresolved.len(),
            "Reconciliation finished"
        );
        report
    }

    /// Stop every deposit monitor (no refunds) and drain the sequencer.
    pub async fn shutdown(&self) {
        self.inner.monitor.stop_all().await;
        self.inner.sequencer.shutdown().await;
        tracing::info!("Escrow orchestrator stopped");
    }
}

impl std::fmt::Debug for EscrowOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowOrchestrator")
            .field("contract", &self.inner.contract)
            .field("sequencer", &self.inner.sequencer)
            .field("monitor", &self.inner.monitor)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

impl Inner {
    async fn submit(&self, message: &EscrowMessage) -> Result<SubmitReceipt> {
        let transfer = Transfer {
            destination: self.contract,
            value: self.config.operation_value,
            body: message.to_cell()?,
        };
        tracing::debug!(message = %message, "Queueing message");
        self.sequencer.submit(transfer).await
    }

    async fn query(&self, id: SettlementId) -> Result<Option<LedgerGameRecord>> {
        let client = &self.client;
        let contract = self.contract;
        self.retry
            .run("get_game", || client.get_game(&contract, id))
            .await
    }

    /// Poll until the game is visible and active, within the activation budget.
    async fn await_activation(&self, id: SettlementId) -> bool {
        let attempts = self.config.activation.attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.activation.interval).await;
            }
            match self.query(id).await {
                Ok(Some(record)) if record.active => return true,
                Ok(_) => tracing::debug!(settlement_id = %id, attempt, "Game not active yet"),
                Err(e) => tracing::debug!(settlement_id = %id, error = %e, "Activation poll failed"),
            }
        }
        false
    }

    /// Guarded clear; a failed write is logged and retried by the next save.
    fn release(&self, room: &RoomCode, id: SettlementId) {
        if let Err(e) = self.allocator.clear_if_current(room, id) {
            tracing::error!(room = %room, settlement_id = %id, error = %e, "Failed to persist cleared id");
        }
    }

    async fn try_settle(
        &self,
        room: &RoomCode,
        winners: &[Address],
        total_pot: Decimal,
    ) -> Result<Vec<SettlementResult>> {
        if winners.len() > constants::MAX_WINNERS {
            return Err(EscrowError::InvalidWinnerCount {
                count: winners.len(),
            });
        }
        let split = PayoutSplit::compute(total_pot, self.config.fee_rate, winners.len())?;
        let id = self
            .allocator
            .active_id(room)
            .ok_or_else(|| EscrowError::NoActiveSettlement(room.clone()))?;

        let receipt = self
            .submit(&EscrowMessage::Settle {
                settlement_id: id,
                winners: winners.to_vec(),
            })
            .await?;
        self.release(room, id);

        tracing::info!(
            room = %room,
            settlement_id = %id,
            pot = %split.total_pot,
            fee = %split.fee,
            per_winner = %split.per_winner,
            winners = split.winner_count,
            seqno = %receipt.seqno,
            confirmed = receipt.is_confirmed(),
            "Settlement submitted"
        );
        let confirmed = receipt.is_confirmed();
        Ok(winners
            .iter()
            .map(|w| SettlementResult::paid(*w, split.per_winner, confirmed))
            .collect())
    }

    async fn refund_id(&self, room: &RoomCode, id: SettlementId) -> Result<SubmitReceipt> {
        let receipt = self
            .submit(&EscrowMessage::Refund { settlement_id: id })
            .await?;
        self.release(room, id);
        tracing::info!(
            room = %room,
            settlement_id = %id,
            seqno = %receipt.seqno,
            confirmed = receipt.is_confirmed(),
            "Refund submitted"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl TimeoutRefund for Inner {
    async fn refund_on_timeout(&self, room: &RoomCode, id: SettlementId) {
        if self.allocator.active_id(room) != Some(id) {
            tracing::warn!(room = %room, settlement_id = %id, "Timed-out game already closed, skipping refund");
            return;
        }
        if let Err(e) = self.refund_id(room, id).await {
            tracing::error!(room = %room, settlement_id = %id, error = %e, "Timeout refund failed");
        }
    }
}
