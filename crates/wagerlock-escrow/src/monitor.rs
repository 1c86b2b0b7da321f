//! Per-room deposit monitor.
//!
//! Each monitored room gets its own task that polls the ledger on a fixed
//! interval until one of three things happens first:
//!
//! - **Satisfied**: the game record shows every expected deposit
//! - **TimedOut**: the hard deadline passes; a refund is requested
//! - **Cancelled**: the session is stopped or replaced
//!
//! Exactly one outcome ends a session. A finished session removes its own
//! map entry only, so it can never clobber a newer session for the room.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::{
    sync::{Notify, oneshot},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use wagerlock_ledger::{LedgerClient, RetryPolicy};
use wagerlock_types::{
    Address, DepositStatus, EscrowError, LedgerGameRecord, MonitorConfig, Player, Result, RoomCode,
    SettlementId,
};

/// Receives the terminal outcome of a monitoring session.
#[async_trait]
pub trait DepositListener: Send + Sync {
    /// Every player has deposited; `status` maps each player id to `true`.
    async fn on_deposits_confirmed(&self, room: &RoomCode, status: DepositStatus);

    /// The deadline passed without quorum. A refund has already been requested.
    async fn on_deposit_timeout(&self, room: &RoomCode);
}

/// Performs the refund when a session times out.
#[async_trait]
pub trait TimeoutRefund: Send + Sync {
    async fn refund_on_timeout(&self, room: &RoomCode, id: SettlementId);
}

/// How a monitoring session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Satisfied,
    TimedOut,
    Cancelled,
}

/// What a session is waiting for.
#[derive(Debug, Clone)]
pub struct PendingDeposit {
    pub bet_amount: Decimal,
    pub players: Vec<Player>,
    pub started_at: DateTime<Utc>,
}

impl PendingDeposit {
    #[must_use]
    pub fn new(bet_amount: Decimal, players: Vec<Player>) -> Self {
        Self {
            bet_amount,
            players,
            started_at: Utc::now(),
        }
    }

    fn all_deposited(&self) -> DepositStatus {
        self.players.iter().map(|p| (p.id.clone(), true)).collect()
    }
}

struct Session {
    id: u64,
    settlement_id: SettlementId,
    cancel: oneshot::Sender<()>,
    check_now: Arc<Notify>,
    handle: JoinHandle<MonitorOutcome>,
}

type SessionMap = Arc<Mutex<HashMap<RoomCode, Session>>>;

fn lock(sessions: &SessionMap) -> MutexGuard<'_, HashMap<RoomCode, Session>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every running monitoring session.
pub struct DepositMonitor {
    client: Arc<dyn LedgerClient>,
    contract: Address,
    retry: RetryPolicy,
    config: MonitorConfig,
    sessions: SessionMap,
    next_session: AtomicU64,
}

impl DepositMonitor {
    #[must_use]
    pub fn new(
        client: Arc<dyn LedgerClient>,
        contract: Address,
        retry: RetryPolicy,
        config: MonitorConfig,
    ) -> Self {
        Self {
            client,
            contract,
            retry,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_session: AtomicU64::new(1),
        }
    }

    /// Start monitoring `room` for deposits into `settlement_id`, replacing
    /// any session already running for the room.
    pub fn start(
        &self,
        room: RoomCode,
        settlement_id: SettlementId,
        pending: PendingDeposit,
        listener: Arc<dyn DepositListener>,
        refunder: Arc<dyn TimeoutRefund>,
    ) {
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancel_rx) = oneshot::channel();
        let check_now = Arc::new(Notify::new());

        let task = SessionTask {
            session_id,
            room: room.clone(),
            settlement_id,
            pending,
            client: self.client.clone(),
            contract: self.contract,
            retry: self.retry.clone(),
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            listener,
            refunder,
        };

        // Hold the map lock across the spawn so the task cannot finish and
        // look for its entry before it is inserted.
        let mut sessions = lock(&self.sessions);
        if let Some(old) = sessions.remove(&room) {
            tracing::info!(room = %room, settlement_id = %old.settlement_id, "Replacing deposit monitor");
            let _ = old.cancel.send(());
        }
        let handle = tokio::spawn(task.run(cancel_rx, check_now.clone()));
        sessions.insert(
            room.clone(),
            Session {
                id: session_id,
                settlement_id,
                cancel,
                check_now,
                handle,
            },
        );
        tracing::info!(
            room = %room,
            settlement_id = %settlement_id,
            session = session_id,
            "Deposit monitor started"
        );
    }

    /// Poll once more after the grace delay, without touching the schedule.
    ///
    /// # Errors
    /// Returns [`EscrowError::MonitorNotFound`] if the room is not monitored.
    pub fn check_now(&self, room: &RoomCode) -> Result<()> {
        let sessions = lock(&self.sessions);
        let session = sessions
            .get(room)
            .ok_or_else(|| EscrowError::MonitorNotFound(room.clone()))?;
        session.check_now.notify_one();
        Ok(())
    }

    /// Stop monitoring `room` with no side effects.
    ///
    /// # Errors
    /// Returns [`EscrowError::MonitorNotFound`] if the room is not monitored.
    pub fn stop(&self, room: &RoomCode) -> Result<()> {
        let session = lock(&self.sessions)
            .remove(room)
            .ok_or_else(|| EscrowError::MonitorNotFound(room.clone()))?;
        let _ = session.cancel.send(());
        tracing::info!(room = %room, settlement_id = %session.settlement_id, "Deposit monitor stopped");
        Ok(())
    }

    /// Stop every session and wait for the tasks to wind down.
    pub async fn stop_all(&self) {
        let drained: Vec<(RoomCode, Session)> = lock(&self.sessions).drain().collect();
        for (room, session) in drained {
            let _ = session.cancel.send(());
            if let Err(e) = session.handle.await {
                tracing::error!(room = %room, error = %e, "Deposit monitor task failed");
            }
        }
    }

    /// Rooms currently under monitoring, sorted.
    #[must_use]
    pub fn active_rooms(&self) -> Vec<RoomCode> {
        let mut rooms: Vec<RoomCode> = lock(&self.sessions).keys().cloned().collect();
        rooms.sort();
        rooms
    }

    #[must_use]
    pub fn is_monitoring(&self, room: &RoomCode) -> bool {
        lock(&self.sessions).contains_key(room)
    }
}

impl std::fmt::Debug for DepositMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepositMonitor")
            .field("contract", &self.contract)
            .field("rooms", &self.active_rooms())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

struct SessionTask {
    session_id: u64,
    room: RoomCode,
    settlement_id: SettlementId,
    pending: PendingDeposit,
    client: Arc<dyn LedgerClient>,
    contract: Address,
    retry: RetryPolicy,
    config: MonitorConfig,
    sessions: SessionMap,
    listener: Arc<dyn DepositListener>,
    refunder: Arc<dyn TimeoutRefund>,
}

impl SessionTask {
    async fn run(
        self,
        mut cancel: oneshot::Receiver<()>,
        check_now: Arc<Notify>,
    ) -> MonitorOutcome {
        let period = self.config.poll_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = time::sleep(self.config.deposit_timeout);
        tokio::pin!(deadline);
        let extra_poll = time::sleep(self.config.check_now_grace);
        tokio::pin!(extra_poll);
        let mut extra_armed = false;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut cancel => break MonitorOutcome::Cancelled,
                () = &mut deadline => break MonitorOutcome::TimedOut,
                _ = ticker.tick() => {
                    if self.poll().await {
                        break MonitorOutcome::Satisfied;
                    }
                }
                () = &mut extra_poll, if extra_armed => {
                    extra_armed = false;
                    tracing::debug!(room = %self.room, "Manual deposit check");
                    if self.poll().await {
                        break MonitorOutcome::Satisfied;
                    }
                }
                () = check_now.notified() => {
                    extra_poll.as_mut().reset(Instant::now() + self.config.check_now_grace);
                    extra_armed = true;
                }
            }
        };

        if outcome != MonitorOutcome::Cancelled {
            self.release();
        }
        match outcome {
            MonitorOutcome::Satisfied => {
                tracing::info!(
                    room = %self.room,
                    settlement_id = %self.settlement_id,
                    players = self.pending.players.len(),
                    waited_ms = (Utc::now() - self.pending.started_at).num_milliseconds(),
                    "All deposits confirmed"
                );
                self.listener
                    .on_deposits_confirmed(&self.room, self.pending.all_deposited())
                    .await;
            }
            MonitorOutcome::TimedOut => {
                tracing::warn!(
                    room = %self.room,
                    settlement_id = %self.settlement_id,
                    "Deposit deadline passed, refunding"
                );
                self.refunder
                    .refund_on_timeout(&self.room, self.settlement_id)
                    .await;
                self.listener.on_deposit_timeout(&self.room).await;
            }
            MonitorOutcome::Cancelled => {
                tracing::debug!(room = %self.room, session = self.session_id, "Deposit monitor cancelled");
            }
        }
        outcome
    }

    /// Whether the ledger shows quorum. Failures only log; the next tick
    /// tries again.
    async fn poll(&self) -> bool {
        let client = &self.client;
        let contract = self.contract;
        let id = self.settlement_id;
        match self
            .retry
            .run("get_game", || client.get_game(&contract, id))
            .await
        {
            Ok(Some(record)) => self.evaluate(&record),
            Ok(None) => {
                tracing::debug!(room = %self.room, settlement_id = %id, "Game not visible yet");
                false
            }
            Err(e) => {
                tracing::warn!(room = %self.room, settlement_id = %id, error = %e, "Deposit poll failed");
                false
            }
        }
    }

    fn evaluate(&self, record: &LedgerGameRecord) -> bool {
        tracing::debug!(
            room = %self.room,
            settlement_id = %self.settlement_id,
            deposits = record.deposits,
            expected = record.player_count,
            "Deposit poll"
        );
        record.has_quorum()
    }

    /// Remove this session's map entry if it is still the current one.
    fn release(&self) {
        let mut sessions = lock(&self.sessions);
        if sessions.get(&self.room).is_some_and(|s| s.id == self.session_id) {
            sessions.remove(&self.room);
        }
    }
}
