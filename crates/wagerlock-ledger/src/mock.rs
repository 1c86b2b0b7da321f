//! In-memory ledger for tests.
//!
//! Applies escrow messages the way the external program would, with knobs
//! for the failure modes the orchestrator has to survive: rate limits, RPC
//! errors, seqno lag, messages that are accepted but never applied, and
//! create messages that never produce a game.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::VerifyingKey;
use rust_decimal::Decimal;
use wagerlock_types::{
    Address, EscrowError, EscrowMessage, LedgerGameRecord, Result, Seqno, SettlementId, amount,
};

use crate::client::{LedgerClient, SignedMessage};
use crate::retry::rate_limited;

#[derive(Debug, Default)]
struct WalletState {
    seqno: Seqno,
    key: Option<VerifyingKey>,
    /// Reads that still report the pre-send seqno.
    lagging_reads: u32,
}

#[derive(Debug, Default)]
struct MockState {
    wallets: HashMap<Address, WalletState>,
    games: HashMap<SettlementId, LedgerGameRecord>,
    sent: Vec<SignedMessage>,
    dropped: Vec<SignedMessage>,
    applied: Vec<EscrowMessage>,
    rate_limit_queries: u32,
    rate_limit_seqno: u32,
    rate_limit_sends: u32,
    fail_queries: u32,
    frozen: bool,
    ignore_creates: bool,
    seqno_lag: u32,
    query_count: u32,
}

/// In-memory stand-in for the ledger RPC.
#[derive(Debug)]
pub struct MockLedger {
    contract: Address,
    state: Mutex<MockState>,
}

impl MockLedger {
    #[must_use]
    pub fn new(contract: Address) -> Self {
        Self {
            contract,
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Require signatures from `wallet` to verify under `key`.
    pub fn register_wallet(&self, wallet: Address, key: VerifyingKey) {
        self.state().wallets.entry(wallet).or_default().key = Some(key);
    }

    pub fn set_seqno(&self, wallet: Address, seqno: Seqno) {
        self.state().wallets.entry(wallet).or_default().seqno = seqno;
    }

    #[must_use]
    pub fn current_seqno(&self, wallet: &Address) -> Seqno {
        self.state().wallets.get(wallet).map(|w| w.seqno).unwrap_or_default()
    }

    /// Fail the next `n` game queries with a rate limit.
    pub fn rate_limit_next_queries(&self, n: u32) {
        self.state().rate_limit_queries = n;
    }

    /// Fail the next `n` seqno reads with a rate limit.
    pub fn rate_limit_next_seqno(&self, n: u32) {
        self.state().rate_limit_seqno = n;
    }

    /// Fail the next `n` sends with a rate limit.
    pub fn rate_limit_next_sends(&self, n: u32) {
        self.state().rate_limit_sends = n;
    }

    /// Fail the next `n` game queries with a non-transient RPC error.
    pub fn fail_next_queries(&self, n: u32) {
        self.state().fail_queries = n;
    }

    /// Accept messages without ever applying them (seqno stays put).
    pub fn freeze(&self, frozen: bool) {
        self.state().frozen = frozen;
    }

    /// Apply create messages without creating a game.
    pub fn ignore_creates(&self, ignore: bool) {
        self.state().ignore_creates = ignore;
    }

    /// After each applied message, the next `n` seqno reads still return
    /// the old value.
    pub fn set_seqno_lag(&self, n: u32) {
        self.state().seqno_lag = n;
    }

    /// Record one player deposit; returns the new deposit count.
    pub fn deposit(&self, id: SettlementId) -> Option<u8> {
        let mut state = self.state();
        let game = state.games.get_mut(&id)?;
        if !game.active {
            return None;
        }
        game.deposits = game.deposits.saturating_add(1);
        game.total_deposited += game.bet_amount;
        Some(game.deposits)
    }

    pub fn insert_game(&self, record: LedgerGameRecord) {
        self.state().games.insert(record.settlement_id, record);
    }

    pub fn remove_game(&self, id: SettlementId) {
        self.state().games.remove(&id);
    }

    #[must_use]
    pub fn game(&self, id: SettlementId) -> Option<LedgerGameRecord> {
        self.state().games.get(&id).cloned()
    }

    /// Every message accepted by `send_message`, in arrival order.
    #[must_use]
    pub fn sent(&self) -> Vec<SignedMessage> {
        self.state().sent.clone()
    }

    /// Messages accepted but discarded for a seqno mismatch.
    #[must_use]
    pub fn dropped(&self) -> Vec<SignedMessage> {
        self.state().dropped.clone()
    }

    /// Escrow messages applied to contract state, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<EscrowMessage> {
        self.state().applied.clone()
    }

    /// Number of `get_game` calls seen, failed ones included.
    #[must_use]
    pub fn query_count(&self) -> u32 {
        self.state().query_count
    }

    fn apply(&self, state: &mut MockState, message: &SignedMessage) {
        if message.transfer.destination != self.contract {
            return;
        }
        let Ok(body) = EscrowMessage::from_cell(&message.transfer.body) else {
            return;
        };
        match &body {
            EscrowMessage::CreateGame {
                settlement_id,
                bet_nano,
                player_count,
            } => {
                if !state.ignore_creates && !state.games.contains_key(settlement_id) {
                    let bet_amount = amount::from_nano(*bet_nano).unwrap_or(Decimal::ZERO);
                    state.games.insert(
                        *settlement_id,
                        LedgerGameRecord {
                            settlement_id: *settlement_id,
                            bet_amount,
                            player_count: *player_count,
                            deposits: 0,
                            active: true,
                            settled: false,
                            created_at: Utc::now(),
                            total_deposited: Decimal::ZERO,
                        },
                    );
                }
            }
            EscrowMessage::Settle { settlement_id, .. } => {
                if let Some(game) = state.games.get_mut(settlement_id) {
                    if game.active {
                        game.active = false;
                        game.settled = true;
                    }
                }
            }
            EscrowMessage::Refund { settlement_id } => {
                if let Some(game) = state.games.get_mut(settlement_id) {
                    if game.active {
                        game.active = false;
                    }
                }
            }
            EscrowMessage::WithdrawFees { .. } => {}
        }
        state.applied.push(body);
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn get_game(
        &self,
        contract: &Address,
        id: SettlementId,
    ) -> Result<Option<LedgerGameRecord>> {
        let mut state = self.state();
        state.query_count += 1;
        if state.rate_limit_queries > 0 {
            state.rate_limit_queries -= 1;
            return Err(rate_limited("mock: get_game 429"));
        }
        if state.fail_queries > 0 {
            state.fail_queries -= 1;
            return Err(EscrowError::Rpc {
                reason: "mock: get_game 500".to_string(),
            });
        }
        if *contract != self.contract {
            return Ok(None);
        }
        Ok(state.games.get(&id).cloned())
    }

    async fn seqno(&self, wallet: &Address) -> Result<Seqno> {
        let mut state = self.state();
        if state.rate_limit_seqno > 0 {
            state.rate_limit_seqno -= 1;
            return Err(rate_limited("mock: seqno 429"));
        }
        let wallet = state.wallets.entry(*wallet).or_default();
        if wallet.lagging_reads > 0 {
            wallet.lagging_reads -= 1;
            return Ok(Seqno(wallet.seqno.0.saturating_sub(1)));
        }
        Ok(wallet.seqno)
    }

    async fn send_message(&self, message: &SignedMessage) -> Result<()> {
        let mut state = self.state();
        if state.rate_limit_sends > 0 {
            state.rate_limit_sends -= 1;
            return Err(rate_limited("mock: send 429"));
        }
        let lag = state.seqno_lag;
        let frozen = state.frozen;
        let wallet = state.wallets.entry(message.wallet).or_default();
        if let Some(key) = &wallet.key {
            message.verify(key)?;
        }
        state.sent.push(message.clone());

        let wallet = state.wallets.entry(message.wallet).or_default();
        if frozen {
            return Ok(());
        }
        if message.seqno != wallet.seqno {
            state.dropped.push(message.clone());
            return Ok(());
        }
        wallet.seqno = wallet.seqno.next();
        wallet.lagging_reads = lag;
        self.apply(&mut state, message);
        Ok(())
    }
}
