//! End-to-end tests across the orchestration and transport planes.
//!
//! Every test drives a real [`EscrowOrchestrator`] (allocator, sequencer,
//! deposit monitor) against the in-memory ledger, on paused tokio time so
//! polling intervals and deadlines elapse instantly and deterministically.

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use wagerlock_escrow::{DepositListener, EscrowOrchestrator};
use wagerlock_ledger::{WalletIdentity, mock::MockLedger};
use wagerlock_types::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn contract() -> Address {
    Address::new(0, [0xc0; 32])
}

fn room(code: &str) -> RoomCode {
    RoomCode::new(code).unwrap()
}

fn players(n: u8) -> Vec<Player> {
    (1..=n)
        .map(|i| Player::new(format!("player-{i}"), Address::new(0, [i; 32])))
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Confirmed(RoomCode, DepositStatus),
    TimedOut(RoomCode),
}

struct ChannelListener(mpsc::UnboundedSender<Event>);

#[async_trait]
impl DepositListener for ChannelListener {
    async fn on_deposits_confirmed(&self, room: &RoomCode, status: DepositStatus) {
        let _ = self.0.send(Event::Confirmed(room.clone(), status));
    }

    async fn on_deposit_timeout(&self, room: &RoomCode) {
        let _ = self.0.send(Event::TimedOut(room.clone()));
    }
}

fn listener() -> (Arc<ChannelListener>, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelListener(tx)), rx)
}

/// House wallet plus ledger, reusable across orchestrator restarts.
struct Deployment {
    ledger: Arc<MockLedger>,
    wallet: WalletIdentity,
}

impl Deployment {
    fn new() -> Self {
        init_tracing();
        let ledger = Arc::new(MockLedger::new(contract()));
        let wallet = WalletIdentity::from_seed([42; 32]);
        ledger.register_wallet(wallet.address(), wallet.verifying_key());
        Self { ledger, wallet }
    }

    fn orchestrator(&self, state_dir: &Path) -> EscrowOrchestrator {
        let config = EscrowConfig {
            contract_address: Some(contract()),
            state_file: state_dir.join("escrow-state.json"),
            ..EscrowConfig::default()
        };
        EscrowOrchestrator::new(config, self.ledger.clone(), Some(self.wallet.clone())).unwrap()
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn open_deposit_settle_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let ab12 = room("AB12");
    let bet = Decimal::new(4, 1);

    let id = orch.open_game(&ab12, bet, 3).await.unwrap();
    assert_eq!(id, SettlementId(480_854_001));
    assert_eq!(orch.active_id(&ab12), Some(id));
    let record = orch.game_record(&ab12).await.unwrap().unwrap();
    assert!(record.active);
    assert_eq!(record.player_count, 3);

    let (listener, mut events) = listener();
    orch.start_deposit_monitor(&ab12, bet, players(3), listener).unwrap();
    assert_eq!(orch.monitored_rooms(), vec![ab12.clone()]);
    for _ in 0..3 {
        env.ledger.deposit(id).unwrap();
    }

    let Some(Event::Confirmed(r, status)) = events.recv().await else {
        panic!("expected deposit confirmation");
    };
    assert_eq!(r, ab12);
    assert_eq!(status.len(), 3);
    assert!(status.values().all(|d| *d));
    assert!(orch.monitored_rooms().is_empty());

    let pot = env.ledger.game(id).unwrap().total_deposited;
    assert_eq!(pot, Decimal::new(12, 1));
    let winners: Vec<Address> = players(3).iter().map(|p| p.address).collect();
    let results = orch.settle(&ab12, &winners, pot).await;

    assert_eq!(results.len(), 3);
    for result in &results {
        assert!(!result.failed, "unexpected failure: {result:?}");
        assert!(result.confirmed);
        assert_eq!(result.amount, Decimal::new(38, 2));
    }
    assert_eq!(orch.active_id(&ab12), None);
    assert!(env.ledger.game(id).unwrap().settled);

    let ops: Vec<u32> = env.ledger.applied().iter().map(EscrowMessage::op).collect();
    assert_eq!(ops, vec![constants::OP_CREATE_GAME, constants::OP_SETTLE]);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn deposit_timeout_refunds_and_frees_room() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let ab12 = room("AB12");

    let id = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap();
    let (listener, mut events) = listener();
    orch.start_deposit_monitor(&ab12, Decimal::ONE, players(2), listener).unwrap();
    env.ledger.deposit(id).unwrap();

    assert_eq!(events.recv().await, Some(Event::TimedOut(ab12.clone())));
    let record = env.ledger.game(id).unwrap();
    assert!(!record.active);
    assert!(!record.settled);
    assert_eq!(orch.active_id(&ab12), None);

    // Rematch gets the next sequence slot.
    let next = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap();
    assert_eq!(next.sequence(), 2);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancel_monitor_refunds_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let ab12 = room("AB12");

    let id = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap();
    let (listener, mut events) = listener();
    orch.start_deposit_monitor(&ab12, Decimal::ONE, players(2), listener).unwrap();
    orch.check_deposits_now(&ab12).unwrap();

    let receipt = orch.cancel_deposit_monitor(&ab12).await.unwrap();
    assert!(receipt.is_confirmed());
    assert!(!env.ledger.game(id).unwrap().active);
    assert!(orch.monitored_rooms().is_empty());

    // A cancelled session reports nothing, not even after its deadline.
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(events.try_recv().is_err());
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn second_open_while_game_open_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let ab12 = room("AB12");

    let id = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap();
    let err = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap_err();
    assert!(matches!(err, EscrowError::SettlementAlreadyOpen { id: open, .. } if open == id));
    assert_eq!(env.ledger.applied().len(), 1);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn late_settlement_leaves_newer_game_open() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let ab12 = room("AB12");
    let winners = [Address::new(0, [1; 32])];

    let old = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap();
    let settling = {
        let orch = orch.clone();
        let ab12 = ab12.clone();
        tokio::spawn(async move { orch.settle(&ab12, &winners, Decimal::new(2, 0)).await })
    };
    // Let the settle pick up `old` and queue behind the settle delay.
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Operator drops the stuck id and the room opens its next game while
    // the old settlement is still in flight.
    assert_eq!(orch.forget_room(&ab12).unwrap(), Some(old));
    let new = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap();
    assert_eq!(new.sequence(), 2);

    let results = settling.await.unwrap();
    assert!(!results[0].failed, "unexpected failure: {results:?}");
    assert!(env.ledger.game(old).unwrap().settled);

    // The late settle of `old` must not clear the newer game's id.
    assert_eq!(orch.active_id(&ab12), Some(new));
    assert!(env.ledger.game(new).unwrap().active);
    let err = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap_err();
    assert!(matches!(err, EscrowError::SettlementAlreadyOpen { id, .. } if id == new));
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_settlement_is_reported_per_winner() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let ab12 = room("AB12");

    let id = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap();
    env.ledger.freeze(true);
    let winners: Vec<Address> = players(2).iter().map(|p| p.address).collect();
    let results = orch.settle(&ab12, &winners, Decimal::new(2, 0)).await;

    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(!result.failed);
        assert!(!result.confirmed);
    }
    assert!(env.ledger.game(id).unwrap().active);
    assert_eq!(orch.active_id(&ab12), None);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rooms_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());

    let mut rooms: Vec<RoomCode> = (0..4).map(|_| RoomCode::random(6)).collect();
    rooms.sort();
    rooms.dedup();
    for r in &rooms {
        let id = orch.open_game(r, Decimal::ONE, 2).await.unwrap();
        assert_eq!(id.sequence(), 1);
        assert_eq!(id.room_component(), r.encode());
    }

    let winners = [Address::random(), Address::random()];
    let results = orch.settle(&rooms[0], &winners, Decimal::from(2)).await;
    assert!(results.iter().all(|r| !r.failed));
    assert_eq!(results[0].amount, Decimal::new(95, 2));
    for r in &rooms[1..] {
        assert!(orch.active_id(r).is_some());
    }
    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Durability and recovery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn restart_continues_counter_without_ledger_query() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("escrow-state.json"),
        r#"{"counters":{"AB12":3},"activeIds":{}}"#,
    )
    .unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let ab12 = room("AB12");

    assert_eq!(orch.current_id(&ab12), Some(SettlementId(480_854_003)));
    assert_eq!(env.ledger.query_count(), 0);

    let id = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap();
    assert_eq!(id, SettlementId(ab12.encode() * 1000 + 4));
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconcile_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let (open, settled, vanished) = (room("OPEN1"), room("DONE1"), room("GONE1"));

    let first = env.orchestrator(dir.path());
    let open_id = first.open_game(&open, Decimal::ONE, 2).await.unwrap();
    let settled_id = first.open_game(&settled, Decimal::ONE, 2).await.unwrap();
    let vanished_id = first.open_game(&vanished, Decimal::ONE, 2).await.unwrap();
    first.shutdown().await;
    drop(first);

    // Out-of-band ledger changes while the process was down.
    let mut record = env.ledger.game(settled_id).unwrap();
    record.active = false;
    record.settled = true;
    env.ledger.insert_game(record);
    env.ledger.remove_game(vanished_id);

    let orch = env.orchestrator(dir.path());
    let report = orch.reconcile().await;

    assert_eq!(report.needs_attention.len(), 1);
    assert_eq!(report.needs_attention[0].room, open);
    assert_eq!(report.needs_attention[0].settlement_id, open_id);
    let mut cleared = report.cleared.clone();
    cleared.sort();
    assert_eq!(cleared, vec![(settled.clone(), settled_id), (vanished.clone(), vanished_id)]);
    assert!(report.unresolved.is_empty());

    assert_eq!(orch.active_id(&open), Some(open_id));
    assert_eq!(orch.active_id(&settled), None);
    assert_eq!(orch.active_id(&vanished), None);

    // Second pass has nothing left to clear.
    let again = orch.reconcile().await;
    assert!(again.cleared.is_empty());
    assert_eq!(again.needs_attention.len(), 1);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconcile_leaves_unreachable_ids() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let ab12 = room("AB12");
    let id = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap();

    env.ledger.fail_next_queries(1);
    let report = orch.reconcile().await;
    assert_eq!(report.unresolved, vec![(ab12.clone(), id)]);
    assert_eq!(orch.active_id(&ab12), Some(id));
    orch.shutdown().await;
}

// ---------------------------------------------------------------------------
// Transport behaviour seen through the orchestrator
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn concurrent_rooms_share_one_seqno_stream() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let rooms = [room("R1"), room("R2"), room("R3")];

    let (a, b, c) = tokio::join!(
        orch.open_game(&rooms[0], Decimal::ONE, 2),
        orch.open_game(&rooms[1], Decimal::ONE, 2),
        orch.open_game(&rooms[2], Decimal::ONE, 2),
    );
    for result in [a, b, c] {
        result.unwrap();
    }

    let seqnos: Vec<u32> = env.ledger.sent().iter().map(|m| m.seqno.0).collect();
    assert_eq!(seqnos, vec![0, 1, 2]);
    assert!(env.ledger.dropped().is_empty());
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rate_limits_are_absorbed() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let ab12 = room("AB12");

    env.ledger.rate_limit_next_seqno(2);
    env.ledger.rate_limit_next_sends(2);
    env.ledger.rate_limit_next_queries(2);

    let id = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap();
    assert!(env.ledger.game(id).unwrap().active);
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fee_withdrawal_goes_through_sequencer() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());

    let receipt = orch.withdraw_fees(Decimal::ZERO).await.unwrap();
    assert!(receipt.is_confirmed());
    assert_eq!(
        env.ledger.applied(),
        vec![EscrowMessage::WithdrawFees { amount_nano: 0 }]
    );
    orch.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn submissions_after_shutdown_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let env = Deployment::new();
    let orch = env.orchestrator(dir.path());
    let ab12 = room("AB12");
    orch.shutdown().await;

    let err = orch.open_game(&ab12, Decimal::ONE, 2).await.unwrap_err();
    assert_eq!(err, EscrowError::SequencerClosed);
    // The failed create released its id.
    assert_eq!(orch.active_id(&ab12), None);

    let results = orch.settle(&ab12, &[Address::new(0, [1; 32])], Decimal::ONE).await;
    assert!(results[0].failed);
}
