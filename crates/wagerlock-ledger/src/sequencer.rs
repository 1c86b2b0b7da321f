//! Single-writer transaction sequencer.
//!
//! Every outbound message from the shared wallet goes through one worker
//! task fed by an unbounded channel, so at most one read-seqno / sign /
//! send / confirm cycle is in flight at a time. Callers get their outcome
//! back over a oneshot; a failed job never stalls the jobs queued behind it.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{Duration, Instant},
};
use wagerlock_types::{EscrowError, Result, Seqno, SequencerConfig};

use crate::{
    client::{LedgerClient, Transfer},
    retry::RetryPolicy,
    wallet::WalletIdentity,
};

/// Whether the wallet seqno was seen advancing past the submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Confirmed,
    /// Sent, but the seqno did not move within the confirmation budget. The
    /// message may still land later.
    Unconfirmed,
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub seqno: Seqno,
    pub status: SubmitStatus,
    /// Hex hash of the message body, for log correlation.
    pub body_hash: String,
}

impl SubmitReceipt {
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.status == SubmitStatus::Confirmed
    }
}

struct Job {
    transfer: Transfer,
    reply: oneshot::Sender<Result<SubmitReceipt>>,
}

/// Handle to the sequencer worker.
pub struct TransactionSequencer {
    wallet: WalletIdentity,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionSequencer {
    /// Spawn the worker on the current tokio runtime.
    #[must_use]
    pub fn spawn(
        client: Arc<dyn LedgerClient>,
        wallet: WalletIdentity,
        retry: RetryPolicy,
        config: SequencerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            client,
            wallet: wallet.clone(),
            retry,
            config,
            last_sent: None,
        };
        let handle = tokio::spawn(worker.run(rx));
        tracing::info!(wallet = %wallet.address(), "Transaction sequencer started");
        Self {
            wallet,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }
    }

    #[must_use]
    pub fn wallet(&self) -> &WalletIdentity {
        &self.wallet
    }

    /// Queue `transfer` and wait for its outcome.
    ///
    /// # Errors
    /// Returns [`EscrowError::SequencerClosed`] after [`shutdown`](Self::shutdown),
    /// otherwise whatever the job itself failed with.
    pub async fn submit(&self, transfer: Transfer) -> Result<SubmitReceipt> {
        let (reply, rx) = oneshot::channel();
        {
            let guard = self
                .tx
                .lock()
                .map_err(|_| EscrowError::Internal("sequencer lock poisoned".into()))?;
            let tx = guard.as_ref().ok_or(EscrowError::SequencerClosed)?;
            tx.send(Job { transfer, reply })
                .map_err(|_| EscrowError::SequencerClosed)?;
        }
        rx.await.map_err(|_| EscrowError::SequencerClosed)?
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Sequencer worker ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for TransactionSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSequencer")
            .field("wallet", &self.wallet.address())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    client: Arc<dyn LedgerClient>,
    wallet: WalletIdentity,
    retry: RetryPolicy,
    config: SequencerConfig,
    last_sent: Option<LastSent>,
}

/// The most recent message handed to the ledger.
#[derive(Debug, Clone, Copy)]
struct LastSent {
    seqno: Seqno,
    valid_until: u32,
    /// Local instant after which the ledger can no longer accept it.
    expires_at: Instant,
}

impl LastSent {
    fn expired(self) -> bool {
        Instant::now() >= self.expires_at
    }
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = rx.recv().await {
            let result = self.process(job.transfer).await;
            if let Err(e) = &result {
                tracing::warn!(error = %e, "Submission failed");
            }
            // The caller may have gone away; the job still ran.
            let _ = job.reply.send(result);
        }
        tracing::info!("Transaction sequencer stopped");
    }

    async fn process(&mut self, transfer: Transfer) -> Result<SubmitReceipt> {
        let seqno = self.fresh_seqno().await?;

        tokio::time::sleep(self.config.settle_delay).await;

        let ttl = u64::from(self.config.message_ttl_secs);
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        let valid_until = u32::try_from(now + ttl)
            .map_err(|_| EscrowError::Internal("message expiry overflows u32".into()))?;
        // One extra second covers the truncation of `now` to whole seconds.
        let expires_at = Instant::now() + Duration::from_secs(ttl + 1);
        let message = self.wallet.sign(seqno, valid_until, transfer)?;
        let body_hash = message.body_hash_hex();

        let client = &self.client;
        self.retry
            .run("send_message", || client.send_message(&message))
            .await?;
        self.last_sent = Some(LastSent {
            seqno,
            valid_until,
            expires_at,
        });
        tracing::info!(
            seqno = %seqno,
            body = %body_hash,
            destination = %message.transfer.destination,
            "Message sent"
        );

        let status = self.await_confirmation(seqno).await;
        if status == SubmitStatus::Unconfirmed {
            tracing::warn!(
                seqno = %seqno,
                body = %body_hash,
                "Seqno did not advance within confirmation budget; treating as sent"
            );
        }
        Ok(SubmitReceipt {
            seqno,
            status,
            body_hash,
        })
    }

    /// Read the wallet seqno, re-polling while it has not moved past the
    /// last message this worker sent.
    ///
    /// Once that message's validity window has closed it can no longer land,
    /// so an unmoved seqno equal to it is free again.
    async fn fresh_seqno(&mut self) -> Result<Seqno> {
        let client = &self.client;
        let address = self.wallet.address();
        let mut seqno = self.retry.run("seqno", || client.seqno(&address)).await?;

        let Some(last) = self.last_sent else {
            return Ok(seqno);
        };
        let mut polls = 0;
        while seqno <= last.seqno {
            if seqno == last.seqno && last.expired() {
                tracing::warn!(
                    seqno = %seqno,
                    valid_until = last.valid_until,
                    "Previous message expired without landing; reusing its seqno"
                );
                self.last_sent = None;
                break;
            }
            if polls >= self.config.confirm_attempts {
                return Err(EscrowError::StaleSequence {
                    observed: seqno,
                    last_submitted: last.seqno,
                });
            }
            tracing::debug!(observed = %seqno, last_submitted = %last.seqno, "Seqno not advanced yet");
            tokio::time::sleep(self.config.confirm_interval).await;
            seqno = self.retry.run("seqno", || client.seqno(&address)).await?;
            polls += 1;
        }
        Ok(seqno)
    }

    async fn await_confirmation(&self, sent: Seqno) -> SubmitStatus {
        let address = self.wallet.address();
        for _ in 0..self.config.confirm_attempts {
            tokio::time::sleep(self.config.confirm_interval).await;
            match self.client.seqno(&address).await {
                Ok(current) if current > sent => return SubmitStatus::Confirmed,
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "Confirmation poll failed"),
            }
        }
        SubmitStatus::Unconfirmed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rust_decimal::Decimal;
    use wagerlock_types::{Address, EscrowMessage, SettlementId};

    use super::*;
    use crate::mock::MockLedger;

    fn contract() -> Address {
        Address::new(0, [0xc0; 32])
    }

    fn config() -> SequencerConfig {
        SequencerConfig {
            settle_delay: Duration::from_millis(10),
            confirm_attempts: 3,
            confirm_interval: Duration::from_millis(50),
            message_ttl_secs: 60,
        }
    }

    fn refund(id: u64) -> Transfer {
        Transfer {
            destination: contract(),
            value: Decimal::new(5, 2),
            body: EscrowMessage::Refund {
                settlement_id: SettlementId(id),
            }
            .to_cell()
            .unwrap(),
        }
    }

    fn setup() -> (Arc<MockLedger>, TransactionSequencer) {
        let ledger = Arc::new(MockLedger::new(contract()));
        let wallet = WalletIdentity::from_seed([4; 32]);
        ledger.register_wallet(wallet.address(), wallet.verifying_key());
        let sequencer = TransactionSequencer::spawn(
            ledger.clone(),
            wallet,
            RetryPolicy::new(3, Duration::from_millis(20)),
            config(),
        );
        (ledger, sequencer)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submissions_get_distinct_ordered_seqnos() {
        let (ledger, sequencer) = setup();

        let (a, b, c) = tokio::join!(
            sequencer.submit(refund(1)),
            sequencer.submit(refund(2)),
            sequencer.submit(refund(3)),
        );
        let seqnos: Vec<u32> = [a, b, c].into_iter().map(|r| r.unwrap().seqno.0).collect();
        assert_eq!(seqnos, vec![0, 1, 2]);

        assert!(ledger.dropped().is_empty());
        let applied: Vec<_> = ledger
            .applied()
            .iter()
            .filter_map(EscrowMessage::settlement_id)
            .collect();
        assert_eq!(applied, vec![SettlementId(1), SettlementId(2), SettlementId(3)]);
        sequencer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_send_blocks_its_seqno_until_expiry() {
        let (ledger, sequencer) = setup();
        ledger.freeze(true);

        let receipt = sequencer.submit(refund(1)).await.unwrap();
        assert_eq!(receipt.status, SubmitStatus::Unconfirmed);
        assert_eq!(receipt.seqno, Seqno(0));

        // Still inside the message's validity window: 0 must not be reused.
        let err = sequencer.submit(refund(2)).await.unwrap_err();
        assert_eq!(
            err,
            EscrowError::StaleSequence {
                observed: Seqno(0),
                last_submitted: Seqno(0)
            }
        );
        assert_eq!(ledger.sent().len(), 1);
        sequencer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lost_message_frees_seqno_after_expiry() {
        let (ledger, sequencer) = setup();
        ledger.freeze(true);
        let lost = sequencer.submit(refund(1)).await.unwrap();
        assert_eq!(lost.status, SubmitStatus::Unconfirmed);
        ledger.freeze(false);

        tokio::time::advance(Duration::from_secs(u64::from(config().message_ttl_secs) + 5)).await;

        let receipt = sequencer.submit(refund(2)).await.unwrap();
        assert!(receipt.is_confirmed());
        assert_eq!(receipt.seqno, Seqno(0));
        assert_eq!(ledger.current_seqno(&sequencer.wallet().address()), Seqno(1));

        // The guard is back in force for the new message and keeps moving.
        let next = sequencer.submit(refund(3)).await.unwrap();
        assert!(next.is_confirmed());
        assert_eq!(next.seqno, Seqno(1));
        let applied: Vec<_> = ledger
            .applied()
            .iter()
            .filter_map(EscrowMessage::settlement_id)
            .collect();
        assert_eq!(applied, vec![SettlementId(2), SettlementId(3)]);
        sequencer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_seqno_is_repolled_not_reused() {
        let (ledger, sequencer) = setup();
        ledger.set_seqno_lag(2);

        let first = sequencer.submit(refund(1)).await.unwrap();
        let second = sequencer.submit(refund(2)).await.unwrap();
        assert_eq!(first.seqno, Seqno(0));
        assert_eq!(second.seqno, Seqno(1));
        assert!(ledger.dropped().is_empty());
        sequencer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_does_not_block_queue() {
        let (ledger, sequencer) = setup();
        ledger.rate_limit_next_sends(3);

        let err = sequencer.submit(refund(1)).await.unwrap_err();
        assert!(err.is_rate_limited());

        let receipt = sequencer.submit(refund(2)).await.unwrap();
        assert!(receipt.is_confirmed());
        assert_eq!(receipt.seqno, Seqno(0));
        sequencer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_seqno_read_is_retried() {
        let (ledger, sequencer) = setup();
        ledger.rate_limit_next_seqno(2);
        let receipt = sequencer.submit(refund(1)).await.unwrap();
        assert!(receipt.is_confirmed());
        sequencer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn submit_after_shutdown_fails() {
        let (_ledger, sequencer) = setup();
        sequencer.shutdown().await;
        assert_eq!(
            sequencer.submit(refund(1)).await.unwrap_err(),
            EscrowError::SequencerClosed
        );
    }
}
