//! The ledger RPC seam.
//!
//! Two channels reach the external ledger: request/response state queries,
//! and fire-and-forget submission of signed messages whose effects only show
//! up in later queries. Implementations map an HTTP 429 (or equivalent) to
//! [`EscrowError::RateLimited`] so the retry wrapper can back off on it.

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use wagerlock_types::{
    Address, Cell, EscrowError, LedgerGameRecord, Result, Seqno, SettlementId, amount, constants,
};

/// Remote ledger operations used by the orchestrator.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Game record for `id` held by the escrow `contract`, if it exists.
    async fn get_game(
        &self,
        contract: &Address,
        id: SettlementId,
    ) -> Result<Option<LedgerGameRecord>>;

    /// Current outbound seqno of `wallet`.
    async fn seqno(&self, wallet: &Address) -> Result<Seqno>;

    /// Hand a signed message to the ledger. Acceptance says nothing about
    /// whether the message will ever be applied.
    async fn send_message(&self, message: &SignedMessage) -> Result<()>;
}

/// One outbound internal transfer: value plus an opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub destination: Address,
    pub value: Decimal,
    pub body: Cell,
}

/// A transfer bound to a wallet seqno and signed by the wallet key.
#[derive(Debug, Clone)]
pub struct SignedMessage {
    pub wallet: Address,
    pub seqno: Seqno,
    /// Unix seconds after which the ledger must drop the message.
    pub valid_until: u32,
    pub transfer: Transfer,
    pub signature: Signature,
}

impl SignedMessage {
    /// `SHA-256(domain || wallet || seqno || valid_until || destination || value || body_hash)`
    #[allow(clippy::cast_sign_loss)]
    pub fn signing_digest(
        wallet: &Address,
        seqno: Seqno,
        valid_until: u32,
        transfer: &Transfer,
    ) -> Result<[u8; 32]> {
        let value_nano = amount::to_nano(transfer.value)?;
        let mut hasher = Sha256::new();
        hasher.update(constants::SIGNING_DOMAIN);
        hasher.update([wallet.workchain as u8]);
        hasher.update(wallet.hash);
        hasher.update(seqno.0.to_be_bytes());
        hasher.update(valid_until.to_be_bytes());
        hasher.update([transfer.destination.workchain as u8]);
        hasher.update(transfer.destination.hash);
        hasher.update(value_nano.to_be_bytes());
        hasher.update(transfer.body.hash());
        Ok(hasher.finalize().into())
    }

    /// Check the signature against the wallet's public key.
    ///
    /// # Errors
    /// Returns [`EscrowError::MessageRejected`] if the signature does not verify.
    pub fn verify(&self, key: &VerifyingKey) -> Result<()> {
        let digest = Self::signing_digest(&self.wallet, self.seqno, self.valid_until, &self.transfer)?;
        key.verify(&digest, &self.signature)
            .map_err(|e| EscrowError::MessageRejected {
                reason: format!("bad signature: {e}"),
            })
    }

    /// Hex of the body cell hash, for logs.
    #[must_use]
    pub fn body_hash_hex(&self) -> String {
        hex::encode(self.transfer.body.hash())
    }
}
