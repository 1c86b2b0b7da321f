//! The single signing identity every outbound message is sent from.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use wagerlock_types::{Address, EscrowError, Result, Seqno};

use crate::client::{SignedMessage, Transfer};

/// Wallet address plus its ed25519 signing key.
#[derive(Clone)]
pub struct WalletIdentity {
    address: Address,
    signing_key: SigningKey,
}

impl WalletIdentity {
    /// Identity whose basechain address is the SHA-256 of its public key.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let hash: [u8; 32] = Sha256::digest(signing_key.verifying_key().as_bytes()).into();
        Self {
            address: Address::new(0, hash),
            signing_key,
        }
    }

    /// Identity for an already-deployed wallet at `address`.
    #[must_use]
    pub fn with_address(address: Address, seed: [u8; 32]) -> Self {
        Self {
            address,
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Parse a 64-character hex seed.
    ///
    /// # Errors
    /// Returns [`EscrowError::Configuration`] if the seed is not 32 bytes of hex.
    pub fn from_hex_seed(address: Address, seed_hex: &str) -> Result<Self> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| EscrowError::Configuration(format!("wallet seed is not hex: {e}")))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            EscrowError::Configuration(format!("wallet seed is {} bytes, expected 32", b.len()))
        })?;
        Ok(Self::with_address(address, seed))
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Bind `transfer` to `seqno` and sign it.
    pub fn sign(&self, seqno: Seqno, valid_until: u32, transfer: Transfer) -> Result<SignedMessage> {
        let digest = SignedMessage::signing_digest(&self.address, seqno, valid_until, &transfer)?;
        Ok(SignedMessage {
            wallet: self.address,
            seqno,
            valid_until,
            transfer,
            signature: self.signing_key.sign(&digest),
        })
    }
}

impl fmt::Debug for WalletIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
