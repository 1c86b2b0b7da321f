//! Identifiers used throughout Wagerlock.
//!
//! [`SettlementId`] is never random: it is derived from a [`RoomCode`] and a
//! persisted per-room counter, so recomputing it after a crash reproduces
//! the value the ledger already has on record.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::{EscrowError, Result, constants};

// ---------------------------------------------------------------------------
// RoomCode
// ---------------------------------------------------------------------------

/// Short human room identifier drawn from the base-36 alphabet.
///
/// Stored upper-case; `ab12` and `AB12` name the same room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Validate and normalize a room code.
    ///
    /// # Errors
    /// Returns [`EscrowError::InvalidRoomCode`] if the code is empty, longer
    /// than [`constants::MAX_ROOM_CODE_LEN`], or contains a non-alphanumeric
    /// character.
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.is_empty() {
            return Err(EscrowError::InvalidRoomCode {
                reason: "room code is empty".to_string(),
            });
        }
        if code.len() > constants::MAX_ROOM_CODE_LEN {
            return Err(EscrowError::InvalidRoomCode {
                reason: format!(
                    "'{code}' is longer than {} characters",
                    constants::MAX_ROOM_CODE_LEN
                ),
            });
        }
        if let Some(bad) = code.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(EscrowError::InvalidRoomCode {
                reason: format!("'{code}' contains non base-36 character '{bad}'"),
            });
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base-36 value of the code, most significant character first.
    #[must_use]
    pub fn encode(&self) -> u64 {
        // Length and alphabet are validated on construction, so neither the
        // digit lookup nor the accumulation can fail.
        self.0.chars().fold(0u64, |acc, c| {
            acc * constants::ROOM_CODE_RADIX + u64::from(c.to_digit(36).unwrap_or(0))
        })
    }

    /// Random code of `len` characters, for tests.
    #[cfg(feature = "test-helpers")]
    #[must_use]
    pub fn random(len: usize) -> Self {
        use rand::Rng;
        const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut rng = rand::thread_rng();
        let code: String = (0..len.clamp(1, constants::MAX_ROOM_CODE_LEN))
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = EscrowError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl FromStr for RoomCode {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// SettlementId
// ---------------------------------------------------------------------------

/// The 64-bit identifier the ledger tracks one game's escrow by.
///
/// Serialized as a decimal string so JSON consumers never lose precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct SettlementId(pub u64);

impl SettlementId {
    /// `encode(room) * 1000 + sequence`.
    ///
    /// # Errors
    /// Returns [`EscrowError::SequenceExhausted`] if `sequence` no longer
    /// fits in the three reserved decimal digits.
    pub fn derive(room: &RoomCode, sequence: u32) -> Result<Self> {
        if sequence > constants::MAX_SETTLEMENT_SEQUENCE {
            return Err(EscrowError::SequenceExhausted {
                room: room.clone(),
                counter: sequence,
            });
        }
        room.encode()
            .checked_mul(constants::SETTLEMENT_SEQUENCE_SPAN)
            .and_then(|base| base.checked_add(u64::from(sequence)))
            .map(Self)
            .ok_or_else(|| EscrowError::InvalidRoomCode {
                reason: format!("'{room}' does not fit the settlement id encoding"),
            })
    }

    /// The per-room sequence component.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sequence(self) -> u32 {
        (self.0 % constants::SETTLEMENT_SEQUENCE_SPAN) as u32
    }

    /// The encoded room component.
    #[must_use]
    pub fn room_component(self) -> u64 {
        self.0 / constants::SETTLEMENT_SEQUENCE_SPAN
    }
}

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SettlementId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SettlementId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct IdVisitor;

        impl de::Visitor<'_> for IdVisitor {
            type Value = SettlementId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a settlement id as a decimal string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                Ok(SettlementId(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                v.parse::<u64>().map(SettlementId).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A ledger account address: workchain plus 256-bit account hash.
///
/// Textual form is the raw `"<workchain>:<64 hex chars>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    pub workchain: i8,
    pub hash: [u8; 32],
}

impl Address {
    /// Reserved address padding unused winner slots.
    pub const ZERO: Self = Self {
        workchain: 0,
        hash: [0u8; 32],
    };

    #[must_use]
    pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// First 4 bytes of the hash, for compact logs.
    #[must_use]
    pub fn short(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(&self.hash[..4]))
    }

    /// Random basechain address, for tests.
    #[cfg(feature = "test-helpers")]
    #[must_use]
    pub fn random() -> Self {
        use rand::RngCore;
        let mut hash = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut hash);
        Self { workchain: 0, hash }
    }
}

impl FromStr for Address {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| EscrowError::InvalidAddress { reason };
        let (wc, hash_hex) = s
            .split_once(':')
            .ok_or_else(|| invalid(format!("'{s}' is not in <workchain>:<hex> form")))?;
        let workchain = wc
            .parse::<i8>()
            .map_err(|e| invalid(format!("bad workchain '{wc}': {e}")))?;
        let bytes = hex::decode(hash_hex).map_err(|e| invalid(format!("bad hash hex: {e}")))?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| invalid(format!("hash is {} bytes, expected 32", b.len())))?;
        Ok(Self { workchain, hash })
    }
}

impl TryFrom<String> for Address {
    type Error = EscrowError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.workchain, hex::encode(self.hash))
    }
}

// ---------------------------------------------------------------------------
// Seqno
// ---------------------------------------------------------------------------

/// Outbound message sequence number of the signing wallet.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct Seqno(pub u32);

impl Seqno {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Seqno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
