//! Bit-level cell codec for ledger message bodies.
//!
//! A [`Cell`] holds up to 1023 data bits (big-endian, most significant bit
//! first) and up to 4 child references. Message layouts built on top of this
//! are a compatibility contract with the external escrow program, so every
//! store here is bit-exact and every load is the mirror image.

use sha2::{Digest, Sha256};

use crate::{Address, EscrowError, Result, constants};

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// An immutable, finished cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Packed data bits; unused trailing bits of the last byte are zero.
    data: Vec<u8>,
    /// Number of meaningful bits in `data`.
    bit_len: usize,
    /// Child cells.
    refs: Vec<Cell>,
}

impl Cell {
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn refs(&self) -> &[Cell] {
        &self.refs
    }

    /// Start reading this cell from the first bit.
    #[must_use]
    pub fn parse(&self) -> CellSlice<'_> {
        CellSlice {
            cell: self,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    /// Depth of the reference tree below this cell (0 for a leaf).
    #[must_use]
    pub fn depth(&self) -> u16 {
        self.refs
            .iter()
            .map(|r| r.depth().saturating_add(1))
            .max()
            .unwrap_or(0)
    }

    /// SHA-256 over the standard cell representation:
    /// `d1 || d2 || padded data || ref depths || ref hashes`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        let d1 = self.refs.len() as u8;
        let d2 = (self.bit_len.div_ceil(8) + self.bit_len / 8) as u8;
        hasher.update([d1, d2]);

        let mut data = self.data.clone();
        let rem = self.bit_len % 8;
        if rem != 0 {
            if let Some(last) = data.last_mut() {
                *last |= 1 << (7 - rem);
            }
        }
        hasher.update(&data);

        for r in &self.refs {
            hasher.update(r.depth().to_be_bytes());
        }
        for r in &self.refs {
            hasher.update(r.hash());
        }
        hasher.finalize().into()
    }
}

// ---------------------------------------------------------------------------
// CellBuilder
// ---------------------------------------------------------------------------

/// Appends bits and references, refusing anything past cell capacity.
#[derive(Debug, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Cell>,
}

impl CellBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bits still available in this cell.
    #[must_use]
    pub fn remaining_bits(&self) -> usize {
        constants::MAX_CELL_BITS - self.bit_len
    }

    fn reserve(&self, bits: usize) -> Result<()> {
        if bits > self.remaining_bits() {
            return Err(EscrowError::CellOverflow {
                reason: format!(
                    "need {bits} bits, {} of {} left",
                    self.remaining_bits(),
                    constants::MAX_CELL_BITS
                ),
            });
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let idx = self.bit_len / 8;
            self.data[idx] |= 1 << (7 - self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self> {
        self.reserve(1)?;
        self.push_bit(bit);
        Ok(self)
    }

    /// Store the low `bits` bits of `value`, most significant first.
    ///
    /// # Errors
    /// Returns [`EscrowError::CellOverflow`] if `value` does not fit in
    /// `bits` bits or the cell is out of space.
    pub fn store_uint(&mut self, value: u128, bits: usize) -> Result<&mut Self> {
        if bits > 128 || (bits < 128 && value >> bits != 0) {
            return Err(EscrowError::CellOverflow {
                reason: format!("value {value} does not fit in {bits} bits"),
            });
        }
        self.reserve(bits)?;
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(self)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        self.reserve(bytes.len() * 8)?;
        for byte in bytes {
            for i in (0..8).rev() {
                self.push_bit((byte >> i) & 1 == 1);
            }
        }
        Ok(self)
    }

    /// `len:4` followed by `len` big-endian bytes of `nano`.
    pub fn store_coins(&mut self, nano: u128) -> Result<&mut Self> {
        let len = (128 - nano.leading_zeros() as usize).div_ceil(8);
        if len > constants::MAX_COINS_BYTES {
            return Err(EscrowError::CellOverflow {
                reason: format!("{nano} nano-units exceed a coins field"),
            });
        }
        self.reserve(4 + len * 8)?;
        self.store_uint(len as u128, 4)?;
        self.store_uint(nano, len * 8)
    }

    /// `0b10` tag, no anycast, `workchain:i8`, `hash:256`.
    #[allow(clippy::cast_sign_loss)]
    pub fn store_address(&mut self, address: &Address) -> Result<&mut Self> {
        self.reserve(ADDRESS_BITS)?;
        self.store_uint(0b10, 2)?;
        self.store_bit(false)?;
        self.store_uint(u128::from(address.workchain as u8), 8)?;
        self.store_bytes(&address.hash)
    }

    pub fn store_ref(&mut self, cell: Cell) -> Result<&mut Self> {
        if self.refs.len() >= constants::MAX_CELL_REFS {
            return Err(EscrowError::CellOverflow {
                reason: format!("cell already holds {} references", constants::MAX_CELL_REFS),
            });
        }
        self.refs.push(cell);
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> Cell {
        Cell {
            data: self.data,
            bit_len: self.bit_len,
            refs: self.refs,
        }
    }
}

/// Serialized width of a standard address.
pub const ADDRESS_BITS: usize = 2 + 1 + 8 + 256;

// ---------------------------------------------------------------------------
// CellSlice
// ---------------------------------------------------------------------------

/// Read cursor over a [`Cell`].
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    #[must_use]
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit_pos
    }

    #[must_use]
    pub fn remaining_refs(&self) -> usize {
        self.cell.refs.len() - self.ref_pos
    }

    fn underflow(&self, want: usize) -> EscrowError {
        EscrowError::Wire {
            reason: format!(
                "wanted {want} bits at offset {}, cell has {}",
                self.bit_pos, self.cell.bit_len
            ),
        }
    }

    pub fn load_bit(&mut self) -> Result<bool> {
        if self.remaining_bits() == 0 {
            return Err(self.underflow(1));
        }
        let byte = self.cell.data[self.bit_pos / 8];
        let bit = (byte >> (7 - self.bit_pos % 8)) & 1 == 1;
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u128> {
        if bits > 128 {
            return Err(EscrowError::Wire {
                reason: format!("cannot load {bits}-bit integer"),
            });
        }
        if bits > self.remaining_bits() {
            return Err(self.underflow(bits));
        }
        let mut value = 0u128;
        for _ in 0..bits {
            value = (value << 1) | u128::from(self.load_bit()?);
        }
        Ok(value)
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn load_coins(&mut self) -> Result<u128> {
        let len = self.load_uint(4)? as usize;
        self.load_uint(len * 8)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn load_address(&mut self) -> Result<Address> {
        let tag = self.load_uint(2)?;
        if tag != 0b10 {
            return Err(EscrowError::Wire {
                reason: format!("unsupported address tag {tag:#b}"),
            });
        }
        if self.load_bit()? {
            return Err(EscrowError::Wire {
                reason: "anycast addresses are not supported".to_string(),
            });
        }
        let workchain = self.load_uint(8)? as u8 as i8;
        let mut hash = [0u8; 32];
        for byte in &mut hash {
            *byte = self.load_uint(8)? as u8;
        }
        Ok(Address { workchain, hash })
    }

    pub fn load_ref(&mut self) -> Result<&'a Cell> {
        let cell = self.cell.refs.get(self.ref_pos).ok_or_else(|| EscrowError::Wire {
            reason: format!("missing reference #{}", self.ref_pos),
        })?;
        self.ref_pos += 1;
        Ok(cell)
    }

    /// Fail if any bits or references are left unread.
    pub fn end(&self) -> Result<()> {
        if self.remaining_bits() != 0 || self.remaining_refs() != 0 {
            return Err(EscrowError::Wire {
                reason: format!(
                    "{} trailing bits and {} trailing refs",
                    self.remaining_bits(),
                    self.remaining_refs()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_is_big_endian_msb_first() {
        let mut b = CellBuilder::new();
        b.store_uint(0x2, 32).unwrap();
        let cell = b.build();
        assert_eq!(cell.bit_len(), 32);
        assert_eq!(cell.data(), &[0, 0, 0, 2]);
    }

    #[test]
    fn partial_byte_packing() {
        let mut b = CellBuilder::new();
        b.store_uint(0b101, 3).unwrap();
        let cell = b.build();
        assert_eq!(cell.bit_len(), 3);
        assert_eq!(cell.data(), &[0b1010_0000]);
    }

    #[test]
    fn coins_encoding() {
        let mut b = CellBuilder::new();
        b.store_coins(0).unwrap();
        assert_eq!(b.build().bit_len(), 4);

        // 1.2 coin = 1_200_000_000 = 0x47868C00 → 4 bytes.
        let mut b = CellBuilder::new();
        b.store_coins(1_200_000_000).unwrap();
        let cell = b.build();
        assert_eq!(cell.bit_len(), 4 + 32);
        assert_eq!(cell.data(), &[0x44, 0x78, 0x68, 0xC0, 0x00]);
    }

    #[test]
    fn address_is_267_bits() {
        let mut b = CellBuilder::new();
        b.store_address(&Address::new(-1, [0xff; 32])).unwrap();
        let cell = b.build();
        assert_eq!(cell.bit_len(), ADDRESS_BITS);
        // tag 10, anycast 0, then 0xff workchain starts at bit 3
        assert_eq!(cell.data()[0], 0b1001_1111);

        let mut s = cell.parse();
        assert_eq!(s.load_address().unwrap(), Address::new(-1, [0xff; 32]));
        s.end().unwrap();
    }

    #[test]
    fn overflow_is_rejected() {
        let mut b = CellBuilder::new();
        b.store_uint(0, 1000).unwrap_err();
        b.store_uint(u128::MAX, 128).unwrap();
        for _ in 0..6 {
            b.store_uint(0, 128).unwrap();
        }
        // 896 bits used, 127 left
        assert_eq!(b.remaining_bits(), 127);
        assert!(matches!(
            b.store_uint(0, 128),
            Err(EscrowError::CellOverflow { .. })
        ));
        assert!(b.store_uint(256, 8).is_err());
    }

    #[test]
    fn ref_limit() {
        let mut b = CellBuilder::new();
        for _ in 0..4 {
            b.store_ref(CellBuilder::new().build()).unwrap();
        }
        assert!(b.store_ref(CellBuilder::new().build()).is_err());
    }

    #[test]
    fn empty_cell_hash_is_stable() {
        // Representation of the empty cell is [0x00, 0x00].
        let expected: [u8; 32] = Sha256::digest([0u8, 0u8]).into();
        assert_eq!(CellBuilder::new().build().hash(), expected);
    }

    #[test]
    fn hash_covers_refs() {
        let leaf = {
            let mut b = CellBuilder::new();
            b.store_uint(7, 8).unwrap();
            b.build()
        };
        let mut with_ref = CellBuilder::new();
        with_ref.store_uint(1, 8).unwrap().store_ref(leaf).unwrap();
        let mut without = CellBuilder::new();
        without.store_uint(1, 8).unwrap();
        let a = with_ref.build();
        assert_eq!(a.depth(), 1);
        assert_ne!(a.hash(), without.build().hash());
    }

    #[test]
    fn slice_underflow() {
        let mut b = CellBuilder::new();
        b.store_uint(1, 4).unwrap();
        let cell = b.build();
        let mut s = cell.parse();
        assert!(s.load_uint(8).is_err());
        assert!(s.load_ref().is_err());
    }
}
