//! Items, bounds, modes and the fingerprint accumulator.

use sha2::{Digest, Sha256};

use super::codec::encode_varint;
use super::error::NegentropyError;
use super::{FINGERPRINT_SIZE, ID_SIZE};

/// One element of a reconciled set.
///
/// Field order gives the derived ordering: timestamp first, then id bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Item {
    /// Event `created_at`
    pub timestamp: u64,
    /// Raw event id
    pub id: [u8; ID_SIZE],
}

impl Item {
    /// Build an item.
    pub fn new(timestamp: u64, id: [u8; ID_SIZE]) -> Self {
        Self { timestamp, id }
    }
}

/// Range boundary: a timestamp plus an id prefix of 0..=32 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    /// Timestamp, `u64::MAX` for infinity
    pub timestamp: u64,
    /// Id prefix that separates the neighbouring items
    pub id_prefix: Vec<u8>,
}

impl Bound {
    /// Bound at `timestamp` with an empty prefix.
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            id_prefix: Vec::new(),
        }
    }

    /// The lowest bound.
    pub fn zero() -> Self {
        Self::new(0)
    }

    /// Bound above every item.
    pub fn infinity() -> Self {
        Self::new(u64::MAX)
    }

    /// Whether this is the infinity bound.
    pub fn is_infinity(&self) -> bool {
        self.timestamp == u64::MAX
    }

    /// Does `item` sort strictly below this bound?
    pub fn is_above(&self, item: &Item) -> bool {
        (item.timestamp, &item.id[..]) < (self.timestamp, self.id_prefix.as_slice())
    }
}

impl From<&Item> for Bound {
    fn from(item: &Item) -> Self {
        Self {
            timestamp: item.timestamp,
            id_prefix: item.id.to_vec(),
        }
    }
}

/// Shortest bound that sorts above `prev` and at or below `curr`.
pub fn minimal_bound(prev: &Item, curr: &Item) -> Bound {
    if curr.timestamp != prev.timestamp {
        return Bound::new(curr.timestamp);
    }

    let shared = prev
        .id
        .iter()
        .zip(curr.id.iter())
        .take_while(|(a, b)| a == b)
        .count();
    Bound {
        timestamp: curr.timestamp,
        id_prefix: curr.id[..(shared + 1).min(ID_SIZE)].to_vec(),
    }
}

/// How a range in a message is described.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    /// Nothing to do for this range
    Skip = 0,
    /// 16-byte fingerprint of the sender's items in the range
    Fingerprint = 1,
    /// Full list of the sender's ids in the range
    IdList = 2,
}

impl TryFrom<u64> for Mode {
    type Error = NegentropyError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Skip),
            1 => Ok(Self::Fingerprint),
            2 => Ok(Self::IdList),
            other => Err(NegentropyError::UnknownMode(other)),
        }
    }
}

/// Sum of ids modulo 2^256, as eight little-endian u32 limbs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accumulator {
    limbs: [u32; 8],
}

impl Accumulator {
    /// Empty sum.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one id (little-endian 256-bit addition, carry out discarded).
    pub fn add(&mut self, id: &[u8; ID_SIZE]) {
        let mut carry = 0u64;
        for (limb, chunk) in self.limbs.iter_mut().zip(id.chunks_exact(4)) {
            let other = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let sum = u64::from(*limb) + u64::from(other) + carry;
            *limb = sum as u32;
            carry = sum >> 32;
        }
    }

    /// First 16 bytes of `sha256(sum || varint(count))`.
    pub fn fingerprint(&self, count: u64) -> [u8; FINGERPRINT_SIZE] {
        let mut hasher = Sha256::new();
        for limb in self.limbs {
            hasher.update(limb.to_le_bytes());
        }
        let mut suffix = Vec::with_capacity(10);
        encode_varint(count, &mut suffix);
        hasher.update(&suffix);

        let digest = hasher.finalize();
        let mut out = [0u8; FINGERPRINT_SIZE];
        out.copy_from_slice(&digest[..FINGERPRINT_SIZE]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with(prefix: &[u8]) -> [u8; ID_SIZE] {
        let mut id = [0u8; ID_SIZE];
        id[..prefix.len()].copy_from_slice(prefix);
        id
    }

    #[test]
    fn accumulator_wraps_modulo_2_256() {
        let mut acc = Accumulator::new();
        acc.add(&[0xff; ID_SIZE]);
        acc.add(&id_with(&[1]));
        assert_eq!(acc, Accumulator::new());
    }

    #[test]
    fn accumulator_carries_across_limbs() {
        let mut acc = Accumulator::new();
        acc.add(&id_with(&[0xff, 0xff, 0xff, 0xff]));
        acc.add(&id_with(&[1]));
        assert_eq!(acc.limbs[0], 0);
        assert_eq!(acc.limbs[1], 1);
    }

    #[test]
    fn empty_fingerprint() {
        let mut input = vec![0u8; 32];
        input.push(0);
        let digest = Sha256::digest(&input);
        assert_eq!(Accumulator::new().fingerprint(0)[..], digest[..16]);
    }

    #[test]
    fn fingerprint_depends_on_count() {
        let acc = Accumulator::new();
        assert_ne!(acc.fingerprint(0), acc.fingerprint(1));
    }

    #[test]
    fn minimal_bound_different_timestamps() {
        let prev = Item::new(10, id_with(&[0xaa]));
        let curr = Item::new(11, id_with(&[0x01]));
        assert_eq!(minimal_bound(&prev, &curr), Bound::new(11));
    }

    #[test]
    fn minimal_bound_shared_prefix() {
        let prev = Item::new(10, id_with(&[0xaa, 0xbb, 0x01]));
        let curr = Item::new(10, id_with(&[0xaa, 0xbb, 0x02]));
        let bound = minimal_bound(&prev, &curr);
        assert_eq!(bound.id_prefix, vec![0xaa, 0xbb, 0x02]);
        assert!(!bound.is_above(&curr));
        assert!(bound.is_above(&prev));
    }

    #[test]
    fn bound_ordering_against_items() {
        let item = Item::new(5, id_with(&[0x10]));
        assert!(Bound::new(6).is_above(&item));
        assert!(!Bound::new(5).is_above(&item));
        assert!(Bound::infinity().is_above(&item));
        assert!(!Bound::from(&item).is_above(&item));
        assert!(!Bound::zero().is_above(&Item::new(0, [0; ID_SIZE])));
    }

    #[test]
    fn mode_from_wire() {
        assert_eq!(Mode::try_from(0).unwrap(), Mode::Skip);
        assert_eq!(Mode::try_from(2).unwrap(), Mode::IdList);
        assert_eq!(Mode::try_from(3), Err(NegentropyError::UnknownMode(3)));
    }
}
