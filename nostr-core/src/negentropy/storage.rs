//! Sealed, sorted vector of items.

use super::error::{NegentropyError, Result};
use super::types::{Accumulator, Bound, Item};
use super::{FINGERPRINT_SIZE, ID_SIZE};

/// Insert-only set of `(timestamp, id)` items that becomes immutable once
/// sealed.
///
/// Sealing sorts the items by `(timestamp, id)`. A vector whose seal fails
/// because of duplicates stays unsealed and should be discarded.
#[derive(Debug, Clone, Default)]
pub struct NegentropyStorageVector {
    items: Vec<Item>,
    sealed: bool,
}

impl NegentropyStorageVector {
    /// Empty, unsealed vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty, unsealed vector with room for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            sealed: false,
        }
    }

    /// Add an item. `id` must be exactly 32 bytes.
    pub fn insert(&mut self, timestamp: u64, id: &[u8]) -> Result<()> {
        if self.sealed {
            return Err(NegentropyError::AlreadySealed);
        }
        let id: [u8; ID_SIZE] = id
            .try_into()
            .map_err(|_| NegentropyError::BadIdSize(id.len()))?;
        self.items.push(Item::new(timestamp, id));
        Ok(())
    }

    /// Sort and freeze.
    pub fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Err(NegentropyError::AlreadySealed);
        }
        self.items.sort_unstable();
        if self.items.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(NegentropyError::DuplicateItem);
        }
        self.sealed = true;
        Ok(())
    }

    /// Whether `seal()` has succeeded.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// No items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item at `index` in sorted order.
    pub fn get(&self, index: usize) -> Result<&Item> {
        self.check_sealed()?;
        self.items.get(index).ok_or(NegentropyError::BadRange {
            begin: index,
            end: index + 1,
        })
    }

    /// Items in `[begin, end)`.
    pub fn iter_range(&self, begin: usize, end: usize) -> Result<std::slice::Iter<'_, Item>> {
        self.check_sealed()?;
        if begin > end || end > self.items.len() {
            return Err(NegentropyError::BadRange { begin, end });
        }
        Ok(self.items[begin..end].iter())
    }

    /// Index of the first item in `[begin, end)` that is not below `bound`,
    /// or `end` if there is none.
    pub fn find_lower_bound(&self, begin: usize, end: usize, bound: &Bound) -> usize {
        let end = end.min(self.items.len());
        let begin = begin.min(end);
        begin + self.items[begin..end].partition_point(|item| bound.is_above(item))
    }

    /// Fingerprint of the items in `[begin, end)`.
    pub fn fingerprint(&self, begin: usize, end: usize) -> Result<[u8; FINGERPRINT_SIZE]> {
        let mut acc = Accumulator::new();
        for item in self.iter_range(begin, end)? {
            acc.add(&item.id);
        }
        Ok(acc.fingerprint((end - begin) as u64))
    }

    fn check_sealed(&self) -> Result<()> {
        if self.sealed {
            Ok(())
        } else {
            Err(NegentropyError::NotSealed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(items: &[(u64, u8)]) -> NegentropyStorageVector {
        let mut storage = NegentropyStorageVector::new();
        for &(ts, byte) in items {
            storage.insert(ts, &[byte; ID_SIZE]).unwrap();
        }
        storage.seal().unwrap();
        storage
    }

    #[test]
    fn seal_sorts_by_timestamp_then_id() {
        let storage = sealed(&[(200, 1), (100, 9), (100, 3)]);
        let order: Vec<_> = storage
            .iter_range(0, 3)
            .unwrap()
            .map(|i| (i.timestamp, i.id[0]))
            .collect();
        assert_eq!(order, vec![(100, 3), (100, 9), (200, 1)]);
    }

    #[test]
    fn insert_after_seal_fails() {
        let mut storage = sealed(&[(1, 1)]);
        assert_eq!(
            storage.insert(2, &[2; ID_SIZE]),
            Err(NegentropyError::AlreadySealed)
        );
        assert_eq!(storage.seal(), Err(NegentropyError::AlreadySealed));
    }

    #[test]
    fn bad_id_size() {
        let mut storage = NegentropyStorageVector::new();
        assert_eq!(
            storage.insert(1, &[0; 31]),
            Err(NegentropyError::BadIdSize(31))
        );
    }

    #[test]
    fn duplicates_fail_seal() {
        let mut storage = NegentropyStorageVector::new();
        storage.insert(5, &[7; ID_SIZE]).unwrap();
        storage.insert(5, &[7; ID_SIZE]).unwrap();
        assert_eq!(storage.seal(), Err(NegentropyError::DuplicateItem));
        assert!(!storage.is_sealed());
    }

    #[test]
    fn same_id_different_timestamp_is_not_duplicate() {
        let storage = sealed(&[(1, 7), (2, 7)]);
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn reads_require_seal() {
        let mut storage = NegentropyStorageVector::new();
        storage.insert(1, &[1; ID_SIZE]).unwrap();
        assert_eq!(storage.fingerprint(0, 1), Err(NegentropyError::NotSealed));
        assert!(storage.get(0).is_err());
    }

    #[test]
    fn find_lower_bound_positions() {
        let storage = sealed(&[(100, 1), (100, 5), (200, 1), (300, 1)]);
        let n = storage.len();

        assert_eq!(storage.find_lower_bound(0, n, &Bound::zero()), 0);
        assert_eq!(storage.find_lower_bound(0, n, &Bound::new(100)), 0);
        assert_eq!(storage.find_lower_bound(0, n, &Bound::new(101)), 2);
        assert_eq!(storage.find_lower_bound(0, n, &Bound::infinity()), n);

        let between = Bound {
            timestamp: 100,
            id_prefix: vec![3],
        };
        assert_eq!(storage.find_lower_bound(0, n, &between), 1);
        assert_eq!(storage.find_lower_bound(3, n, &Bound::zero()), 3);
    }

    #[test]
    fn fingerprint_is_order_independent_sum() {
        let a = sealed(&[(1, 1), (2, 2), (3, 3)]);
        let b = sealed(&[(9, 3), (8, 2), (7, 1)]);
        assert_eq!(a.fingerprint(0, 3).unwrap(), b.fingerprint(0, 3).unwrap());
        assert_ne!(a.fingerprint(0, 2).unwrap(), a.fingerprint(0, 3).unwrap());
        assert!(a.fingerprint(2, 4).is_err());
    }
}
