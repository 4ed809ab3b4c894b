//! Identity index: object id to per-object slot, on a scratch file.
//!
//! Open addressing with linear probing over a memory-mapped scratch file
//! sized at 4/3 of the expected id count. Entries are never deleted and an
//! id never maps to more than one entry, so a probe ends at the first
//! empty or matching slot.
//!
//! Entry layout (37 bytes, big endian):
//!
//! | off | field            |
//! |-----|------------------|
//! | 0   | id (u64)         |
//! | 8   | dump file offset |
//! | 16  | ordinal (u32)    |
//! | 20  | flags (u8)       |
//! | 21  | reference slot   |
//! | 29  | retained size    |
//!
//! The reference slot is overloaded: with a single referrer it holds that
//! referrer's id inline; once a second distinct referrer appears the
//! object's references move to a [`NumberList`] chain and the slot holds
//! the chain's head offset, with `MULTI_REF` set. The nearest-GC-root
//! pointer rides the same storage: for multi-referrer objects it is kept
//! as the front element of the chain.
//!
//! Retained-size state is two flag bits plus the unsigned accumulator:
//! `RETAINED_QUEUED` marks membership in the pending queue and `TREE_OBJ`
//! marks a closed subtree, so zero stays a legal computed size.

use std::fs::File;

use memmap2::MmapMut;

use crate::error::{HeapError, Result};
use crate::index::NumberList;

const ENTRY_SIZE: u64 = 37;

const OFF_KEY: u64 = 0;
const OFF_FOFFSET: u64 = 8;
const OFF_ORDINAL: u64 = 16;
const OFF_FLAGS: u64 = 20;
const OFF_REF: u64 = 21;
const OFF_RETAINED: u64 = 29;

/// References moved from the inline slot to a chain.
const MULTI_REF: u8 = 1;
/// Nearest-GC-root pointer has been assigned.
const HAS_ROOT_PTR: u8 = 2;
/// Subtree below this object is closed; retained size is final.
const TREE_OBJ: u8 = 4;
/// Object sits in the pending retained-size queue.
const RETAINED_QUEUED: u8 = 8;

pub(crate) struct LongMap {
    mmap: MmapMut,
    _file: File,
    /// Slot count of the table.
    keys: u64,
    refs: NumberList,
}

impl LongMap {
    pub(crate) fn new(
        expected_ids: u64,
        adjacency_cache_blocks: usize,
        adjacency_dirty_limit: usize,
    ) -> Result<Self> {
        let keys = ((expected_ids * 4) / 3).max(16);
        let file_size = keys * ENTRY_SIZE;
        let file = tempfile::tempfile()?;
        file.set_len(file_size)?;
        // SAFETY: private unlinked scratch file, exclusively owned here.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(LongMap {
            mmap,
            _file: file,
            keys,
            refs: NumberList::new(adjacency_cache_blocks, adjacency_dirty_limit)?,
        })
    }

    /// Inserts `id` with its dump file offset. Idempotent for an id that
    /// is already present.
    pub(crate) fn put(&mut self, id: u64, file_offset: u64) -> Result<()> {
        debug_assert_ne!(id, 0);
        let mut index = self.home_index(id);
        for _ in 0..=self.keys {
            let key = self.get_u64(index + OFF_KEY);
            if key == 0 {
                self.put_u64(index + OFF_KEY, id);
                self.put_u64(index + OFF_FOFFSET, file_offset);
                return Ok(());
            }
            if key == id {
                return Ok(());
            }
            index = self.next_index(index);
        }
        Err(HeapError::Internal("identity index is full".into()))
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.find(id).is_some()
    }

    /// Dump file offset of the record for `id`.
    pub(crate) fn file_offset(&self, id: u64) -> Result<u64> {
        Ok(self.get_u64(self.entry(id)? + OFF_FOFFSET))
    }

    /// Per-class ordinal assigned during the instance count pass.
    pub(crate) fn ordinal(&self, id: u64) -> Result<u32> {
        Ok(self.get_u32(self.entry(id)? + OFF_ORDINAL))
    }

    pub(crate) fn set_ordinal(&mut self, id: u64, ordinal: u32) -> Result<()> {
        let index = self.entry(id)?;
        self.put_u32(index + OFF_ORDINAL, ordinal);
        Ok(())
    }

    /// Records `referrer` as pointing at `id`, promoting the inline slot
    /// to a chain on the second distinct referrer. Duplicate referrers
    /// within the chain's head walk are ignored.
    pub(crate) fn add_reference(&mut self, id: u64, referrer: u64) -> Result<()> {
        let index = self.entry(id)?;
        let flags = self.get_u8(index + OFF_FLAGS);
        let slot = self.get_u64(index + OFF_REF);
        if flags & MULTI_REF == 0 {
            if slot == 0 {
                self.put_u64(index + OFF_REF, referrer);
            } else if slot != referrer {
                self.put_u8(index + OFF_FLAGS, flags | MULTI_REF);
                let head = self.refs.add_first(slot, referrer)?;
                self.put_u64(index + OFF_REF, head);
            }
        } else {
            let head = self.refs.add_number(slot, referrer)?;
            if head != slot {
                self.put_u64(index + OFF_REF, head);
            }
        }
        Ok(())
    }

    /// All recorded referrers of `id`.
    pub(crate) fn references(&mut self, id: u64) -> Result<Vec<u64>> {
        let index = self.entry(id)?;
        let flags = self.get_u8(index + OFF_FLAGS);
        let slot = self.get_u64(index + OFF_REF);
        if flags & MULTI_REF == 0 {
            if slot == 0 {
                Ok(Vec::new())
            } else {
                Ok(vec![slot])
            }
        } else {
            self.refs.numbers(slot)
        }
    }

    pub(crate) fn has_only_one_reference(&self, id: u64) -> Result<bool> {
        Ok(self.get_u8(self.entry(id)? + OFF_FLAGS) & MULTI_REF == 0)
    }

    /// Assigns the nearest-GC-root pointer. The pointer is always one of
    /// the recorded referrers; for multi-referrer objects it is moved to
    /// the front of the chain so reads stay O(1).
    pub(crate) fn set_nearest_root(&mut self, id: u64, pointer: u64) -> Result<()> {
        let index = self.entry(id)?;
        let flags = self.get_u8(index + OFF_FLAGS) | HAS_ROOT_PTR;
        self.put_u8(index + OFF_FLAGS, flags);
        if flags & MULTI_REF != 0 {
            let slot = self.get_u64(index + OFF_REF);
            self.refs.put_first(slot, pointer)?;
        }
        Ok(())
    }

    /// Nearest-GC-root pointer, `0` when unreachable or not yet computed.
    pub(crate) fn nearest_root(&mut self, id: u64) -> Result<u64> {
        let index = self.entry(id)?;
        let flags = self.get_u8(index + OFF_FLAGS);
        if flags & HAS_ROOT_PTR == 0 {
            return Ok(0);
        }
        let slot = self.get_u64(index + OFF_REF);
        if flags & MULTI_REF != 0 {
            self.refs.first(slot)
        } else {
            Ok(slot)
        }
    }

    pub(crate) fn has_root_ptr(&self, id: u64) -> Result<bool> {
        Ok(self.get_u8(self.entry(id)? + OFF_FLAGS) & HAS_ROOT_PTR != 0)
    }

    pub(crate) fn is_tree(&self, id: u64) -> Result<bool> {
        Ok(self.get_u8(self.entry(id)? + OFF_FLAGS) & TREE_OBJ != 0)
    }

    pub(crate) fn set_tree(&mut self, id: u64) -> Result<()> {
        let index = self.entry(id)?;
        let flags = self.get_u8(index + OFF_FLAGS);
        self.put_u8(index + OFF_FLAGS, flags | TREE_OBJ);
        Ok(())
    }

    pub(crate) fn retained_queued(&self, id: u64) -> Result<bool> {
        Ok(self.get_u8(self.entry(id)? + OFF_FLAGS) & RETAINED_QUEUED != 0)
    }

    pub(crate) fn set_retained_queued(&mut self, id: u64) -> Result<()> {
        let index = self.entry(id)?;
        let flags = self.get_u8(index + OFF_FLAGS);
        self.put_u8(index + OFF_FLAGS, flags | RETAINED_QUEUED);
        Ok(())
    }

    pub(crate) fn retained(&self, id: u64) -> Result<u64> {
        Ok(self.get_u64(self.entry(id)? + OFF_RETAINED))
    }

    pub(crate) fn set_retained(&mut self, id: u64, size: u64) -> Result<()> {
        let index = self.entry(id)?;
        self.put_u64(index + OFF_RETAINED, size);
        Ok(())
    }

    pub(crate) fn add_retained(&mut self, id: u64, size: u64) -> Result<()> {
        let index = self.entry(id)?;
        let current = self.get_u64(index + OFF_RETAINED);
        self.put_u64(index + OFF_RETAINED, current + size);
        Ok(())
    }

    /// Top `n` entries by retained size, descending, ties broken by
    /// ascending id.
    pub(crate) fn biggest_by_retained(&self, n: usize) -> Vec<(u64, u64)> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        // Min-heap of (retained, Reverse(id)) keeps the current top n.
        let mut heap: BinaryHeap<Reverse<(u64, Reverse<u64>)>> = BinaryHeap::with_capacity(n + 1);
        for slot in 0..self.keys {
            let index = slot * ENTRY_SIZE;
            let id = self.get_u64(index + OFF_KEY);
            if id == 0 {
                continue;
            }
            let retained = self.get_u64(index + OFF_RETAINED);
            heap.push(Reverse((retained, Reverse(id))));
            if heap.len() > n {
                heap.pop();
            }
        }
        let mut out: Vec<(u64, u64)> = heap
            .into_iter()
            .map(|Reverse((retained, Reverse(id)))| (id, retained))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        out
    }

    /// Writes back any buffered adjacency blocks.
    pub(crate) fn flush(&mut self) -> Result<()> {
        self.refs.flush()
    }

    fn entry(&self, id: u64) -> Result<u64> {
        self.find(id).ok_or(HeapError::IllegalInstanceId(id))
    }

    fn find(&self, id: u64) -> Option<u64> {
        let mut index = self.home_index(id);
        loop {
            let key = self.get_u64(index + OFF_KEY);
            if key == id {
                return Some(index);
            }
            if key == 0 {
                return None;
            }
            index = self.next_index(index);
        }
    }

    fn home_index(&self, id: u64) -> u64 {
        ((id & 0x7fff_ffff_ffff_ffff) % self.keys) * ENTRY_SIZE
    }

    fn next_index(&self, index: u64) -> u64 {
        let next = index + ENTRY_SIZE;
        if next >= self.keys * ENTRY_SIZE {
            0
        } else {
            next
        }
    }

    fn get_u8(&self, off: u64) -> u8 {
        self.mmap[off as usize]
    }

    fn put_u8(&mut self, off: u64, value: u8) {
        self.mmap[off as usize] = value;
    }

    fn get_u32(&self, off: u64) -> u32 {
        let off = off as usize;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.mmap[off..off + 4]);
        u32::from_be_bytes(buf)
    }

    fn put_u32(&mut self, off: u64, value: u32) {
        let off = off as usize;
        self.mmap[off..off + 4].copy_from_slice(&value.to_be_bytes());
    }

    fn get_u64(&self, off: u64) -> u64 {
        let off = off as usize;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.mmap[off..off + 8]);
        u64::from_be_bytes(buf)
    }

    fn put_u64(&mut self, off: u64, value: u64) {
        let off = off as usize;
        self.mmap[off..off + 8].copy_from_slice(&value.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_for(expected: u64) -> LongMap {
        LongMap::new(expected, 64, 16).unwrap()
    }

    #[test]
    fn test_put_get_with_collisions() {
        // 16 slots minimum, 100 ids: plenty of probing.
        let mut map = map_for(75);
        for id in 1..=100u64 {
            map.put(id, id * 1000).unwrap();
        }
        for id in 1..=100u64 {
            assert_eq!(map.file_offset(id).unwrap(), id * 1000);
        }
        assert!(!map.contains(101));
        assert!(matches!(
            map.file_offset(101),
            Err(HeapError::IllegalInstanceId(101))
        ));
    }

    #[test]
    fn test_put_is_idempotent() {
        let mut map = map_for(10);
        map.put(5, 500).unwrap();
        map.put(5, 999).unwrap();
        assert_eq!(map.file_offset(5).unwrap(), 500);
    }

    #[test]
    fn test_reference_promotion() {
        let mut map = map_for(10);
        map.put(1, 100).unwrap();
        assert!(map.references(1).unwrap().is_empty());

        map.add_reference(1, 7).unwrap();
        assert!(map.has_only_one_reference(1).unwrap());
        assert_eq!(map.references(1).unwrap(), vec![7]);

        // Same referrer again: still inline.
        map.add_reference(1, 7).unwrap();
        assert!(map.has_only_one_reference(1).unwrap());

        // Second distinct referrer promotes to a chain.
        map.add_reference(1, 8).unwrap();
        assert!(!map.has_only_one_reference(1).unwrap());
        let refs = map.references(1).unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&7) && refs.contains(&8));

        map.add_reference(1, 9).unwrap();
        assert_eq!(map.references(1).unwrap().len(), 3);
    }

    #[test]
    fn test_nearest_root_inline() {
        let mut map = map_for(10);
        map.put(1, 100).unwrap();
        map.add_reference(1, 7).unwrap();
        assert_eq!(map.nearest_root(1).unwrap(), 0);
        map.set_nearest_root(1, 7).unwrap();
        assert!(map.has_root_ptr(1).unwrap());
        assert_eq!(map.nearest_root(1).unwrap(), 7);
    }

    #[test]
    fn test_nearest_root_moves_to_chain_front() {
        let mut map = map_for(10);
        map.put(1, 100).unwrap();
        for referrer in [7u64, 8, 9] {
            map.add_reference(1, referrer).unwrap();
        }
        map.set_nearest_root(1, 9).unwrap();
        assert_eq!(map.nearest_root(1).unwrap(), 9);
        // All referrers still present.
        let refs = map.references(1).unwrap();
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn test_retained_state_bits() {
        let mut map = map_for(10);
        map.put(1, 100).unwrap();
        assert!(!map.is_tree(1).unwrap());
        assert!(!map.retained_queued(1).unwrap());
        assert_eq!(map.retained(1).unwrap(), 0);

        map.set_retained_queued(1).unwrap();
        assert!(map.retained_queued(1).unwrap());
        assert!(!map.is_tree(1).unwrap());

        map.add_retained(1, 24).unwrap();
        map.add_retained(1, 16).unwrap();
        assert_eq!(map.retained(1).unwrap(), 40);

        map.set_tree(1).unwrap();
        assert!(map.is_tree(1).unwrap());
        // Queued bit unaffected.
        assert!(map.retained_queued(1).unwrap());
    }

    #[test]
    fn test_biggest_by_retained() {
        let mut map = map_for(20);
        for id in 1..=10u64 {
            map.put(id, id).unwrap();
            map.set_retained(id, id * 10).unwrap();
        }
        // Tie on retained between ids 11 and 12.
        map.put(11, 11).unwrap();
        map.set_retained(11, 100).unwrap();
        map.put(12, 12).unwrap();
        map.set_retained(12, 100).unwrap();

        // Ids 10, 11 and 12 all retain 100 bytes; ties resolve by id.
        let top = map.biggest_by_retained(3);
        assert_eq!(top, vec![(10, 100), (11, 100), (12, 100)]);

        let top = map.biggest_by_retained(5);
        assert_eq!(top.len(), 5);
        assert_eq!(top[3], (9, 90));
        assert_eq!(top[4], (8, 80));
    }
}
