//! Adjacency store: chained blocks of numbers in a scratch file.
//!
//! A list is a chain of fixed-size blocks, each holding three numbers and
//! a pointer to the next block. Zero marks an empty slot, which works
//! because neither object ids nor block offsets of live blocks are zero:
//! block 0 is allocated up front and never used. When a block fills, a
//! fresh block is prepended (its last slot points at the old head), so a
//! list is identified by the offset of its newest block and that offset
//! changes as the list grows.
//!
//! Blocks are cached in memory; mutations mark blocks dirty and dirty
//! blocks are written back in offset order once enough accumulate, turning
//! random updates into mostly sequential file writes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{HeapError, Result};

/// Payload numbers per block; the fourth slot is the next-block pointer.
const NUMBERS_IN_BLOCK: usize = 3;
const SLOTS: usize = NUMBERS_IN_BLOCK + 1;
const NUMBER_BYTES: u64 = 8;
const BLOCK_BYTES: u64 = SLOTS as u64 * NUMBER_BYTES;

type Block = [u64; SLOTS];

pub(crate) struct NumberList {
    file: File,
    cache: FxHashMap<u64, (Block, u64)>,
    dirty: FxHashSet<u64>,
    cache_capacity: usize,
    dirty_limit: usize,
    tick: u64,
    blocks: u64,
}

impl NumberList {
    pub(crate) fn new(cache_capacity: usize, dirty_limit: usize) -> Result<Self> {
        let mut list = NumberList {
            file: tempfile::tempfile()?,
            cache: FxHashMap::default(),
            dirty: FxHashSet::default(),
            cache_capacity,
            dirty_limit,
            tick: 0,
            blocks: 0,
        };
        // Block 0 is reserved so offset 0 can mean "no list".
        list.add_block()?;
        Ok(list)
    }

    /// Appends `number` to the list headed at `start`, deduplicating
    /// within the head block's chain walk. Returns the possibly new head
    /// offset.
    pub(crate) fn add_number(&mut self, start: u64, number: u64) -> Result<u64> {
        let block = self.block(start)?;
        for slot in 0..NUMBERS_IN_BLOCK {
            let existing = block[slot];
            if existing == 0 {
                self.set_slot(start, slot, number)?;
                return Ok(start);
            }
            if existing == number {
                return Ok(start);
            }
        }
        // Head block full: prepend a new block pointing at the old head.
        let head = self.add_block()?;
        self.set_slot(head, NUMBERS_IN_BLOCK, start)?;
        self.set_slot(head, 0, number)?;
        Ok(head)
    }

    /// Creates a new two-element list and returns its head offset.
    pub(crate) fn add_first(&mut self, first: u64, second: u64) -> Result<u64> {
        let head = self.add_block()?;
        self.set_slot(head, 0, first)?;
        self.set_slot(head, 1, second)?;
        Ok(head)
    }

    /// Moves `number`, already present in the list at `start`, to the
    /// front, swapping it with the current front element.
    pub(crate) fn put_first(&mut self, start: u64, number: u64) -> Result<()> {
        let mut offset = start;
        let mut moved = 0u64;
        loop {
            let block = self.block(offset)?;
            for slot in 0..NUMBERS_IN_BLOCK {
                let existing = block[slot];
                if offset == start && slot == 0 {
                    if existing == number {
                        return Ok(());
                    }
                    moved = existing;
                    self.set_slot(offset, slot, number)?;
                } else if existing == 0 {
                    break;
                } else if existing == number {
                    self.set_slot(offset, slot, moved)?;
                    return Ok(());
                }
            }
            offset = block[NUMBERS_IN_BLOCK];
            if offset == 0 {
                return Err(HeapError::Internal(format!(
                    "number {number:#x} not found in list at {start:#x}"
                )));
            }
        }
    }

    /// First element of the list at `start`.
    pub(crate) fn first(&mut self, start: u64) -> Result<u64> {
        Ok(self.block(start)?[0])
    }

    /// All elements of the list at `start`, newest block first.
    pub(crate) fn numbers(&mut self, start: u64) -> Result<Vec<u64>> {
        let mut numbers = Vec::new();
        let mut offset = start;
        loop {
            let block = self.block(offset)?;
            for slot in 0..NUMBERS_IN_BLOCK {
                let element = block[slot];
                if element == 0 {
                    break;
                }
                numbers.push(element);
            }
            offset = block[NUMBERS_IN_BLOCK];
            if offset == 0 {
                return Ok(numbers);
            }
        }
    }

    /// Writes all dirty blocks back to the scratch file.
    pub(crate) fn flush(&mut self) -> Result<()> {
        self.flush_dirty()
    }

    fn block(&mut self, offset: u64) -> Result<Block> {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.cache.get_mut(&offset) {
            entry.1 = tick;
            return Ok(entry.0);
        }
        let mut bytes = [0u8; BLOCK_BYTES as usize];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut bytes)?;
        let mut block = [0u64; SLOTS];
        for (slot, chunk) in bytes.chunks_exact(NUMBER_BYTES as usize).enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            block[slot] = u64::from_be_bytes(buf);
        }
        self.insert_cached(offset, block)?;
        Ok(block)
    }

    fn set_slot(&mut self, offset: u64, slot: usize, value: u64) -> Result<()> {
        // The block is always cached at this point; mutate in place.
        let entry = self.cache.get_mut(&offset).ok_or_else(|| {
            HeapError::Internal(format!("block {offset:#x} vanished from cache"))
        })?;
        entry.0[slot] = value;
        self.dirty.insert(offset);
        if self.dirty.len() > self.dirty_limit {
            self.flush_dirty()?;
        }
        Ok(())
    }

    fn add_block(&mut self) -> Result<u64> {
        let offset = self.blocks * BLOCK_BYTES;
        self.blocks += 1;
        self.insert_cached(offset, [0u64; SLOTS])?;
        // New blocks are dirty from birth so the file always grows to
        // cover them even if they are never written again.
        self.dirty.insert(offset);
        Ok(offset)
    }

    fn insert_cached(&mut self, offset: u64, block: Block) -> Result<()> {
        if self.cache.len() >= self.cache_capacity {
            self.evict_clean_block()?;
        }
        self.tick += 1;
        self.cache.insert(offset, (block, self.tick));
        Ok(())
    }

    fn evict_clean_block(&mut self) -> Result<()> {
        let victim = self
            .cache
            .iter()
            .filter(|(offset, _)| !self.dirty.contains(*offset))
            .min_by_key(|(_, (_, tick))| *tick)
            .map(|(offset, _)| *offset);
        match victim {
            Some(offset) => {
                self.cache.remove(&offset);
                Ok(())
            }
            None => {
                // Everything resident is dirty; write back, then retry.
                self.flush_dirty()?;
                let victim = self
                    .cache
                    .iter()
                    .min_by_key(|(_, (_, tick))| *tick)
                    .map(|(offset, _)| *offset);
                if let Some(offset) = victim {
                    self.cache.remove(&offset);
                }
                Ok(())
            }
        }
    }

    /// Writes dirty blocks in ascending offset order, coalescing adjacent
    /// blocks into single writes.
    fn flush_dirty(&mut self) -> Result<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }
        let mut offsets: Vec<u64> = self.dirty.iter().copied().collect();
        offsets.sort_unstable();
        let mut run_start = offsets[0];
        let mut run: Vec<u8> = Vec::with_capacity(1024 * BLOCK_BYTES as usize);
        for offset in offsets {
            if run_start + run.len() as u64 != offset {
                self.file.seek(SeekFrom::Start(run_start))?;
                self.file.write_all(&run)?;
                run.clear();
                run_start = offset;
            }
            let (block, _) = self.cache.get(&offset).ok_or_else(|| {
                HeapError::Internal(format!("dirty block {offset:#x} not cached"))
            })?;
            for value in block {
                run.extend_from_slice(&value.to_be_bytes());
            }
        }
        self.file.seek(SeekFrom::Start(run_start))?;
        self.file.write_all(&run)?;
        self.dirty.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_list() -> NumberList {
        // Tiny cache so evictions and write-backs actually happen.
        NumberList::new(4, 2).unwrap()
    }

    #[test]
    fn test_two_element_list() {
        let mut list = small_list();
        let head = list.add_first(10, 20).unwrap();
        assert_ne!(head, 0);
        assert_eq!(list.first(head).unwrap(), 10);
        assert_eq!(list.numbers(head).unwrap(), vec![10, 20]);
    }

    #[test]
    fn test_growth_prepends_blocks() {
        let mut list = small_list();
        let mut head = list.add_first(1, 2).unwrap();
        for number in 3..=11u64 {
            head = list.add_number(head, number).unwrap();
        }
        let all = list.numbers(head).unwrap();
        assert_eq!(all.len(), 11);
        for number in 1..=11u64 {
            assert!(all.contains(&number), "missing {number}");
        }
        // Newest block comes first in iteration order.
        assert!(all[0] > 9);
    }

    #[test]
    fn test_duplicates_within_head_block_ignored() {
        let mut list = small_list();
        let head = list.add_first(1, 2).unwrap();
        let same = list.add_number(head, 2).unwrap();
        assert_eq!(same, head);
        assert_eq!(list.numbers(head).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_put_first_swaps_to_front() {
        let mut list = small_list();
        let mut head = list.add_first(1, 2).unwrap();
        head = list.add_number(head, 3).unwrap();
        list.put_first(head, 3).unwrap();
        assert_eq!(list.first(head).unwrap(), 3);
        let all = list.numbers(head).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&1) && all.contains(&2) && all.contains(&3));
    }

    #[test]
    fn test_put_first_already_first_is_noop() {
        let mut list = small_list();
        let head = list.add_first(5, 6).unwrap();
        list.put_first(head, 5).unwrap();
        assert_eq!(list.numbers(head).unwrap(), vec![5, 6]);
    }

    #[test]
    fn test_put_first_missing_number_fails() {
        let mut list = small_list();
        let head = list.add_first(5, 6).unwrap();
        assert!(list.put_first(head, 99).is_err());
    }

    #[test]
    fn test_survives_eviction_and_flush() {
        let mut list = small_list();
        let mut heads = Vec::new();
        // Enough lists to blow through the 4-block cache many times over.
        for base in 0..50u64 {
            let first = base * 2 + 1;
            let head = list.add_first(first, first + 1).unwrap();
            heads.push((head, first));
        }
        list.flush().unwrap();
        for (head, first) in heads {
            assert_eq!(list.numbers(head).unwrap(), vec![first, first + 1]);
        }
    }
}
