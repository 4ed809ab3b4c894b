//! Paged random-access reader over the dump file.
//!
//! Used when the dump cannot (or should not) be memory mapped whole. The
//! file is carved into power-of-two pages; a bounded pool keeps the hottest
//! pages resident. Replacement is frequency based with ageing rather than
//! pure LRU: scan-heavy phases touch most of the file once, and pure LRU
//! would flush the index pages the lookup phases keep coming back to.
//!
//! Eviction survivor order: higher hit count wins, then the older page
//! wins, then the lower page index wins. Hit counts are halved every 1024
//! page faults so stale popularity fades.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use parking_lot::Mutex;

use crate::error::{HeapError, Result};

/// Page faults between two fading passes over the hit counters.
const FADE_INTERVAL: u64 = 1024;

struct Page {
    page_no: usize,
    /// Monotonic load counter value at load time. Lower = older.
    age: u64,
    data: Box<[u8]>,
}

struct PagedInner {
    file: File,
    /// Pool slot per page, `NO_SLOT` when not resident.
    page_slot: Vec<i32>,
    /// Per-page hit counter, kept across evictions.
    hits: Vec<u32>,
    pool: Vec<Page>,
    pool_capacity: usize,
    faults: u64,
    loads: u64,
}

const NO_SLOT: i32 = -1;

pub(crate) struct PagedFile {
    inner: Mutex<PagedInner>,
    len: u64,
    page_size: u64,
    page_shift: u32,
}

impl PagedFile {
    pub(crate) fn new(file: File, len: u64, page_size: u64, pool_pages: usize) -> Self {
        debug_assert!(page_size.is_power_of_two());
        let page_count = (len / page_size) as usize + 1;
        PagedFile {
            inner: Mutex::new(PagedInner {
                file,
                page_slot: vec![NO_SLOT; page_count],
                hits: vec![0; page_count],
                pool: Vec::with_capacity(pool_pages),
                pool_capacity: pool_pages,
                faults: 0,
                loads: 0,
            }),
            len,
            page_size,
            page_shift: page_size.trailing_zeros(),
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Fills `buf` from `offset`. The caller has already bounds-checked the
    /// read, so every needed byte is within the file. Reads straddling a
    /// page boundary are assembled page by page.
    pub(crate) fn read_exact(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut pos = offset;
        let mut filled = 0usize;
        while filled < buf.len() {
            let page_no = (pos >> self.page_shift) as usize;
            let in_page = (pos & (self.page_size - 1)) as usize;
            let slot = inner.ensure_resident(page_no, self.page_size, self.len)?;
            let page = &inner.pool[slot];
            if in_page >= page.data.len() {
                // Bounds were checked against the file length, so an empty
                // span here means the file shrank under us.
                return Err(HeapError::OutOfBounds {
                    offset: pos,
                    len: buf.len() - filled,
                    limit: self.len,
                });
            }
            let avail = page.data.len() - in_page;
            let take = avail.min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&page.data[in_page..in_page + take]);
            filled += take;
            pos += take as u64;
        }
        Ok(())
    }
}

impl PagedInner {
    /// Returns the pool slot of `page_no`, loading and possibly evicting.
    fn ensure_resident(&mut self, page_no: usize, page_size: u64, file_len: u64) -> Result<usize> {
        let slot = self.page_slot[page_no];
        if slot != NO_SLOT {
            self.hits[page_no] = self.hits[page_no].saturating_add(1);
            return Ok(slot as usize);
        }
        self.faults += 1;
        if self.faults % FADE_INTERVAL == 0 {
            for hit in &mut self.hits {
                *hit /= 2;
            }
        }
        let slot = if self.pool.len() < self.pool_capacity {
            self.pool.len()
        } else {
            self.evict_victim()
        };
        let data = self.load_page(page_no, page_size, file_len)?;
        self.loads += 1;
        let page = Page { page_no, age: self.loads, data };
        if slot == self.pool.len() {
            self.pool.push(page);
        } else {
            self.pool[slot] = page;
        }
        self.page_slot[page_no] = slot as i32;
        self.hits[page_no] = self.hits[page_no].saturating_add(1);
        Ok(slot)
    }

    /// Picks the page to replace and detaches it from the slot table.
    ///
    /// The survivor comparison is hit count first, then age (older
    /// survives), then page index (lower survives); the victim is the
    /// loser of that ordering.
    fn evict_victim(&mut self) -> usize {
        let mut victim = 0usize;
        for slot in 1..self.pool.len() {
            let v = &self.pool[victim];
            let c = &self.pool[slot];
            let v_hits = self.hits[v.page_no];
            let c_hits = self.hits[c.page_no];
            let candidate_loses = match c_hits.cmp(&v_hits) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Greater => false,
                std::cmp::Ordering::Equal => match c.age.cmp(&v.age) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => c.page_no > v.page_no,
                },
            };
            if candidate_loses {
                victim = slot;
            }
        }
        self.page_slot[self.pool[victim].page_no] = NO_SLOT;
        victim
    }

    /// Reads one page from disk. The final page may be short.
    fn load_page(&mut self, page_no: usize, page_size: u64, file_len: u64) -> Result<Box<[u8]>> {
        let start = page_no as u64 * page_size;
        let valid = file_len.saturating_sub(start).min(page_size) as usize;
        let mut data = vec![0u8; valid];
        self.file.seek(SeekFrom::Start(start))?;
        self.file.read_exact(&mut data)?;
        Ok(data.into_boxed_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn paged_over(bytes: &[u8], page_size: u64, pool_pages: usize) -> PagedFile {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        PagedFile::new(file, bytes.len() as u64, page_size, pool_pages)
    }

    #[test]
    fn test_read_within_one_page() {
        let data: Vec<u8> = (0..=255u8).collect();
        let paged = paged_over(&data, 4096, 4);
        let mut buf = [0u8; 4];
        paged.read_exact(10, &mut buf).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);
    }

    #[test]
    fn test_read_straddling_pages() {
        // 4 KiB pages, read crosses the first boundary.
        let data: Vec<u8> = (0..8192u32).map(|i| (i % 251) as u8).collect();
        let paged = paged_over(&data, 4096, 2);
        let mut buf = [0u8; 8];
        paged.read_exact(4092, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[4092..4100]);
    }

    #[test]
    fn test_short_final_page() {
        // 5000 bytes with 4 KiB pages: the second page holds 904 bytes.
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 247) as u8).collect();
        let paged = paged_over(&data, 4096, 2);
        let mut buf = [0u8; 8];
        paged.read_exact(4992, &mut buf).unwrap();
        assert_eq!(&buf[..], &data[4992..5000]);
    }

    #[test]
    fn test_eviction_under_pressure() {
        // 16 pages of data, pool of 2: every page readable regardless of
        // what got evicted in between.
        let data: Vec<u8> = (0..16 * 4096u32).map(|i| (i % 241) as u8).collect();
        let paged = paged_over(&data, 4096, 2);
        for round in 0..3 {
            for page in 0..16u64 {
                let off = page * 4096 + round;
                let mut buf = [0u8; 1];
                paged.read_exact(off, &mut buf).unwrap();
                assert_eq!(buf[0], data[off as usize]);
            }
        }
        assert!(paged.inner.lock().pool.len() <= 2);
    }

    #[test]
    fn test_hot_page_survives() {
        let data: Vec<u8> = (0..8 * 4096u32).map(|i| (i % 239) as u8).collect();
        let paged = paged_over(&data, 4096, 2);
        let mut buf = [0u8; 1];
        // Hammer page 0, then touch the rest once each.
        for _ in 0..100 {
            paged.read_exact(0, &mut buf).unwrap();
        }
        for page in 1..8u64 {
            paged.read_exact(page * 4096, &mut buf).unwrap();
        }
        // Page 0 must still be resident: its hit count dwarfs the others.
        let inner = paged.inner.lock();
        assert_ne!(inner.page_slot[0], NO_SLOT);
    }
}
