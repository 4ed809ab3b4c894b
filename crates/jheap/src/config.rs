//! Engine configuration.
//!
//! All tunables of the analyzer live in [`HeapConfig`]. The defaults are
//! sized for dumps in the single-digit-gigabyte range on a machine with a
//! few gigabytes of free memory; every cache and buffer here is bounded, so
//! memory use stays roughly constant as the dump grows.

use crate::error::{HeapError, Result};

/// Configuration for a [`Heap`](crate::Heap) build.
///
/// # Example
///
/// ```no_run
/// use jheap::{Heap, HeapConfig};
///
/// let config = HeapConfig {
///     force_paged_reader: true,
///     ..HeapConfig::default()
/// };
/// let heap = Heap::open_with_config("dump.hprof", config)?;
/// # Ok::<(), jheap::HeapError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Page size of the paged dump reader, in bytes. Must be a power of two.
    ///
    /// Only used when the dump cannot be memory mapped whole, or when
    /// [`force_paged_reader`](Self::force_paged_reader) is set.
    pub page_size: u64,

    /// Maximum number of resident pages in the paged reader's pool.
    pub page_pool_pages: usize,

    /// Hard ceiling on any single read offset, in bytes. A read beyond this
    /// limit fails even if the file claims to be larger. Guards against
    /// corrupt length fields sending the reader to absurd offsets.
    pub sanity_limit: u64,

    /// In-memory element capacity of a disk-spilling queue before it starts
    /// writing to its scratch file.
    pub queue_buffer_len: usize,

    /// Entry capacity of the string cache.
    pub string_cache_size: usize,

    /// Entry capacity of the per-class field-list cache.
    pub fields_cache_size: usize,

    /// Entry capacity of the nearest-GC-root pointer cache used by the
    /// dominator computation. The dominator pass chases root-pointer chains
    /// heavily; this is its largest ancillary structure.
    pub root_ptr_cache_size: usize,

    /// Maximum number of adjacency blocks kept in memory before clean
    /// blocks are evicted.
    pub adjacency_cache_blocks: usize,

    /// Number of dirty adjacency blocks accumulated before a batched,
    /// offset-ordered write-back to the scratch file.
    pub adjacency_dirty_limit: usize,

    /// When set, references to ids absent from the identity index resolve
    /// to a stub instance instead of failing the query. The reference and
    /// graph passes always skip such ids regardless of this flag.
    pub tolerate_missing_ids: bool,

    /// Use the paged reader even when the dump would fit in a single
    /// memory mapping. Mainly useful for exercising the eviction path.
    pub force_paged_reader: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            page_size: 4 * 1024 * 1024,
            page_pool_pages: 64,
            sanity_limit: 1 << 40,
            queue_buffer_len: 8192,
            string_cache_size: 1000,
            fields_cache_size: 500,
            root_ptr_cache_size: 400_000,
            adjacency_cache_blocks: 10_000,
            adjacency_dirty_limit: 10_000,
            tolerate_missing_ids: false,
            force_paged_reader: false,
        }
    }
}

impl HeapConfig {
    /// Validates the configuration, returning a descriptive error for the
    /// first invalid field found.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() {
            return Err(HeapError::Configuration(format!(
                "page_size must be a power of two, got {}",
                self.page_size
            )));
        }
        if self.page_size < 4096 {
            return Err(HeapError::Configuration(format!(
                "page_size must be at least 4096, got {}",
                self.page_size
            )));
        }
        if self.page_pool_pages < 2 {
            return Err(HeapError::Configuration(format!(
                "page_pool_pages must be at least 2, got {}",
                self.page_pool_pages
            )));
        }
        if self.queue_buffer_len == 0 {
            return Err(HeapError::Configuration(
                "queue_buffer_len must be nonzero".into(),
            ));
        }
        if self.adjacency_cache_blocks == 0 || self.adjacency_dirty_limit == 0 {
            return Err(HeapError::Configuration(
                "adjacency cache sizes must be nonzero".into(),
            ));
        }
        if self.sanity_limit == 0 {
            return Err(HeapError::Configuration("sanity_limit must be nonzero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(HeapConfig::default().validate().is_ok());
    }

    #[test]
    fn test_page_size_must_be_power_of_two() {
        let config = HeapConfig { page_size: 3 * 1024 * 1024, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_page_size_minimum() {
        let config = HeapConfig { page_size: 2048, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_needs_two_pages() {
        let config = HeapConfig { page_pool_pages: 1, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
