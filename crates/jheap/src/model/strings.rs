//! UTF-8 string records.
//!
//! Strings are referenced by id from class names, field names and stack
//! frames. The id-to-record index is built lazily on the first lookup and
//! decoded strings go through a bounded cache, since name lookups repeat
//! heavily (every field of every instance of a class shares its names).

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::format::{records, tag, TagBounds};
use crate::io::DumpBuffer;
use crate::util::BoundedCache;

const NULL_STRING: &str = "<null string>";
const UNKNOWN_STRING: &str = "<unknown string>";

pub(crate) struct StringSegment {
    bounds: TagBounds,
    /// String id to record start offset, built on first use.
    offsets: Option<FxHashMap<u64, u64>>,
    cache: BoundedCache<u64, Arc<str>>,
}

impl StringSegment {
    pub(crate) fn new(bounds: TagBounds, cache_size: usize) -> Self {
        StringSegment { bounds, offsets: None, cache: BoundedCache::new(cache_size) }
    }

    /// Decodes the string with the given id. Missing ids yield placeholder
    /// text rather than an error: dangling name ids occur in truncated
    /// dumps and a display name is never worth failing a query for.
    pub(crate) fn string(&mut self, buf: &DumpBuffer, id: u64) -> Result<Arc<str>> {
        if id == 0 {
            return Ok(Arc::from(NULL_STRING));
        }
        if let Some(cached) = self.cache.get(&id) {
            return Ok(cached.clone());
        }
        let decoded = self.decode(buf, id)?;
        self.cache.insert(id, decoded.clone());
        Ok(decoded)
    }

    fn decode(&mut self, buf: &DumpBuffer, id: u64) -> Result<Arc<str>> {
        let offsets = match self.offsets {
            Some(ref offsets) => offsets,
            None => {
                let built = self.build_offsets(buf)?;
                self.offsets.insert(built)
            }
        };
        let Some(&start) = offsets.get(&id) else {
            return Ok(Arc::from(UNKNOWN_STRING));
        };
        let len = buf.read_u32(start + 5)? as u64;
        let id_size = buf.id_size() as u64;
        // A record shorter than the id width is truncated; treat it like a
        // missing id rather than failing the query.
        let Some(text_len) = len.checked_sub(id_size) else {
            return Ok(Arc::from(UNKNOWN_STRING));
        };
        let mut chars = vec![0u8; text_len as usize];
        buf.read_exact(start + 9 + id_size, &mut chars)?;
        Ok(Arc::from(String::from_utf8_lossy(&chars).into_owned()))
    }

    fn build_offsets(&self, buf: &DumpBuffer) -> Result<FxHashMap<u64, u64>> {
        let mut offsets = FxHashMap::default();
        let mut cursor = self.bounds.start;
        while cursor < self.bounds.end {
            let record = records::read_record(buf, &mut cursor)?;
            if record.tag == tag::STRING {
                let string_id = buf.read_id(record.body)?;
                offsets.insert(string_id, record.start);
            }
        }
        Ok(offsets)
    }
}
