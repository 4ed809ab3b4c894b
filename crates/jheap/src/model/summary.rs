//! Heap summary: either the dump's own HEAP_SUMMARY record or totals
//! computed by a full instance scan when the record is absent.

use crate::error::Result;
use crate::io::DumpBuffer;

#[derive(Debug, Clone, Copy)]
pub struct HeapSummary {
    /// Milliseconds since the dump header timestamp, from the record's
    /// time field. Zero for computed summaries.
    pub time_offset_ms: u32,
    pub total_live_bytes: u64,
    pub total_live_instances: u64,
    /// Allocation totals exist only in recorded summaries.
    pub total_allocated_bytes: Option<u64>,
    pub total_allocated_instances: Option<u64>,
}

impl HeapSummary {
    /// Decodes a HEAP_SUMMARY record whose tag byte sits at `start`.
    pub(crate) fn decode(buf: &DumpBuffer, start: u64) -> Result<HeapSummary> {
        let time_offset_ms = buf.read_u32(start + 1)?;
        let body = start + 9;
        Ok(HeapSummary {
            time_offset_ms,
            total_live_bytes: buf.read_u32(body)? as u64,
            total_live_instances: buf.read_u32(body + 4)? as u64,
            total_allocated_bytes: Some(buf.read_u64(body + 8)?),
            total_allocated_instances: Some(buf.read_u64(body + 16)?),
        })
    }

    pub(crate) fn computed(total_live_bytes: u64, total_live_instances: u64) -> HeapSummary {
        HeapSummary {
            time_offset_ms: 0,
            total_live_bytes,
            total_live_instances,
            total_allocated_bytes: None,
            total_allocated_instances: None,
        }
    }
}
