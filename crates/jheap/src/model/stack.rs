//! Stack frame and stack trace records.
//!
//! Thread-object GC roots carry a stack trace serial; these segments turn
//! that into method names and line numbers. Decode only, no aggregation.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::format::{records, tag, TagBounds};
use crate::io::DumpBuffer;
use crate::model::strings::StringSegment;

/// One decoded stack frame.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub frame_id: u64,
    pub method_name: Arc<str>,
    pub method_signature: Arc<str>,
    pub source_file: Arc<str>,
    pub class_serial: u32,
    /// Line number, or a negative marker (-1 unknown, -2 compiled,
    /// -3 native) as written by the dumping VM.
    pub line_number: i32,
}

/// One decoded stack trace: an ordered list of frame ids.
#[derive(Debug, Clone)]
pub struct StackTrace {
    pub serial: u32,
    pub thread_serial: u32,
    pub frame_ids: Vec<u64>,
}

pub(crate) struct StackFrameSegment {
    bounds: TagBounds,
    offsets: Option<FxHashMap<u64, u64>>,
}

impl StackFrameSegment {
    pub(crate) fn new(bounds: TagBounds) -> Self {
        StackFrameSegment { bounds, offsets: None }
    }

    pub(crate) fn frame(
        &mut self,
        buf: &DumpBuffer,
        strings: &mut StringSegment,
        frame_id: u64,
    ) -> Result<Option<StackFrame>> {
        let offsets = match self.offsets {
            Some(ref offsets) => offsets,
            None => {
                let mut offsets = FxHashMap::default();
                let mut cursor = self.bounds.start;
                while cursor < self.bounds.end {
                    let record = records::read_record(buf, &mut cursor)?;
                    if record.tag == tag::STACK_FRAME {
                        offsets.insert(buf.read_id(record.body)?, record.body);
                    }
                }
                self.offsets.insert(offsets)
            }
        };
        let Some(&body) = offsets.get(&frame_id) else {
            return Ok(None);
        };
        let id = buf.id_size() as u64;
        Ok(Some(StackFrame {
            frame_id,
            method_name: strings.string(buf, buf.read_id(body + id)?)?,
            method_signature: strings.string(buf, buf.read_id(body + 2 * id)?)?,
            source_file: strings.string(buf, buf.read_id(body + 3 * id)?)?,
            class_serial: buf.read_u32(body + 4 * id)?,
            line_number: buf.read_u32(body + 4 * id + 4)? as i32,
        }))
    }
}

pub(crate) struct StackTraceSegment {
    bounds: TagBounds,
    offsets: Option<FxHashMap<u32, u64>>,
}

impl StackTraceSegment {
    pub(crate) fn new(bounds: TagBounds) -> Self {
        StackTraceSegment { bounds, offsets: None }
    }

    pub(crate) fn trace(&mut self, buf: &DumpBuffer, serial: u32) -> Result<Option<StackTrace>> {
        let offsets = match self.offsets {
            Some(ref offsets) => offsets,
            None => {
                let mut offsets = FxHashMap::default();
                let mut cursor = self.bounds.start;
                while cursor < self.bounds.end {
                    let record = records::read_record(buf, &mut cursor)?;
                    if record.tag == tag::STACK_TRACE {
                        offsets.insert(buf.read_u32(record.body)?, record.body);
                    }
                }
                self.offsets.insert(offsets)
            }
        };
        let Some(&body) = offsets.get(&serial) else {
            return Ok(None);
        };
        let id = buf.id_size() as u64;
        let thread_serial = buf.read_u32(body + 4)?;
        let count = buf.read_u32(body + 8)? as u64;
        let mut frame_ids = Vec::with_capacity(count as usize);
        for i in 0..count {
            frame_ids.push(buf.read_id(body + 12 + i * id)?);
        }
        Ok(Some(StackTrace { serial, thread_serial, frame_ids }))
    }
}
