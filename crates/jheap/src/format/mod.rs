//! Binary format constants and record geometry.
//!
//! The dump is a header followed by top-level records (`tag:u8`,
//! `time:u32`, `len:u32`, body). Heap dump records contain a stream of
//! sub-records with no length field of their own; their sizes follow from
//! per-tag arithmetic in [`records`]. Everything is big endian.

pub(crate) mod records;

use crate::error::{HeapError, Result};

/// Top-level record tags.
pub(crate) mod tag {
    pub const STRING: u8 = 0x01;
    pub const LOAD_CLASS: u8 = 0x02;
    pub const STACK_FRAME: u8 = 0x04;
    pub const STACK_TRACE: u8 = 0x05;
    pub const HEAP_SUMMARY: u8 = 0x07;
    pub const HEAP_DUMP: u8 = 0x0c;
    pub const HEAP_DUMP_SEGMENT: u8 = 0x1c;
    pub const HEAP_DUMP_END: u8 = 0x2c;
}

/// Heap dump sub-record tags.
pub(crate) mod heap_tag {
    pub const ROOT_JNI_GLOBAL: u8 = 0x01;
    pub const ROOT_JNI_LOCAL: u8 = 0x02;
    pub const ROOT_JAVA_FRAME: u8 = 0x03;
    pub const ROOT_NATIVE_STACK: u8 = 0x04;
    pub const ROOT_STICKY_CLASS: u8 = 0x05;
    pub const ROOT_THREAD_BLOCK: u8 = 0x06;
    pub const ROOT_MONITOR_USED: u8 = 0x07;
    pub const ROOT_THREAD_OBJECT: u8 = 0x08;
    pub const CLASS_DUMP: u8 = 0x20;
    pub const INSTANCE_DUMP: u8 = 0x21;
    pub const OBJECT_ARRAY_DUMP: u8 = 0x22;
    pub const PRIMITIVE_ARRAY_DUMP: u8 = 0x23;
    pub const ROOT_UNKNOWN: u8 = 0xff;

    pub const ROOT_TAGS: [u8; 9] = [
        ROOT_JNI_GLOBAL,
        ROOT_JNI_LOCAL,
        ROOT_JAVA_FRAME,
        ROOT_NATIVE_STACK,
        ROOT_STICKY_CLASS,
        ROOT_THREAD_BLOCK,
        ROOT_MONITOR_USED,
        ROOT_THREAD_OBJECT,
        ROOT_UNKNOWN,
    ];
}

/// Basic type codes used by field declarations and primitive arrays.
pub(crate) mod basic_type {
    pub const OBJECT: u8 = 2;
    pub const BOOLEAN: u8 = 4;
    pub const CHAR: u8 = 5;
    pub const FLOAT: u8 = 6;
    pub const DOUBLE: u8 = 7;
    pub const BYTE: u8 = 8;
    pub const SHORT: u8 = 9;
    pub const INT: u8 = 10;
    pub const LONG: u8 = 11;
}

/// Serialized width of one value of basic type `ty`. `OBJECT` values are
/// identifier sized.
pub(crate) fn value_size(ty: u8, id_size: u32) -> Result<u64> {
    Ok(match ty {
        basic_type::OBJECT => id_size as u64,
        basic_type::BOOLEAN | basic_type::BYTE => 1,
        basic_type::CHAR | basic_type::SHORT => 2,
        basic_type::FLOAT | basic_type::INT => 4,
        basic_type::DOUBLE | basic_type::LONG => 8,
        other => return Err(HeapError::InvalidType(other)),
    })
}

/// Byte span covered by all records of one tag.
///
/// Bounds are a min/max envelope: records of *other* tags may sit inside
/// the span, so scans over a bounds range must re-read each record's tag.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TagBounds {
    pub tag: u8,
    pub start: u64,
    pub end: u64,
}

impl TagBounds {
    pub(crate) fn new(tag: u8, start: u64, end: u64) -> Self {
        TagBounds { tag, start, end }
    }

    /// Widens these bounds to also cover `start..end`.
    pub(crate) fn extend(&mut self, start: u64, end: u64) {
        self.start = self.start.min(start);
        self.end = self.end.max(end);
    }

    /// Envelope of two optional bounds, ignoring `None` sides.
    pub(crate) fn union(a: Option<TagBounds>, b: Option<TagBounds>) -> Option<TagBounds> {
        match (a, b) {
            (Some(a), Some(b)) => Some(TagBounds {
                tag: a.tag,
                start: a.start.min(b.start),
                end: a.end.max(b.end),
            }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}
