//! Record-level cursor arithmetic.
//!
//! Two record grammars coexist. Top-level records are self-describing: a
//! length field lets the scanner skip any record, known or not. Heap
//! sub-records carry no length, so each tag's size must be computed from
//! its layout; an unknown sub-record tag is unrecoverable and fails the
//! scan.

use crate::error::{HeapError, Result};
use crate::format::{heap_tag, value_size};
use crate::io::DumpBuffer;

/// One decoded top-level record envelope.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TopRecord {
    pub tag: u8,
    /// Offset of the tag byte.
    pub start: u64,
    /// Offset of the first body byte.
    pub body: u64,
    /// Body length from the record header.
    pub len: u64,
}

/// Reads the top-level record at `*offset` and advances past it.
pub(crate) fn read_record(buf: &DumpBuffer, offset: &mut u64) -> Result<TopRecord> {
    let start = *offset;
    let tag = buf.read_u8(start)?;
    let len = buf.read_u32(start + 1 + 4)? as u64;
    *offset = start + 1 + 4 + 4 + len;
    Ok(TopRecord { tag, start, body: start + 9, len })
}

/// Reads the heap sub-record at `*offset`, advances past it, and returns
/// its tag.
///
/// A nested `HEAP_DUMP_SEGMENT` envelope (fused multi-segment dumps) is
/// treated as a sub-record of its own: only its time and length fields are
/// skipped, so iteration continues seamlessly into the segment body.
pub(crate) fn read_heap_record(buf: &DumpBuffer, offset: &mut u64) -> Result<u8> {
    let start = *offset;
    let tag = buf.read_u8(start)?;
    let body = start + 1;
    let id = buf.id_size() as u64;

    let size = match tag {
        heap_tag::ROOT_UNKNOWN => id,
        heap_tag::ROOT_JNI_GLOBAL => 2 * id,
        heap_tag::ROOT_JNI_LOCAL => id + 2 * 4,
        heap_tag::ROOT_JAVA_FRAME => id + 2 * 4,
        heap_tag::ROOT_NATIVE_STACK => id + 4,
        heap_tag::ROOT_STICKY_CLASS => id,
        heap_tag::ROOT_THREAD_BLOCK => id + 4,
        heap_tag::ROOT_MONITOR_USED => id,
        heap_tag::ROOT_THREAD_OBJECT => id + 2 * 4,
        heap_tag::CLASS_DUMP => {
            // Fixed part: class id, stack serial, five ids (super, loader,
            // signers, protection domain, reserved), one more reserved id,
            // declared instance size.
            let constant = id + 4 + 6 * id + 4;
            let mut pos = body + constant;
            skip_constant_pool(buf, &mut pos)?;
            skip_static_fields(buf, &mut pos)?;
            skip_instance_fields(buf, &mut pos)?;
            pos - body
        }
        heap_tag::INSTANCE_DUMP => {
            let field_bytes = buf.read_u32(body + id + 4 + id)? as u64;
            id + 4 + id + 4 + field_bytes
        }
        heap_tag::OBJECT_ARRAY_DUMP => {
            let elements = buf.read_u32(body + id + 4)? as u64;
            id + 4 + 4 + id + elements * id
        }
        heap_tag::PRIMITIVE_ARRAY_DUMP => {
            let elements = buf.read_u32(body + id + 4)? as u64;
            let ty = buf.read_u8(body + id + 4 + 4)?;
            id + 4 + 4 + 1 + elements * value_size(ty, buf.id_size())?
        }
        // Fused dumps: skip the inner envelope's time and length.
        crate::format::tag::HEAP_DUMP_SEGMENT => 4 + 4,
        other => return Err(HeapError::UnknownTag { tag: other, offset: start }),
    };

    *offset = body + size;
    Ok(tag)
}

/// Skips the constant pool section of a class dump.
pub(crate) fn skip_constant_pool(buf: &DumpBuffer, offset: &mut u64) -> Result<()> {
    let entries = buf.read_u16(*offset)?;
    *offset += 2;
    for _ in 0..entries {
        // Constant pool index, then a typed value.
        *offset += 2;
        skip_value(buf, offset)?;
    }
    Ok(())
}

/// Skips the static fields section of a class dump.
pub(crate) fn skip_static_fields(buf: &DumpBuffer, offset: &mut u64) -> Result<()> {
    let fields = buf.read_u16(*offset)?;
    *offset += 2;
    for _ in 0..fields {
        *offset += buf.id_size() as u64; // name id
        skip_value(buf, offset)?;
    }
    Ok(())
}

/// Skips the instance fields section of a class dump (declarations only,
/// no values).
pub(crate) fn skip_instance_fields(buf: &DumpBuffer, offset: &mut u64) -> Result<()> {
    let fields = buf.read_u16(*offset)? as u64;
    *offset += 2;
    *offset += fields * (buf.id_size() as u64 + 1);
    Ok(())
}

/// Skips one `type:u8, value` pair and returns the type.
pub(crate) fn skip_value(buf: &DumpBuffer, offset: &mut u64) -> Result<u8> {
    let ty = buf.read_u8(*offset)?;
    *offset += 1;
    *offset += value_size(ty, buf.id_size())?;
    Ok(ty)
}
