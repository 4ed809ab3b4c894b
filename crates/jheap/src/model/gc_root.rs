//! GC root records.

use crate::error::Result;
use crate::format::heap_tag;
use crate::io::DumpBuffer;

/// The nine GC root kinds of the dump format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcRootKind {
    Unknown,
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    MonitorUsed,
    ThreadObject,
}

impl GcRootKind {
    pub(crate) fn from_tag(tag: u8) -> Option<GcRootKind> {
        Some(match tag {
            heap_tag::ROOT_UNKNOWN => GcRootKind::Unknown,
            heap_tag::ROOT_JNI_GLOBAL => GcRootKind::JniGlobal,
            heap_tag::ROOT_JNI_LOCAL => GcRootKind::JniLocal,
            heap_tag::ROOT_JAVA_FRAME => GcRootKind::JavaFrame,
            heap_tag::ROOT_NATIVE_STACK => GcRootKind::NativeStack,
            heap_tag::ROOT_STICKY_CLASS => GcRootKind::StickyClass,
            heap_tag::ROOT_THREAD_BLOCK => GcRootKind::ThreadBlock,
            heap_tag::ROOT_MONITOR_USED => GcRootKind::MonitorUsed,
            heap_tag::ROOT_THREAD_OBJECT => GcRootKind::ThreadObject,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GcRootKind::Unknown => "unknown",
            GcRootKind::JniGlobal => "JNI global",
            GcRootKind::JniLocal => "JNI local",
            GcRootKind::JavaFrame => "Java frame",
            GcRootKind::NativeStack => "native stack",
            GcRootKind::StickyClass => "sticky class",
            GcRootKind::ThreadBlock => "thread block",
            GcRootKind::MonitorUsed => "monitor used",
            GcRootKind::ThreadObject => "thread object",
        }
    }
}

/// One GC root: a kind, the rooted object and, where the record carries
/// them, the owning thread's serial and frame number.
#[derive(Debug, Clone, Copy)]
pub struct GcRoot {
    pub kind: GcRootKind,
    pub object_id: u64,
    pub thread_serial: Option<u32>,
    pub frame_number: Option<u32>,
}

impl GcRoot {
    /// Decodes the root record whose tag byte sits at `start`.
    pub(crate) fn decode(buf: &DumpBuffer, kind: GcRootKind, start: u64) -> Result<GcRoot> {
        let id = buf.id_size() as u64;
        let body = start + 1;
        let object_id = buf.read_id(body)?;
        let (thread_serial, frame_number) = match kind {
            GcRootKind::JniLocal | GcRootKind::JavaFrame | GcRootKind::ThreadObject => (
                Some(buf.read_u32(body + id)?),
                Some(buf.read_u32(body + id + 4)?),
            ),
            GcRootKind::NativeStack | GcRootKind::ThreadBlock => {
                (Some(buf.read_u32(body + id)?), None)
            }
            _ => (None, None),
        };
        Ok(GcRoot { kind, object_id, thread_serial, frame_number })
    }
}
