//! Synthetic HPROF dump builder for the integration tests.
//!
//! Produces byte-exact dumps: a 1.0.2 header, top-level records in
//! insertion order, then each accumulated heap body as either HEAP_DUMP
//! or HEAP_DUMP_SEGMENT records, closed by HEAP_DUMP_END.
#![allow(dead_code)]

use std::io::Write;

use tempfile::NamedTempFile;

pub const MAGIC: &[u8] = b"JAVA PROFILE 1.0.2\0";

// Basic type codes.
pub const TY_OBJECT: u8 = 2;
pub const TY_BOOLEAN: u8 = 4;
pub const TY_INT: u8 = 10;
pub const TY_LONG: u8 = 11;

pub struct DumpBuilder {
    id_size: u32,
    top: Vec<u8>,
    heaps: Vec<Vec<u8>>,
    current: Vec<u8>,
    segmented: bool,
}

impl DumpBuilder {
    pub fn new() -> Self {
        Self::with_id_size(8)
    }

    pub fn with_id_size(id_size: u32) -> Self {
        DumpBuilder {
            id_size,
            top: Vec::new(),
            heaps: Vec::new(),
            current: Vec::new(),
            segmented: false,
        }
    }

    /// Emit heap bodies as HEAP_DUMP_SEGMENT records instead of HEAP_DUMP.
    pub fn segmented(&mut self) -> &mut Self {
        self.segmented = true;
        self
    }

    /// Closes the current heap body; further sub-records start a new one.
    pub fn heap_break(&mut self) -> &mut Self {
        let body = std::mem::take(&mut self.current);
        self.heaps.push(body);
        self
    }

    fn id(&self, out: &mut Vec<u8>, value: u64) {
        if self.id_size == 4 {
            out.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            out.extend_from_slice(&value.to_be_bytes());
        }
    }

    pub fn top_record(&mut self, tag: u8, body: &[u8]) -> &mut Self {
        self.top.push(tag);
        self.top.extend_from_slice(&0u32.to_be_bytes());
        self.top.extend_from_slice(&(body.len() as u32).to_be_bytes());
        self.top.extend_from_slice(body);
        self
    }

    pub fn string(&mut self, id: u64, text: &str) -> &mut Self {
        let mut body = Vec::new();
        self.id(&mut body, id);
        body.extend_from_slice(text.as_bytes());
        self.top_record(0x01, &body)
    }

    pub fn load_class(&mut self, serial: u32, class_id: u64, name_string_id: u64) -> &mut Self {
        let mut body = Vec::new();
        body.extend_from_slice(&serial.to_be_bytes());
        self.id(&mut body, class_id);
        body.extend_from_slice(&0u32.to_be_bytes());
        self.id(&mut body, name_string_id);
        self.top_record(0x02, &body)
    }

    pub fn stack_frame(
        &mut self,
        frame_id: u64,
        method_name_id: u64,
        signature_id: u64,
        source_id: u64,
        class_serial: u32,
        line: i32,
    ) -> &mut Self {
        let mut body = Vec::new();
        self.id(&mut body, frame_id);
        self.id(&mut body, method_name_id);
        self.id(&mut body, signature_id);
        self.id(&mut body, source_id);
        body.extend_from_slice(&class_serial.to_be_bytes());
        body.extend_from_slice(&line.to_be_bytes());
        self.top_record(0x04, &body)
    }

    pub fn stack_trace(&mut self, serial: u32, thread_serial: u32, frames: &[u64]) -> &mut Self {
        let mut body = Vec::new();
        body.extend_from_slice(&serial.to_be_bytes());
        body.extend_from_slice(&thread_serial.to_be_bytes());
        body.extend_from_slice(&(frames.len() as u32).to_be_bytes());
        for &frame in frames {
            self.id(&mut body, frame);
        }
        self.top_record(0x05, &body)
    }

    pub fn heap_summary(
        &mut self,
        live_bytes: u32,
        live_instances: u32,
        alloc_bytes: u64,
        alloc_instances: u64,
    ) -> &mut Self {
        let mut body = Vec::new();
        body.extend_from_slice(&live_bytes.to_be_bytes());
        body.extend_from_slice(&live_instances.to_be_bytes());
        body.extend_from_slice(&alloc_bytes.to_be_bytes());
        body.extend_from_slice(&alloc_instances.to_be_bytes());
        self.top_record(0x07, &body)
    }

    // --- heap sub-records ------------------------------------------------

    pub fn class_dump(
        &mut self,
        class_id: u64,
        super_id: u64,
        instance_size: u32,
        statics: &[(u64, u8, Vec<u8>)],
        fields: &[(u64, u8)],
    ) -> &mut Self {
        let mut body = Vec::new();
        self.id(&mut body, class_id);
        body.extend_from_slice(&0u32.to_be_bytes()); // stack trace serial
        self.id(&mut body, super_id);
        for _ in 0..5 {
            // loader, signers, protection domain, two reserved
            self.id(&mut body, 0);
        }
        body.extend_from_slice(&instance_size.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes()); // constant pool
        body.extend_from_slice(&(statics.len() as u16).to_be_bytes());
        for (name_id, ty, value) in statics {
            self.id(&mut body, *name_id);
            body.push(*ty);
            body.extend_from_slice(value);
        }
        body.extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for (name_id, ty) in fields {
            self.id(&mut body, *name_id);
            body.push(*ty);
        }
        self.current.push(0x20);
        self.current.extend_from_slice(&body);
        self
    }

    pub fn instance_dump(&mut self, id: u64, class_id: u64, data: &[u8]) -> &mut Self {
        self.current.push(0x21);
        let mut body = Vec::new();
        self.id(&mut body, id);
        body.extend_from_slice(&0u32.to_be_bytes());
        self.id(&mut body, class_id);
        body.extend_from_slice(&(data.len() as u32).to_be_bytes());
        body.extend_from_slice(data);
        self.current.extend_from_slice(&body);
        self
    }

    pub fn object_array(&mut self, id: u64, array_class_id: u64, elements: &[u64]) -> &mut Self {
        self.current.push(0x22);
        let mut body = Vec::new();
        self.id(&mut body, id);
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&(elements.len() as u32).to_be_bytes());
        self.id(&mut body, array_class_id);
        for &element in elements {
            self.id(&mut body, element);
        }
        self.current.extend_from_slice(&body);
        self
    }

    pub fn primitive_array(&mut self, id: u64, ty: u8, count: u32, data: &[u8]) -> &mut Self {
        self.current.push(0x23);
        let mut body = Vec::new();
        self.id(&mut body, id);
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&count.to_be_bytes());
        body.push(ty);
        body.extend_from_slice(data);
        self.current.extend_from_slice(&body);
        self
    }

    pub fn root_unknown(&mut self, id: u64) -> &mut Self {
        self.current.push(0xff);
        let mut body = Vec::new();
        self.id(&mut body, id);
        self.current.extend_from_slice(&body);
        self
    }

    pub fn root_sticky_class(&mut self, id: u64) -> &mut Self {
        self.current.push(0x05);
        let mut body = Vec::new();
        self.id(&mut body, id);
        self.current.extend_from_slice(&body);
        self
    }

    pub fn root_thread_object(&mut self, id: u64, thread_serial: u32, frame: u32) -> &mut Self {
        self.current.push(0x08);
        let mut body = Vec::new();
        self.id(&mut body, id);
        body.extend_from_slice(&thread_serial.to_be_bytes());
        body.extend_from_slice(&frame.to_be_bytes());
        self.current.extend_from_slice(&body);
        self
    }

    pub fn build(&mut self) -> NamedTempFile {
        if !self.current.is_empty() {
            self.heap_break();
        }
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.id_size.to_be_bytes());
        out.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
        out.extend_from_slice(&self.top);
        let heap_tag = if self.segmented { 0x1c } else { 0x0c };
        for heap in &self.heaps {
            out.push(heap_tag);
            out.extend_from_slice(&0u32.to_be_bytes());
            out.extend_from_slice(&(heap.len() as u32).to_be_bytes());
            out.extend_from_slice(heap);
        }
        out.push(0x2c);
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());

        let mut file = NamedTempFile::new().expect("create temp dump");
        file.write_all(&out).expect("write temp dump");
        file.flush().expect("flush temp dump");
        file
    }
}

/// Concatenated big-endian 8-byte ids, for instance field data.
pub fn ids(values: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 8);
    for value in values {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}
