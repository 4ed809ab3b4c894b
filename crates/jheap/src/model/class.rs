//! Class metadata: the class dump segment decoded into a collection.
//!
//! Classes are few compared to instances, so their fixed-layout fields and
//! names are decoded eagerly at build time, in scan order (the order also
//! defines each class's ordinal, used to map index entries back to
//! classes). Field declaration lists are decoded lazily through a bounded
//! cache; per-class counters gathered by later passes live in a parallel
//! stats vector.

use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::error::{HeapError, Result};
use crate::format::{basic_type, heap_tag, records, value_size, TagBounds};
use crate::index::LongMap;
use crate::io::DumpBuffer;
use crate::model::field::{read_value, FieldDecl, FieldValue};
use crate::model::load_class::{convert_vm_name, LoadClassSegment};
use crate::model::strings::StringSegment;
use crate::util::BoundedCache;

/// Array header bytes beyond the minimum instance size.
pub(crate) const ARRAY_OVERHEAD: u64 = 4 + 4;

/// Classes whose instances are known to never (usefully) contain
/// themselves; excluded from the containment heuristic of the
/// retained-size-by-class walk.
const CANNOT_CONTAIN_ITSELF: [&str; 4] = [
    "java.lang.String",
    "java.lang.StringBuffer",
    "java.lang.StringBuilder",
    "java.io.File",
];

/// Byte offsets of the fixed part of a class dump record, all relative to
/// the record's tag byte.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClassLayout {
    pub class_id: u64,
    pub super_id: u64,
    pub loader_id: u64,
    pub instance_size: u64,
    pub constant_pool: u64,
    /// Size of one field declaration (name id + type byte).
    pub field_entry: u64,
    pub min_instance_size: u64,
}

impl ClassLayout {
    pub(crate) fn new(id_size: u32) -> Self {
        let id = id_size as u64;
        let class_id = 1;
        // The stack trace serial (4 bytes) sits between the class id and
        // the super id.
        let super_id = class_id + id + 4;
        let loader_id = super_id + id;
        // signers, protection domain and two reserved ids sit between the
        // loader and the declared instance size.
        let instance_size = loader_id + 5 * id;
        ClassLayout {
            class_id,
            super_id,
            loader_id,
            instance_size,
            constant_pool: instance_size + 4,
            field_entry: id + 1,
            min_instance_size: 2 * id,
        }
    }
}

/// Eagerly decoded per-class constants.
#[derive(Debug, Clone)]
pub(crate) struct ClassDump {
    pub id: u64,
    /// Record start (tag byte) in the dump.
    pub file_offset: u64,
    pub super_id: u64,
    pub loader_id: u64,
    /// Declared instance field bytes, excluding the object header.
    pub declared_size: u32,
    pub name: Arc<str>,
    pub vm_name: Arc<str>,
}

impl ClassDump {
    pub(crate) fn is_array(&self) -> bool {
        self.vm_name.starts_with('[') || self.name.ends_with("[]")
    }
}

/// Mutable per-class counters filled by the instance pass and the
/// retained-size-by-class pass.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ClassStats {
    pub instances: u32,
    pub first_instance_offset: u64,
    /// Total bytes of all array instances of this class.
    pub array_bytes: u64,
    pub retained: u64,
}

pub(crate) struct ClassCollection {
    layout: ClassLayout,
    classes: IndexMap<u64, ClassDump>,
    stats: Vec<ClassStats>,
    prim_array_classes: [u64; 12],
    java_lang_class: u64,
    fields_cache: Mutex<BoundedCache<u64, Arc<Vec<FieldDecl>>>>,
}

impl ClassCollection {
    /// Scans the class dump bounds, decoding every class and registering
    /// its id in the identity index (ordinal = 1-based scan position).
    pub(crate) fn build(
        buf: &DumpBuffer,
        bounds: TagBounds,
        load_classes: &mut LoadClassSegment,
        strings: &mut StringSegment,
        index: &mut LongMap,
        fields_cache_size: usize,
    ) -> Result<ClassCollection> {
        let layout = ClassLayout::new(buf.id_size());
        let mut classes = IndexMap::new();
        let mut cursor = bounds.start;
        while cursor < bounds.end {
            let start = cursor;
            let tag = records::read_heap_record(buf, &mut cursor)?;
            if tag != heap_tag::CLASS_DUMP {
                continue;
            }
            let id = buf.read_id(start + layout.class_id)?;
            let vm_name = load_classes.vm_name(buf, strings, id)?;
            let dump = ClassDump {
                id,
                file_offset: start,
                super_id: buf.read_id(start + layout.super_id)?,
                loader_id: buf.read_id(start + layout.loader_id)?,
                declared_size: buf.read_u32(start + layout.instance_size)?,
                name: Arc::from(convert_vm_name(&vm_name)),
                vm_name,
            };
            index.put(id, start)?;
            classes.insert(id, dump);
            index.set_ordinal(id, classes.len() as u32)?;
        }

        let mut prim_array_classes = [0u64; 12];
        let mut java_lang_class = 0u64;
        for dump in classes.values() {
            let prim_type = match &*dump.vm_name {
                "[Z" => Some(basic_type::BOOLEAN),
                "[C" => Some(basic_type::CHAR),
                "[F" => Some(basic_type::FLOAT),
                "[D" => Some(basic_type::DOUBLE),
                "[B" => Some(basic_type::BYTE),
                "[S" => Some(basic_type::SHORT),
                "[I" => Some(basic_type::INT),
                "[J" => Some(basic_type::LONG),
                "java/lang/Class" => {
                    java_lang_class = dump.id;
                    None
                }
                _ => None,
            };
            if let Some(ty) = prim_type {
                prim_array_classes[ty as usize] = dump.id;
            }
        }
        debug!("decoded {} classes", classes.len());

        let stats = vec![ClassStats::default(); classes.len()];
        Ok(ClassCollection {
            layout,
            classes,
            stats,
            prim_array_classes,
            java_lang_class,
            fields_cache: Mutex::new(BoundedCache::new(fields_cache_size)),
        })
    }

    pub(crate) fn layout(&self) -> &ClassLayout {
        &self.layout
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn get(&self, class_id: u64) -> Option<&ClassDump> {
        self.classes.get(&class_id)
    }

    pub(crate) fn require(&self, class_id: u64) -> Result<&ClassDump> {
        self.classes
            .get(&class_id)
            .ok_or(HeapError::IllegalInstanceId(class_id))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ClassDump> {
        self.classes.values()
    }

    /// Class of `java.lang.Class` itself, `0` when the dump lacks it.
    pub(crate) fn java_lang_class(&self) -> u64 {
        self.java_lang_class
    }

    /// Class id for primitive arrays of basic type `ty`.
    pub(crate) fn prim_array_class(&self, ty: u8) -> Result<u64> {
        let id = self
            .prim_array_classes
            .get(ty as usize)
            .copied()
            .unwrap_or(0);
        if id == 0 {
            return Err(HeapError::InvalidFormat(format!(
                "no primitive array class for type {ty}"
            )));
        }
        Ok(id)
    }

    /// Looks a class up by its exact display name.
    pub(crate) fn by_name(&self, name: &str) -> Option<&ClassDump> {
        self.classes.values().find(|c| &*c.name == name)
    }

    /// Header-inclusive size of one instance of `class_id` (not valid for
    /// arrays, whose size depends on the element count).
    pub(crate) fn instance_size(&self, class_id: u64) -> Result<u64> {
        let dump = self.require(class_id)?;
        Ok(self.layout.min_instance_size + dump.declared_size as u64)
    }

    /// Declared instance fields of exactly `class_id`, in record order.
    pub(crate) fn fields(&self, buf: &DumpBuffer, class_id: u64) -> Result<Arc<Vec<FieldDecl>>> {
        if let Some(cached) = self.fields_cache.lock().get(&class_id) {
            return Ok(cached.clone());
        }
        let dump = self.require(class_id)?;
        let mut offset = self.instance_fields_offset(buf, dump)?;
        let count = buf.read_u16(offset)?;
        offset += 2;
        let mut fields = Vec::with_capacity(count as usize);
        for _ in 0..count {
            fields.push(FieldDecl {
                name_id: buf.read_id(offset)?,
                type_tag: buf.read_u8(offset + buf.id_size() as u64)?,
            });
            offset += self.layout.field_entry;
        }
        let fields = Arc::new(fields);
        self.fields_cache.lock().insert(class_id, fields.clone());
        Ok(fields)
    }

    /// Instance fields of `class_id` and all its superclasses, own fields
    /// first, matching the layout of instance field data in the dump.
    pub(crate) fn all_instance_fields(
        &self,
        buf: &DumpBuffer,
        class_id: u64,
    ) -> Result<Vec<(u64, FieldDecl)>> {
        let mut fields = Vec::with_capacity(16);
        let mut current = class_id;
        while current != 0 {
            let Some(dump) = self.get(current) else { break };
            for decl in self.fields(buf, current)?.iter() {
                fields.push((current, *decl));
            }
            current = dump.super_id;
        }
        Ok(fields)
    }

    /// Static field values declared by exactly `class_id`. When
    /// `include_loader` is set, the class loader reference is appended as
    /// a synthetic object value so reachability passes traverse it.
    pub(crate) fn static_field_values(
        &self,
        buf: &DumpBuffer,
        class_id: u64,
        include_loader: bool,
    ) -> Result<Vec<(FieldDecl, FieldValue)>> {
        let dump = self.require(class_id)?;
        let mut offset = self.static_fields_offset(buf, dump)?;
        let count = buf.read_u16(offset)?;
        offset += 2;
        let mut values = Vec::with_capacity(count as usize + usize::from(include_loader));
        for _ in 0..count {
            let name_id = buf.read_id(offset)?;
            offset += buf.id_size() as u64;
            let type_tag = buf.read_u8(offset)?;
            offset += 1;
            let value = read_value(buf, type_tag, offset)?;
            offset += value_size(type_tag, buf.id_size())?;
            values.push((FieldDecl { name_id, type_tag }, value));
        }
        if include_loader && dump.loader_id != 0 {
            values.push((
                FieldDecl { name_id: 0, type_tag: basic_type::OBJECT },
                FieldValue::Object(dump.loader_id),
            ));
        }
        Ok(values)
    }

    /// True when the class graph allows an instance of `class_id` to hold
    /// (directly or transitively) another instance of the same class, per
    /// the containment heuristic: at least two instances, not on the deny
    /// list, and at least one object-typed instance field anywhere in the
    /// super chain.
    pub(crate) fn can_contain_itself(&self, buf: &DumpBuffer, class_id: u64) -> Result<bool> {
        let dump = self.require(class_id)?;
        let index = self.index_of(class_id).unwrap_or(0);
        if self.stats[index].instances < 2 {
            return Ok(false);
        }
        if CANNOT_CONTAIN_ITSELF.contains(&&*dump.name) {
            return Ok(false);
        }
        for (_, decl) in self.all_instance_fields(buf, class_id)? {
            if decl.type_tag == basic_type::OBJECT {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The set {`root_id`} plus every class whose super chain reaches it.
    pub(crate) fn subclasses_including(&self, root_id: u64) -> FxHashSet<u64> {
        let mut result = FxHashSet::default();
        result.insert(root_id);
        for dump in self.classes.values() {
            let mut current = dump.super_id;
            while current != 0 {
                if result.contains(&current) {
                    result.insert(dump.id);
                    break;
                }
                current = match self.get(current) {
                    Some(superclass) => superclass.super_id,
                    None => 0,
                };
            }
        }
        result
    }

    // --- per-class stats -------------------------------------------------

    pub(crate) fn index_of(&self, class_id: u64) -> Option<usize> {
        self.classes.get_index_of(&class_id)
    }

    pub(crate) fn stats(&self, class_id: u64) -> Result<&ClassStats> {
        let index = self
            .index_of(class_id)
            .ok_or(HeapError::IllegalInstanceId(class_id))?;
        Ok(&self.stats[index])
    }

    /// Registers one instance of `class_id` found at `offset` and returns
    /// its 1-based ordinal within the class.
    pub(crate) fn register_instance(
        &mut self,
        buf: &DumpBuffer,
        class_id: u64,
        tag: u8,
        offset: u64,
    ) -> Result<u32> {
        let index = self
            .index_of(class_id)
            .ok_or(HeapError::IllegalInstanceId(class_id))?;
        let id = buf.id_size() as u64;
        let array_bytes = match tag {
            heap_tag::OBJECT_ARRAY_DUMP | heap_tag::PRIMITIVE_ARRAY_DUMP => {
                let elements_offset = offset + 1 + id + 4;
                let elements = buf.read_u32(elements_offset)? as u64;
                let el_size = if tag == heap_tag::PRIMITIVE_ARRAY_DUMP {
                    value_size(buf.read_u8(elements_offset + 4)?, buf.id_size())?
                } else {
                    id
                };
                self.layout.min_instance_size + ARRAY_OVERHEAD + elements * el_size
            }
            _ => 0,
        };
        let stats = &mut self.stats[index];
        stats.instances += 1;
        stats.array_bytes += array_bytes;
        if stats.first_instance_offset == 0 {
            stats.first_instance_offset = offset;
        }
        Ok(stats.instances)
    }

    pub(crate) fn add_retained(&mut self, class_id: u64, size: u64) -> Result<()> {
        let index = self
            .index_of(class_id)
            .ok_or(HeapError::IllegalInstanceId(class_id))?;
        self.stats[index].retained += size;
        Ok(())
    }

    pub(crate) fn reset_retained(&mut self) {
        for stats in &mut self.stats {
            stats.retained = 0;
        }
    }

    /// Total bytes of all instances of `class_id`: the running array total
    /// for array classes, count times instance size otherwise.
    pub(crate) fn all_instances_size(&self, class_id: u64) -> Result<u64> {
        let dump = self.require(class_id)?;
        let stats = self.stats(class_id)?;
        if dump.is_array() {
            return Ok(stats.array_bytes);
        }
        Ok(stats.instances as u64 * self.instance_size(class_id)?)
    }

    // --- record section offsets ------------------------------------------

    fn static_fields_offset(&self, buf: &DumpBuffer, dump: &ClassDump) -> Result<u64> {
        let mut offset = dump.file_offset + self.layout.constant_pool;
        records::skip_constant_pool(buf, &mut offset)?;
        Ok(offset)
    }

    fn instance_fields_offset(&self, buf: &DumpBuffer, dump: &ClassDump) -> Result<u64> {
        let mut offset = self.static_fields_offset(buf, dump)?;
        records::skip_static_fields(buf, &mut offset)?;
        Ok(offset)
    }
}
