//! Instance handles and record decoding.
//!
//! [`Instance`] is a small copyable handle: the record is decoded on
//! demand from the dump through the helpers below rather than held in
//! memory. Class dump records double as instances of `java.lang.Class`,
//! and [`InstanceKind::Missing`] stands in for ids the dump references
//! but never defines (tolerance mode only).

use crate::error::{HeapError, Result};
use crate::format::{heap_tag, value_size, TagBounds};
use crate::io::DumpBuffer;
use crate::model::class::{ClassCollection, ARRAY_OVERHEAD};
use crate::model::field::{read_value, FieldDecl, FieldValue};

/// What kind of record backs an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceKind {
    /// Plain object with named fields.
    Object,
    ObjectArray,
    PrimitiveArray,
    /// A class observed as an object (instance of `java.lang.Class`).
    Class,
    /// Referenced id with no record in the dump.
    Missing,
}

/// Handle to one heap object.
#[derive(Debug, Clone, Copy)]
pub struct Instance {
    pub id: u64,
    pub kind: InstanceKind,
    /// Class of the instance; `0` only for `Missing` stubs (and `Class`
    /// instances in dumps without `java.lang.Class`).
    pub class_id: u64,
    pub(crate) file_offset: u64,
}

impl Instance {
    pub(crate) fn missing(id: u64) -> Instance {
        Instance { id, kind: InstanceKind::Missing, class_id: 0, file_offset: 0 }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, InstanceKind::ObjectArray | InstanceKind::PrimitiveArray)
    }
}

/// Resolves an id through the identity index, `None` for null ids and ids
/// the index has never seen.
pub(crate) fn resolve(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    index: &crate::index::LongMap,
    id: u64,
) -> Result<Option<Instance>> {
    if id == 0 || !index.contains(id) {
        return Ok(None);
    }
    let offset = index.file_offset(id)?;
    decode(buf, classes, id, offset).map(Some)
}

/// Decodes the instance whose record starts at `offset`.
pub(crate) fn decode(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    id: u64,
    offset: u64,
) -> Result<Instance> {
    let id_size = buf.id_size() as u64;
    let tag = buf.read_u8(offset)?;
    let (kind, class_id) = match tag {
        heap_tag::INSTANCE_DUMP => {
            (InstanceKind::Object, buf.read_id(offset + 1 + id_size + 4)?)
        }
        heap_tag::OBJECT_ARRAY_DUMP => (
            InstanceKind::ObjectArray,
            buf.read_id(offset + 1 + id_size + 4 + 4)?,
        ),
        heap_tag::PRIMITIVE_ARRAY_DUMP => {
            let ty = buf.read_u8(offset + 1 + id_size + 4 + 4)?;
            (InstanceKind::PrimitiveArray, classes.prim_array_class(ty)?)
        }
        heap_tag::CLASS_DUMP => (InstanceKind::Class, classes.java_lang_class()),
        other => {
            return Err(HeapError::Internal(format!(
                "id {id:#x} points at non-instance tag {other:#04x}"
            )))
        }
    };
    Ok(Instance { id, kind, class_id, file_offset: offset })
}

/// Header-inclusive size of the instance in bytes.
pub(crate) fn size(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    instance: &Instance,
) -> Result<u64> {
    let id_size = buf.id_size() as u64;
    let min = classes.layout().min_instance_size;
    match instance.kind {
        InstanceKind::Object => classes.instance_size(instance.class_id),
        InstanceKind::ObjectArray => {
            let elements = buf.read_u32(instance.file_offset + 1 + id_size + 4)? as u64;
            Ok(min + ARRAY_OVERHEAD + elements * id_size)
        }
        InstanceKind::PrimitiveArray => {
            let base = instance.file_offset + 1 + id_size + 4;
            let elements = buf.read_u32(base)? as u64;
            let el_size = value_size(buf.read_u8(base + 4)?, buf.id_size())?;
            Ok(min + ARRAY_OVERHEAD + elements * el_size)
        }
        InstanceKind::Class => Ok(min),
        InstanceKind::Missing => Ok(0),
    }
}

/// Offset of the first byte of instance field data.
fn field_data_start(buf: &DumpBuffer, instance: &Instance) -> u64 {
    let id_size = buf.id_size() as u64;
    instance.file_offset + 1 + id_size + 4 + id_size + 4
}

/// Object-typed fields of a plain object: `(field name id, target id)` in
/// field layout order. Targets include nulls (`0`).
pub(crate) fn object_field_refs(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    instance: &Instance,
) -> Result<Vec<(u64, u64)>> {
    debug_assert_eq!(instance.kind, InstanceKind::Object);
    let mut refs = Vec::new();
    let mut offset = field_data_start(buf, instance);
    for (_, decl) in classes.all_instance_fields(buf, instance.class_id)? {
        if decl.type_tag == crate::format::basic_type::OBJECT {
            refs.push((decl.name_id, buf.read_id(offset)?));
        }
        offset += value_size(decl.type_tag, buf.id_size())?;
    }
    Ok(refs)
}

/// All fields of a plain object with decoded values, in layout order:
/// `(declaring class, declaration, value)`.
pub(crate) fn field_values(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    instance: &Instance,
) -> Result<Vec<(u64, FieldDecl, FieldValue)>> {
    debug_assert_eq!(instance.kind, InstanceKind::Object);
    let mut values = Vec::new();
    let mut offset = field_data_start(buf, instance);
    for (declaring, decl) in classes.all_instance_fields(buf, instance.class_id)? {
        values.push((declaring, decl, read_value(buf, decl.type_tag, offset)?));
        offset += value_size(decl.type_tag, buf.id_size())?;
    }
    Ok(values)
}

/// Element ids of an object array, including nulls.
pub(crate) fn object_array_targets(buf: &DumpBuffer, instance: &Instance) -> Result<Vec<u64>> {
    debug_assert_eq!(instance.kind, InstanceKind::ObjectArray);
    let id_size = buf.id_size() as u64;
    let base = instance.file_offset + 1 + id_size + 4;
    let elements = buf.read_u32(base)? as u64;
    let mut targets = Vec::with_capacity(elements as usize);
    let data = base + 4 + id_size;
    for i in 0..elements {
        targets.push(buf.read_id(data + i * id_size)?);
    }
    Ok(targets)
}

/// Decoded elements of a primitive array.
pub(crate) fn primitive_array_values(
    buf: &DumpBuffer,
    instance: &Instance,
) -> Result<Vec<FieldValue>> {
    debug_assert_eq!(instance.kind, InstanceKind::PrimitiveArray);
    let id_size = buf.id_size() as u64;
    let base = instance.file_offset + 1 + id_size + 4;
    let elements = buf.read_u32(base)? as u64;
    let ty = buf.read_u8(base + 4)?;
    let el_size = value_size(ty, buf.id_size())?;
    let data = base + 4 + 1;
    let mut values = Vec::with_capacity(elements as usize);
    for i in 0..elements {
        values.push(read_value(buf, ty, data + i * el_size)?);
    }
    Ok(values)
}

/// Element count of either array kind.
pub(crate) fn array_length(buf: &DumpBuffer, instance: &Instance) -> Result<u64> {
    debug_assert!(instance.is_array());
    let id_size = buf.id_size() as u64;
    Ok(buf.read_u32(instance.file_offset + 1 + id_size + 4)? as u64)
}

/// Bounds envelope over the three instance record kinds (class dumps are
/// registered separately by the class collection build).
pub(crate) fn all_instance_bounds(
    instances: Option<TagBounds>,
    object_arrays: Option<TagBounds>,
    primitive_arrays: Option<TagBounds>,
) -> Option<TagBounds> {
    TagBounds::union(
        TagBounds::union(instances, object_arrays),
        primitive_arrays,
    )
}
