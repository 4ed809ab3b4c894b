//! Field declarations and decoded field values.

use std::sync::Arc;

use crate::error::Result;
use crate::format::basic_type;
use crate::io::DumpBuffer;

/// One decoded field value. Object fields carry the target id (`0` for
/// null); primitives carry their Java-typed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Object(u64),
    Boolean(bool),
    Char(u16),
    Float(f32),
    Double(f64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
}

impl FieldValue {
    /// Target id of an object field, `None` for primitives.
    pub fn as_object_id(&self) -> Option<u64> {
        match self {
            FieldValue::Object(id) => Some(*id),
            _ => None,
        }
    }
}

/// A named field as declared by a class, with its resolved name.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: Arc<str>,
    /// Basic type code of the field.
    pub(crate) type_tag: u8,
    /// Class that declares the field (not the class it was looked up on).
    pub declaring_class: u64,
    pub is_static: bool,
}

impl FieldDescriptor {
    pub fn is_object(&self) -> bool {
        self.type_tag == basic_type::OBJECT
    }

    /// Java name of the field's declared type category.
    pub fn type_name(&self) -> &'static str {
        match self.type_tag {
            basic_type::OBJECT => "object",
            basic_type::BOOLEAN => "boolean",
            basic_type::CHAR => "char",
            basic_type::FLOAT => "float",
            basic_type::DOUBLE => "double",
            basic_type::BYTE => "byte",
            basic_type::SHORT => "short",
            basic_type::INT => "int",
            basic_type::LONG => "long",
            _ => "unknown",
        }
    }
}

/// Undecoded field declaration: name string id plus type code.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldDecl {
    pub name_id: u64,
    pub type_tag: u8,
}

/// Reads one value of basic type `type_tag` at `offset`.
pub(crate) fn read_value(buf: &DumpBuffer, type_tag: u8, offset: u64) -> Result<FieldValue> {
    Ok(match type_tag {
        basic_type::OBJECT => FieldValue::Object(buf.read_id(offset)?),
        basic_type::BOOLEAN => FieldValue::Boolean(buf.read_u8(offset)? != 0),
        basic_type::CHAR => FieldValue::Char(buf.read_u16(offset)?),
        basic_type::FLOAT => FieldValue::Float(f32::from_bits(buf.read_u32(offset)?)),
        basic_type::DOUBLE => FieldValue::Double(f64::from_bits(buf.read_u64(offset)?)),
        basic_type::BYTE => FieldValue::Byte(buf.read_u8(offset)? as i8),
        basic_type::SHORT => FieldValue::Short(buf.read_u16(offset)? as i16),
        basic_type::INT => FieldValue::Int(buf.read_u32(offset)? as i32),
        basic_type::LONG => FieldValue::Long(buf.read_u64(offset)? as i64),
        other => return Err(crate::error::HeapError::InvalidType(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_extraction() {
        assert_eq!(FieldValue::Object(42).as_object_id(), Some(42));
        assert_eq!(FieldValue::Object(0).as_object_id(), Some(0));
        assert_eq!(FieldValue::Int(42).as_object_id(), None);
    }

    #[test]
    fn test_type_names() {
        let descriptor = FieldDescriptor {
            name: Arc::from("value"),
            type_tag: basic_type::LONG,
            declaring_class: 1,
            is_static: false,
        };
        assert_eq!(descriptor.type_name(), "long");
        assert!(!descriptor.is_object());
    }
}
