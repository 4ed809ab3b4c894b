//! Load-class records: the bridge from class object ids to class names.
//!
//! Each record binds a class object id to the string id of its VM-internal
//! name (`java/lang/String`, `[I`, `[[Ljava/lang/String;`). Display names
//! are derived from VM names by [`convert_vm_name`].

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::format::{records, tag, TagBounds};
use crate::io::DumpBuffer;
use crate::model::strings::StringSegment;

pub(crate) struct LoadClassSegment {
    bounds: TagBounds,
    /// Class object id to name string id, built on first use.
    name_ids: Option<FxHashMap<u64, u64>>,
}

impl LoadClassSegment {
    pub(crate) fn new(bounds: TagBounds) -> Self {
        LoadClassSegment { bounds, name_ids: None }
    }

    /// Name string id bound to `class_id`, if any record names it.
    pub(crate) fn name_id(&mut self, buf: &DumpBuffer, class_id: u64) -> Result<Option<u64>> {
        let name_ids = match self.name_ids {
            Some(ref name_ids) => name_ids,
            None => {
                let built = self.build_map(buf)?;
                self.name_ids.insert(built)
            }
        };
        Ok(name_ids.get(&class_id).copied())
    }

    /// VM-internal name of `class_id` (slash separated, array prefixes).
    pub(crate) fn vm_name(
        &mut self,
        buf: &DumpBuffer,
        strings: &mut StringSegment,
        class_id: u64,
    ) -> Result<Arc<str>> {
        match self.name_id(buf, class_id)? {
            Some(name_id) => strings.string(buf, name_id),
            None => Ok(Arc::from("<unknown class>")),
        }
    }

    fn build_map(&self, buf: &DumpBuffer) -> Result<FxHashMap<u64, u64>> {
        let id = buf.id_size() as u64;
        let mut map = FxHashMap::default();
        let mut cursor = self.bounds.start;
        while cursor < self.bounds.end {
            let record = records::read_record(buf, &mut cursor)?;
            if record.tag == tag::LOAD_CLASS {
                let class_id = buf.read_id(record.body + 4)?;
                let name_id = buf.read_id(record.body + 4 + id + 4)?;
                map.insert(class_id, name_id);
            }
        }
        Ok(map)
    }
}

/// Converts a VM-internal class name to its Java source form:
/// `java/lang/String` becomes `java.lang.String`, `[I` becomes `int[]`,
/// `[[Ljava/lang/String;` becomes `java.lang.String[][]`.
pub(crate) fn convert_vm_name(vm_name: &str) -> String {
    let name = vm_name.replace('/', ".");
    let dims = name.chars().take_while(|c| *c == '[').count();
    if dims == 0 {
        return name;
    }
    let element = &name[dims..];
    let base: String = match element.chars().next() {
        Some('L') if element.ends_with(';') => element[1..element.len() - 1].to_string(),
        Some('Z') => "boolean".to_string(),
        Some('B') => "byte".to_string(),
        Some('C') => "char".to_string(),
        Some('S') => "short".to_string(),
        Some('I') => "int".to_string(),
        Some('J') => "long".to_string(),
        Some('F') => "float".to_string(),
        Some('D') => "double".to_string(),
        // Malformed element descriptor: keep it readable as-is.
        _ => element.to_string(),
    };
    let mut out = base;
    for _ in 0..dims {
        out.push_str("[]");
    }
    out
}
