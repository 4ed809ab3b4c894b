//! Reachability and dominance passes over the object graph.
//!
//! The passes run in a fixed order: [`nearest_root`] flood-fills
//! nearest-GC-root pointers and finds the leaf and multi-parent frontiers,
//! [`tree`] closes single-parent subtrees bottom-up, and [`dominator`]
//! runs the fixed-point immediate-dominator computation over the remaining
//! multi-parent objects. All three work through disk-backed queues so the
//! working set stays bounded regardless of heap size.

pub(crate) mod dominator;
pub(crate) mod nearest_root;
pub(crate) mod tree;

use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::io::DumpBuffer;
use crate::model::class::ClassCollection;
use crate::model::strings::StringSegment;

/// Precomputed identities of `java.lang.ref.Reference` and friends.
///
/// The reachability pass must not follow the `referent` field of soft,
/// weak, final and phantom references, otherwise weakly held objects would
/// appear strongly reachable. When the dump has no `java.lang.ref.Reference`
/// class the skip is disabled and every field is followed.
pub(crate) struct SpecialRefs {
    pub referent_name_id: u64,
    pub reference_classes: FxHashSet<u64>,
}

impl SpecialRefs {
    pub(crate) fn detect(
        buf: &DumpBuffer,
        classes: &ClassCollection,
        strings: &mut StringSegment,
    ) -> Result<Option<SpecialRefs>> {
        let Some(reference) = classes.by_name("java.lang.ref.Reference") else {
            return Ok(None);
        };
        let reference_id = reference.id;
        let mut referent_name_id = 0;
        for decl in classes.fields(buf, reference_id)?.iter() {
            if &*strings.string(buf, decl.name_id)? == "referent" {
                referent_name_id = decl.name_id;
                break;
            }
        }
        if referent_name_id == 0 {
            return Ok(None);
        }
        let mut reference_classes = FxHashSet::default();
        for name in [
            "java.lang.ref.WeakReference",
            "java.lang.ref.SoftReference",
            "java.lang.ref.FinalReference",
            "java.lang.ref.PhantomReference",
        ] {
            if let Some(class) = classes.by_name(name) {
                reference_classes.extend(classes.subclasses_including(class.id));
            }
        }
        Ok(Some(SpecialRefs { referent_name_id, reference_classes }))
    }

    /// True when `name_id` names the referent field of a reference class
    /// instance.
    pub(crate) fn skip_field(&self, class_id: u64, name_id: u64) -> bool {
        name_id == self.referent_name_id && self.reference_classes.contains(&class_id)
    }
}
