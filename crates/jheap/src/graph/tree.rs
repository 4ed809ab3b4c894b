//! Bottom-up closing of single-parent subtrees.
//!
//! Starts from the parents of leaves found by the flood fill and works
//! upward: an object closes once every outgoing reference points at an
//! already-closed single-referrer subtree (or at null). A closed object's
//! retained size is final, which lets the dominator pass and the retained
//! aggregation skip entire subtrees. Objects that never close here are
//! handled by the dominator computation.

use log::debug;
use rustc_hash::FxHashSet;

use crate::error::{HeapError, Result};
use crate::index::{LongMap, LongQueue};
use crate::io::DumpBuffer;
use crate::model::class::ClassCollection;
use crate::model::instance::{self, InstanceKind};

pub(crate) fn compute(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    index: &mut LongMap,
    leaves: LongQueue,
    queue_capacity: usize,
) -> Result<()> {
    let mut read = LongQueue::new(queue_capacity);
    let mut write = leaves;
    while write.has_data() {
        std::mem::swap(&mut read, &mut write);
        read.start_reading()?;
        write.reset()?;
        compute_one_level(buf, classes, index, &mut read, &mut write)?;
    }
    index.flush()
}

fn compute_one_level(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    index: &mut LongMap,
    read: &mut LongQueue,
    write: &mut LongQueue,
) -> Result<()> {
    let mut unique: FxHashSet<u64> = FxHashSet::default();
    loop {
        let instance_id = read.read()?;
        if instance_id == 0 {
            return Ok(());
        }
        let Some(inst) = instance::resolve(buf, classes, index, instance_id)? else {
            debug!("unresolvable id {instance_id:#x} in subtree queue");
            continue;
        };
        let targets: Vec<u64> = match inst.kind {
            InstanceKind::Object => instance::object_field_refs(buf, classes, &inst)?
                .into_iter()
                .map(|(_, target)| target)
                .collect(),
            InstanceKind::ObjectArray => instance::object_array_targets(buf, &inst)?,
            InstanceKind::Class => classes
                .static_field_values(buf, instance_id, true)?
                .into_iter()
                .filter_map(|(_, value)| value.as_object_id())
                .collect(),
            InstanceKind::PrimitiveArray => {
                // Primitive arrays close during the flood fill and are
                // never anyone's parent candidate.
                return Err(HeapError::Internal(format!(
                    "primitive array {instance_id:#x} in subtree queue"
                )));
            }
            InstanceKind::Missing => continue,
        };
        let mut children_retained = Some(0u64);
        for target in targets {
            match check_instance(index, target)? {
                Some(retained) => {
                    children_retained = children_retained.map(|sum| sum + retained)
                }
                None => {
                    children_retained = None;
                    break;
                }
            }
        }
        let Some(children_retained) = children_retained else { continue };
        let size = instance::size(buf, classes, &inst)?;
        index.set_retained(instance_id, size + children_retained)?;
        index.set_tree(instance_id)?;
        if index.has_only_one_reference(instance_id)? {
            let pointer = index.nearest_root(instance_id)?;
            if pointer != 0 && unique.insert(pointer) {
                write.write(pointer)?;
            }
        }
    }
}

/// Retained size `target` contributes to a closing parent, or `None` when
/// the target keeps the parent open (shared or not yet closed).
fn check_instance(index: &mut LongMap, target: u64) -> Result<Option<u64>> {
    if target == 0 || !index.contains(target) {
        return Ok(Some(0));
    }
    if !index.has_only_one_reference(target)? || !index.is_tree(target)? {
        return Ok(None);
    }
    index.retained(target).map(Some)
}
