//! Nearest-GC-root flood fill.
//!
//! A breadth-first scan from the GC roots that stamps every reachable
//! object with the id of the object it was first discovered through (its
//! nearest-GC-root pointer). Along the way it collects two frontiers for
//! the later passes: objects with no outgoing references (`leaves`, the
//! seed of the subtree closing pass) and objects discovered to have more
//! than one referrer (`multiple_parents`, the work list of the dominator
//! computation). Levels are kept in disk-backed queues, so only the
//! current and next frontier ever occupy memory.

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::Result;
use crate::graph::SpecialRefs;
use crate::index::{LongMap, LongQueue};
use crate::io::DumpBuffer;
use crate::model::class::ClassCollection;
use crate::model::gc_root::GcRoot;
use crate::model::instance::{self, Instance, InstanceKind};
use crate::progress::{ProgressListener, ProgressTracker};

/// Queues produced by the flood fill, consumed by the tree and dominator
/// passes.
pub(crate) struct Frontiers {
    pub leaves: LongQueue,
    pub multiple_parents: LongQueue,
}

pub(crate) fn compute(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    index: &mut LongMap,
    roots: &FxHashMap<u64, GcRoot>,
    special: Option<&SpecialRefs>,
    total_instances: u64,
    queue_capacity: usize,
    listener: Option<&dyn ProgressListener>,
) -> Result<Frontiers> {
    let mut walker = Walker {
        buf,
        classes,
        roots,
        special,
        leaves: LongQueue::new(queue_capacity),
        multiple_parents: LongQueue::new(queue_capacity),
        processed_classes: FxHashSet::default(),
        tracker: ProgressTracker::new(listener, 0, total_instances),
        processed: 0,
    };
    let mut read_buffer = LongQueue::new(queue_capacity);
    let mut write_buffer = LongQueue::new(queue_capacity);

    for &id in roots.keys() {
        write_buffer.write(id)?;
    }
    while write_buffer.has_data() {
        std::mem::swap(&mut read_buffer, &mut write_buffer);
        read_buffer.start_reading()?;
        write_buffer.reset()?;
        walker.compute_one_level(index, &mut read_buffer, &mut write_buffer)?;
    }
    index.flush()?;
    Ok(Frontiers {
        leaves: walker.leaves,
        multiple_parents: walker.multiple_parents,
    })
}

struct Walker<'a> {
    buf: &'a DumpBuffer,
    classes: &'a ClassCollection,
    roots: &'a FxHashMap<u64, GcRoot>,
    special: Option<&'a SpecialRefs>,
    leaves: LongQueue,
    multiple_parents: LongQueue,
    /// Classes whose synthetic instance-to-class edge was already written.
    processed_classes: FxHashSet<u64>,
    tracker: ProgressTracker<'a>,
    processed: u64,
}

impl Walker<'_> {
    fn compute_one_level(
        &mut self,
        index: &mut LongMap,
        read: &mut LongQueue,
        write: &mut LongQueue,
    ) -> Result<()> {
        loop {
            let instance_id = read.read()?;
            if instance_id == 0 {
                return Ok(());
            }
            self.processed += 1;
            self.tracker.step(self.processed);
            let Some(inst) = instance::resolve(self.buf, self.classes, index, instance_id)?
            else {
                debug!("unresolvable id {instance_id:#x} in root scan queue");
                continue;
            };
            let mut has_values = false;
            match inst.kind {
                InstanceKind::Object => {
                    for (name_id, target) in
                        instance::object_field_refs(self.buf, self.classes, &inst)?
                    {
                        if let Some(special) = self.special {
                            if special.skip_field(inst.class_id, name_id) {
                                continue;
                            }
                        }
                        if target != 0
                            && self.write_connection(index, write, instance_id, target, false)?
                        {
                            has_values = true;
                        }
                    }
                }
                InstanceKind::ObjectArray => {
                    for target in instance::object_array_targets(self.buf, &inst)? {
                        if target != 0
                            && self.write_connection(index, write, instance_id, target, false)?
                        {
                            has_values = true;
                        }
                    }
                }
                InstanceKind::PrimitiveArray => {
                    let size = instance::size(self.buf, self.classes, &inst)?;
                    self.write_leaf(index, instance_id, size)?;
                    continue;
                }
                InstanceKind::Class => {
                    for (_, value) in
                        self.classes.static_field_values(self.buf, instance_id, true)?
                    {
                        let target = value.as_object_id().unwrap_or(0);
                        if target != 0
                            && self.write_connection(index, write, instance_id, target, false)?
                        {
                            has_values = true;
                        }
                    }
                }
                InstanceKind::Missing => continue,
            }
            if self.write_class_connection(index, write, &inst)? {
                has_values = true;
            }
            if !has_values {
                let size = instance::size(self.buf, self.classes, &inst)?;
                self.write_leaf(index, instance_id, size)?;
            }
        }
    }

    /// Records the discovery of `target` through `from`. Returns true when
    /// the edge reaches a live, not-yet-rooted object (i.e. counts as an
    /// outgoing value of `from`).
    fn write_connection(
        &mut self,
        index: &mut LongMap,
        write: &mut LongQueue,
        from: u64,
        target: u64,
        add_reference: bool,
    ) -> Result<bool> {
        if target == 0 {
            return Ok(false);
        }
        if !index.contains(target) {
            debug!("dangling reference {from:#x} -> {target:#x}");
            return Ok(false);
        }
        if index.nearest_root(target)? == 0 && !self.roots.contains_key(&target) {
            write.write(target)?;
            if add_reference && !self.check_references(index, target, from)? {
                index.add_reference(target, from)?;
            }
            index.set_nearest_root(target, from)?;
            if !index.has_only_one_reference(target)? {
                self.multiple_parents.write(target)?;
            }
            return Ok(true);
        }
        Ok(!add_reference)
    }

    /// Writes the synthetic edge from an instance to its class, once per
    /// class. The edge also lands in the adjacency store unless the class
    /// already sits in one of the instance's fields. Returns true when the
    /// edge discovered the class, which counts as an outgoing value of the
    /// instance.
    fn write_class_connection(
        &mut self,
        index: &mut LongMap,
        write: &mut LongQueue,
        inst: &Instance,
    ) -> Result<bool> {
        if inst.class_id != 0 && self.processed_classes.insert(inst.class_id) {
            return self.write_connection(index, write, inst.id, inst.class_id, true);
        }
        Ok(false)
    }

    /// True when `from` already references `target` through a field, so the
    /// adjacency store needs no extra entry for the class edge.
    fn check_references(
        &mut self,
        index: &mut LongMap,
        target: u64,
        from: u64,
    ) -> Result<bool> {
        let Some(inst) = instance::resolve(self.buf, self.classes, index, from)? else {
            return Ok(false);
        };
        match inst.kind {
            InstanceKind::Object => {
                for (_, field_target) in
                    instance::object_field_refs(self.buf, self.classes, &inst)?
                {
                    if field_target == target {
                        return Ok(true);
                    }
                }
            }
            InstanceKind::Class => {
                for (_, value) in self.classes.static_field_values(self.buf, from, true)? {
                    if value.as_object_id() == Some(target) {
                        return Ok(true);
                    }
                }
            }
            _ => {}
        }
        Ok(false)
    }

    /// Closes `instance_id` as a subtree of one: its retained size is its
    /// own size. Its sole referrer (if any) becomes a candidate for the
    /// bottom-up closing pass.
    fn write_leaf(&mut self, index: &mut LongMap, instance_id: u64, size: u64) -> Result<()> {
        index.set_tree(instance_id)?;
        index.set_retained(instance_id, size)?;
        if index.has_only_one_reference(instance_id)? {
            let pointer = index.nearest_root(instance_id)?;
            if pointer != 0 && !index.retained_queued(pointer)? {
                index.set_retained_queued(pointer)?;
                self.leaves.write(pointer)?;
            }
        }
        Ok(())
    }
}
