//! Immediate dominator computation for multi-parent objects.
//!
//! Single-parent objects are trivially dominated by their one referrer,
//! so only the objects the flood fill saw through several referrers need
//! the real fixed point: each round recomputes an object's immediate
//! dominator as the intersection of its referrers' dominator chains and
//! repeats until a whole round changes nothing. A dirty set limits each
//! round to objects whose neighbourhood moved, and the work list is
//! walked alternately forward and backward, which roughly halves the
//! rounds on chain-shaped heaps.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{HeapError, Result};
use crate::index::{LongMap, LongQueue};
use crate::io::DumpBuffer;
use crate::model::class::ClassCollection;
use crate::model::instance::{self, Instance, InstanceKind};
use crate::util::BoundedCache;

/// Once a round dirties this many objects, chasing the out-neighbours of
/// every change costs more than letting the next full round catch them.
const ADDITIONAL_IDS_THRESHOLD: usize = 30;

/// The computed dominator relation, queried during retained-size
/// aggregation.
pub(crate) struct DominatorTree {
    /// Immediate dominator per multi-parent object; `0` means none.
    map: FxHashMap<u64, u64>,
    /// Single-parent objects fall back to their nearest-GC-root pointer;
    /// those index reads dominate the fixed point, hence the cache.
    root_pointers: BoundedCache<u64, u64>,
    can_contain: FxHashMap<u64, bool>,
}

pub(crate) fn compute(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    index: &mut LongMap,
    mut multiple_parents: LongQueue,
    root_ptr_cache_size: usize,
) -> Result<DominatorTree> {
    let mut reversed = multiple_parents.reversed()?;
    let mut tree = DominatorTree {
        map: FxHashMap::default(),
        root_pointers: BoundedCache::new(root_ptr_cache_size),
        can_contain: FxHashMap::default(),
    };
    let mut dirty: FxHashSet<u64> = FxHashSet::default();
    let mut changed = true;
    let mut forward = true;
    loop {
        let current = if forward { &mut multiple_parents } else { &mut reversed };
        current.start_reading()?;
        let ignore_dirty = !changed;
        changed = tree.compute_one_level(buf, classes, index, current, ignore_dirty, &mut dirty)?;
        forward = !forward;
        if !changed && ignore_dirty {
            return Ok(tree);
        }
    }
}

impl DominatorTree {
    /// One pass over the work list. Returns true when any immediate
    /// dominator changed.
    fn compute_one_level(
        &mut self,
        buf: &DumpBuffer,
        classes: &ClassCollection,
        index: &mut LongMap,
        current: &mut LongQueue,
        ignore_dirty: bool,
        dirty: &mut FxHashSet<u64>,
    ) -> Result<bool> {
        let mut changed = false;
        let mut new_dirty: FxHashSet<u64> = FxHashSet::default();
        // Out-neighbours of freshly changed objects, appended to this round
        // so a change propagates without waiting for the next full pass.
        let mut additional: Vec<u64> = Vec::new();
        let mut additional_index = 0;
        loop {
            let mut instance_id = current.read()?;
            if instance_id == 0 {
                if additional_index >= additional.len() {
                    break;
                }
                instance_id = additional[additional_index];
                additional_index += 1;
            }
            let old = self.map.get(&instance_id).copied();
            let recompute = match old {
                None => true,
                Some(0) => false,
                Some(old) => {
                    ignore_dirty || dirty.contains(&old) || dirty.contains(&instance_id)
                }
            };
            if !recompute {
                continue;
            }
            let refs = index.references(instance_id)?;
            let mut new_idom = *refs.first().ok_or_else(|| {
                HeapError::Internal(format!(
                    "multi-parent object {instance_id:#x} has no referrers"
                ))
            })?;
            for &referrer in &refs[1..] {
                if new_idom == 0 {
                    break;
                }
                new_idom = self.intersect(index, new_idom, referrer)?;
            }
            match old {
                None => {
                    self.map.insert(instance_id, new_idom);
                    new_dirty.insert(new_idom);
                    changed = true;
                }
                Some(old) if old != new_idom => {
                    self.map.insert(instance_id, new_idom);
                    new_dirty.insert(old);
                    new_dirty.insert(new_idom);
                    if new_dirty.len() < ADDITIONAL_IDS_THRESHOLD {
                        self.push_out_neighbours(buf, classes, index, instance_id, &mut additional)?;
                    }
                    changed = true;
                }
                Some(_) => {}
            }
        }
        *dirty = new_dirty;
        Ok(changed)
    }

    /// Appends `instance_id`'s references whose dominator is already known
    /// and nonzero, so they get revisited within the current round.
    fn push_out_neighbours(
        &mut self,
        buf: &DumpBuffer,
        classes: &ClassCollection,
        index: &mut LongMap,
        instance_id: u64,
        additional: &mut Vec<u64>,
    ) -> Result<()> {
        let Some(inst) = instance::resolve(buf, classes, index, instance_id)? else {
            return Ok(());
        };
        let targets: Vec<u64> = match inst.kind {
            InstanceKind::Object => instance::object_field_refs(buf, classes, &inst)?
                .into_iter()
                .map(|(_, target)| target)
                .collect(),
            InstanceKind::Class => classes
                .static_field_values(buf, instance_id, true)?
                .into_iter()
                .filter_map(|(_, value)| value.as_object_id())
                .collect(),
            _ => return Ok(()),
        };
        for target in targets {
            if target != 0 && self.map.get(&target).is_some_and(|&idom| idom != 0) {
                additional.push(target);
            }
        }
        Ok(())
    }

    /// Immediate dominator of `instance_id`: the fixed-point value for
    /// multi-parent objects, the nearest-GC-root pointer otherwise.
    pub(crate) fn idom_id(&mut self, index: &mut LongMap, instance_id: u64) -> Result<u64> {
        if let Some(&idom) = self.map.get(&instance_id) {
            return Ok(idom);
        }
        if let Some(&pointer) = self.root_pointers.get(&instance_id) {
            return Ok(pointer);
        }
        let pointer = index.nearest_root(instance_id)?;
        self.root_pointers.insert(instance_id, pointer);
        Ok(pointer)
    }

    /// Nearest common ancestor of `a` and `b` in the dominator relation,
    /// `0` when the chains only meet at the roots.
    fn intersect(&mut self, index: &mut LongMap, a: u64, b: u64) -> Result<u64> {
        if a == b {
            return Ok(a);
        }
        let mut left_seen: FxHashSet<u64> = FxHashSet::default();
        let mut right_seen: FxHashSet<u64> = FxHashSet::default();
        let mut left = a;
        let mut right = b;
        left_seen.insert(left);
        right_seen.insert(right);
        loop {
            if left == 0 && right == 0 {
                return Ok(0);
            }
            if left != 0 {
                left = self.idom_id(index, left)?;
                if left != 0 {
                    if right_seen.contains(&left) {
                        return Ok(left);
                    }
                    left_seen.insert(left);
                }
            }
            if right != 0 {
                right = self.idom_id(index, right)?;
                if right != 0 {
                    if left_seen.contains(&right) {
                        return Ok(right);
                    }
                    right_seen.insert(right);
                }
            }
        }
    }

    /// True when some object of `inst`'s class sits above it in the
    /// dominator chain, i.e. its retained size is already accounted for at
    /// class granularity.
    pub(crate) fn has_instance_in_chain(
        &mut self,
        buf: &DumpBuffer,
        classes: &ClassCollection,
        index: &mut LongMap,
        inst: &Instance,
    ) -> Result<bool> {
        match inst.kind {
            InstanceKind::PrimitiveArray => return Ok(false),
            InstanceKind::Object => {
                let class_id = inst.class_id;
                let can_contain = match self.can_contain.get(&class_id) {
                    Some(&cached) => cached,
                    None => {
                        let computed = classes.can_contain_itself(buf, class_id)?;
                        self.can_contain.insert(class_id, computed);
                        computed
                    }
                };
                if !can_contain {
                    return Ok(false);
                }
            }
            _ => {}
        }
        let mut idom = self.idom_id(index, inst.id)?;
        while idom != 0 {
            let Some(dominator) = instance::resolve(buf, classes, index, idom)? else {
                break;
            };
            if dominator.class_id == inst.class_id {
                return Ok(true);
            }
            idom = self.idom_id(index, idom)?;
        }
        Ok(false)
    }
}
