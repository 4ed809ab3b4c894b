//! The heap facade: opening a dump and querying it.
//!
//! [`Heap::open`] scans the record stream, builds the class collection,
//! registers every instance in the identity index and decodes the GC
//! roots. The expensive graph passes run lazily: the reference pass on the
//! first reference query, the reachability and dominator passes on the
//! first retained-size query. Results of every pass persist in the index,
//! so each runs at most once.
//!
//! All state sits behind one mutex; queries take `&self` and the type is
//! `Send + Sync`. The lock is coarse by design: queries after the build
//! phases are dominated by dump reads, not by contention.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;

use crate::config::HeapConfig;
use crate::error::{HeapError, Result};
use crate::format::{heap_tag, records, tag, TagBounds};
use crate::graph::dominator::{self, DominatorTree};
use crate::graph::{nearest_root, tree, SpecialRefs};
use crate::index::{LongMap, LongQueue};
use crate::io::{DumpBuffer, Header};
use crate::model::class::ClassCollection;
use crate::model::field::{FieldDescriptor, FieldValue};
use crate::model::gc_root::{GcRoot, GcRootKind};
use crate::model::instance::{self, Instance, InstanceKind};
use crate::model::load_class::LoadClassSegment;
use crate::model::stack::{StackFrame, StackFrameSegment, StackTrace, StackTraceSegment};
use crate::model::strings::StringSegment;
use crate::model::summary::HeapSummary;
use crate::progress::ProgressListener;

/// Snapshot of one class with its per-class aggregates.
///
/// Values are copied out of the analysis state at call time;
/// `retained_size` is zero until the per-class retained pass has run.
#[derive(Debug, Clone)]
pub struct JavaClass {
    pub id: u64,
    pub name: Arc<str>,
    pub superclass_id: u64,
    pub is_array: bool,
    /// Header-inclusive size of one instance; zero for array classes.
    pub instance_size: u64,
    pub instance_count: u32,
    /// Shallow bytes of all instances of the class.
    pub all_instances_size: u64,
    pub retained_size: u64,
}

/// An opened heap dump.
///
/// # Example
///
/// ```no_run
/// use jheap::Heap;
///
/// let heap = Heap::open("dump.hprof")?;
/// for class in heap.classes().iter().take(10) {
///     println!("{} x{}", class.name, class.instance_count);
/// }
/// # Ok::<(), jheap::HeapError>(())
/// ```
pub struct Heap {
    inner: Mutex<HeapInner>,
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap").finish_non_exhaustive()
    }
}

struct HeapInner {
    buf: DumpBuffer,
    config: HeapConfig,
    strings: StringSegment,
    load_classes: LoadClassSegment,
    stack_frames: StackFrameSegment,
    stack_traces: StackTraceSegment,
    /// Tag byte offset of the HEAP_SUMMARY record, when the dump has one.
    summary_offset: Option<u64>,
    /// Per-sub-tag envelopes within the selected heap dump span.
    heap_bounds: FxHashMap<u8, TagBounds>,
    classes: ClassCollection,
    index: LongMap,
    roots: FxHashMap<u64, GcRoot>,
    instances_total: u64,
    instances_bytes: u64,
    listener: Option<Box<dyn ProgressListener>>,
    references_done: bool,
    /// Multi-parent work list left over from the reachability passes,
    /// consumed by the dominator computation.
    pending_multi_parents: Option<LongQueue>,
    dom: Option<DominatorTree>,
    retained_done: bool,
    retained_by_class_done: bool,
}

impl Heap {
    /// Opens the first heap dump of the file with default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Heap> {
        Heap::open_segment(path, 0, HeapConfig::default())
    }

    /// Opens the first heap dump of the file.
    pub fn open_with_config(path: impl AsRef<Path>, config: HeapConfig) -> Result<Heap> {
        Heap::open_segment(path, 0, config)
    }

    /// Opens the `segment`-th HEAP_DUMP record of a file containing
    /// several dumps. Fails with [`HeapError::InvalidSegment`] when the
    /// file has no such dump.
    pub fn open_segment(
        path: impl AsRef<Path>,
        segment: usize,
        config: HeapConfig,
    ) -> Result<Heap> {
        config.validate()?;
        let inner = HeapInner::open(path.as_ref(), segment, config)?;
        Ok(Heap { inner: Mutex::new(inner) })
    }

    /// Installs a listener for the progress of the build phases.
    pub fn set_progress_listener(&self, listener: Box<dyn ProgressListener>) {
        self.inner.lock().listener = Some(listener);
    }

    /// Parsed file header.
    pub fn header(&self) -> Header {
        self.inner.lock().buf.header().clone()
    }

    /// The dump's own summary record, or totals computed from the
    /// instance scan when the record is absent.
    pub fn summary(&self) -> Result<HeapSummary> {
        let inner = self.inner.lock();
        match inner.summary_offset {
            Some(offset) => HeapSummary::decode(&inner.buf, offset),
            None => Ok(HeapSummary::computed(
                inner.instances_bytes,
                inner.instances_total,
            )),
        }
    }

    /// All GC roots, one entry per rooted object id.
    pub fn gc_roots(&self) -> Vec<GcRoot> {
        self.inner.lock().roots.values().copied().collect()
    }

    /// The GC root holding `id`, if any.
    pub fn gc_root(&self, id: u64) -> Option<GcRoot> {
        self.inner.lock().roots.get(&id).copied()
    }

    /// Snapshot of every class, in class dump order.
    pub fn classes(&self) -> Vec<JavaClass> {
        let inner = self.inner.lock();
        inner
            .classes
            .iter()
            .filter_map(|dump| inner.java_class(dump.id).ok())
            .collect()
    }

    /// Class snapshot by exact display name.
    pub fn class_by_name(&self, name: &str) -> Option<JavaClass> {
        let inner = self.inner.lock();
        let id = inner.classes.by_name(name)?.id;
        inner.java_class(id).ok()
    }

    /// Class snapshots whose display name matches `pattern` (anchored
    /// whole-name match).
    pub fn classes_by_regexp(&self, pattern: &str) -> Result<Vec<JavaClass>> {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|err| {
            HeapError::Configuration(format!("invalid class name pattern: {err}"))
        })?;
        let inner = self.inner.lock();
        let mut matched = Vec::new();
        for dump in inner.classes.iter() {
            if regex.is_match(&dump.name) {
                matched.push(inner.java_class(dump.id)?);
            }
        }
        Ok(matched)
    }

    /// The instance with the given id. Null ids resolve to `None`; ids
    /// absent from the index resolve to `None`, or to a
    /// [`InstanceKind::Missing`] stub when the configuration tolerates
    /// missing ids.
    pub fn instance_by_id(&self, id: u64) -> Result<Option<Instance>> {
        let inner = self.inner.lock();
        if id == 0 {
            return Ok(None);
        }
        match instance::resolve(&inner.buf, &inner.classes, &inner.index, id)? {
            Some(inst) => Ok(Some(inst)),
            None if inner.config.tolerate_missing_ids => Ok(Some(Instance::missing(id))),
            None => Ok(None),
        }
    }

    /// Header-inclusive size of the instance in bytes.
    pub fn instance_size(&self, inst: &Instance) -> Result<u64> {
        let inner = self.inner.lock();
        instance::size(&inner.buf, &inner.classes, inst)
    }

    /// 1-based position of the instance within its class, in dump order.
    pub fn instance_number(&self, id: u64) -> Result<u32> {
        self.inner.lock().index.ordinal(id)
    }

    /// Display name of the instance's class.
    pub fn class_name_of(&self, inst: &Instance) -> Result<Arc<str>> {
        let inner = self.inner.lock();
        Ok(inner.classes.require(inst.class_id)?.name.clone())
    }

    /// Instance fields with resolved names and decoded values, own class
    /// first then up the super chain.
    pub fn field_values(&self, inst: &Instance) -> Result<Vec<(FieldDescriptor, FieldValue)>> {
        let mut inner = self.inner.lock();
        if inst.kind != InstanceKind::Object {
            return Ok(Vec::new());
        }
        let inner = &mut *inner;
        let mut out = Vec::new();
        for (declaring, decl, value) in
            instance::field_values(&inner.buf, &inner.classes, inst)?
        {
            out.push((
                FieldDescriptor {
                    name: inner.strings.string(&inner.buf, decl.name_id)?,
                    type_tag: decl.type_tag,
                    declaring_class: declaring,
                    is_static: false,
                },
                value,
            ));
        }
        Ok(out)
    }

    /// Static fields of a class with resolved names and decoded values.
    pub fn static_field_values(
        &self,
        class_id: u64,
    ) -> Result<Vec<(FieldDescriptor, FieldValue)>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let mut out = Vec::new();
        for (decl, value) in inner.classes.static_field_values(&inner.buf, class_id, false)? {
            out.push((
                FieldDescriptor {
                    name: inner.strings.string(&inner.buf, decl.name_id)?,
                    type_tag: decl.type_tag,
                    declaring_class: class_id,
                    is_static: true,
                },
                value,
            ));
        }
        Ok(out)
    }

    /// Decoded elements of either array kind, in index order. Object
    /// array elements come back as [`FieldValue::Object`].
    pub fn array_items(&self, inst: &Instance) -> Result<Vec<FieldValue>> {
        let inner = self.inner.lock();
        match inst.kind {
            InstanceKind::ObjectArray => Ok(instance::object_array_targets(&inner.buf, inst)?
                .into_iter()
                .map(FieldValue::Object)
                .collect()),
            InstanceKind::PrimitiveArray => {
                instance::primitive_array_values(&inner.buf, inst)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Element count of either array kind.
    pub fn array_length(&self, inst: &Instance) -> Result<u64> {
        let inner = self.inner.lock();
        instance::array_length(&inner.buf, inst)
    }

    /// Ids of all objects referencing `id`. Runs the reference pass on
    /// first use.
    pub fn references_to(&self, id: u64) -> Result<Vec<u64>> {
        let mut inner = self.inner.lock();
        inner.ensure_references()?;
        inner.index.references(id)
    }

    /// The object `id` was first discovered through during the root scan,
    /// `0` for unreachable objects. Runs the reachability passes on first
    /// use.
    pub fn nearest_gc_root_pointer(&self, id: u64) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.ensure_reachability()?;
        inner.index.nearest_root(id)
    }

    /// Retained size of the object: bytes freed if it became unreachable.
    /// Runs all graph passes on first use.
    pub fn retained_size(&self, id: u64) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.ensure_retained()?;
        inner.index.retained(id)
    }

    /// The `n` objects with the largest retained sizes, descending, ties
    /// broken by ascending id.
    pub fn biggest_objects_by_retained_size(&self, n: usize) -> Result<Vec<(u64, u64)>> {
        let mut inner = self.inner.lock();
        inner.ensure_retained()?;
        Ok(inner.index.biggest_by_retained(n))
    }

    /// Retained size aggregated over all instances of a class, counting
    /// each dominator chain once.
    pub fn retained_size_by_class(&self, class_id: u64) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.ensure_retained_by_class()?;
        Ok(inner.classes.stats(class_id)?.retained)
    }

    /// Stack trace by serial number (thread-object roots carry one).
    pub fn stack_trace(&self, serial: u32) -> Result<Option<StackTrace>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner.stack_traces.trace(&inner.buf, serial)
    }

    /// Stack frame by frame id.
    pub fn stack_frame(&self, frame_id: u64) -> Result<Option<StackFrame>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner
            .stack_frames
            .frame(&inner.buf, &mut inner.strings, frame_id)
    }
}

impl HeapInner {
    fn open(path: &Path, segment: usize, config: HeapConfig) -> Result<HeapInner> {
        let buf = DumpBuffer::open(path, &config)?;

        // Top-level scan: envelope bounds per tag, heap dump selection.
        let mut top_bounds: FxHashMap<u8, TagBounds> = FxHashMap::default();
        let mut heap_dumps: Vec<(u64, u64)> = Vec::new();
        let mut summary_offset = None;
        let mut cursor = buf.header().header_size;
        while cursor < buf.len() {
            let record = records::read_record(&buf, &mut cursor)?;
            top_bounds
                .entry(record.tag)
                .and_modify(|b| b.extend(record.start, cursor))
                .or_insert_with(|| TagBounds::new(record.tag, record.start, cursor));
            match record.tag {
                tag::HEAP_DUMP => heap_dumps.push((record.body, record.body + record.len)),
                tag::HEAP_SUMMARY if summary_offset.is_none() => {
                    summary_offset = Some(record.start)
                }
                _ => {}
            }
        }

        let heap_span = match heap_dumps.get(segment) {
            Some(&(start, end)) => TagBounds::new(tag::HEAP_DUMP, start, end),
            // Segmented dumps fuse into one logical heap; the sub-record
            // scanner steps over the inner segment envelopes.
            None => match (segment, top_bounds.get(&tag::HEAP_DUMP_SEGMENT)) {
                (0, Some(bounds)) => {
                    TagBounds::new(tag::HEAP_DUMP_SEGMENT, bounds.start + 9, bounds.end)
                }
                _ => return Err(HeapError::InvalidSegment(segment)),
            },
        };

        // Heap sub-record scan: per-tag envelopes and the id count that
        // sizes the identity index.
        let mut heap_bounds: FxHashMap<u8, TagBounds> = FxHashMap::default();
        let mut id_count = 0u64;
        let mut cursor = heap_span.start;
        while cursor < heap_span.end {
            let start = cursor;
            let sub_tag = records::read_heap_record(&buf, &mut cursor)?;
            heap_bounds
                .entry(sub_tag)
                .and_modify(|b| b.extend(start, cursor))
                .or_insert_with(|| TagBounds::new(sub_tag, start, cursor));
            if matches!(
                sub_tag,
                heap_tag::CLASS_DUMP
                    | heap_tag::INSTANCE_DUMP
                    | heap_tag::OBJECT_ARRAY_DUMP
                    | heap_tag::PRIMITIVE_ARRAY_DUMP
            ) {
                id_count += 1;
            }
        }
        debug!("heap span {}..{}, {id_count} identified records", heap_span.start, heap_span.end);

        let empty = |t: u8| TagBounds::new(t, 0, 0);
        let mut strings = StringSegment::new(
            top_bounds.get(&tag::STRING).copied().unwrap_or(empty(tag::STRING)),
            config.string_cache_size,
        );
        let mut load_classes = LoadClassSegment::new(
            top_bounds
                .get(&tag::LOAD_CLASS)
                .copied()
                .unwrap_or(empty(tag::LOAD_CLASS)),
        );
        let stack_frames = StackFrameSegment::new(
            top_bounds
                .get(&tag::STACK_FRAME)
                .copied()
                .unwrap_or(empty(tag::STACK_FRAME)),
        );
        let stack_traces = StackTraceSegment::new(
            top_bounds
                .get(&tag::STACK_TRACE)
                .copied()
                .unwrap_or(empty(tag::STACK_TRACE)),
        );

        let mut index = LongMap::new(
            id_count,
            config.adjacency_cache_blocks,
            config.adjacency_dirty_limit,
        )?;
        let classes = ClassCollection::build(
            &buf,
            heap_bounds
                .get(&heap_tag::CLASS_DUMP)
                .copied()
                .unwrap_or(empty(heap_tag::CLASS_DUMP)),
            &mut load_classes,
            &mut strings,
            &mut index,
            config.fields_cache_size,
        )?;

        let mut inner = HeapInner {
            buf,
            config,
            strings,
            load_classes,
            stack_frames,
            stack_traces,
            summary_offset,
            heap_bounds,
            classes,
            index,
            roots: FxHashMap::default(),
            instances_total: 0,
            instances_bytes: 0,
            listener: None,
            references_done: false,
            pending_multi_parents: None,
            dom: None,
            retained_done: false,
            retained_by_class_done: false,
        };
        inner.compute_instances()?;
        inner.compute_gc_roots()?;
        info!(
            "opened heap: {} classes, {} instances, {} GC roots",
            inner.classes.len(),
            inner.instances_total,
            inner.roots.len()
        );
        Ok(inner)
    }

    fn instance_bounds(&self) -> Option<TagBounds> {
        instance::all_instance_bounds(
            self.heap_bounds.get(&heap_tag::INSTANCE_DUMP).copied(),
            self.heap_bounds.get(&heap_tag::OBJECT_ARRAY_DUMP).copied(),
            self.heap_bounds.get(&heap_tag::PRIMITIVE_ARRAY_DUMP).copied(),
        )
    }

    /// Registers every instance record: identity index entry, per-class
    /// counters, shallow byte totals.
    fn compute_instances(&mut self) -> Result<()> {
        let Some(bounds) = self.instance_bounds() else { return Ok(()) };
        let id_width = self.buf.id_size() as u64;
        let mut cursor = bounds.start;
        while cursor < bounds.end {
            let start = cursor;
            let sub_tag = records::read_heap_record(&self.buf, &mut cursor)?;
            let class_id = match sub_tag {
                heap_tag::INSTANCE_DUMP => self.buf.read_id(start + 1 + id_width + 4)?,
                heap_tag::OBJECT_ARRAY_DUMP => {
                    self.buf.read_id(start + 1 + id_width + 4 + 4)?
                }
                heap_tag::PRIMITIVE_ARRAY_DUMP => {
                    let ty = self.buf.read_u8(start + 1 + id_width + 4 + 4)?;
                    self.classes.prim_array_class(ty).unwrap_or(0)
                }
                _ => continue,
            };
            let id = self.buf.read_id(start + 1)?;
            self.index.put(id, start)?;
            self.instances_total += 1;
            self.instances_bytes +=
                shallow_size(&self.buf, &self.classes, sub_tag, start, class_id)?;
            if self.classes.get(class_id).is_some() {
                let number = self.classes.register_instance(&self.buf, class_id, sub_tag, start)?;
                self.index.set_ordinal(id, number)?;
            } else {
                debug!("instance {id:#x} has unknown class {class_id:#x}");
            }
        }
        Ok(())
    }

    /// Decodes every GC root record. Bounds are envelopes, so each span is
    /// re-scanned with a tag filter.
    fn compute_gc_roots(&mut self) -> Result<()> {
        for root_tag in heap_tag::ROOT_TAGS {
            let Some(bounds) = self.heap_bounds.get(&root_tag).copied() else { continue };
            let Some(kind) = GcRootKind::from_tag(root_tag) else { continue };
            let mut cursor = bounds.start;
            while cursor < bounds.end {
                let start = cursor;
                let sub_tag = records::read_heap_record(&self.buf, &mut cursor)?;
                if sub_tag != root_tag {
                    continue;
                }
                let root = GcRoot::decode(&self.buf, kind, start)?;
                if root.object_id != 0 {
                    self.roots.insert(root.object_id, root);
                }
            }
        }
        Ok(())
    }

    /// Fills the adjacency store: who references whom, from instance
    /// fields, array elements and class statics.
    fn ensure_references(&mut self) -> Result<()> {
        if self.references_done {
            return Ok(());
        }
        info!("computing references");
        if let Some(bounds) = self.instance_bounds() {
            let mut cursor = bounds.start;
            while cursor < bounds.end {
                let start = cursor;
                let sub_tag = records::read_heap_record(&self.buf, &mut cursor)?;
                if !matches!(
                    sub_tag,
                    heap_tag::INSTANCE_DUMP | heap_tag::OBJECT_ARRAY_DUMP
                ) {
                    continue;
                }
                let id = self.buf.read_id(start + 1)?;
                let inst = instance::decode(&self.buf, &self.classes, id, start)?;
                let targets: Vec<u64> = if inst.kind == InstanceKind::Object {
                    instance::object_field_refs(&self.buf, &self.classes, &inst)?
                        .into_iter()
                        .map(|(_, target)| target)
                        .collect()
                } else {
                    instance::object_array_targets(&self.buf, &inst)?
                };
                for target in targets {
                    self.add_reference(id, target)?;
                }
            }
        }
        let class_ids: Vec<u64> = self.classes.iter().map(|dump| dump.id).collect();
        for class_id in class_ids {
            for (_, value) in self.classes.static_field_values(&self.buf, class_id, true)? {
                if let Some(target) = value.as_object_id() {
                    self.add_reference(class_id, target)?;
                }
            }
        }
        self.index.flush()?;
        self.references_done = true;
        Ok(())
    }

    fn add_reference(&mut self, from: u64, target: u64) -> Result<()> {
        if target == 0 {
            return Ok(());
        }
        if !self.index.contains(target) {
            debug!("dangling reference {from:#x} -> {target:#x}");
            return Ok(());
        }
        self.index.add_reference(target, from)
    }

    /// Runs the flood fill and the subtree closing pass, leaving the
    /// multi-parent work list for the dominator computation.
    fn ensure_reachability(&mut self) -> Result<()> {
        if self.pending_multi_parents.is_some() || self.dom.is_some() {
            return Ok(());
        }
        self.ensure_references()?;
        info!("computing nearest GC roots");
        let special = SpecialRefs::detect(&self.buf, &self.classes, &mut self.strings)?;
        if special.is_none() {
            warn!("no java.lang.ref.Reference class; weak references treated as strong");
        }
        let frontiers = nearest_root::compute(
            &self.buf,
            &self.classes,
            &mut self.index,
            &self.roots,
            special.as_ref(),
            self.instances_total,
            self.config.queue_buffer_len,
            self.listener.as_deref(),
        )?;
        tree::compute(
            &self.buf,
            &self.classes,
            &mut self.index,
            frontiers.leaves,
            self.config.queue_buffer_len,
        )?;
        self.pending_multi_parents = Some(frontiers.multiple_parents);
        Ok(())
    }

    /// Runs the dominator fixed point and the retained-size aggregation.
    fn ensure_retained(&mut self) -> Result<()> {
        if self.retained_done {
            return Ok(());
        }
        self.ensure_reachability()?;
        if self.dom.is_none() {
            info!("computing dominators");
            let multi_parents = self
                .pending_multi_parents
                .take()
                .ok_or_else(|| HeapError::Internal("multi-parent work list missing".into()))?;
            self.dom = Some(dominator::compute(
                &self.buf,
                &self.classes,
                &mut self.index,
                multi_parents,
                self.config.root_ptr_cache_size,
            )?);
        }

        info!("aggregating retained sizes");
        if let Some(bounds) = self.instance_bounds() {
            let dom = self
                .dom
                .as_mut()
                .ok_or_else(|| HeapError::Internal("dominator tree missing".into()))?;
            aggregate_retained(
                &self.buf,
                &self.classes,
                &mut self.index,
                &self.roots,
                dom,
                bounds,
            )?;
        }
        self.index.flush()?;
        self.retained_done = true;
        if let Some(listener) = self.listener.as_deref() {
            listener.finished();
        }
        Ok(())
    }

    /// Aggregates retained sizes per class, counting each dominator chain
    /// once per outermost instance.
    fn ensure_retained_by_class(&mut self) -> Result<()> {
        if self.retained_by_class_done {
            return Ok(());
        }
        self.ensure_retained()?;
        info!("aggregating retained sizes by class");
        self.classes.reset_retained();
        if let Some(bounds) = self.instance_bounds() {
            let dom = self
                .dom
                .as_mut()
                .ok_or_else(|| HeapError::Internal("dominator tree missing".into()))?;
            aggregate_retained_by_class(
                &self.buf,
                &mut self.classes,
                &mut self.index,
                dom,
                bounds,
            )?;
        }
        self.retained_by_class_done = true;
        Ok(())
    }

    fn java_class(&self, class_id: u64) -> Result<JavaClass> {
        let dump = self.classes.require(class_id)?;
        let stats = self.classes.stats(class_id)?;
        let is_array = dump.is_array();
        Ok(JavaClass {
            id: dump.id,
            name: dump.name.clone(),
            superclass_id: dump.super_id,
            is_array,
            instance_size: if is_array {
                0
            } else {
                self.classes.instance_size(class_id)?
            },
            instance_count: stats.instances,
            all_instances_size: self.classes.all_instances_size(class_id)?,
            retained_size: stats.retained,
        })
    }
}

/// Shallow size of the record at `start`, without decoding a handle.
/// Falls back to the record's own field-byte count when the class is
/// unknown.
fn shallow_size(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    sub_tag: u8,
    start: u64,
    class_id: u64,
) -> Result<u64> {
    let id_width = buf.id_size() as u64;
    let min = classes.layout().min_instance_size;
    Ok(match sub_tag {
        heap_tag::INSTANCE_DUMP => match classes.instance_size(class_id) {
            Ok(size) => size,
            Err(_) => min + buf.read_u32(start + 1 + id_width + 4 + id_width)? as u64,
        },
        heap_tag::OBJECT_ARRAY_DUMP => {
            let elements = buf.read_u32(start + 1 + id_width + 4)? as u64;
            min + crate::model::class::ARRAY_OVERHEAD + elements * id_width
        }
        heap_tag::PRIMITIVE_ARRAY_DUMP => {
            let base = start + 1 + id_width + 4;
            let elements = buf.read_u32(base)? as u64;
            let ty = buf.read_u8(base + 4)?;
            min + crate::model::class::ARRAY_OVERHEAD
                + elements * crate::format::value_size(ty, buf.id_size())?
        }
        _ => 0,
    })
}

/// Final retained-size scan: every reachable non-tree object contributes
/// its shallow size to itself and to each non-tree ancestor on its
/// dominator chain; a closed subtree contributes its whole retained size
/// at once.
fn aggregate_retained(
    buf: &DumpBuffer,
    classes: &ClassCollection,
    index: &mut LongMap,
    roots: &FxHashMap<u64, GcRoot>,
    dom: &mut DominatorTree,
    bounds: TagBounds,
) -> Result<()> {
    let id_width = buf.id_size() as u64;
    let mut cursor = bounds.start;
    while cursor < bounds.end {
        let start = cursor;
        let sub_tag = records::read_heap_record(buf, &mut cursor)?;
        if !matches!(
            sub_tag,
            heap_tag::INSTANCE_DUMP
                | heap_tag::OBJECT_ARRAY_DUMP
                | heap_tag::PRIMITIVE_ARRAY_DUMP
        ) {
            continue;
        }
        let id = buf.read_id(start + 1)?;
        let idom = dom.idom_id(index, id)?;
        let is_tree = index.is_tree(id)?;
        let mut own_size = 0;
        if !is_tree && (index.nearest_root(id)? != 0 || roots.contains_key(&id)) {
            let class_id = match sub_tag {
                heap_tag::INSTANCE_DUMP => buf.read_id(start + 1 + id_width + 4)?,
                _ => 0,
            };
            own_size = shallow_size(buf, classes, sub_tag, start, class_id)?;
            index.add_retained(id, own_size)?;
        }
        if idom != 0 {
            let size = if is_tree { index.retained(id)? } else { own_size };
            debug_assert!(is_tree || size != 0);
            let mut current = idom;
            while current != 0 {
                if index.is_tree(current)? {
                    break;
                }
                index.add_retained(current, size)?;
                current = dom.idom_id(index, current)?;
            }
        }
    }
    Ok(())
}

/// Sums retained sizes per class, skipping instances dominated by another
/// instance of their own class so nested chains count once.
fn aggregate_retained_by_class(
    buf: &DumpBuffer,
    classes: &mut ClassCollection,
    index: &mut LongMap,
    dom: &mut DominatorTree,
    bounds: TagBounds,
) -> Result<()> {
    let mut cursor = bounds.start;
    while cursor < bounds.end {
        let start = cursor;
        let sub_tag = records::read_heap_record(buf, &mut cursor)?;
        if !matches!(
            sub_tag,
            heap_tag::INSTANCE_DUMP
                | heap_tag::OBJECT_ARRAY_DUMP
                | heap_tag::PRIMITIVE_ARRAY_DUMP
        ) {
            continue;
        }
        let id = buf.read_id(start + 1)?;
        let inst = instance::decode(buf, classes, id, start)?;
        if classes.get(inst.class_id).is_none() {
            continue;
        }
        if !dom.has_instance_in_chain(buf, classes, index, &inst)? {
            let retained = index.retained(id)?;
            classes.add_retained(inst.class_id, retained)?;
        }
    }
    Ok(())
}
