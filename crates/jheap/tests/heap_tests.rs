//! End-to-end tests over synthetic dumps.
//!
//! Object ids, class ids and string ids live in disjoint ranges per test
//! so a misread offset shows up as a loud lookup failure rather than a
//! silently wrong answer.

mod common;

use common::{ids, DumpBuilder, TY_INT, TY_LONG, TY_OBJECT};
use jheap::{FieldValue, GcRootKind, Heap, HeapConfig, HeapError, InstanceKind};

/// root -> o1 -> o2 -> o3, all 24-byte instances of one class.
fn chain_dump() -> tempfile::NamedTempFile {
    let mut b = DumpBuilder::new();
    b.string(0x1000, "com/example/Node")
        .string(0x1001, "next")
        .load_class(1, 0x100, 0x1000)
        .class_dump(0x100, 0, 8, &[], &[(0x1001, TY_OBJECT)])
        .instance_dump(0x1, 0x100, &ids(&[0x2]))
        .instance_dump(0x2, 0x100, &ids(&[0x3]))
        .instance_dump(0x3, 0x100, &ids(&[0]))
        .root_unknown(0x1);
    b.build()
}

#[test]
fn test_open_reports_header_and_summary() {
    let file = chain_dump();
    let heap = Heap::open(file.path()).unwrap();
    let header = heap.header();
    assert_eq!(header.id_size, 8);
    assert_eq!(header.timestamp_ms, 1_700_000_000_000);

    // No HEAP_SUMMARY record: totals come from the instance scan.
    let summary = heap.summary().unwrap();
    assert_eq!(summary.total_live_instances, 3);
    assert_eq!(summary.total_live_bytes, 3 * 24);
    assert_eq!(summary.total_allocated_bytes, None);
}

#[test]
fn test_recorded_summary_wins() {
    let mut b = DumpBuilder::new();
    b.heap_summary(12345, 678, 99999, 1000)
        .string(0x1000, "com/example/Node")
        .load_class(1, 0x100, 0x1000)
        .class_dump(0x100, 0, 0, &[], &[]);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();
    let summary = heap.summary().unwrap();
    assert_eq!(summary.total_live_bytes, 12345);
    assert_eq!(summary.total_live_instances, 678);
    assert_eq!(summary.total_allocated_bytes, Some(99999));
    assert_eq!(summary.total_allocated_instances, Some(1000));
}

#[test]
fn test_class_names_and_lookup() {
    let mut b = DumpBuilder::new();
    b.string(0x1000, "java/lang/String")
        .string(0x1001, "[I")
        .string(0x1002, "[Ljava/lang/String;")
        .load_class(1, 0x100, 0x1000)
        .load_class(2, 0x101, 0x1001)
        .load_class(3, 0x102, 0x1002)
        .class_dump(0x100, 0, 0, &[], &[])
        .class_dump(0x101, 0, 0, &[], &[])
        .class_dump(0x102, 0, 0, &[], &[]);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    let classes = heap.classes();
    assert_eq!(classes.len(), 3);
    assert_eq!(&*classes[0].name, "java.lang.String");
    assert_eq!(&*classes[1].name, "int[]");
    assert!(classes[1].is_array);
    assert_eq!(&*classes[2].name, "java.lang.String[]");

    assert!(heap.class_by_name("java.lang.String").is_some());
    assert!(heap.class_by_name("java.lang.Missing").is_none());

    let matched = heap.classes_by_regexp(r"java\.lang\..*").unwrap();
    assert_eq!(matched.len(), 2);
    assert!(heap.classes_by_regexp("(unclosed").is_err());
}

#[test]
fn test_instance_fields_across_super_chain() {
    let mut b = DumpBuilder::new();
    b.string(0x1000, "com/example/Base")
        .string(0x1001, "com/example/Sub")
        .string(0x1002, "count")
        .string(0x1003, "name")
        .load_class(1, 0x100, 0x1000)
        .load_class(2, 0x101, 0x1001)
        .class_dump(0x100, 0, 4, &[], &[(0x1002, TY_INT)])
        .class_dump(0x101, 0x100, 12, &[], &[(0x1003, TY_OBJECT)]);
    // Field data: own class fields first, then the super chain.
    let mut data = ids(&[0x2]);
    data.extend_from_slice(&7i32.to_be_bytes());
    b.instance_dump(0x1, 0x101, &data)
        .instance_dump(0x2, 0x100, &3i32.to_be_bytes());
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    let sub = heap.instance_by_id(0x1).unwrap().unwrap();
    assert_eq!(sub.kind, InstanceKind::Object);
    assert_eq!(&*heap.class_name_of(&sub).unwrap(), "com.example.Sub");
    assert_eq!(heap.instance_size(&sub).unwrap(), 16 + 12);

    let fields = heap.field_values(&sub).unwrap();
    assert_eq!(fields.len(), 2);
    assert_eq!(&*fields[0].0.name, "name");
    assert_eq!(fields[0].0.declaring_class, 0x101);
    assert_eq!(fields[0].1, FieldValue::Object(0x2));
    assert_eq!(&*fields[1].0.name, "count");
    assert_eq!(fields[1].0.declaring_class, 0x100);
    assert_eq!(fields[1].1, FieldValue::Int(7));

    assert_eq!(heap.instance_number(0x1).unwrap(), 1);
    assert_eq!(heap.instance_number(0x2).unwrap(), 1);
}

#[test]
fn test_static_fields_and_references() {
    let mut b = DumpBuilder::new();
    b.string(0x1000, "com/example/Holder")
        .string(0x1001, "CACHE")
        .load_class(1, 0x100, 0x1000)
        .class_dump(
            0x100,
            0,
            0,
            &[(0x1001, TY_OBJECT, ids(&[0x1]))],
            &[],
        )
        .instance_dump(0x1, 0x100, &[])
        .root_sticky_class(0x100);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    let statics = heap.static_field_values(0x100).unwrap();
    assert_eq!(statics.len(), 1);
    assert_eq!(&*statics[0].0.name, "CACHE");
    assert!(statics[0].0.is_static);
    assert_eq!(statics[0].1, FieldValue::Object(0x1));

    // The static reference lands in the adjacency store.
    assert_eq!(heap.references_to(0x1).unwrap(), vec![0x100]);
}

#[test]
fn test_nearest_roots_and_retained_chain() {
    let file = chain_dump();
    let heap = Heap::open(file.path()).unwrap();

    assert_eq!(heap.nearest_gc_root_pointer(0x1).unwrap(), 0);
    assert_eq!(heap.nearest_gc_root_pointer(0x2).unwrap(), 0x1);
    assert_eq!(heap.nearest_gc_root_pointer(0x3).unwrap(), 0x2);

    assert_eq!(heap.retained_size(0x3).unwrap(), 24);
    assert_eq!(heap.retained_size(0x2).unwrap(), 48);
    assert_eq!(heap.retained_size(0x1).unwrap(), 72);

    let top = heap.biggest_objects_by_retained_size(2).unwrap();
    assert_eq!(top, vec![(0x1, 72), (0x2, 48)]);

    // Nested chains count once at class granularity.
    assert_eq!(heap.retained_size_by_class(0x100).unwrap(), 72);
}

#[test]
fn test_diamond_dominators() {
    // a -> b -> d and a -> c -> d: d is multi-parent, dominated by a.
    let mut b = DumpBuilder::new();
    b.string(0x1000, "com/example/Pair")
        .string(0x1001, "f")
        .string(0x1002, "g")
        .load_class(1, 0x200, 0x1000)
        .class_dump(0x200, 0, 16, &[], &[(0x1001, TY_OBJECT), (0x1002, TY_OBJECT)])
        .instance_dump(0xa, 0x200, &ids(&[0xb, 0xc]))
        .instance_dump(0xb, 0x200, &ids(&[0xd, 0]))
        .instance_dump(0xc, 0x200, &ids(&[0xd, 0]))
        .instance_dump(0xd, 0x200, &ids(&[0, 0]))
        .root_unknown(0xa);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    // Discovery order is breadth first through the field order of `a`.
    assert_eq!(heap.nearest_gc_root_pointer(0xd).unwrap(), 0xb);

    let mut refs = heap.references_to(0xd).unwrap();
    refs.sort_unstable();
    assert_eq!(refs, vec![0xb, 0xc]);

    // Each instance is 32 bytes; everything rolls up into `a`.
    assert_eq!(heap.retained_size(0xb).unwrap(), 32);
    assert_eq!(heap.retained_size(0xc).unwrap(), 32);
    assert_eq!(heap.retained_size(0xd).unwrap(), 32);
    assert_eq!(heap.retained_size(0xa).unwrap(), 128);

    assert_eq!(heap.retained_size_by_class(0x200).unwrap(), 128);
}

#[test]
fn test_shared_object_between_two_roots() {
    // Two rooted chains meet at o2: neither root dominates it, so every
    // object retains only itself and the totals are conserved.
    let mut b = DumpBuilder::new();
    b.string(0x1000, "com/example/Node")
        .string(0x1001, "next")
        .load_class(1, 0x100, 0x1000)
        .class_dump(0x100, 0, 8, &[], &[(0x1001, TY_OBJECT)])
        .instance_dump(0x1, 0x100, &ids(&[0x2]))
        .instance_dump(0x2, 0x100, &ids(&[0]))
        .instance_dump(0x3, 0x100, &ids(&[0x2]))
        .root_unknown(0x1)
        .root_unknown(0x3);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    let mut refs = heap.references_to(0x2).unwrap();
    refs.sort_unstable();
    assert_eq!(refs, vec![0x1, 0x3]);

    // The shared object was discovered through one of the roots; which one
    // depends on root iteration order.
    let pointer = heap.nearest_gc_root_pointer(0x2).unwrap();
    assert!(pointer == 0x1 || pointer == 0x3);

    assert_eq!(heap.retained_size(0x1).unwrap(), 24);
    assert_eq!(heap.retained_size(0x2).unwrap(), 24);
    assert_eq!(heap.retained_size(0x3).unwrap(), 24);

    // Per-class aggregation sees all three chains once each; the total
    // matches the shallow bytes of the instances.
    assert_eq!(heap.retained_size_by_class(0x100).unwrap(), 72);
    assert_eq!(heap.summary().unwrap().total_live_bytes, 72);
}

#[test]
fn test_lone_root_instance_retains_only_itself() {
    // The instance's only outgoing edge is the synthetic one to its class;
    // both still close with their own sizes.
    let mut b = DumpBuilder::new();
    b.string(0x1000, "com/example/Marker")
        .load_class(1, 0x100, 0x1000)
        .class_dump(0x100, 0, 0, &[], &[])
        .instance_dump(0x1, 0x100, &[])
        .root_unknown(0x1);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    assert_eq!(heap.retained_size(0x1).unwrap(), 16);
    assert_eq!(heap.retained_size(0x100).unwrap(), 16);
    assert_eq!(heap.references_to(0x100).unwrap(), vec![0x1]);
}

#[test]
fn test_weak_referent_is_not_strongly_reachable() {
    let mut b = DumpBuilder::new();
    b.string(0x1000, "java/lang/Object")
        .string(0x1001, "java/lang/ref/Reference")
        .string(0x1002, "java/lang/ref/WeakReference")
        .string(0x1003, "com/example/Payload")
        .string(0x1004, "referent")
        .load_class(1, 0x300, 0x1000)
        .load_class(2, 0x301, 0x1001)
        .load_class(3, 0x302, 0x1002)
        .load_class(4, 0x303, 0x1003)
        .class_dump(0x300, 0, 0, &[], &[])
        .class_dump(0x301, 0x300, 8, &[], &[(0x1004, TY_OBJECT)])
        .class_dump(0x302, 0x301, 8, &[], &[])
        .class_dump(0x303, 0x300, 0, &[], &[])
        .instance_dump(0x31, 0x302, &ids(&[0x32]))
        .instance_dump(0x32, 0x303, &[])
        .root_unknown(0x31);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    // The reference itself is recorded...
    assert_eq!(heap.references_to(0x32).unwrap(), vec![0x31]);
    // ...but the flood fill does not follow the referent field.
    assert_eq!(heap.nearest_gc_root_pointer(0x32).unwrap(), 0);
    assert_eq!(heap.retained_size(0x32).unwrap(), 0);
    assert_eq!(heap.retained_size(0x31).unwrap(), 24);
}

#[test]
fn test_arrays() {
    let mut b = DumpBuilder::new();
    b.string(0x1000, "java/lang/Object")
        .string(0x1001, "[Ljava/lang/Object;")
        .string(0x1002, "[I")
        .load_class(1, 0x400, 0x1000)
        .load_class(2, 0x401, 0x1001)
        .load_class(3, 0x402, 0x1002)
        .class_dump(0x400, 0, 0, &[], &[])
        .class_dump(0x401, 0, 0, &[], &[])
        .class_dump(0x402, 0, 0, &[], &[])
        .object_array(0x41, 0x401, &[0x42, 0, 0x43])
        .instance_dump(0x42, 0x400, &[])
        .instance_dump(0x43, 0x400, &[]);
    let mut int_data = Vec::new();
    for v in [1i32, 2, 3] {
        int_data.extend_from_slice(&v.to_be_bytes());
    }
    b.primitive_array(0x44, TY_INT, 3, &int_data)
        .root_unknown(0x41)
        .root_unknown(0x44);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    let arr = heap.instance_by_id(0x41).unwrap().unwrap();
    assert_eq!(arr.kind, InstanceKind::ObjectArray);
    assert!(arr.is_array());
    assert_eq!(heap.array_length(&arr).unwrap(), 3);
    assert_eq!(heap.instance_size(&arr).unwrap(), 16 + 8 + 3 * 8);
    assert_eq!(
        heap.array_items(&arr).unwrap(),
        vec![
            FieldValue::Object(0x42),
            FieldValue::Object(0),
            FieldValue::Object(0x43)
        ]
    );

    let prim = heap.instance_by_id(0x44).unwrap().unwrap();
    assert_eq!(prim.kind, InstanceKind::PrimitiveArray);
    assert_eq!(&*heap.class_name_of(&prim).unwrap(), "int[]");
    assert_eq!(heap.instance_size(&prim).unwrap(), 16 + 8 + 3 * 4);
    assert_eq!(
        heap.array_items(&prim).unwrap(),
        vec![FieldValue::Int(1), FieldValue::Int(2), FieldValue::Int(3)]
    );

    assert_eq!(heap.references_to(0x42).unwrap(), vec![0x41]);
    // Array retains its reachable elements.
    assert_eq!(heap.retained_size(0x41).unwrap(), 48 + 16 + 16);
    assert_eq!(heap.retained_size(0x44).unwrap(), 36);
}

#[test]
fn test_gc_roots() {
    let mut b = DumpBuilder::new();
    b.string(0x1000, "java/lang/Object")
        .load_class(1, 0x500, 0x1000)
        .class_dump(0x500, 0, 0, &[], &[])
        .instance_dump(0x51, 0x500, &[])
        .instance_dump(0x52, 0x500, &[])
        .root_thread_object(0x51, 7, 0)
        .root_unknown(0x52)
        .root_sticky_class(0x500);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    let mut roots = heap.gc_roots();
    roots.sort_by_key(|r| r.object_id);
    assert_eq!(roots.len(), 3);

    let thread_root = heap.gc_root(0x51).unwrap();
    assert_eq!(thread_root.kind, GcRootKind::ThreadObject);
    assert_eq!(thread_root.thread_serial, Some(7));
    assert_eq!(thread_root.frame_number, Some(0));
    assert_eq!(thread_root.kind.as_str(), "thread object");

    assert_eq!(heap.gc_root(0x500).unwrap().kind, GcRootKind::StickyClass);
    assert!(heap.gc_root(0x99).is_none());
}

#[test]
fn test_stack_traces() {
    let mut b = DumpBuilder::new();
    b.string(0x1000, "java/lang/Object")
        .string(0x1001, "main")
        .string(0x1002, "([Ljava/lang/String;)V")
        .string(0x1003, "Main.java")
        .load_class(1, 0x500, 0x1000)
        .stack_frame(0x61, 0x1001, 0x1002, 0x1003, 1, 42)
        .stack_trace(7, 7, &[0x61])
        .class_dump(0x500, 0, 0, &[], &[])
        .instance_dump(0x51, 0x500, &[])
        .root_thread_object(0x51, 7, 0);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    let trace = heap.stack_trace(7).unwrap().unwrap();
    assert_eq!(trace.thread_serial, 7);
    assert_eq!(trace.frame_ids, vec![0x61]);
    assert!(heap.stack_trace(8).unwrap().is_none());

    let frame = heap.stack_frame(0x61).unwrap().unwrap();
    assert_eq!(&*frame.method_name, "main");
    assert_eq!(&*frame.source_file, "Main.java");
    assert_eq!(frame.line_number, 42);
}

#[test]
fn test_unknown_top_level_record_is_skipped() {
    let mut b = DumpBuilder::new();
    b.string(0x1000, "com/example/Node")
        .load_class(1, 0x100, 0x1000)
        .top_record(0x99, b"vendor extension record")
        .class_dump(0x100, 0, 0, &[], &[]);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();
    assert_eq!(heap.classes().len(), 1);
}

#[test]
fn test_invalid_segment() {
    let file = chain_dump();
    let err = Heap::open_segment(file.path(), 5, HeapConfig::default()).unwrap_err();
    assert!(matches!(err, HeapError::InvalidSegment(5)));
}

#[test]
fn test_segmented_dump_is_fused() {
    let mut b = DumpBuilder::new();
    b.segmented()
        .string(0x1000, "com/example/Node")
        .string(0x1001, "next")
        .load_class(1, 0x100, 0x1000)
        .class_dump(0x100, 0, 8, &[], &[(0x1001, TY_OBJECT)])
        .instance_dump(0x1, 0x100, &ids(&[0x2]))
        .heap_break()
        .instance_dump(0x2, 0x100, &ids(&[0]))
        .root_unknown(0x1);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    let summary = heap.summary().unwrap();
    assert_eq!(summary.total_live_instances, 2);
    assert_eq!(heap.nearest_gc_root_pointer(0x2).unwrap(), 0x1);
    assert_eq!(heap.retained_size(0x1).unwrap(), 48);
}

#[test]
fn test_missing_id_tolerance() {
    let mut b = DumpBuilder::new();
    b.string(0x1000, "com/example/Node")
        .string(0x1001, "next")
        .load_class(1, 0x100, 0x1000)
        .class_dump(0x100, 0, 8, &[], &[(0x1001, TY_OBJECT)])
        // Dangling field target: 0x999 has no record.
        .instance_dump(0x1, 0x100, &ids(&[0x999]))
        .root_unknown(0x1);
    let file = b.build();

    let strict = Heap::open(file.path()).unwrap();
    assert!(strict.instance_by_id(0x999).unwrap().is_none());
    assert!(strict.instance_by_id(0).unwrap().is_none());
    // The dangling edge is dropped, not fatal.
    assert_eq!(strict.retained_size(0x1).unwrap(), 24);

    let tolerant = Heap::open_with_config(
        file.path(),
        HeapConfig { tolerate_missing_ids: true, ..Default::default() },
    )
    .unwrap();
    let stub = tolerant.instance_by_id(0x999).unwrap().unwrap();
    assert_eq!(stub.kind, InstanceKind::Missing);
    assert_eq!(tolerant.instance_size(&stub).unwrap(), 0);
}

#[test]
fn test_paged_and_mapped_agree() {
    let file = chain_dump();
    let mapped = Heap::open(file.path()).unwrap();
    let paged = Heap::open_with_config(
        file.path(),
        HeapConfig {
            force_paged_reader: true,
            page_size: 4096,
            page_pool_pages: 2,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(mapped.classes().len(), paged.classes().len());
    for id in [0x1u64, 0x2, 0x3] {
        assert_eq!(
            mapped.retained_size(id).unwrap(),
            paged.retained_size(id).unwrap()
        );
        assert_eq!(
            mapped.nearest_gc_root_pointer(id).unwrap(),
            paged.nearest_gc_root_pointer(id).unwrap()
        );
    }
}

#[test]
fn test_four_byte_identifiers() {
    let mut b = DumpBuilder::with_id_size(4);
    b.string(0x1000, "com/example/Node")
        .string(0x1001, "next")
        .load_class(1, 0x100, 0x1000)
        .class_dump(0x100, 0, 4, &[], &[(0x1001, TY_OBJECT)])
        .instance_dump(0x1, 0x100, &2u32.to_be_bytes())
        .instance_dump(0x2, 0x100, &0u32.to_be_bytes())
        .root_unknown(0x1);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    assert_eq!(heap.header().id_size, 4);
    // min instance size is 2 ids = 8 bytes; declared adds 4.
    let o1 = heap.instance_by_id(0x1).unwrap().unwrap();
    assert_eq!(heap.instance_size(&o1).unwrap(), 12);
    assert_eq!(heap.nearest_gc_root_pointer(0x2).unwrap(), 0x1);
    assert_eq!(heap.retained_size(0x1).unwrap(), 24);
}

#[test]
fn test_long_statics_do_not_shift_layout() {
    // A primitive static before an object static exercises the typed
    // skipping in the class dump walk.
    let mut b = DumpBuilder::new();
    b.string(0x1000, "com/example/Config")
        .string(0x1001, "VERSION")
        .string(0x1002, "INSTANCE")
        .load_class(1, 0x100, 0x1000)
        .class_dump(
            0x100,
            0,
            0,
            &[
                (0x1001, TY_LONG, 0x1122_3344_5566_7788u64.to_be_bytes().to_vec()),
                (0x1002, TY_OBJECT, ids(&[0x1])),
            ],
            &[],
        )
        .instance_dump(0x1, 0x100, &[]);
    let file = b.build();
    let heap = Heap::open(file.path()).unwrap();

    let statics = heap.static_field_values(0x100).unwrap();
    assert_eq!(statics.len(), 2);
    assert_eq!(statics[0].1, FieldValue::Long(0x1122_3344_5566_7788));
    assert_eq!(statics[1].1, FieldValue::Object(0x1));
    assert_eq!(heap.references_to(0x1).unwrap(), vec![0x100]);
}
