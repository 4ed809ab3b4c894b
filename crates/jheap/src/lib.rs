//! Analyzer for JVM heap dumps in the HPROF binary format.
//!
//! Opens a dump file, indexes every object, and answers the questions a
//! memory investigation starts with: what classes exist, what instances
//! they have, who references whom, how each object is reachable from a GC
//! root, and how many bytes each object or class retains.
//!
//! The analysis is disk-backed end to end. The dump itself is memory
//! mapped (or read through a bounded page pool), the identity index and
//! the adjacency store live on scratch files, and the graph passes queue
//! their frontiers through spill-to-disk buffers. Memory use is set by
//! configuration, not by dump size.
//!
//! ```no_run
//! use jheap::Heap;
//!
//! let heap = Heap::open("dump.hprof")?;
//! let summary = heap.summary()?;
//! println!("{} live objects, {} bytes",
//!     summary.total_live_instances, summary.total_live_bytes);
//!
//! for (id, retained) in heap.biggest_objects_by_retained_size(5)? {
//!     println!("{id:#x} retains {retained} bytes");
//! }
//! # Ok::<(), jheap::HeapError>(())
//! ```

mod config;
mod error;
mod format;
mod graph;
mod heap;
mod index;
mod io;
mod model;
mod progress;
mod util;

pub use config::HeapConfig;
pub use error::{HeapError, Result};
pub use heap::{Heap, JavaClass};
pub use io::{Header, HprofVersion};
pub use model::{
    FieldDescriptor, FieldValue, GcRoot, GcRootKind, HeapSummary, Instance, InstanceKind,
    StackFrame, StackTrace,
};
pub use progress::{ProgressListener, PROGRESS_MAX};
