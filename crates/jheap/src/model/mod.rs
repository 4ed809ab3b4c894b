//! Decoded views over dump records: strings, classes, instances, GC roots,
//! stack traces and the heap summary.

pub(crate) mod class;
pub(crate) mod field;
pub(crate) mod gc_root;
pub(crate) mod instance;
pub(crate) mod load_class;
pub(crate) mod stack;
pub(crate) mod strings;
pub(crate) mod summary;

pub use field::{FieldDescriptor, FieldValue};
pub use gc_root::{GcRoot, GcRootKind};
pub use instance::{Instance, InstanceKind};
pub use stack::{StackFrame, StackTrace};
pub use summary::HeapSummary;
