//! Disk-backed index structures.
//!
//! Everything whose size scales with the object count lives here, on
//! scratch files: the identity index ([`LongMap`]), the adjacency store
//! backing its reference lists ([`NumberList`]) and the spilling queues
//! used by the graph passes ([`LongQueue`]). Scratch files are unlinked on
//! creation, so the OS reclaims them even on a crash.

pub(crate) mod long_buffer;
pub(crate) mod long_map;
pub(crate) mod number_list;

pub(crate) use long_buffer::LongQueue;
pub(crate) use long_map::LongMap;
pub(crate) use number_list::NumberList;
