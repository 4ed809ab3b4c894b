//! Small shared utilities.

pub(crate) mod cache;

pub(crate) use cache::BoundedCache;
