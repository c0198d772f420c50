//! Provides a size constrained LRU store.
//!
//! An LRU store drops the least recently used entry if it is about to grow beyond the given
//! memory budget. Every [Namespace](crate::namespace::Namespace) uses such a store to keep its
//! locally loaded values around: the budget keeps the memory usage of a cache node predictable
//! while the LRU ordering makes sure that the entries being dropped are the ones least likely
//! to be asked for again.
//!
//! The store itself is a plain single threaded data structure and performs byte accounting over
//! all keys and values (see [ByteSize](ByteSize)). Evictions are deterministic (strictly least
//! recently used first) and can be observed via an eviction handler, e.g. to log or count
//! dropped entries.
mod store;

pub use store::ByteSize;
pub use store::EvictionHandler;
pub use store::LRUStore;
