//! Query cache with optimistic mutations.
//!
//! This module provides an entity-agnostic cache that:
//! - Stores query results under hierarchical keys with per-query staleness
//! - Serves cached data immediately and revalidates stale entries in the background
//! - Applies optimistic edits to cached lists and rolls them back on failure
//! - Settles mutations by invalidating and refetching affected queries

pub mod clock;
mod key;
mod layer;
mod mutation;
mod settlement;
mod storage;
mod traits;

pub use key::{EntityKeys, Filters, KeySegment, QueryKey};
pub use layer::QueryClient;
pub use mutation::Mutation;
pub use settlement::{InvalidationPolicy, Settlement};
pub use storage::{CacheEntry, CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheSource, Cacheable, QueryResult};
