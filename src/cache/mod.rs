//! Versioned cache partitions.
//!
//! This module provides:
//! - A storage boundary (`CacheStorage`) with in-memory and SQLite backends
//! - Generation-scoped partitions named `"{kind}-{tag}"`
//! - Population of partitions from asset lists at install time
//! - Garbage collection of partitions from other generations

mod namespace;
mod storage;

pub use namespace::{Namespace, Partition, PartitionKind};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
