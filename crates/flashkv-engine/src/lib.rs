//! FlashKV Storage Engine
//!
//! This crate implements the storage engine for FlashKV including:
//! - Hash-sharded one-file-per-key disk store
//! - Write-back LRU cache with dirty tracking
//! - Bounded worker pool for blocking disk I/O
//! - Background flush scheduling and engine lifecycle

pub mod cache;
pub mod disk;
pub mod engine;
pub mod pool;

// Re-exports
pub use cache::{CacheIndex, CacheStats};
pub use disk::DiskStore;
pub use engine::Engine;
pub use pool::IoPool;
