//! Fixed-pool free-list allocation.
//!
//! This module provides the allocator engine: an mmap-backed pool served
//! by a first-fit free list with split-on-allocate, coalesce-on-release,
//! and checksum-validated allocation headers.

pub mod block;
pub mod checksum;
pub mod pool;
pub mod stats;

pub use block::{BlockHeader, BLOCK_OVERHEAD};
pub use checksum::{Validator, XorValidator};
pub use pool::{FreeSpan, MemoryPool, PoolError, DEFAULT_POOL_CAPACITY};
pub use stats::{PoolStats, PoolUtilization};
