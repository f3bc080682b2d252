//! # Hearth - A Fixed-Pool Free-List Allocator
//!
//! Hearth manages one fixed-size memory pool obtained from the operating
//! system via an anonymous mapping and serves allocate / release /
//! reallocate / zero-allocate requests from it, the way a standard heap
//! allocator would.
//!
//! ## Core Features
//!
//! - **First-fit free list**: address-ordered, split on allocate,
//!   coalesce on release
//! - **Corruption detection**: every allocation carries a sealed header
//!   that is re-verified before a pointer is trusted
//! - **Explicit pool objects**: independent pools instead of hidden
//!   process-wide state
//! - **Statistics tracking**: traffic, failure, and fragmentation counters
//!
//! ## Pool Layout
//!
//! ```text
//!   ┌────────┬─────────────┬────────┬───────────┬────────┬────────────┐
//!   │ header │  payload A  │ header │ payload B │  node  │ free space │
//!   └────────┴─────────────┴────────┴───────────┴────────┴────────────┘
//!     24 B                                        24 B
//!
//!   Allocated blocks carry a header (checksum, size, addr); free blocks
//!   carry a list node (addr, size, next) in the same 24 bytes.
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use hearth::MemoryPool;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // One 4096-byte pool, mapped from the OS.
//! let mut pool = MemoryPool::new()?;
//!
//! let ptr = pool.allocate(64)?;
//! unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0x42, 64) };
//!
//! println!("{}", pool.dump_free_list());
//! println!("live: {} bytes", pool.stats().live_bytes);
//!
//! pool.release(ptr.as_ptr())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded**: a pool has no internal locking; concurrent use
//!   must be serialized externally
//! - **Fixed capacity**: a pool never grows; exhaustion is reported as
//!   `OutOfMemory`
//! - **Natural alignment only**: payloads follow a 24-byte header with no
//!   further alignment guarantees
//! - **Unix-only**: the backing region comes from `mmap(2)`

pub mod memory;

// Re-export commonly used types for convenience
pub use memory::block::BLOCK_OVERHEAD;
pub use memory::checksum::{Validator, XorValidator};
pub use memory::pool::{FreeSpan, MemoryPool, PoolError, DEFAULT_POOL_CAPACITY};
pub use memory::stats::{PoolStats, PoolUtilization};

/// Version information for the hearth crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for hearth pools
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool capacity in bytes
    pub capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl PoolConfig {
    /// Configuration with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Create a memory pool using this configuration
    pub fn create_pool(&self) -> Result<MemoryPool, PoolError> {
        MemoryPool::with_capacity(self.capacity)
    }
}
