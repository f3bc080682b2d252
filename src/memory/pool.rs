//! The free-list allocator engine.
//!
//! A [`MemoryPool`] owns one fixed-size anonymous memory mapping and
//! serves allocations out of it with a first-fit scan over an
//! address-ordered free list. Every allocated block carries a sealed
//! header; `release`/`reallocate` re-verify the seal before trusting a
//! pointer, so a corrupted or stale header is rejected instead of
//! poisoning the list.

use std::io;
use std::ptr::NonNull;
use std::slice;

use tracing::{debug, trace, warn};

use crate::memory::block::{next_word, BlockHeader, FreeNode, BLOCK_OVERHEAD};
use crate::memory::checksum::{Validator, XorValidator};
use crate::memory::stats::PoolStats;

/// Default pool capacity in bytes (one page).
pub const DEFAULT_POOL_CAPACITY: usize = 4096;

/// Errors that can occur during memory pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The OS could not supply the backing mapping. Fatal for this pool:
    /// no `MemoryPool` exists until a mapping succeeds.
    #[error("failed to map backing pool: {0}")]
    InitFailed(#[source] io::Error),

    /// The requested capacity cannot hold even one block descriptor.
    #[error("pool capacity {capacity} cannot hold a single block")]
    CapacityTooSmall { capacity: usize },

    /// No free block is large enough. Recoverable: release something and
    /// retry.
    #[error("out of memory: requested {requested} bytes, largest free block holds {largest}")]
    OutOfMemory { requested: usize, largest: usize },

    /// Header validation failed: the pointer was never allocated here,
    /// its header was corrupted, or the block was already released and
    /// its bytes reused. The operation performed no mutation.
    #[error("invalid pointer: header validation failed at pool offset {offset}")]
    InvalidPointer { offset: usize },

    /// `allocate_zeroed` element count times element size overflowed.
    #[error("size overflow: {count} elements of {size} bytes exceed the addressable range")]
    SizeOverflow { count: usize, size: usize },
}

/// One entry of the free-list dump: `(addr, len)` in pool offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpan {
    /// Pool offset of the block's descriptor.
    pub addr: usize,
    /// Payload bytes following the descriptor.
    pub len: usize,
}

/// A fixed-capacity pool serving first-fit allocations from a free list.
///
/// The pool is an explicit context object: independent pools coexist and
/// tests get deterministic isolation instead of hidden process state.
/// Operations are single-threaded and synchronous; callers wanting to
/// share a pool across threads must serialize access externally.
pub struct MemoryPool {
    /// Base of the anonymous mapping.
    base: NonNull<u8>,
    /// Mapped length in bytes.
    capacity: usize,
    /// Offset of the first free block, or `None` when fully allocated.
    head: Option<usize>,
    /// Header seal/verify scheme.
    validator: Box<dyn Validator>,
    /// Operation counters.
    stats: PoolStats,
}

// Safety: the pool owns its mapping exclusively and the raw base pointer
// is only dereferenced through &self/&mut self methods.
unsafe impl Send for MemoryPool {}

impl MemoryPool {
    /// Create a pool with [`DEFAULT_POOL_CAPACITY`] and the default
    /// XOR validator.
    pub fn new() -> Result<Self, PoolError> {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Create a pool with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Result<Self, PoolError> {
        Self::with_validator(capacity, Box::new(XorValidator))
    }

    /// Create a pool with an explicit capacity and header validator.
    pub fn with_validator(
        capacity: usize,
        validator: Box<dyn Validator>,
    ) -> Result<Self, PoolError> {
        if capacity <= BLOCK_OVERHEAD {
            return Err(PoolError::CapacityTooSmall { capacity });
        }

        let base = map_anonymous(capacity)?;
        let mut pool = Self {
            base,
            capacity,
            head: Some(0),
            validator,
            stats: PoolStats::new(),
        };

        // Seed the list with one block spanning the whole pool.
        FreeNode {
            addr: 0,
            size: (capacity - BLOCK_OVERHEAD) as u64,
            next: next_word(None),
        }
        .write(pool.bytes_mut(), 0);

        debug!(capacity, "memory pool mapped");
        Ok(pool)
    }

    /// Total mapped bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Operation counters for this pool.
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Allocate `size` bytes and return a pointer to the payload.
    ///
    /// First-fit: the scan starts at the list head and takes the first
    /// block whose payload fits `size` plus the block's bookkeeping.
    /// A `size` of zero is a valid zero-length allocation; it writes a
    /// header and can be released like any other block.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, PoolError> {
        let Some(required) = size.checked_add(BLOCK_OVERHEAD) else {
            self.stats.record_failed_allocation();
            return Err(PoolError::OutOfMemory {
                requested: size,
                largest: self.largest_free(),
            });
        };

        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        while let Some(off) = cur {
            let node = FreeNode::read(self.bytes(), off);
            if node.size as usize >= required {
                return Ok(self.carve(prev, off, node, size, required));
            }
            prev = Some(off);
            cur = node.next_offset();
        }

        let largest = self.largest_free();
        self.stats.record_failed_allocation();
        trace!(size, largest, "allocation failed: no fitting free block");
        Err(PoolError::OutOfMemory {
            requested: size,
            largest,
        })
    }

    /// Turn the free block at `off` into an allocation of `size` bytes,
    /// splitting off the tail when enough remains for another block.
    fn carve(
        &mut self,
        prev: Option<usize>,
        off: usize,
        node: FreeNode,
        size: usize,
        required: usize,
    ) -> NonNull<u8> {
        let remaining = node.size as usize - required;

        let (stored_size, successor) = if remaining > BLOCK_OVERHEAD {
            let split_off = off + required;
            FreeNode {
                addr: split_off as u64,
                size: remaining as u64,
                next: node.next,
            }
            .write(self.bytes_mut(), split_off);
            self.stats.record_split();
            (size, Some(split_off))
        } else {
            // Whole-block consumption: record the block's entire payload
            // so the slack stays inside the allocation and comes back on
            // release. Recording only `size` would strand the remainder.
            (node.size as usize, node.next_offset())
        };

        match prev {
            Some(p) => FreeNode::set_next(self.bytes_mut(), p, next_word(successor)),
            None => self.head = successor,
        }

        let header = BlockHeader {
            checksum: self.validator.seal(stored_size as u64, off as u64),
            size: stored_size as u64,
            addr: off as u64,
        };
        header.write(self.bytes_mut(), off);

        self.stats.record_allocation(stored_size);
        trace!(size, offset = off, stored_size, "allocated block");

        // Safety: off + BLOCK_OVERHEAD <= capacity, so the payload pointer
        // stays within (or one past the end of) the mapping.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(off + BLOCK_OVERHEAD)) }
    }

    /// Return an allocation to the pool.
    ///
    /// A null pointer is a defined no-op success. The header preceding
    /// `ptr` must pass validation; otherwise `InvalidPointer` is returned
    /// and the pool is left untouched. Double frees are only caught
    /// best-effort, when the header bytes no longer validate.
    pub fn release(&mut self, ptr: *mut u8) -> Result<(), PoolError> {
        if ptr.is_null() {
            return Ok(());
        }

        let off = self.header_offset(ptr)?;
        let header = self.verified_header(off)?;

        let size = header.size as usize;
        self.insert_free(off, size);
        self.stats.record_release(size);
        trace!(offset = off, size, "released block");
        Ok(())
    }

    /// Resize an allocation.
    ///
    /// `new_size == 0` releases `ptr` and returns null. A null `ptr` is a
    /// plain allocation. Shrinking returns `ptr` unchanged with no data
    /// movement. Growing allocates, copies the old payload, releases the
    /// old block, and returns the new pointer; on failure the old
    /// allocation is left intact.
    pub fn reallocate(&mut self, ptr: *mut u8, new_size: usize) -> Result<*mut u8, PoolError> {
        if new_size == 0 {
            self.release(ptr)?;
            return Ok(std::ptr::null_mut());
        }
        if ptr.is_null() {
            return self.allocate(new_size).map(NonNull::as_ptr);
        }

        let off = self.header_offset(ptr)?;
        let header = self.verified_header(off)?;

        let current = header.size as usize;
        if new_size <= current {
            return Ok(ptr);
        }

        let new_ptr = self.allocate(new_size)?;
        // Safety: both payloads live inside the mapping and a live
        // allocation never overlaps a block the allocator hands out.
        unsafe { std::ptr::copy_nonoverlapping(ptr, new_ptr.as_ptr(), current) };
        self.release(ptr)?;
        trace!(
            old_offset = off,
            new_size,
            "reallocated block to new location"
        );
        Ok(new_ptr.as_ptr())
    }

    /// Allocate `count * size` bytes and zero the payload.
    ///
    /// The product is computed with `checked_mul`; overflow fails with
    /// [`PoolError::SizeOverflow`] rather than wrapping.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Result<NonNull<u8>, PoolError> {
        let total = count
            .checked_mul(size)
            .ok_or(PoolError::SizeOverflow { count, size })?;
        let ptr = self.allocate(total)?;
        // Safety: `allocate` returned a payload of at least `total` bytes.
        unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Ok(ptr)
    }

    /// Ordered `(addr, len)` dump of the free list. Never mutates state.
    pub fn free_list(&self) -> Vec<FreeSpan> {
        let mut spans = Vec::new();
        let mut cur = self.head;
        while let Some(off) = cur {
            let node = FreeNode::read(self.bytes(), off);
            spans.push(FreeSpan {
                addr: node.addr as usize,
                len: node.size as usize,
            });
            cur = node.next_offset();
        }
        spans
    }

    /// Human-readable rendering of [`free_list`](Self::free_list).
    pub fn dump_free_list(&self) -> String {
        let mut out = String::from("Free list: head");
        for span in self.free_list() {
            out.push_str(&format!(" -> [addr:{}, len:{}]", span.addr, span.len));
        }
        out.push_str(" -> NULL");
        out
    }

    /// Sum of free payload bytes currently available.
    pub fn free_bytes(&self) -> usize {
        self.free_list().iter().map(|s| s.len).sum()
    }

    fn largest_free(&self) -> usize {
        self.free_list().iter().map(|s| s.len).max().unwrap_or(0)
    }

    /// Map a caller pointer back to its header's pool offset.
    fn header_offset(&self, ptr: *mut u8) -> Result<usize, PoolError> {
        let data_off = (ptr as usize).wrapping_sub(self.base.as_ptr() as usize);
        if data_off < BLOCK_OVERHEAD || data_off > self.capacity {
            return Err(PoolError::InvalidPointer { offset: data_off });
        }
        Ok(data_off - BLOCK_OVERHEAD)
    }

    /// Read the header at `off` and reject it unless the seal and the
    /// stored address both check out.
    fn verified_header(&mut self, off: usize) -> Result<BlockHeader, PoolError> {
        let header = BlockHeader::read(self.bytes(), off);
        if header.addr != off as u64 || !self.validator.verify(&header) {
            self.stats.record_checksum_failure();
            warn!(offset = off, "rejected pointer: header validation failed");
            return Err(PoolError::InvalidPointer { offset: off });
        }
        Ok(header)
    }

    /// Insert a freed block at `off` in address order, then merge it with
    /// byte-adjacent neighbors on both sides.
    fn insert_free(&mut self, off: usize, size: usize) {
        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if c > off {
                break;
            }
            prev = Some(c);
            cur = FreeNode::read(self.bytes(), c).next_offset();
        }

        FreeNode {
            addr: off as u64,
            size: size as u64,
            next: next_word(cur),
        }
        .write(self.bytes_mut(), off);
        match prev {
            Some(p) => FreeNode::set_next(self.bytes_mut(), p, next_word(Some(off))),
            None => self.head = Some(off),
        }

        // Forward: absorb the successor when this block ends exactly at it.
        if let Some(next_off) = cur {
            if off + size + BLOCK_OVERHEAD == next_off {
                let next = FreeNode::read(self.bytes(), next_off);
                FreeNode {
                    addr: off as u64,
                    size: (size + next.size as usize + BLOCK_OVERHEAD) as u64,
                    next: next.next,
                }
                .write(self.bytes_mut(), off);
                self.stats.record_coalesce();
            }
        }

        // Backward: let the predecessor absorb this block (which may
        // already carry the forward merge, bridging two neighbors).
        if let Some(p) = prev {
            let pred = FreeNode::read(self.bytes(), p);
            if p + pred.size as usize + BLOCK_OVERHEAD == off {
                let merged = FreeNode::read(self.bytes(), off);
                FreeNode {
                    addr: p as u64,
                    size: (pred.size as usize + merged.size as usize + BLOCK_OVERHEAD) as u64,
                    next: merged.next,
                }
                .write(self.bytes_mut(), p);
                self.stats.record_coalesce();
            }
        }
    }

    fn bytes(&self) -> &[u8] {
        // Safety: base/capacity describe one live mapping owned by self.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.capacity) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // Safety: as above, and &mut self guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.capacity) }
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        // Safety: base/capacity came from a successful mmap of this length.
        unsafe {
            libc::munmap(self.base.as_ptr().cast::<libc::c_void>(), self.capacity);
        }
        debug!(capacity = self.capacity, "memory pool unmapped");
    }
}

/// Request an anonymous, private, zero-filled, read/write mapping.
fn map_anonymous(capacity: usize) -> Result<NonNull<u8>, PoolError> {
    // Safety: a fresh anonymous mapping request carries no invariants.
    let region = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if region == libc::MAP_FAILED {
        return Err(PoolError::InitFailed(io::Error::last_os_error()));
    }
    NonNull::new(region.cast::<u8>()).ok_or_else(|| {
        PoolError::InitFailed(io::Error::new(
            io::ErrorKind::Other,
            "mmap returned a null mapping",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_pool_has_one_spanning_block() {
        let pool = MemoryPool::new().unwrap();
        assert_eq!(
            pool.free_list(),
            vec![FreeSpan {
                addr: 0,
                len: DEFAULT_POOL_CAPACITY - BLOCK_OVERHEAD
            }]
        );
        assert_eq!(
            pool.dump_free_list(),
            "Free list: head -> [addr:0, len:4072] -> NULL"
        );
    }

    #[test]
    fn capacity_must_exceed_block_overhead() {
        assert!(matches!(
            MemoryPool::with_capacity(BLOCK_OVERHEAD),
            Err(PoolError::CapacityTooSmall { .. })
        ));
    }

    #[test]
    fn allocation_splits_the_head_block() {
        let mut pool = MemoryPool::new().unwrap();
        let ptr = pool.allocate(100).unwrap();
        assert!(!ptr.as_ptr().is_null());

        // 100 payload + 24 header consumed from the front.
        assert_eq!(
            pool.free_list(),
            vec![FreeSpan {
                addr: 124,
                len: DEFAULT_POOL_CAPACITY - BLOCK_OVERHEAD - 124
            }]
        );
        assert_eq!(pool.stats().splits, 1);
    }

    #[test]
    fn allocation_payloads_do_not_overlap() {
        let mut pool = MemoryPool::new().unwrap();
        let a = pool.allocate(64).unwrap();
        let b = pool.allocate(64).unwrap();

        unsafe {
            std::ptr::write_bytes(a.as_ptr(), 0xAA, 64);
            std::ptr::write_bytes(b.as_ptr(), 0xBB, 64);
            assert_eq!(*a.as_ptr(), 0xAA);
            assert_eq!(*b.as_ptr(), 0xBB);
        }
    }

    #[test]
    fn zero_size_allocation_is_valid_and_releasable() {
        let mut pool = MemoryPool::new().unwrap();
        let before = pool.free_list();

        let ptr = pool.allocate(0).unwrap();
        assert_eq!(pool.stats().live_allocations, 1);

        pool.release(ptr.as_ptr()).unwrap();
        assert_eq!(pool.free_list(), before);
    }

    #[test]
    fn exhaustion_reports_largest_block_and_leaves_list_unchanged() {
        let mut pool = MemoryPool::new().unwrap();
        let before = pool.free_list();

        let err = pool.allocate(DEFAULT_POOL_CAPACITY).unwrap_err();
        match err {
            PoolError::OutOfMemory { requested, largest } => {
                assert_eq!(requested, DEFAULT_POOL_CAPACITY);
                assert_eq!(largest, DEFAULT_POOL_CAPACITY - BLOCK_OVERHEAD);
            }
            other => panic!("expected OutOfMemory, got {other:?}"),
        }
        assert_eq!(pool.free_list(), before);
        assert_eq!(pool.stats().failed_allocations, 1);
    }

    #[test]
    fn tight_fit_consumes_the_whole_block() {
        let mut pool = MemoryPool::new().unwrap();
        // Leaves exactly BLOCK_OVERHEAD behind: too small to split.
        let size = DEFAULT_POOL_CAPACITY - 2 * BLOCK_OVERHEAD - BLOCK_OVERHEAD;
        let ptr = pool.allocate(size).unwrap();

        // The slack is folded into the allocation, not stranded.
        assert!(pool.free_list().is_empty());
        assert_eq!(
            pool.stats().live_bytes,
            DEFAULT_POOL_CAPACITY - BLOCK_OVERHEAD
        );

        pool.release(ptr.as_ptr()).unwrap();
        assert_eq!(
            pool.free_list(),
            vec![FreeSpan {
                addr: 0,
                len: DEFAULT_POOL_CAPACITY - BLOCK_OVERHEAD
            }]
        );
    }

    #[test]
    fn release_null_is_a_defined_success() {
        let mut pool = MemoryPool::new().unwrap();
        pool.release(std::ptr::null_mut()).unwrap();
    }

    #[test]
    fn release_of_foreign_pointer_is_rejected() {
        let mut pool = MemoryPool::new().unwrap();
        let mut local = 0u8;
        let err = pool.release(&mut local).unwrap_err();
        assert!(matches!(err, PoolError::InvalidPointer { .. }));
    }

    #[test]
    fn double_release_is_rejected_once_header_bytes_changed() {
        let mut pool = MemoryPool::new().unwrap();
        let ptr = pool.allocate(100).unwrap().as_ptr();

        pool.release(ptr).unwrap();
        // The free-list node overwrote the header; validation now fails.
        let err = pool.release(ptr).unwrap_err();
        assert!(matches!(err, PoolError::InvalidPointer { .. }));
        assert_eq!(pool.stats().checksum_failures, 1);
    }

    #[test]
    fn reallocate_null_allocates() {
        let mut pool = MemoryPool::new().unwrap();
        let ptr = pool.reallocate(std::ptr::null_mut(), 64).unwrap();
        assert!(!ptr.is_null());
        assert_eq!(pool.stats().total_allocations, 1);
    }

    #[test]
    fn reallocate_to_zero_releases_and_returns_null() {
        let mut pool = MemoryPool::new().unwrap();
        let before = pool.free_list();

        let ptr = pool.allocate(64).unwrap().as_ptr();
        let out = pool.reallocate(ptr, 0).unwrap();

        assert!(out.is_null());
        assert_eq!(pool.free_list(), before);
    }

    #[test]
    fn reallocate_failure_leaves_old_allocation_intact() {
        let mut pool = MemoryPool::new().unwrap();
        let ptr = pool.allocate(100).unwrap().as_ptr();
        unsafe { std::ptr::write_bytes(ptr, 0x5A, 100) };

        let err = pool.reallocate(ptr, DEFAULT_POOL_CAPACITY).unwrap_err();
        assert!(matches!(err, PoolError::OutOfMemory { .. }));

        // Old block still valid: contents intact and releasable.
        unsafe { assert_eq!(*ptr.add(99), 0x5A) };
        pool.release(ptr).unwrap();
    }

    #[test]
    fn allocate_zeroed_rejects_product_overflow() {
        let mut pool = MemoryPool::new().unwrap();
        let err = pool.allocate_zeroed(usize::MAX, 2).unwrap_err();
        assert!(matches!(err, PoolError::SizeOverflow { .. }));
    }

    #[test]
    fn custom_validator_is_honored_end_to_end() {
        struct Mixed;
        impl Validator for Mixed {
            fn seal(&self, size: u64, addr: u64) -> u64 {
                size.wrapping_mul(31).wrapping_add(addr).rotate_left(7)
            }
        }

        let mut pool = MemoryPool::with_validator(4096, Box::new(Mixed)).unwrap();
        let ptr = pool.allocate(50).unwrap().as_ptr();
        pool.release(ptr).unwrap();
        assert_eq!(pool.free_bytes(), 4096 - BLOCK_OVERHEAD);
    }

    #[test]
    fn independent_pools_do_not_share_state() {
        let mut a = MemoryPool::new().unwrap();
        let mut b = MemoryPool::new().unwrap();

        let pa = a.allocate(100).unwrap().as_ptr();
        assert_eq!(b.free_bytes(), DEFAULT_POOL_CAPACITY - BLOCK_OVERHEAD);

        // A pointer from pool `a` means nothing to pool `b`.
        let err = b.release(pa).unwrap_err();
        assert!(matches!(err, PoolError::InvalidPointer { .. }));
        a.release(pa).unwrap();
    }
}
