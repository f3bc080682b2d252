//! On-pool block descriptors.
//!
//! The allocator never does backward pointer arithmetic on raw heap
//! pointers; every descriptor is read and written through a pool offset.
//! Both descriptors occupy the same 24 bytes, so converting an allocated
//! block back into a free block is a plain overwrite in place.
//!
//! ```text
//!   Free block:                        Allocated block:
//!   ┌──────┬──────┬──────┬─────────┐  ┌──────────┬──────┬──────┬─────────┐
//!   │ addr │ size │ next │ payload │  │ checksum │ size │ addr │ payload │
//!   └──────┴──────┴──────┴─────────┘  └──────────┴──────┴──────┴─────────┘
//!     8      8      8      size         8          8      8      size
//! ```
//!
//! All fields are little-endian `u64`. `size` always excludes the
//! descriptor itself.

/// Bytes of bookkeeping prefixed to every block, free or allocated.
pub const BLOCK_OVERHEAD: usize = 24;

/// Sentinel `next` value marking the tail of the free list.
pub const NIL: u64 = u64::MAX;

fn read_u64(pool: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&pool[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn write_u64(pool: &mut [u8], offset: usize, value: u64) {
    pool[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Descriptor of an unallocated region, stored at the region's start.
///
/// `addr` duplicates the node's own pool offset; `next` is the offset of
/// the successor node (free blocks are kept sorted by address) or [`NIL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeNode {
    pub addr: u64,
    pub size: u64,
    pub next: u64,
}

impl FreeNode {
    pub fn read(pool: &[u8], offset: usize) -> Self {
        Self {
            addr: read_u64(pool, offset),
            size: read_u64(pool, offset + 8),
            next: read_u64(pool, offset + 16),
        }
    }

    pub fn write(&self, pool: &mut [u8], offset: usize) {
        write_u64(pool, offset, self.addr);
        write_u64(pool, offset + 8, self.size);
        write_u64(pool, offset + 16, self.next);
    }

    /// Rewrite only the `next` field of the node stored at `offset`.
    pub fn set_next(pool: &mut [u8], offset: usize, next: u64) {
        write_u64(pool, offset + 16, next);
    }

    /// `next` as an offset, or `None` at the tail.
    pub fn next_offset(&self) -> Option<usize> {
        (self.next != NIL).then_some(self.next as usize)
    }
}

/// Convert an optional successor offset into the stored `next` word.
pub(crate) fn next_word(offset: Option<usize>) -> u64 {
    offset.map_or(NIL, |o| o as u64)
}

/// Metadata prefixed to every allocated payload.
///
/// `checksum` is sealed over `size` and `addr` by the pool's
/// [`Validator`](crate::memory::checksum::Validator) and re-verified
/// before `release`/`reallocate` trust the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub checksum: u64,
    pub size: u64,
    pub addr: u64,
}

impl BlockHeader {
    pub(crate) fn read(pool: &[u8], offset: usize) -> Self {
        Self {
            checksum: read_u64(pool, offset),
            size: read_u64(pool, offset + 8),
            addr: read_u64(pool, offset + 16),
        }
    }

    pub(crate) fn write(&self, pool: &mut [u8], offset: usize) {
        write_u64(pool, offset, self.checksum);
        write_u64(pool, offset + 8, self.size);
        write_u64(pool, offset + 16, self.addr);
    }
}
