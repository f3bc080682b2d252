//! Diagnostics for pool operations.
//!
//! Tracks allocation traffic, failure modes, and structural churn
//! (splits/coalesces) to make fragmentation behavior observable.

/// Running counters for one [`MemoryPool`](crate::memory::pool::MemoryPool).
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Successful allocation requests.
    pub total_allocations: u64,
    /// Allocation requests rejected for lack of a fitting block.
    pub failed_allocations: u64,
    /// Successful releases.
    pub total_releases: u64,
    /// Releases/reallocates rejected by header validation.
    pub checksum_failures: u64,
    /// Free blocks split to satisfy an allocation.
    pub splits: u64,
    /// Adjacent free blocks merged on release.
    pub coalesces: u64,
    /// Currently outstanding allocations.
    pub live_allocations: u64,
    /// Payload bytes currently allocated (including internal slack from
    /// whole-block consumption).
    pub live_bytes: usize,
    /// High water mark of `live_bytes`.
    pub peak_live_bytes: usize,
    /// Payload bytes handed out across all successful allocations.
    pub total_bytes_allocated: u64,
    /// Largest single allocation payload.
    pub largest_allocation: usize,
    /// Smallest single allocation payload.
    pub smallest_allocation: usize,
}

impl PoolStats {
    pub fn new() -> Self {
        Self {
            total_allocations: 0,
            failed_allocations: 0,
            total_releases: 0,
            checksum_failures: 0,
            splits: 0,
            coalesces: 0,
            live_allocations: 0,
            live_bytes: 0,
            peak_live_bytes: 0,
            total_bytes_allocated: 0,
            largest_allocation: 0,
            smallest_allocation: usize::MAX,
        }
    }

    /// Record a successful allocation of `size` payload bytes.
    pub fn record_allocation(&mut self, size: usize) {
        self.total_allocations += 1;
        self.total_bytes_allocated += size as u64;
        self.live_allocations += 1;
        self.live_bytes += size;
        self.peak_live_bytes = self.peak_live_bytes.max(self.live_bytes);
        self.largest_allocation = self.largest_allocation.max(size);
        if size > 0 {
            self.smallest_allocation = self.smallest_allocation.min(size);
        }
    }

    /// Record an allocation rejected with `OutOfMemory`.
    pub fn record_failed_allocation(&mut self) {
        self.failed_allocations += 1;
    }

    /// Record a successful release of `size` payload bytes.
    pub fn record_release(&mut self, size: usize) {
        self.total_releases += 1;
        self.live_allocations = self.live_allocations.saturating_sub(1);
        self.live_bytes = self.live_bytes.saturating_sub(size);
    }

    /// Record a release/reallocate rejected by header validation.
    pub fn record_checksum_failure(&mut self) {
        self.checksum_failures += 1;
    }

    /// Record a free block split during allocation.
    pub fn record_split(&mut self) {
        self.splits += 1;
    }

    /// Record one pair of adjacent free blocks merged during release.
    pub fn record_coalesce(&mut self) {
        self.coalesces += 1;
    }

    /// Mean payload size across all successful allocations.
    pub fn average_allocation_size(&self) -> f64 {
        if self.total_allocations == 0 {
            0.0
        } else {
            self.total_bytes_allocated as f64 / self.total_allocations as f64
        }
    }

    /// Peak utilization of a pool with the given capacity (0.0 to 1.0).
    pub fn peak_utilization(&self, capacity: usize) -> f32 {
        if capacity == 0 {
            0.0
        } else {
            self.peak_live_bytes as f32 / capacity as f32
        }
    }

    /// Snapshot the derived utilization metrics.
    pub fn utilization(&self) -> PoolUtilization {
        PoolUtilization {
            live_bytes: self.live_bytes,
            peak_live_bytes: self.peak_live_bytes,
            total_allocated_bytes: self.total_bytes_allocated,
            average_allocation_size: self.average_allocation_size(),
            largest_allocation: self.largest_allocation,
            smallest_allocation: if self.smallest_allocation == usize::MAX {
                0
            } else {
                self.smallest_allocation
            },
        }
    }

    /// Reset all counters (useful for benchmarking).
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Derived utilization snapshot.
#[derive(Debug, Clone)]
pub struct PoolUtilization {
    pub live_bytes: usize,
    pub peak_live_bytes: usize,
    pub total_allocated_bytes: u64,
    pub average_allocation_size: f64,
    pub largest_allocation: usize,
    pub smallest_allocation: usize,
}

impl PoolUtilization {
    /// Format the snapshot as a human-readable summary.
    pub fn format_summary(&self) -> String {
        format!(
            "Pool Utilization:\n\
             - Live: {} bytes (peak {})\n\
             - Total allocated: {} bytes\n\
             - Average allocation: {:.1} bytes\n\
             - Size range: {} - {} bytes",
            self.live_bytes,
            self.peak_live_bytes,
            self.total_allocated_bytes,
            self.average_allocation_size,
            self.smallest_allocation,
            self.largest_allocation
        )
    }
}
