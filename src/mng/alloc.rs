//! Per-file free-region allocator (§4.3 "Per-file allocator"). Grounded in
//! `original_source/include/stxxl/bits/mng/diskallocator.h`: a sorted map
//! of `offset -> length` free regions, first-fit allocation, autogrow on
//! exhaustion, bulk allocation by recursive halving, and predecessor/
//! successor coalescing on free with a fatal diagnostic on double-free.

use std::collections::BTreeMap;

use crate::error::{ExMemError, Result};

pub struct DiskAllocator {
    /// offset -> length of each free region.
    free_space: BTreeMap<i64, i64>,
    free_bytes: i64,
    disk_bytes: i64,
    autogrow: bool,
}

impl DiskAllocator {
    pub fn new(disk_size: i64) -> Self {
        let autogrow = disk_size == 0;
        let mut free_space = BTreeMap::new();
        if disk_size > 0 {
            free_space.insert(0, disk_size);
        }
        DiskAllocator {
            free_space,
            free_bytes: disk_size,
            disk_bytes: disk_size,
            autogrow,
        }
    }

    pub fn free_bytes(&self) -> i64 {
        self.free_bytes
    }

    pub fn used_bytes(&self) -> i64 {
        self.disk_bytes - self.free_bytes
    }

    pub fn total_bytes(&self) -> i64 {
        self.disk_bytes
    }

    fn grow_by(&mut self, extend_bytes: i64) {
        if extend_bytes == 0 {
            return;
        }
        let pos = self.disk_bytes;
        self.disk_bytes += extend_bytes;
        self.free_bytes += extend_bytes;
        self.free_space
            .entry(pos)
            .and_modify(|len| *len += extend_bytes)
            .or_insert(extend_bytes);
    }

    /// Allocates one contiguous region of `requested` bytes, first-fit over
    /// the free-region map in address order. Grows the backing file if
    /// autogrow is enabled and no region is large enough; otherwise fails
    /// with [`ExMemError::OutOfSpace`].
    pub fn allocate(&mut self, requested: i64) -> Result<i64> {
        assert!(requested > 0);

        if self.free_bytes < requested {
            if !self.autogrow {
                return Err(ExMemError::OutOfSpace {
                    requested,
                    free: self.free_bytes,
                    autogrow: self.autogrow,
                });
            }
            let pos = self.disk_bytes;
            self.grow_by(requested);
            // The newly grown region is exactly `requested` bytes at `pos`;
            // carve it out directly rather than round-tripping through the
            // free map.
            self.remove_or_shrink(pos, requested);
            return Ok(pos);
        }

        let hit = self
            .free_space
            .iter()
            .find(|(_, &len)| len >= requested)
            .map(|(&off, &len)| (off, len));

        match hit {
            Some((offset, len)) => {
                self.free_space.remove(&offset);
                if len > requested {
                    self.free_space.insert(offset + requested, len - requested);
                }
                self.free_bytes -= requested;
                Ok(offset)
            }
            None => {
                // No single contiguous region fits; STXXL's fallback is to
                // grow at the end. Growing a whole-file allocator for a
                // single in-budget request only happens here when
                // fragmentation, not exhaustion, is the problem.
                let pos = self.disk_bytes;
                self.grow_by(requested);
                self.remove_or_shrink(pos, requested);
                Ok(pos)
            }
        }
    }

    fn remove_or_shrink(&mut self, offset: i64, requested: i64) {
        if let Some(&len) = self.free_space.get(&offset) {
            self.free_space.remove(&offset);
            if len > requested {
                self.free_space.insert(offset + requested, len - requested);
            }
            self.free_bytes -= requested;
        }
    }

    /// Allocates `n` contiguous blocks of `block_size` bytes each as a
    /// single span; if no span that large is free, splits the request in
    /// half recursively until each half can be placed (possibly via
    /// autogrow), per §4.3 "Bulk allocation".
    pub fn allocate_bulk(&mut self, n: usize, block_size: i64) -> Result<Vec<i64>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        if n == 1 {
            let off = self.allocate(block_size)?;
            return Ok(vec![off]);
        }

        let total = block_size * n as i64;
        if self.best_fit_len() >= total || self.autogrow {
            let base = self.allocate(total)?;
            return Ok((0..n as i64).map(|i| base + i * block_size).collect());
        }

        let mid = n / 2;
        let mut left = self.allocate_bulk(mid, block_size)?;
        let right = self.allocate_bulk(n - mid, block_size)?;
        left.extend(right);
        Ok(left)
    }

    fn best_fit_len(&self) -> i64 {
        self.free_space.values().copied().max().unwrap_or(0)
    }

    /// Returns `(offset, length)` of a free region to the map, coalescing
    /// with an adjacent predecessor and/or successor. Double-freeing, or
    /// freeing a region overlapping an already-free one, is a fatal
    /// invariant violation (§7 class 4).
    pub fn free(&mut self, offset: i64, length: i64) {
        let region_end = offset + length;

        if let Some((&pred_off, &pred_len)) = self.free_space.range(..offset).next_back() {
            if pred_off + pred_len > offset {
                crate::fatal!(
                    "double free or overlap: region [{}, {}) overlaps free region [{}, {})",
                    offset,
                    region_end,
                    pred_off,
                    pred_off + pred_len
                );
            }
        }
        if let Some((&succ_off, &succ_len)) = self.free_space.range(offset..).next() {
            if region_end > succ_off {
                crate::fatal!(
                    "double free or overlap: region [{}, {}) overlaps free region [{}, {})",
                    offset,
                    region_end,
                    succ_off,
                    succ_off + succ_len
                );
            }
        }

        let mut new_off = offset;
        let mut new_len = length;

        if let Some((&pred_off, &pred_len)) = self.free_space.range(..offset).next_back() {
            if pred_off + pred_len == offset {
                new_off = pred_off;
                new_len += pred_len;
                self.free_space.remove(&pred_off);
            }
        }
        if let Some((&succ_off, &succ_len)) = self.free_space.range((new_off + new_len)..).next() {
            if succ_off == new_off + new_len {
                new_len += succ_len;
                self.free_space.remove(&succ_off);
            }
        }

        self.free_space.insert(new_off, new_len);
        self.free_bytes += length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit_allocates_in_order() {
        let mut alloc = DiskAllocator::new(1024);
        let a = alloc.allocate(100).unwrap();
        let b = alloc.allocate(100).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 100);
        assert_eq!(alloc.free_bytes(), 1024 - 200);
    }

    #[test]
    fn free_coalesces_with_neighbors() {
        let mut alloc = DiskAllocator::new(300);
        let a = alloc.allocate(100).unwrap();
        let b = alloc.allocate(100).unwrap();
        let c = alloc.allocate(100).unwrap();
        alloc.free(a, 100);
        alloc.free(c, 100);
        alloc.free(b, 100);
        assert_eq!(alloc.free_bytes(), 300);
        assert_eq!(alloc.free_space.len(), 1);
        assert_eq!(*alloc.free_space.get(&0).unwrap(), 300);
    }

    #[test]
    fn out_of_space_without_autogrow() {
        let mut alloc = DiskAllocator::new(100);
        let err = alloc.allocate(200).unwrap_err();
        assert!(matches!(err, ExMemError::OutOfSpace { .. }));
    }

    #[test]
    fn autogrow_extends_the_disk() {
        let mut alloc = DiskAllocator::new(0);
        let off = alloc.allocate(4096).unwrap();
        assert_eq!(off, 0);
        assert_eq!(alloc.total_bytes(), 4096);
        let off2 = alloc.allocate(4096).unwrap();
        assert_eq!(off2, 4096);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_is_fatal() {
        let mut alloc = DiskAllocator::new(100);
        let off = alloc.allocate(100).unwrap();
        alloc.free(off, 100);
        alloc.free(off, 100);
    }

    #[test]
    fn bulk_allocate_returns_contiguous_span_when_available() {
        let mut alloc = DiskAllocator::new(1000);
        let bids = alloc.allocate_bulk(4, 100).unwrap();
        assert_eq!(bids, vec![0, 100, 200, 300]);
    }
}
