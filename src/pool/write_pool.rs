//! Write-back pool (§4.4 "Write pool"). Grounded in
//! `original_source/mng/write_pool.h`: a dynamically resizable pool of
//! block buffers split into "free" and "busy" (in-flight write) sets.
//! `steal()` hands a free buffer to the caller, blocking on the oldest
//! in-flight write if none is free; buffers are reclaimed as their writes
//! complete.

use std::sync::Arc;

use crate::bid::{Bid, TypedBlock};
use crate::mng::BlockManager;
use crate::request::{wait_any, RequestHandle};

struct BusyEntry<T, const N: usize, const BLOCK_BYTES: usize> {
    block: TypedBlock<T, N, BLOCK_BYTES>,
    req: RequestHandle,
    bid: Bid<BLOCK_BYTES>,
}

pub struct WritePool<T, const N: usize, const BLOCK_BYTES: usize> {
    manager: Arc<BlockManager>,
    free: Vec<TypedBlock<T, N, BLOCK_BYTES>>,
    busy: Vec<BusyEntry<T, N, BLOCK_BYTES>>,
}

impl<T, const N: usize, const BLOCK_BYTES: usize> WritePool<T, N, BLOCK_BYTES>
where
    T: Copy + Default,
{
    pub fn new(manager: Arc<BlockManager>, init_size: usize) -> Self {
        let free = (0..init_size).map(|_| TypedBlock::new()).collect();
        WritePool {
            manager,
            free,
            busy: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.free.len() + self.busy.len()
    }

    /// Submits `block` for an asynchronous write to `bid`, taking
    /// ownership of it. The pool reclaims the buffer once the device
    /// completes the write.
    pub fn write(&mut self, block: TypedBlock<T, N, BLOCK_BYTES>, bid: Bid<BLOCK_BYTES>) -> RequestHandle {
        let disk = self.manager.disk(bid.disk);
        // Safety-relevant note: `block.elements` is a `Box`, so moving
        // `block` into `BusyEntry` below does not move the backing heap
        // allocation the in-flight request's raw pointer targets.
        let req = disk
            .awrite(block.as_bytes(), bid.offset)
            .expect("write pool submission to a shut-down disk");
        self.manager.stats().record_write(BLOCK_BYTES);
        self.busy.push(BusyEntry { block, req: req.clone(), bid });
        req
    }

    /// Returns a free buffer to the caller, waiting for the oldest
    /// in-flight write to complete if none is currently free.
    pub fn steal(&mut self) -> TypedBlock<T, N, BLOCK_BYTES> {
        if let Some(block) = self.free.pop() {
            return block;
        }
        assert!(!self.busy.is_empty(), "write pool exhausted with no busy buffers");
        let reqs: Vec<RequestHandle> = self.busy.iter().map(|e| e.req.clone()).collect();
        let idx = wait_any(&reqs).expect("non-empty busy set always completes");
        let entry = self.busy.remove(idx);
        entry.block
    }

    /// Looks up the in-flight write request for `bid`, if any — lets the
    /// prefetch pool discover writes that haven't yet landed.
    pub fn get_request(&self, bid: Bid<BLOCK_BYTES>) -> Option<RequestHandle> {
        self.busy.iter().find(|e| e.bid == bid).map(|e| e.req.clone())
    }

    /// Retrieves the specific buffer written to `bid`, waiting on its
    /// write and removing it from the busy set.
    pub fn steal_bid(&mut self, bid: Bid<BLOCK_BYTES>) -> Option<TypedBlock<T, N, BLOCK_BYTES>> {
        let idx = self.busy.iter().position(|e| e.bid == bid)?;
        let entry = self.busy.remove(idx);
        entry.req.wait().ok();
        Some(entry.block)
    }

    /// Resizes the pool to `new_size`, allocating fresh free buffers or
    /// stealing (and dropping) busy ones as needed.
    pub fn resize(&mut self, new_size: usize) {
        let diff = new_size as i64 - self.size() as i64;
        if diff > 0 {
            for _ in 0..diff {
                self.free.push(TypedBlock::new());
            }
        } else {
            for _ in 0..(-diff) {
                let _ = self.steal();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::sim::SimFile;
    use crate::mng::BlockManager;
    use crate::queue::{Disk, PriorityOp};
    use crate::stats::Stats;

    fn manager() -> Arc<BlockManager> {
        let disk = Disk::new(Arc::new(SimFile::new()), PriorityOp::None);
        Arc::new(BlockManager::from_disks(vec![disk], &[1 << 20], Arc::new(Stats::new())))
    }

    #[test]
    fn write_then_steal_recycles_buffer() {
        let mgr = manager();
        let mut pool: WritePool<u32, 4, 4096> = WritePool::new(Arc::clone(&mgr), 2);
        let mut block = pool.steal();
        block.begin_mut().copy_from_slice(&[1, 2, 3, 4]);
        let bid = Bid::new(0, 0);
        let req = pool.write(block, bid);
        req.wait().unwrap();
        let recycled = pool.steal();
        // Either a free buffer or the just-completed one comes back; pool
        // size is conserved either way.
        drop(recycled);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn get_request_finds_in_flight_write() {
        let mgr = manager();
        let mut pool: WritePool<u32, 4, 4096> = WritePool::new(Arc::clone(&mgr), 1);
        let block = pool.steal();
        let bid = Bid::new(0, 0);
        let req = pool.write(block, bid);
        let found = pool.get_request(bid).unwrap();
        assert!(found.ptr_eq(&req));
        req.wait().unwrap();
    }
}
