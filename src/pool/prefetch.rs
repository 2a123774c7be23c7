//! Prefetch pool (§4.4 "Prefetch pool"): `P` block buffers and a map from
//! BID to `(buffer, in-flight request)`, used to read ahead along a
//! caller-supplied access sequence. `hint` schedules a read (flushing a
//! same-BID in-flight write first); `read` fills a caller's target block
//! either by copying a completed prefetch or issuing a fresh synchronous
//! read.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::bid::{Bid, TypedBlock};
use crate::error::Result;
use crate::mng::BlockManager;
use crate::pool::write_pool::WritePool;
use crate::request::RequestHandle;

struct Slot<T, const N: usize, const BLOCK_BYTES: usize> {
    block: TypedBlock<T, N, BLOCK_BYTES>,
    req: Option<RequestHandle>,
    bid: Bid<BLOCK_BYTES>,
}

pub struct PrefetchPool<T, const N: usize, const BLOCK_BYTES: usize> {
    manager: Arc<BlockManager>,
    slots: Vec<Slot<T, N, BLOCK_BYTES>>,
    free: Vec<usize>,
    /// bid -> slot index, for slots currently holding a hinted prefetch.
    by_bid: HashMap<Bid<BLOCK_BYTES>, usize>,
    /// Issue order of occupied slots, oldest first, for eviction.
    order: VecDeque<usize>,
}

impl<T, const N: usize, const BLOCK_BYTES: usize> PrefetchPool<T, N, BLOCK_BYTES>
where
    T: Copy + Default,
{
    pub fn new(manager: Arc<BlockManager>, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                block: TypedBlock::new(),
                req: None,
                bid: Bid::new(0, 0),
            })
            .collect::<Vec<_>>();
        let free = (0..capacity).collect();
        PrefetchPool {
            manager,
            slots,
            free,
            by_bid: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn evict_oldest(&mut self) -> usize {
        loop {
            let idx = self
                .order
                .pop_front()
                .expect("eviction requested with no outstanding prefetch to evict");
            // A slot may appear in `order` once and only once; if it was
            // already consumed by `read`, `by_bid` no longer maps to it
            // and there is nothing to wait on.
            let slot = &self.slots[idx];
            if self.by_bid.get(&slot.bid) != Some(&idx) {
                continue;
            }
            if let Some(req) = &self.slots[idx].req {
                req.wait().ok();
            }
            self.by_bid.remove(&slot.bid);
            return idx;
        }
    }

    fn claim_free_slot(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            return idx;
        }
        self.evict_oldest()
    }

    /// Inserts `bid` into the pool's prefetch schedule. If `write_pool`
    /// has a write in flight for the same BID, it is awaited first so the
    /// read observes the most recent data.
    pub fn hint(&mut self, bid: Bid<BLOCK_BYTES>, write_pool: &mut WritePool<T, N, BLOCK_BYTES>) -> Result<()> {
        if let Some(req) = write_pool.get_request(bid) {
            req.wait()?;
        }

        if self.by_bid.contains_key(&bid) {
            return Ok(());
        }

        let idx = self.claim_free_slot();
        let disk = self.manager.disk(bid.disk);
        let req = disk.aread(self.slots[idx].block.as_bytes_mut(), bid.offset)?;
        self.manager.stats().record_read(BLOCK_BYTES);
        self.slots[idx].req = Some(req);
        self.slots[idx].bid = bid;
        self.by_bid.insert(bid, idx);
        self.order.push_back(idx);
        Ok(())
    }

    /// Fills `target` with the contents of `bid`, either by waiting on and
    /// copying a hinted prefetch, or — if `bid` was never hinted — issuing
    /// and waiting on a fresh read directly into `target`.
    pub fn read(&mut self, target: &mut TypedBlock<T, N, BLOCK_BYTES>, bid: Bid<BLOCK_BYTES>) -> Result<()> {
        if let Some(&idx) = self.by_bid.get(&bid) {
            if let Some(req) = self.slots[idx].req.take() {
                req.wait()?;
            }
            target.begin_mut().copy_from_slice(self.slots[idx].block.begin());
            self.by_bid.remove(&bid);
            self.free.push(idx);
            return Ok(());
        }

        let disk = self.manager.disk(bid.disk);
        let req = disk.aread(target.as_bytes_mut(), bid.offset)?;
        self.manager.stats().record_read(BLOCK_BYTES);
        req.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::sim::SimFile;
    use crate::queue::{Disk, PriorityOp};
    use crate::stats::Stats;

    fn manager() -> Arc<BlockManager> {
        let disk = Disk::new(Arc::new(SimFile::new()), PriorityOp::None);
        Arc::new(BlockManager::from_disks(vec![disk], &[1 << 20], Arc::new(Stats::new())))
    }

    #[test]
    fn hint_then_read_returns_written_data() {
        let mgr = manager();
        mgr.disk(0).file().set_size(4096).unwrap();
        let bid: Bid<16> = Bid::new(0, 0);
        let data = [1u32, 2, 3, 4];
        mgr.disk(0).awrite(bytemuck_bytes(&data), 0).unwrap().wait().unwrap();

        let mut write_pool: WritePool<u32, 4, 16> = WritePool::new(Arc::clone(&mgr), 1);
        let mut pool: PrefetchPool<u32, 4, 16> = PrefetchPool::new(Arc::clone(&mgr), 2);
        pool.hint(bid, &mut write_pool).unwrap();
        let mut target: TypedBlock<u32, 4, 16> = TypedBlock::new();
        pool.read(&mut target, bid).unwrap();
        assert_eq!(target.begin(), &data);
    }

    #[test]
    fn read_without_hint_still_works() {
        let mgr = manager();
        mgr.disk(0).file().set_size(4096).unwrap();
        let bid: Bid<16> = Bid::new(0, 0);
        let data = [9u32, 8, 7, 6];
        mgr.disk(0).awrite(bytemuck_bytes(&data), 0).unwrap().wait().unwrap();

        let mut pool: PrefetchPool<u32, 4, 16> = PrefetchPool::new(Arc::clone(&mgr), 2);
        let mut target: TypedBlock<u32, 4, 16> = TypedBlock::new();
        pool.read(&mut target, bid).unwrap();
        assert_eq!(target.begin(), &data);
    }

    fn bytemuck_bytes(data: &[u32]) -> &[u8] {
        unsafe { std::slice::from_raw_parts(data.as_ptr() as *const u8, data.len() * 4) }
    }
}
