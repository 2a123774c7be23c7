//! Buffered input stream (§4.4): wraps a materialized sequence of BIDs (one
//! per block of a run or merge output) and a [`PrefetchPool`]. `current()`
//! / `advance()` play the role of the source's `operator*()` / `++`:
//! crossing a block boundary hands the consumed block back to the pool —
//! which, in turn, issues the next hint along the prefetch schedule.
//!
//! Blocks are always *consumed* in `bids` order — reordering that would
//! reorder the elements a merge cursor hands to the loser tree, breaking
//! the nondecreasing-per-run invariant §3 requires. What the prefetch
//! schedule (`pool::schedule`) is free to reorder is the *issue* order of
//! hints within a look-ahead window, so disk-parallel reads can overlap;
//! see `issue_hints_ahead` below for why that reordering can never leave a
//! block unhinted by the time consumption reaches it.

use crate::bid::{Bid, TypedBlock};
use crate::error::Result;
use crate::pool::prefetch::PrefetchPool;
use crate::pool::write_pool::WritePool;

pub struct BufferedInputStream<T, const N: usize, const BLOCK_BYTES: usize> {
    bids: Vec<Bid<BLOCK_BYTES>>,
    /// Number of valid (non-sentinel-filler) elements in each block; the
    /// last block may be partially filled.
    counts: Vec<usize>,
    order: Vec<usize>,
    look_ahead: usize,
    issued_up_to: usize,
    block_pos: usize,
    elem_pos: usize,
    block: TypedBlock<T, N, BLOCK_BYTES>,
}

impl<T, const N: usize, const BLOCK_BYTES: usize> BufferedInputStream<T, N, BLOCK_BYTES>
where
    T: Copy + Default,
{
    pub fn new(
        pool: &mut PrefetchPool<T, N, BLOCK_BYTES>,
        write_pool: &mut WritePool<T, N, BLOCK_BYTES>,
        bids: Vec<Bid<BLOCK_BYTES>>,
        counts: Vec<usize>,
        look_ahead: usize,
    ) -> Result<Self> {
        assert_eq!(bids.len(), counts.len());
        let disk_of_block: Vec<usize> = bids.iter().map(|b| b.disk).collect();
        let order = crate::pool::schedule::greedy_disk_aware_schedule(&disk_of_block, look_ahead, pool.capacity());
        let mut stream = BufferedInputStream {
            bids,
            counts,
            order,
            look_ahead: look_ahead.max(1),
            issued_up_to: 0,
            block_pos: 0,
            elem_pos: 0,
            block: TypedBlock::new(),
        };
        stream.issue_hints_ahead(pool, write_pool)?;
        if !stream.bids.is_empty() {
            let bid = stream.bids[stream.block_pos];
            pool.read(&mut stream.block, bid)?;
        }
        Ok(stream)
    }

    /// Issues hints for `order[issued_up_to..target)`, where `target =
    /// block_pos + look_ahead`. `order` is a schedule permutation with the
    /// property that every window of `window <= look_ahead` consecutive
    /// positions is a permutation of the *same* contiguous range of
    /// original block indices (`pool::schedule::greedy_disk_aware_schedule`'s
    /// windowing) — so once `issued_up_to` reaches `target`, every original
    /// index `<= block_pos` has necessarily been hinted: `block_pos`'s own
    /// window is entirely among the first `target` issued positions,
    /// because `target - block_pos = look_ahead >= window` always clears
    /// that whole window, whatever order the schedule issued it in.
    fn issue_hints_ahead(
        &mut self,
        pool: &mut PrefetchPool<T, N, BLOCK_BYTES>,
        write_pool: &mut WritePool<T, N, BLOCK_BYTES>,
    ) -> Result<()> {
        let target = (self.block_pos + self.look_ahead).min(self.order.len());
        while self.issued_up_to < target {
            let bid = self.bids[self.order[self.issued_up_to]];
            pool.hint(bid, write_pool)?;
            self.issued_up_to += 1;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.block_pos >= self.bids.len()
    }

    pub fn current(&self) -> &T {
        assert!(!self.is_empty(), "read past end of buffered input stream");
        &self.block.begin()[self.elem_pos]
    }

    pub fn advance(
        &mut self,
        pool: &mut PrefetchPool<T, N, BLOCK_BYTES>,
        write_pool: &mut WritePool<T, N, BLOCK_BYTES>,
    ) -> Result<()> {
        assert!(!self.is_empty(), "advance past end of buffered input stream");
        self.elem_pos += 1;
        if self.elem_pos < self.counts[self.block_pos] {
            return Ok(());
        }
        self.block_pos += 1;
        self.elem_pos = 0;
        self.issue_hints_ahead(pool, write_pool)?;
        if !self.is_empty() {
            let bid = self.bids[self.block_pos];
            pool.read(&mut self.block, bid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::sim::SimFile;
    use crate::mng::BlockManager;
    use crate::queue::{Disk, PriorityOp};
    use crate::stats::Stats;
    use std::sync::Arc;

    #[test]
    fn streams_across_block_boundaries_in_order() {
        let disk = Disk::new(Arc::new(SimFile::new()), PriorityOp::None);
        let mgr = Arc::new(BlockManager::from_disks(vec![disk], &[1 << 20], Arc::new(Stats::new())));
        mgr.disk(0).file().set_size(4096).unwrap();

        const BLOCK_BYTES: usize = 16;
        let mut write_pool: WritePool<u32, 4, BLOCK_BYTES> = WritePool::new(Arc::clone(&mgr), 2);
        let bids = vec![Bid::new(0, 0), Bid::new(0, BLOCK_BYTES as u64)];
        for (i, &bid) in bids.iter().enumerate() {
            let mut block: TypedBlock<u32, 4, BLOCK_BYTES> = TypedBlock::new();
            block.begin_mut().copy_from_slice(&[
                (i * 4) as u32,
                (i * 4 + 1) as u32,
                (i * 4 + 2) as u32,
                (i * 4 + 3) as u32,
            ]);
            write_pool.write(block, bid).wait().unwrap();
        }

        let mut pool: PrefetchPool<u32, 4, BLOCK_BYTES> = PrefetchPool::new(Arc::clone(&mgr), 2);
        let mut stream = BufferedInputStream::new(&mut pool, &mut write_pool, bids, vec![4, 4], 2).unwrap();

        let mut seen = Vec::new();
        while !stream.is_empty() {
            seen.push(*stream.current());
            stream.advance(&mut pool, &mut write_pool).unwrap();
        }
        assert_eq!(seen, (0..8).collect::<Vec<u32>>());
    }
}
