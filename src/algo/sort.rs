//! Run formation (§4.5.1) and the recursive merge cascade (§4.5.3), wired
//! together behind the public `sort()` entry point (§6). Grounded in
//! `original_source/algo/sort.h` and `include/stxxl/bits/algo/inmemsort.h`
//! for the double-buffered fill/sort/flush cycle, and `sort_helper.h` for
//! `optimal_merge_factor`.

use std::sync::Arc;

use crate::algo::cmp::SortCmp;
use crate::algo::loser_tree::{LoserTree, MergeCursor};
use crate::algo::run::{Run, RunEntry, SortedRuns};
use crate::bid::{Bid, TypedBlock};
use crate::error::{ExMemError, Result};
use crate::mng::strategy::StripingStrategy;
use crate::mng::BlockManager;
use crate::pool::{BufferedInputStream, PrefetchPool, WritePool};
use crate::request::{wait_all, RequestHandle};

/// Smallest `F` with `2 <= F <= arity` such that `ceil(n_runs / F) <=
/// arity`; falls back to `arity` when no such `F` exists (the cascade
/// will then need a further pass, which the caller's loop already
/// accounts for). Not spelled out numerically in `spec.md`; grounded in
/// STXXL's standard merge-factor formula per `SPEC_FULL.md` §C.
pub fn optimal_merge_factor(n_runs: usize, arity: usize) -> usize {
    if arity < 2 {
        return arity.max(1);
    }
    for f in 2..=arity {
        if n_runs.div_ceil(f) <= arity {
            return f;
        }
    }
    arity
}

/// Minimum memory, in bytes, for a two-way merge step with two prefetch
/// buffers and two write-back buffers (§4.5.3 "Fatal error if the memory
/// budget is below the minimum...").
pub fn minimum_merge_memory(block_bytes: usize) -> usize {
    4 * block_bytes
}

/// Derives the merger's arity from a memory budget: one write-back buffer
/// is reserved, the rest funds one prefetch buffer per active run. Shared
/// with the priority queue's external-level cascade, which needs the same
/// per-disk buffer accounting as the sort's merge cascade.
pub(crate) fn arity_from_budget(memory_budget_bytes: usize, block_bytes: usize) -> Result<usize> {
    if memory_budget_bytes < minimum_merge_memory(block_bytes) {
        return Err(ExMemError::InsufficientMergeMemory {
            budget_bytes: memory_budget_bytes,
            minimum_bytes: minimum_merge_memory(block_bytes),
        });
    }
    let total_blocks = memory_budget_bytes / block_bytes;
    Ok((total_blocks.saturating_sub(2)).max(2))
}

fn sort_in_place<T, C: SortCmp<T>>(buf: &mut [T], cmp: &C) {
    buf.sort_by(|a, b| {
        if cmp.less(a, b) {
            std::cmp::Ordering::Less
        } else if cmp.less(b, a) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });
}

/// Writes a sorted in-memory buffer out as one run: allocates
/// `ceil(len/N)` BIDs, pads the last block with `cmp.max_value()`, and
/// submits all the block writes — but does not wait on them, so the
/// caller can keep filling the next buffer while these are in flight
/// (§4.5.1 step 5 "Overlap"). The backpressure that makes this safe comes
/// from `write_pool.steal()` itself blocking once the pool is exhausted.
pub(crate) fn flush_buffer_as_run<T, const N: usize, const BLOCK_BYTES: usize, C: SortCmp<T>>(
    buf: Vec<T>,
    cmp: &C,
    manager: &BlockManager,
    strategy: &mut dyn StripingStrategy,
    write_pool: &mut WritePool<T, N, BLOCK_BYTES>,
) -> Result<(Run<T, BLOCK_BYTES>, Vec<RequestHandle>)>
where
    T: Copy + Default,
{
    let count = buf.len();
    let n_blocks = count.div_ceil(N).max(1);
    let bids: Vec<Bid<BLOCK_BYTES>> = manager.new_blocks_bulk(strategy, n_blocks)?;

    let mut entries = Vec::with_capacity(n_blocks);
    let mut reqs = Vec::with_capacity(n_blocks);

    for (i, &bid) in bids.iter().enumerate() {
        let mut block: TypedBlock<T, N, BLOCK_BYTES> = write_pool.steal();
        let start = i * N;
        let end = ((i + 1) * N).min(count);
        block.begin_mut()[..end - start].copy_from_slice(&buf[start..end]);
        for slot in &mut block.begin_mut()[end - start..] {
            *slot = cmp.max_value();
        }
        let trigger = block.begin()[0];
        entries.push(RunEntry { bid, trigger });
        reqs.push(write_pool.write(block, bid));
    }

    Ok((Run { entries, element_count: count }, reqs))
}

/// Run formation (§4.5.1): partitions the memory budget into two
/// `m`-block halves, fills/sorts/flushes each in turn. `m_blocks` is the
/// number of blocks per half-buffer; callers derive it from the memory
/// budget (`memory_budget_bytes / 2 / block_bytes`).
pub fn form_runs<T, const N: usize, const BLOCK_BYTES: usize, C: SortCmp<T>>(
    source: impl Iterator<Item = T>,
    cmp: &C,
    manager: &BlockManager,
    strategy: &mut dyn StripingStrategy,
    write_pool: &mut WritePool<T, N, BLOCK_BYTES>,
    m_blocks: usize,
) -> Result<SortedRuns<T, BLOCK_BYTES>>
where
    T: Copy + Default,
{
    let capacity = (m_blocks * N).max(N);
    let mut source = source.peekable();

    let mut first: Vec<T> = Vec::with_capacity(capacity.min(N));
    while first.len() < capacity {
        match source.next() {
            Some(v) => first.push(v),
            None => break,
        }
    }

    if first.is_empty() {
        return Ok(SortedRuns::empty());
    }

    // Small-input optimization: everything fits in one block and there's
    // nothing more in the source — skip run formation, keep the sorted
    // contents in memory.
    if first.len() <= N && source.peek().is_none() {
        sort_in_place(&mut first, cmp);
        let count = first.len();
        return Ok(SortedRuns {
            runs: Vec::new(),
            total_elements: count,
            small_result: Some(first),
        });
    }

    let mut runs = Vec::new();
    let mut total = 0usize;
    let mut all_reqs: Vec<RequestHandle> = Vec::new();
    let mut current = Some(first);

    while let Some(mut chunk) = current.take() {
        if chunk.is_empty() {
            break;
        }
        sort_in_place(&mut chunk, cmp);
        total += chunk.len();

        // While this buffer's writes are still in flight (they haven't
        // been waited on), fill and sort the next one.
        let (run, reqs) = flush_buffer_as_run(chunk, cmp, manager, strategy, write_pool)?;
        runs.push(run);
        all_reqs.extend(reqs);

        let mut next_chunk = Vec::with_capacity(capacity.min(N));
        while next_chunk.len() < capacity {
            match source.next() {
                Some(v) => next_chunk.push(v),
                None => break,
            }
        }
        if !next_chunk.is_empty() {
            current = Some(next_chunk);
        }
    }

    wait_all(&all_reqs)?;

    Ok(SortedRuns {
        runs,
        total_elements: total,
        small_result: None,
    })
}

/// A loser-tree leaf backed by a [`BufferedInputStream`], reaching the
/// shared prefetch/write pools through raw pointers rather than borrowed
/// references. The tree drives exactly one cursor's `advance()` at a time
/// (never two concurrently), so the aliasing here is benign even though
/// the borrow checker can't see it — the same reasoning that justifies
/// `RawBuf` in `request.rs`. A borrowed-reference version would require
/// every leaf to hold the *only* `&mut` to both pools simultaneously,
/// which is impossible with more than one leaf.
struct StreamCursor<T, const N: usize, const BLOCK_BYTES: usize> {
    stream: BufferedInputStream<T, N, BLOCK_BYTES>,
    pool: *mut PrefetchPool<T, N, BLOCK_BYTES>,
    write_pool: *mut WritePool<T, N, BLOCK_BYTES>,
}

unsafe impl<T: Send, const N: usize, const BLOCK_BYTES: usize> Send for StreamCursor<T, N, BLOCK_BYTES> {}

impl<T: Copy + Default, const N: usize, const BLOCK_BYTES: usize> MergeCursor<T>
    for StreamCursor<T, N, BLOCK_BYTES>
{
    fn current(&self) -> T {
        *self.stream.current()
    }

    fn is_empty(&self) -> bool {
        self.stream.is_empty()
    }

    fn advance(&mut self) -> Result<()> {
        // SAFETY: see struct doc comment — the loser tree never holds two
        // live leaf borrows at once.
        unsafe { self.stream.advance(&mut *self.pool, &mut *self.write_pool) }
    }
}

/// Merges the runs in `group` into a single new run, streaming through a
/// [`LoserTree`] and flushing output blocks through `write_pool` exactly
/// as run formation does. Grounded in §4.5.2's `multi_merge` plus the
/// cascade's "writing intermediate sorted runs back through the write
/// pool" (§4.5.3).
#[allow(clippy::too_many_arguments)]
pub fn merge_runs<T, const N: usize, const BLOCK_BYTES: usize, C: SortCmp<T>>(
    group: &[Run<T, BLOCK_BYTES>],
    cmp: &C,
    manager: &BlockManager,
    strategy: &mut dyn StripingStrategy,
    prefetch_pool: &mut PrefetchPool<T, N, BLOCK_BYTES>,
    write_pool: &mut WritePool<T, N, BLOCK_BYTES>,
    look_ahead: usize,
) -> Result<Run<T, BLOCK_BYTES>>
where
    T: Copy + Default,
{
    assert!(!group.is_empty());
    let total_elements: usize = group.iter().map(|r| r.element_count).sum();

    let mut streams = Vec::with_capacity(group.len());
    for run in group {
        let bids = run.bids();
        let counts = block_counts(run, N);
        let stream = BufferedInputStream::new(prefetch_pool, write_pool, bids, counts, look_ahead)?;
        streams.push(stream);
    }

    let pool_ptr: *mut PrefetchPool<T, N, BLOCK_BYTES> = &mut *prefetch_pool;
    let write_ptr: *mut WritePool<T, N, BLOCK_BYTES> = &mut *write_pool;

    let cursors: Vec<StreamCursor<T, N, BLOCK_BYTES>> = streams
        .into_iter()
        .map(|stream| StreamCursor {
            stream,
            pool: pool_ptr,
            write_pool: write_ptr,
        })
        .collect();

    let mut tree = LoserTree::new(cursors, cmp.clone());
    let mut values = Vec::with_capacity(total_elements);
    tree.multi_merge(&mut values, total_elements)?;

    let (run, reqs) = flush_buffer_as_run(values, cmp, manager, strategy, write_pool)?;
    wait_all(&reqs)?;
    Ok(run)
}

pub(crate) fn block_counts<T, const BLOCK_BYTES: usize>(
    run: &Run<T, BLOCK_BYTES>,
    capacity_per_block: usize,
) -> Vec<usize> {
    let mut remaining = run.element_count;
    run.entries
        .iter()
        .map(|_| {
            let take = remaining.min(capacity_per_block);
            remaining -= take;
            take
        })
        .collect()
}

/// Reads every element of `run` into memory in on-disk order. Used both by
/// `sort()`'s final materialization step and by the priority queue to pull
/// a level's backing runs into a delete buffer.
pub(crate) fn materialize_run<T, const N: usize, const BLOCK_BYTES: usize>(
    run: &Run<T, BLOCK_BYTES>,
    prefetch_pool: &mut PrefetchPool<T, N, BLOCK_BYTES>,
    write_pool: &mut WritePool<T, N, BLOCK_BYTES>,
    look_ahead: usize,
) -> Result<Vec<T>>
where
    T: Copy + Default,
{
    let bids = run.bids();
    let counts = block_counts(run, N);
    let mut stream = BufferedInputStream::new(prefetch_pool, write_pool, bids, counts, look_ahead)?;
    let mut out = Vec::with_capacity(run.element_count);
    while !stream.is_empty() {
        out.push(*stream.current());
        stream.advance(prefetch_pool, write_pool)?;
    }
    Ok(out)
}

/// Recursive cascade (§4.5.3): repeatedly merges groups of up to `arity`
/// runs until the run count is within `arity`, at which point a single
/// final merge (driven by the caller) can combine everything. Each pass's
/// intermediate runs are written back through `write_pool`; the BIDs of
/// merged-away runs are freed immediately.
#[allow(clippy::too_many_arguments)]
pub fn cascade_until_within_arity<T, const N: usize, const BLOCK_BYTES: usize, C: SortCmp<T>>(
    mut runs: Vec<Run<T, BLOCK_BYTES>>,
    arity: usize,
    cmp: &C,
    manager: &BlockManager,
    strategy: &mut dyn StripingStrategy,
    prefetch_pool: &mut PrefetchPool<T, N, BLOCK_BYTES>,
    write_pool: &mut WritePool<T, N, BLOCK_BYTES>,
    look_ahead: usize,
) -> Result<Vec<Run<T, BLOCK_BYTES>>>
where
    T: Copy + Default,
{
    while runs.len() > arity {
        let factor = optimal_merge_factor(runs.len(), arity);
        let mut next_level = Vec::with_capacity(runs.len().div_ceil(factor));
        for group in runs.chunks(factor) {
            let merged = merge_runs(group, cmp, manager, strategy, prefetch_pool, write_pool, look_ahead)?;
            for r in group {
                manager.delete_blocks(&r.bids());
            }
            next_level.push(merged);
        }
        runs = next_level;
    }
    Ok(runs)
}

/// The public sort entry point (§6 `sort(...)`): forms runs, cascades
/// until the run count is within the merger's arity, then performs the
/// single final merge and materializes the result.
#[allow(clippy::too_many_arguments)]
pub fn sort<T, const N: usize, const BLOCK_BYTES: usize, C: SortCmp<T>>(
    source: impl Iterator<Item = T>,
    cmp: C,
    manager: Arc<BlockManager>,
    strategy: &mut dyn StripingStrategy,
    memory_budget_bytes: usize,
    look_ahead: usize,
) -> Result<Vec<T>>
where
    T: Copy + Default,
{
    let arity = arity_from_budget(memory_budget_bytes, BLOCK_BYTES)?;
    let m_blocks = (memory_budget_bytes / 2 / BLOCK_BYTES).max(1);

    let mut write_pool: WritePool<T, N, BLOCK_BYTES> = WritePool::new(Arc::clone(&manager), arity.max(2));
    let formed = form_runs(source, &cmp, &manager, strategy, &mut write_pool, m_blocks)?;

    if let Some(small) = formed.small_result {
        return Ok(small);
    }
    if formed.runs.is_empty() {
        return Ok(Vec::new());
    }

    let mut prefetch_pool: PrefetchPool<T, N, BLOCK_BYTES> = PrefetchPool::new(Arc::clone(&manager), arity.max(2));

    let runs = cascade_until_within_arity(
        formed.runs,
        arity,
        &cmp,
        &manager,
        strategy,
        &mut prefetch_pool,
        &mut write_pool,
        look_ahead,
    )?;

    if runs.len() == 1 {
        let out = materialize_run(&runs[0], &mut prefetch_pool, &mut write_pool, look_ahead)?;
        manager.delete_blocks(&runs[0].bids());
        return Ok(out);
    }

    let merged = merge_runs(&runs, &cmp, &manager, strategy, &mut prefetch_pool, &mut write_pool, look_ahead)?;
    for r in &runs {
        manager.delete_blocks(&r.bids());
    }
    let out = materialize_run(&merged, &mut prefetch_pool, &mut write_pool, look_ahead)?;
    manager.delete_blocks(&merged.bids());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::cmp::Less;
    use crate::file::sim::SimFile;
    use crate::mng::strategy::Striping;
    use crate::queue::{Disk, PriorityOp};
    use crate::stats::Stats;

    fn manager(n_disks: usize) -> Arc<BlockManager> {
        let disks: Vec<Disk> = (0..n_disks)
            .map(|_| Disk::new(Arc::new(SimFile::new()), PriorityOp::None))
            .collect();
        let caps = vec![0i64; n_disks];
        Arc::new(BlockManager::from_disks(disks, &caps, Arc::new(Stats::new())))
    }

    #[test]
    fn optimal_merge_factor_reduces_within_one_pass_when_possible() {
        assert_eq!(optimal_merge_factor(8, 8), 2);
        assert_eq!(optimal_merge_factor(100, 8), 13);
    }

    #[test]
    fn sorts_small_input_via_small_result_path() {
        let mgr = manager(2);
        let mut strategy = Striping { begin: 0, disks: 2 };
        let input = vec![5, 4, 3, 2, 1];
        let out = sort::<i32, 8, 4096, _>(
            input.into_iter(),
            Less::default_i32(),
            mgr,
            &mut strategy,
            minimum_merge_memory(4096),
            2,
        )
        .unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sorts_input_spanning_multiple_runs() {
        let mgr = manager(2);
        let mut strategy = Striping { begin: 0, disks: 2 };
        let input: Vec<i32> = (0..200).rev().collect();
        let out = sort::<i32, 8, 4096, _>(
            input.clone().into_iter(),
            Less::default_i32(),
            mgr,
            &mut strategy,
            8 * 4096,
            2,
        )
        .unwrap();
        let mut expected = input;
        expected.sort();
        assert_eq!(out, expected);
    }

    #[test]
    fn empty_input_sorts_to_empty_output() {
        let mgr = manager(1);
        let mut strategy = Striping { begin: 0, disks: 1 };
        let out = sort::<i32, 8, 4096, _>(
            std::iter::empty(),
            Less::default_i32(),
            mgr,
            &mut strategy,
            minimum_merge_memory(4096),
            2,
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn budget_below_minimum_is_rejected() {
        let mgr = manager(1);
        let mut strategy = Striping { begin: 0, disks: 1 };
        let err = sort::<i32, 8, 4096, _>(
            vec![1, 2, 3].into_iter(),
            Less::default_i32(),
            mgr,
            &mut strategy,
            4096,
            2,
        )
        .unwrap_err();
        assert!(matches!(err, ExMemError::InsufficientMergeMemory { .. }));
    }
}
