//! External priority queue (§4.5.4). Grounded in
//! `original_source/containers/priority_queue.h`'s cascade of an insertion
//! heap, internal mergers, and external mergers sharing the same
//! prefetch/write pools as [`crate::algo::sort`] — this module reuses
//! [`crate::algo::loser_tree::LoserTree`] and the run-formation/merge
//! helpers from [`crate::algo::sort`] directly rather than duplicating
//! them, since a priority-queue level and a sort-cascade level are the
//! same merge primitive.
//!
//! **Open Question resolution.** §4.5.4's prose names the logical top
//! `max(insert_heap.top, top_delete_buffer.current)`, but §8's testable
//! properties ("popped sequence is nondecreasing under `cmp`", "the
//! priority queue can return the overall *minimum* under `cmp` of all
//! pushed-not-yet-popped elements") and concrete scenario 4 (ascending
//! pushes pop back out ascending) are unanimous in the other direction.
//! This implementation follows the testable properties: `top`/`pop`
//! return the *minimum* under `cmp`. That reading has the added benefit
//! of letting every level here reuse [`crate::algo::sort`]'s ascending
//! run-formation and merge helpers completely unmodified — a
//! priority-queue level's sequences are sorted and sentinel-padded
//! exactly like a sort run, just capped at length `N` instead of a whole
//! memory buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::algo::cmp::SortCmp;
use crate::algo::loser_tree::{LoserTree, MergeCursor};
use crate::algo::run::Run;
use crate::algo::sort::{flush_buffer_as_run, materialize_run, merge_runs};
use crate::error::Result;
use crate::mng::strategy::StripingStrategy;
use crate::mng::BlockManager;
use crate::pool::{PrefetchPool, WritePool};
use crate::request::wait_all;

/// A cursor over an in-memory sequence, for merging internal levels'
/// sequences through the same [`LoserTree`] the external levels use.
struct VecCursor<T> {
    data: Vec<T>,
    pos: usize,
}

impl<T: Copy> MergeCursor<T> for VecCursor<T> {
    fn current(&self) -> T {
        self.data[self.pos]
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn advance(&mut self) -> Result<()> {
        self.pos += 1;
        Ok(())
    }
}

/// Capacity-planning knobs (§4.5.4 "Capacity planning"): the insertion
/// heap's capacity `N`, the fan-in of internal (in-memory) merge levels,
/// how many internal levels exist before cascading to disk, and the
/// fan-in of external (disk-backed) merge levels.
#[derive(Debug, Clone, Copy)]
pub struct PqueueConfig {
    pub insert_heap_capacity: usize,
    pub internal_arity: usize,
    pub internal_levels_cap: usize,
    pub external_arity: usize,
}

impl PqueueConfig {
    /// Derives a small configuration from an internal memory budget and
    /// element size: the insertion heap gets roughly a quarter of the
    /// budget, the rest is assumed spent on the shared prefetch/write
    /// pools the caller constructs separately. Internal/external arities
    /// default to 4, matching the "degree <= 4" reference figure in
    /// §4.5.4's description of the top delete buffer's refill merge.
    pub fn plan(internal_mem_bytes: usize, element_bytes: usize) -> Self {
        let n = (internal_mem_bytes / 4 / element_bytes.max(1)).clamp(16, 1 << 20);
        PqueueConfig {
            insert_heap_capacity: n,
            internal_arity: 4,
            internal_levels_cap: 2,
            external_arity: 4,
        }
    }
}

/// A plain binary min-heap keyed by a runtime [`SortCmp`] rather than
/// `Ord`, playing the role of §4.5.4's "top-level insert heap". `peek`/
/// `pop` return the minimum under `cmp`, matching the priority queue's
/// overall ordering (see module doc comment).
struct InsertHeap<T, C: SortCmp<T>> {
    data: Vec<T>,
    cmp: C,
}

impl<T: Copy, C: SortCmp<T>> InsertHeap<T, C> {
    fn new(cmp: C) -> Self {
        InsertHeap { data: Vec::new(), cmp }
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn peek(&self) -> Option<&T> {
        self.data.first()
    }

    fn push(&mut self, value: T) {
        self.data.push(value);
        let mut i = self.data.len() - 1;
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.cmp.less(&self.data[i], &self.data[parent]) {
                self.data.swap(parent, i);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn pop(&mut self) -> Option<T> {
        if self.data.is_empty() {
            return None;
        }
        let last = self.data.len() - 1;
        self.data.swap(0, last);
        let top = self.data.pop();
        let n = self.data.len();
        let mut i = 0;
        loop {
            let (l, r) = (2 * i + 1, 2 * i + 2);
            let mut smallest = i;
            if l < n && self.cmp.less(&self.data[l], &self.data[smallest]) {
                smallest = l;
            }
            if r < n && self.cmp.less(&self.data[r], &self.data[smallest]) {
                smallest = r;
            }
            if smallest == i {
                break;
            }
            self.data.swap(i, smallest);
            i = smallest;
        }
        top
    }

    /// Heap-sorts the whole heap out into a `Vec` ordered ascending under
    /// `cmp`, emptying the heap. Used when the heap fills and must become
    /// a new level-0 sequence.
    fn drain_sorted_asc(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.data.len());
        while let Some(v) = self.pop() {
            out.push(v);
        }
        out
    }
}

/// Merges `seqs` (each sorted ascending under `cmp`) into one ascending
/// sequence via a [`LoserTree`], the same primitive `merge_runs` drives.
fn merge_in_memory_sequences<T, C>(seqs: Vec<Vec<T>>, cmp: &C) -> Result<Vec<T>>
where
    T: Copy,
    C: SortCmp<T>,
{
    let total: usize = seqs.iter().map(|s| s.len()).sum();
    let cursors: Vec<VecCursor<T>> = seqs.into_iter().map(|data| VecCursor { data, pos: 0 }).collect();
    let mut tree = LoserTree::new(cursors, cmp.clone());
    let mut out = Vec::with_capacity(total);
    tree.multi_merge(&mut out, total)?;
    Ok(out)
}

/// Merges two sequences already sorted ascending under `cmp` into one,
/// preserving that order. Used to fold a freshly materialized external
/// run into whatever the top delete buffer already holds, without
/// rebuilding a tree for what is almost always a two-way merge.
fn merge_ascending<T, C>(mut a: VecDeque<T>, b: Vec<T>, cmp: &C) -> VecDeque<T>
where
    T: Copy,
    C: SortCmp<T>,
{
    let mut out = VecDeque::with_capacity(a.len() + b.len());
    let mut b = b.into_iter().peekable();
    loop {
        match (a.front().copied(), b.peek().copied()) {
            (Some(av), Some(bv)) => {
                if cmp.less(&bv, &av) {
                    out.push_back(bv);
                    b.next();
                } else {
                    out.push_back(av);
                    a.pop_front();
                }
            }
            (Some(av), None) => {
                out.push_back(av);
                a.pop_front();
            }
            (None, Some(bv)) => {
                out.push_back(bv);
                b.next();
            }
            (None, None) => break,
        }
    }
    out
}

struct InternalLevel<T> {
    /// Each entry is a complete sequence, sorted ascending under `cmp`;
    /// at most `internal_arity` sequences live here at once.
    sequences: Vec<Vec<T>>,
}

struct ExternalLevel<T, const BLOCK_BYTES: usize> {
    runs: Vec<Run<T, BLOCK_BYTES>>,
}

/// Which collection currently holds the queue's minimum element, so
/// [`ExtPriorityQueue::pop`] knows where to remove it from once
/// [`ExtPriorityQueue::find_best`] has picked a winner.
#[derive(Clone, Copy)]
enum Src {
    Heap,
    Internal(usize, usize),
    External(usize, usize),
    Buffer,
}

/// The external priority queue (§4.5.4): an in-memory insertion heap
/// feeding a cascade of in-memory "internal" merge levels, which in turn
/// cascade into disk-backed "external" merge levels sharing a
/// [`PrefetchPool`]/[`WritePool`] pair. `top`/`pop` return the minimum
/// element under the caller's comparator across all of these (see the
/// module doc comment for why this reads §4.5.4 against the testable
/// properties rather than literally), backed by a lazily-filled top
/// delete buffer for elements already pulled off disk.
///
/// Simplification versus the reference design: rather than maintaining
/// a fixed-size delete buffer per level refilled by a bounded-degree
/// merge, this implementation keeps one top delete buffer that absorbs
/// an external run's full contents the first time that run's cached
/// trigger value becomes the queue's minimum (see [`Src::External`] in
/// [`ExtPriorityQueue::pop`]). Each run is materialized at most once, so
/// total I/O is the same; only the buffer's instantaneous size differs
/// from the reference's fixed `B1`.
pub struct ExtPriorityQueue<T, const N: usize, const BLOCK_BYTES: usize, C: SortCmp<T>> {
    cmp: C,
    manager: Arc<BlockManager>,
    config: PqueueConfig,
    strategy: Box<dyn StripingStrategy>,
    insert_heap: InsertHeap<T, C>,
    internal_levels: Vec<InternalLevel<T>>,
    external_levels: Vec<ExternalLevel<T, BLOCK_BYTES>>,
    top_delete_buffer: VecDeque<T>,
    size: usize,
    prefetch_pool: PrefetchPool<T, N, BLOCK_BYTES>,
    write_pool: WritePool<T, N, BLOCK_BYTES>,
    look_ahead: usize,
}

impl<T, const N: usize, const BLOCK_BYTES: usize, C> ExtPriorityQueue<T, N, BLOCK_BYTES, C>
where
    T: Copy + Default,
    C: SortCmp<T>,
{
    /// Builds a queue over caller-supplied pools (§6
    /// `priority_queue(prefetch_pool, write_pool)`), sharing them the way
    /// the sort engine shares a pool pair across its cascade levels.
    pub fn new(
        manager: Arc<BlockManager>,
        cmp: C,
        config: PqueueConfig,
        strategy: Box<dyn StripingStrategy>,
        prefetch_pool: PrefetchPool<T, N, BLOCK_BYTES>,
        write_pool: WritePool<T, N, BLOCK_BYTES>,
        look_ahead: usize,
    ) -> Self {
        ExtPriorityQueue {
            insert_heap: InsertHeap::new(cmp.clone()),
            cmp,
            manager,
            config,
            strategy,
            internal_levels: Vec::new(),
            external_levels: Vec::new(),
            top_delete_buffer: VecDeque::new(),
            size: 0,
            prefetch_pool,
            write_pool,
            look_ahead,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Inserts into the top-level insert heap (§4.5.4 "Push"); spills the
    /// heap into the level cascade once it fills.
    pub fn push(&mut self, value: T) -> Result<()> {
        self.insert_heap.push(value);
        self.size += 1;
        if self.insert_heap.len() >= self.config.insert_heap_capacity {
            let seq = self.insert_heap.drain_sorted_asc();
            self.insert_into_internal_level(0, seq)?;
        }
        Ok(())
    }

    fn insert_into_internal_level(&mut self, level: usize, seq: Vec<T>) -> Result<()> {
        while self.internal_levels.len() <= level {
            self.internal_levels.push(InternalLevel { sequences: Vec::new() });
        }
        self.internal_levels[level].sequences.push(seq);
        if self.internal_levels[level].sequences.len() <= self.config.internal_arity {
            return Ok(());
        }

        // This level is over capacity: merge everything at this level
        // into one sequence, then either hand it to the next internal
        // level or, once the internal cascade is exhausted, spill it to
        // disk.
        let seqs = std::mem::take(&mut self.internal_levels[level].sequences);
        let merged = merge_in_memory_sequences(seqs, &self.cmp)?;
        if level + 1 < self.config.internal_levels_cap {
            self.insert_into_internal_level(level + 1, merged)
        } else {
            self.spill_to_external(merged)
        }
    }

    fn spill_to_external(&mut self, seq: Vec<T>) -> Result<()> {
        let (run, reqs) = flush_buffer_as_run::<T, N, BLOCK_BYTES, _>(
            seq,
            &self.cmp,
            &self.manager,
            self.strategy.as_mut(),
            &mut self.write_pool,
        )?;
        wait_all(&reqs)?;
        self.push_external_run(0, run)
    }

    fn push_external_run(&mut self, level: usize, run: Run<T, BLOCK_BYTES>) -> Result<()> {
        while self.external_levels.len() <= level {
            self.external_levels.push(ExternalLevel { runs: Vec::new() });
        }
        self.external_levels[level].runs.push(run);
        if self.external_levels[level].runs.len() <= self.config.external_arity {
            return Ok(());
        }

        let runs = std::mem::take(&mut self.external_levels[level].runs);
        let merged = merge_runs(
            &runs,
            &self.cmp,
            &self.manager,
            self.strategy.as_mut(),
            &mut self.prefetch_pool,
            &mut self.write_pool,
            self.look_ahead,
        )?;
        for r in &runs {
            self.manager.delete_blocks(&r.bids());
        }
        self.push_external_run(level + 1, merged)
    }

    /// Scans every live candidate for the queue's minimum under `cmp`:
    /// the insert heap's top, each internal sequence's front, each
    /// external run's cached trigger (cheap — no disk read, since a
    /// run's first entry's trigger is its smallest element), and the top
    /// delete buffer's front. Read-only; `pop` re-runs this after
    /// materializing a winning external run so mutation only happens
    /// once the actual removal site is known.
    fn find_best(&self) -> Option<(T, Src)> {
        let mut best: Option<(T, Src)> = None;

        if let Some(&v) = self.insert_heap.peek() {
            best = Some((v, Src::Heap));
        }
        for (li, level) in self.internal_levels.iter().enumerate() {
            for (si, seq) in level.sequences.iter().enumerate() {
                if let Some(&f) = seq.first() {
                    if best.map_or(true, |(b, _)| self.cmp.less(&f, &b)) {
                        best = Some((f, Src::Internal(li, si)));
                    }
                }
            }
        }
        for (li, level) in self.external_levels.iter().enumerate() {
            for (ri, run) in level.runs.iter().enumerate() {
                if let Some(entry) = run.entries.first() {
                    if best.map_or(true, |(b, _)| self.cmp.less(&entry.trigger, &b)) {
                        best = Some((entry.trigger, Src::External(li, ri)));
                    }
                }
            }
        }
        if let Some(&f) = self.top_delete_buffer.front() {
            if best.map_or(true, |(b, _)| self.cmp.less(&f, &b)) {
                best = Some((f, Src::Buffer));
            }
        }
        best
    }

    /// Returns the queue's minimum element under `cmp` without removing
    /// it (§4.5.4 "Top").
    pub fn top(&self) -> Option<T> {
        self.find_best().map(|(v, _)| v)
    }

    /// Removes and returns the queue's minimum element under `cmp`
    /// (§4.5.4 "Pop"). When the winner lives in an on-disk run, that run
    /// is materialized in full and folded into the top delete buffer
    /// before the loop re-evaluates — at most one disk round trip per
    /// run, ever.
    pub fn pop(&mut self) -> Result<Option<T>> {
        loop {
            let (_, src) = match self.find_best() {
                Some(b) => b,
                None => return Ok(None),
            };
            match src {
                Src::Heap => {
                    let v = self.insert_heap.pop();
                    self.size -= 1;
                    return Ok(v);
                }
                Src::Internal(li, si) => {
                    let seq = &mut self.internal_levels[li].sequences[si];
                    let v = seq.remove(0);
                    if seq.is_empty() {
                        self.internal_levels[li].sequences.swap_remove(si);
                    }
                    self.size -= 1;
                    return Ok(Some(v));
                }
                Src::Buffer => {
                    let v = self.top_delete_buffer.pop_front();
                    self.size -= 1;
                    return Ok(v);
                }
                Src::External(li, ri) => {
                    let run = self.external_levels[li].runs.remove(ri);
                    let data = materialize_run(&run, &mut self.prefetch_pool, &mut self.write_pool, self.look_ahead)?;
                    self.manager.delete_blocks(&run.bids());
                    self.top_delete_buffer =
                        merge_ascending(std::mem::take(&mut self.top_delete_buffer), data, &self.cmp);
                    // Loop again: the buffer now holds this run's data and
                    // may or may not still be the winner.
                }
            }
        }
    }
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

    fn small_queue(n_disks: usize) -> ExtPriorityQueue<i32, 4, 16, Less<i32>> {
        let mgr = manager(n_disks);
        let strategy: Box<dyn StripingStrategy> = Box::new(Striping { begin: 0, disks: n_disks });
        let config = PqueueConfig {
            insert_heap_capacity: 8,
            internal_arity: 2,
            internal_levels_cap: 1,
            external_arity: 2,
        };
        let prefetch = PrefetchPool::new(Arc::clone(&mgr), 4);
        let write = WritePool::new(Arc::clone(&mgr), 4);
        ExtPriorityQueue::new(mgr, Less::default_i32(), config, strategy, prefetch, write, 2)
    }

    #[test]
    fn empty_queue_has_no_top() {
        let pq = small_queue(1);
        assert!(pq.is_empty());
        assert_eq!(pq.top(), None);
    }

    #[test]
    fn single_push_pop_round_trips() {
        let mut pq = small_queue(1);
        pq.push(42).unwrap();
        assert_eq!(pq.top(), Some(42));
        assert_eq!(pq.pop().unwrap(), Some(42));
        assert!(pq.is_empty());
        assert_eq!(pq.pop().unwrap(), None);
    }

    #[test]
    fn pops_in_ascending_order_across_cascading_levels() {
        let mut pq = small_queue(2);
        // 40 elements with insert_heap_capacity=8, internal_arity=2,
        // internal_levels_cap=1, external_arity=2: this forces at least
        // one internal merge and one external spill/merge.
        let mut input: Vec<i32> = (1..=40).collect();
        input.reverse();
        for v in &input {
            pq.push(*v).unwrap();
        }
        assert_eq!(pq.len(), 40);

        let mut popped = Vec::new();
        while let Some(v) = pq.pop().unwrap() {
            popped.push(v);
        }
        let expected: Vec<i32> = (1..=40).collect();
        assert_eq!(popped, expected);
        assert!(pq.is_empty());
    }

    #[test]
    fn pushing_ascending_then_popping_reproduces_the_sequence() {
        let mut pq = small_queue(2);
        let input: Vec<i32> = (0..500).collect();
        for v in &input {
            pq.push(*v).unwrap();
        }
        let mut popped = Vec::new();
        while let Some(v) = pq.pop().unwrap() {
            popped.push(v);
        }
        assert_eq!(popped, input);
    }

    #[test]
    fn matches_std_binary_heap_oracle_under_interleaved_ops() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let mut pq = small_queue(2);
        // `Reverse` turns std's max-heap into a min-heap oracle, matching
        // this queue's minimum-under-`cmp` semantics.
        let mut oracle: BinaryHeap<Reverse<i32>> = BinaryHeap::new();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..500 {
            if oracle.is_empty() || rng.random_bool(0.6) {
                let v = rng.random_range(0..10_000);
                pq.push(v).unwrap();
                oracle.push(Reverse(v));
            } else {
                let expected = oracle.pop().map(|Reverse(v)| v);
                let got = pq.pop().unwrap();
                assert_eq!(got, expected);
            }
        }
        while let Some(Reverse(expected)) = oracle.pop() {
            assert_eq!(pq.pop().unwrap(), Some(expected));
        }
        assert!(pq.is_empty());
    }
}
