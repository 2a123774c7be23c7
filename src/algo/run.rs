//! `Run` and `SortedRuns` (§3): an ordered sequence of `(BID,
//! trigger_value)` entries with trigger values nondecreasing under the
//! comparator, plus the run-collection bookkeeping run formation and
//! merging thread through.

use crate::bid::Bid;

/// One block of a run: its BID plus the first element of that block,
/// stored alongside so runs can be compared without reading them back
/// (§GLOSSARY "Trigger value").
#[derive(Debug, Clone, Copy)]
pub struct RunEntry<T, const BLOCK_BYTES: usize> {
    pub bid: Bid<BLOCK_BYTES>,
    pub trigger: T,
}

/// A sorted sequence of blocks terminated by sentinel padding in its last
/// block, plus the true (non-padding) element count.
#[derive(Debug, Clone)]
pub struct Run<T, const BLOCK_BYTES: usize> {
    pub entries: Vec<RunEntry<T, BLOCK_BYTES>>,
    pub element_count: usize,
}

impl<T, const BLOCK_BYTES: usize> Run<T, BLOCK_BYTES> {
    pub fn bids(&self) -> Vec<Bid<BLOCK_BYTES>> {
        self.entries.iter().map(|e| e.bid).collect()
    }

    pub fn block_count(&self) -> usize {
        self.entries.len()
    }
}

/// The result of run formation or a merge pass: an ordered list of runs,
/// a parallel count of elements per run, the grand total, and — when the
/// whole input fit in one block — the sorted contents kept entirely in
/// memory instead of being written out (§4.5.1 "Small-input optimization").
#[derive(Debug, Clone)]
pub struct SortedRuns<T, const BLOCK_BYTES: usize> {
    pub runs: Vec<Run<T, BLOCK_BYTES>>,
    pub total_elements: usize,
    pub small_result: Option<Vec<T>>,
}

impl<T, const BLOCK_BYTES: usize> SortedRuns<T, BLOCK_BYTES> {
    pub fn empty() -> Self {
        SortedRuns {
            runs: Vec::new(),
            total_elements: 0,
            small_result: None,
        }
    }

    pub fn is_small_result(&self) -> bool {
        self.small_result.is_some()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}
