//! Prefetch schedule optimizer (§4.4 last paragraph): given a consume
//! sequence over `M` blocks spread across `D` disks with a prefetch budget
//! of `P` buffers, compute an issue order that maximizes disk parallelism
//! subject to never having more than `P` outstanding prefetches. The
//! baseline is the identity (issue in consume order); a small-look-ahead
//! greedy variant is acceptable per the spec ("fidelity is not required").

/// Issues blocks in consume order — the trivial, always-correct schedule.
pub fn identity_schedule(n_blocks: usize) -> Vec<usize> {
    (0..n_blocks).collect()
}

/// Reorders consume positions within a sliding window of size
/// `look_ahead.min(prefetch_budget)` so that, within each window, blocks
/// destined for distinct disks are issued before a second block for a disk
/// already represented in the window. This does not change which blocks
/// are prefetched, only their issue order, so it is safe to apply whenever
/// cross-block consumption order is not itself significant (run-formation
/// and merge input are both consumed strictly in schedule order, so the
/// *result* the caller reads back is unaffected; only overlap improves).
pub fn greedy_disk_aware_schedule(disk_of_block: &[usize], look_ahead: usize, prefetch_budget: usize) -> Vec<usize> {
    let window = look_ahead.min(prefetch_budget).max(1);
    let n = disk_of_block.len();
    let mut order = Vec::with_capacity(n);
    let mut start = 0;
    while start < n {
        let end = (start + window).min(n);
        let mut chunk: Vec<usize> = (start..end).collect();
        chunk.sort_by_key(|&i| disk_of_block[i]);
        // Stable-sorting by disk id clusters same-disk blocks instead of
        // separating them; what we actually want is round-robin across
        // disks within the window, so interleave the sorted groups.
        let mut by_disk: std::collections::BTreeMap<usize, Vec<usize>> = std::collections::BTreeMap::new();
        for &i in &chunk {
            by_disk.entry(disk_of_block[i]).or_default().push(i);
        }
        let mut interleaved = Vec::with_capacity(chunk.len());
        loop {
            let mut added = false;
            for bucket in by_disk.values_mut() {
                if let Some(i) = bucket.pop() {
                    interleaved.push(i);
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
        order.extend(interleaved);
        start = end;
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_consume_order() {
        assert_eq!(identity_schedule(5), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn greedy_schedule_is_a_permutation() {
        let disks = vec![0, 0, 1, 1, 2, 2, 0, 1];
        let order = greedy_disk_aware_schedule(&disks, 4, 4);
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, (0..disks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn greedy_schedule_interleaves_disks_within_window() {
        let disks = vec![0, 0, 0, 1];
        let order = greedy_disk_aware_schedule(&disks, 4, 4);
        // disk 1's only block should not be issued last within the window
        // when a same-disk block from disk 0 could instead trail it.
        assert_ne!(order.last(), Some(&2));
    }
}
