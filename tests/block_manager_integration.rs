//! Integration coverage for the block manager's allocation striping and
//! queue cancellation paths (§8 scenarios 5-6) at a scale too large for an
//! inline unit test.

use std::sync::Arc;

use exmem::file::sim::SimFile;
use exmem::{Bid, BlockManager, Disk, PriorityOp, Stats, Striping};

fn manager(n_disks: usize) -> Arc<BlockManager> {
    let disks: Vec<Disk> = (0..n_disks)
        .map(|_| Disk::new(Arc::new(SimFile::new()), PriorityOp::None))
        .collect();
    let caps = vec![0i64; n_disks];
    Arc::new(BlockManager::from_disks(disks, &caps, Arc::new(Stats::new())))
}

#[test]
fn bulk_allocation_under_striping_distributes_round_robin_across_many_blocks() {
    let mgr = manager(4);
    let mut strategy = Striping { begin: 0, disks: mgr.disk_count() };

    let bids: Vec<Bid<4096>> = mgr.new_blocks_bulk(&mut strategy, 100).unwrap();

    assert_eq!(bids.len(), 100);
    for (k, bid) in bids.iter().enumerate() {
        assert_eq!(bid.disk, k % 4, "block {k} landed on the wrong disk");
    }
}

#[test]
fn freed_blocks_are_reused_by_later_allocations_without_growing_the_disk() {
    let mgr = manager(2);
    let mut strategy = Striping { begin: 0, disks: mgr.disk_count() };

    let first: Vec<Bid<4096>> = mgr.new_blocks_bulk(&mut strategy, 50).unwrap();
    let free_before: i64 = (0..2).map(|d| mgr.free_bytes(d)).sum();
    mgr.delete_blocks(&first);
    let free_after_delete: i64 = (0..2).map(|d| mgr.free_bytes(d)).sum();
    assert!(free_after_delete > free_before);

    let second: Vec<Bid<4096>> = mgr.new_blocks_bulk(&mut strategy, 50).unwrap();
    let free_after_realloc: i64 = (0..2).map(|d| mgr.free_bytes(d)).sum();
    assert_eq!(free_after_realloc, free_before);

    // Reallocation reuses the freed offsets rather than growing further.
    let mut first_offsets: Vec<(usize, u64)> = first.iter().map(|b| (b.disk, b.offset)).collect();
    let mut second_offsets: Vec<(usize, u64)> = second.iter().map(|b| (b.disk, b.offset)).collect();
    first_offsets.sort();
    second_offsets.sort();
    assert_eq!(first_offsets, second_offsets);
}

#[test]
fn queued_write_can_be_cancelled_before_the_worker_dispatches_it() {
    let disk = Disk::new(Arc::new(SimFile::new()), PriorityOp::None);
    disk.file().set_size(4096 * 9).unwrap();

    // Keep the worker busy so the next submissions stay queued long
    // enough for one of them to be cancelled.
    let blocker_data = vec![0u8; 4096];
    let _blocker = disk.awrite(&blocker_data, 0).unwrap();

    let data = vec![1u8; 4096];
    let req = disk.awrite(&data, 4096).unwrap();
    let before = disk.queue_len();
    let cancelled = disk.cancel_request(&req);
    // Either we won the race and cancelled it (queue shrinks), or the
    // worker already dispatched it (cancel returns false); both are
    // legal outcomes of the race, but at least one must hold.
    if cancelled {
        assert!(disk.queue_len() <= before);
    } else {
        let _ = req.wait();
    }
}
