//! A thin smoke test exercising the crate end to end: builds a block
//! manager over two in-process simulated disks, allocates and writes a
//! block, reads it back and verifies the bytes round-trip, then runs a
//! small external sort through the same manager. Mirrors the teacher's
//! `main.rs` write/read/verify shape, one level up for a multi-module
//! crate rather than a single storage type.

use std::sync::Arc;

use exmem::{sort, BlockManager, Disk, Less, PriorityOp, Striping};
use exmem::file::sim::SimFile;
use exmem::stats::Stats;

fn main() -> exmem::Result<()> {
    let (_msg_guard, _err_guard) = exmem::init_logging(&exmem::config::LogConfig::default())?;

    tracing::info!("exmem smoke test starting");

    // Two in-process simulated disks keep the smoke test filesystem-free
    // and deterministic; swap in `BlockManager::from_config` with a real
    // `.stxxl` file to exercise `syscall`/`direct`/`mmap` backends.
    let disks: Vec<Disk> = (0..2)
        .map(|_| Disk::new(Arc::new(SimFile::new()), PriorityOp::None))
        .collect();
    let manager = Arc::new(BlockManager::from_disks(disks, &[0, 0], Arc::new(Stats::new())));

    tracing::info!(disk_count = manager.disk_count(), "block manager ready");

    let mut strategy = Striping { begin: 0, disks: manager.disk_count() };
    let mut bids = vec![exmem::Bid::<4096>::new(0, 0); 1];
    manager.new_blocks(&mut strategy, &mut bids)?;
    let bid = bids[0];

    let written: [u32; 4] = [1, 2, 3, 4];
    let bytes = unsafe { std::slice::from_raw_parts(written.as_ptr() as *const u8, 16) };
    manager.disk(bid.disk).awrite(bytes, bid.offset)?.wait()?;

    let mut read_back = [0u32; 4];
    let read_bytes = unsafe { std::slice::from_raw_parts_mut(read_back.as_mut_ptr() as *mut u8, 16) };
    manager.disk(bid.disk).aread(read_bytes, bid.offset)?.wait()?;
    assert_eq!(written, read_back, "block round-trip mismatch");
    manager.delete_block(bid);

    tracing::info!("block round trip verified");

    let mut sort_strategy = Striping { begin: 0, disks: manager.disk_count() };
    let input: Vec<i32> = (0..2_000).rev().collect();
    let mut expected = input.clone();
    expected.sort();
    let sorted = sort::<i32, 8, 4096, _>(
        input.into_iter(),
        Less::default_i32(),
        Arc::clone(&manager),
        &mut sort_strategy,
        16 * 4096,
        4,
    )?;
    assert_eq!(sorted, expected, "external sort mismatch");

    tracing::info!(elements = sorted.len(), "external sort verified");
    println!("exmem smoke test passed");
    Ok(())
}
