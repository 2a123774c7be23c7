use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use exmem::file::sim::SimFile;
use exmem::{sort, BlockManager, Disk, Less, PriorityOp, Stats, Striping};

fn manager(n_disks: usize) -> Arc<BlockManager> {
    let disks: Vec<Disk> = (0..n_disks)
        .map(|_| Disk::new(Arc::new(SimFile::new()), PriorityOp::None))
        .collect();
    Arc::new(BlockManager::from_disks(
        disks,
        &vec![0; n_disks],
        Arc::new(Stats::new()),
    ))
}

fn bench_sort_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("external_sort");

    for &n in &[4_000usize, 40_000, 400_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mgr = manager(4);
            let input: Vec<i32> = (0..n as i32).rev().collect();
            b.iter(|| {
                let mut strategy = Striping { begin: 0, disks: mgr.disk_count() };
                let out = sort::<i32, 8, 4096, _>(
                    black_box(input.clone()).into_iter(),
                    Less::default_i32(),
                    Arc::clone(&mgr),
                    &mut strategy,
                    16 * 4096,
                    4,
                )
                .unwrap();
                black_box(out);
            });
        });
    }

    group.finish();
}

fn bench_sort_disk_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("external_sort_disk_fanout");

    for &n_disks in &[1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(n_disks), &n_disks, |b, &n_disks| {
            let mgr = manager(n_disks);
            let input: Vec<i32> = (0..100_000i32).rev().collect();
            b.iter(|| {
                let mut strategy = Striping { begin: 0, disks: mgr.disk_count() };
                let out = sort::<i32, 8, 4096, _>(
                    black_box(input.clone()).into_iter(),
                    Less::default_i32(),
                    Arc::clone(&mgr),
                    &mut strategy,
                    16 * 4096,
                    4,
                )
                .unwrap();
                black_box(out);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sort_sizes, bench_sort_disk_fanout);
criterion_main!(benches);
