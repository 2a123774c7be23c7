//! I/O statistics counters (§C of `SPEC_FULL.md`), modeled on
//! `original_source/include/stxxl/bits/io/iostats.h`: cumulative read/write
//! counts and byte totals, plus time spent waiting on requests. Exposed
//! through `tracing` events rather than a custom pretty-printer — the
//! crate's logging goes through `tracing` throughout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide (or per-[`crate::mng::BlockManager`]) I/O counters. Cheap
/// to update from any disk worker thread: every field is a relaxed atomic
/// counter, matching the "read-mostly, rarely inspected" access pattern of
/// the source's `stats` singleton.
#[derive(Debug, Default)]
pub struct Stats {
    reads: AtomicU64,
    writes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    wait_nanos: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn record_read(&self, bytes: usize) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
        tracing::trace!(target: "exmem::stats", bytes, "block read");
    }

    pub fn record_write(&self, bytes: usize) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        tracing::trace!(target: "exmem::stats", bytes, "block write");
    }

    pub fn record_wait(&self, elapsed: Duration) {
        self.wait_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed))
    }

    pub fn log_summary(&self) {
        tracing::info!(
            target: "exmem::stats",
            reads = self.reads(),
            writes = self.writes(),
            bytes_read = self.bytes_read(),
            bytes_written = self.bytes_written(),
            wait_ms = self.wait_time().as_millis() as u64,
            "I/O summary"
        );
    }
}

/// Scoped timer that adds its elapsed duration to a [`Stats`] wait counter
/// when dropped; used to wrap the suspension points of §5 (`wait`,
/// `wait_all`/`wait_any`, and merge-implied prefetch waits).
pub struct WaitTimer<'a> {
    stats: &'a Stats,
    start: Instant,
}

impl<'a> WaitTimer<'a> {
    pub fn start(stats: &'a Stats) -> Self {
        WaitTimer {
            stats,
            start: Instant::now(),
        }
    }
}

impl<'a> Drop for WaitTimer<'a> {
    fn drop(&mut self) {
        self.stats.record_wait(self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new();
        stats.record_read(4096);
        stats.record_read(4096);
        stats.record_write(4096);
        assert_eq!(stats.reads(), 2);
        assert_eq!(stats.writes(), 1);
        assert_eq!(stats.bytes_read(), 8192);
        assert_eq!(stats.bytes_written(), 4096);
    }

    #[test]
    fn wait_timer_records_on_drop() {
        let stats = Stats::new();
        {
            let _t = WaitTimer::start(&stats);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(stats.wait_time().as_nanos() > 0);
    }
}
