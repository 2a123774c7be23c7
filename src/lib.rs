//! `exmem`: an external-memory (out-of-core) algorithmic substrate —
//! a file backend abstraction, a per-disk request/queue subsystem, a
//! block manager with pluggable allocation striping, prefetch/write
//! pools with buffered streams, and a merge core (run formation, a
//! k-way loser-tree merger, a recursive merge cascade, and an external
//! priority queue).
//!
//! See `SPEC_FULL.md` at the repository root for the full module-by-module
//! specification and `DESIGN.md` for how each part is grounded in the
//! teacher repo this crate was built from.
//!
//! # Layering
//!
//! ```text
//! algo   (sort, loser_tree, pqueue, run, cmp)
//!   |
//! pool   (prefetch, write_pool, buf_stream, schedule)
//!   |
//! mng    (block_manager, alloc, strategy)
//!   |
//! queue  (per-disk worker thread, request dispatch)
//!   |
//! file   (syscall / direct / mmap / sim backends)
//! ```
//!
//! `request`, `bid`, `error`, `stats`, and `config` are cross-cutting and
//! used at every layer.

pub mod algo;
pub mod bid;
pub mod config;
pub mod error;
pub mod file;
pub mod mng;
pub mod pool;
pub mod queue;
pub mod request;
pub mod stats;

pub use algo::pqueue::{ExtPriorityQueue, PqueueConfig};
pub use algo::sort::sort;
pub use algo::{Less, Run, RunEntry, SortCmp, SortedRuns};
pub use bid::{Bid, HasFiller, TypedBlock};
pub use config::{init_logging, DiskConfig, DiskDescriptor, LogConfig};
pub use error::{ExMemError, Result};
pub use file::{BackendKind, FileBackend};
pub use mng::strategy::{FullyRandom, Interleaved, RandomizedCycling, SimpleRandom, Striping, StripingStrategy};
pub use mng::BlockManager;
pub use pool::{BufferedInputStream, PrefetchPool, WritePool};
pub use queue::{Disk, PriorityOp};
pub use request::{wait_all, wait_any, Direction, RequestHandle};
pub use stats::Stats;
