//! The merge core (§4.5): comparator contract, run/run-collection model,
//! k-way loser-tree merger, run formation + recursive cascade, and the
//! external priority queue built on the same merge primitives.

pub mod cmp;
pub mod loser_tree;
pub mod pqueue;
pub mod run;
pub mod sort;

pub use cmp::{Less, SortCmp};
pub use run::{Run, RunEntry, SortedRuns};
pub use sort::sort;
