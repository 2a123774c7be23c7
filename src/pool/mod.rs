//! Prefetch/write pools and buffered streams (§4.4).

pub mod buf_stream;
pub mod prefetch;
pub mod schedule;
pub mod write_pool;

pub use buf_stream::BufferedInputStream;
pub use prefetch::PrefetchPool;
pub use write_pool::WritePool;
