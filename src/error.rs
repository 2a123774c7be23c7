//! Crate-wide error type. Mirrors the five error kinds of the I/O error
//! design: I/O failures, allocation failures, configuration failures,
//! invariant violations (fatal, not represented here — see `fatal!`), and
//! resource exhaustion inside the merge core.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExMemError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    #[error("unaligned buffer or offset: {detail} (required alignment {alignment})")]
    Alignment { detail: String, alignment: usize },

    #[error("no free region of {requested} bytes available ({free} bytes free, autogrow={autogrow})")]
    OutOfSpace {
        requested: i64,
        free: i64,
        autogrow: bool,
    },

    #[error("invalid configuration line {line_no}: {line:?}: {reason}")]
    Config {
        line_no: usize,
        line: String,
        reason: String,
    },

    #[error("unknown storage backend {0:?}")]
    UnknownBackend(String),

    #[error(
        "memory budget {budget_bytes} bytes is below the minimum {minimum_bytes} bytes required \
         for a two-way merge with prefetch and write-back buffers"
    )]
    InsufficientMergeMemory {
        budget_bytes: usize,
        minimum_bytes: usize,
    },

    #[error("request was empty or already consumed")]
    EmptyRequest,

    #[error("queue is shutting down, request rejected")]
    QueueShuttingDown,
}

impl ExMemError {
    pub fn io(path: impl Into<Option<PathBuf>>, source: io::Error) -> Self {
        ExMemError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExMemError>;

/// Invariant violations (§7 class 4) are not recoverable: the library cannot
/// reason about caller state once one is observed. Dump a diagnostic and
/// abort, matching the source's "fatal error with descriptive diagnostic".
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        tracing::error!(target: "exmem::invariant", $($arg)*);
        panic!($($arg)*);
    }};
}
