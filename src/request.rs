//! Reference-counted asynchronous request object.
//!
//! States form a linear machine `Op -> Done -> ReadyToDie`. The handle is a
//! cheap `Arc` clone (Rust's analogue of the source's manual ref-counted
//! `request_ptr`): the last clone to drop frees the backing buffer-tracking
//! state. Errors are recorded on the request and only surfaced to a
//! consumer that calls `wait`/`poll`/`check_errors` — never thrown
//! asynchronously on the worker thread.

use std::io;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{ExMemError, Result};
use crate::file::FileBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    Op,
    Done,
    ReadyToDie,
}

/// A raw, exclusively-owned buffer handle carried by a request while it is
/// in flight. The caller guarantees the pointed-to memory stays valid and
/// is touched by no one else until the request completes — the same
/// invariant the source places on `void *buffer`.
#[derive(Clone, Copy)]
pub(crate) struct RawBuf {
    pub ptr: *mut u8,
    pub len: usize,
}

unsafe impl Send for RawBuf {}

struct Inner {
    file: Arc<dyn FileBackend>,
    buf: RawBuf,
    offset: u64,
    direction: Direction,
    state: Mutex<RequestState>,
    condvar: Condvar,
    error: Mutex<Option<io::Error>>,
    on_complete: Mutex<Option<Box<dyn FnOnce(&RequestHandle) + Send>>>,
}

/// Shared handle to an in-flight or completed request. Cloning is cheap
/// (an `Arc` bump); the request is only actually served once, by whichever
/// disk worker thread pops it off its queue.
#[derive(Clone)]
pub struct RequestHandle(Arc<Inner>);

pub type RequestPtr = RequestHandle;

impl RequestHandle {
    pub(crate) fn new(
        file: Arc<dyn FileBackend>,
        buf: RawBuf,
        offset: u64,
        direction: Direction,
        on_complete: Option<Box<dyn FnOnce(&RequestHandle) + Send>>,
    ) -> Self {
        RequestHandle(Arc::new(Inner {
            file,
            buf,
            offset,
            direction,
            state: Mutex::new(RequestState::Op),
            condvar: Condvar::new(),
            error: Mutex::new(None),
            on_complete: Mutex::new(on_complete),
        }))
    }

    pub fn direction(&self) -> Direction {
        self.0.direction
    }

    pub fn offset(&self) -> u64 {
        self.0.offset
    }

    pub fn size(&self) -> usize {
        self.0.buf.len
    }

    /// Identity for cancellation lookups; two clones of the same request
    /// compare equal.
    pub(crate) fn ptr_eq(&self, other: &RequestHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Performs the actual syscall. Called exactly once, by the disk
    /// worker thread that dequeued this request. Transitions
    /// `Op -> Done`, invokes the completion callback, wakes every waiter,
    /// then transitions `Done -> ReadyToDie`.
    pub(crate) fn serve(&self) {
        let buf = self.0.buf;
        let result = unsafe {
            let slice_mut = std::slice::from_raw_parts_mut(buf.ptr, buf.len);
            match self.0.direction {
                Direction::Read => self.0.file.read_at(slice_mut, self.0.offset),
                Direction::Write => {
                    let slice = std::slice::from_raw_parts(buf.ptr, buf.len);
                    self.0.file.write_at(slice, self.0.offset)
                }
            }
        };

        if let Err(e) = result {
            *self.0.error.lock() = Some(e);
        } else if let Ok(n) = result {
            if n != buf.len {
                *self.0.error.lock() = Some(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("short transfer: {n} of {} bytes", buf.len),
                ));
            }
        }

        {
            let mut state = self.0.state.lock();
            *state = RequestState::Done;
        }

        if let Some(cb) = self.0.on_complete.lock().take() {
            cb(self);
        }

        self.0.condvar.notify_all();

        let mut state = self.0.state.lock();
        *state = RequestState::ReadyToDie;
    }

    /// Blocks the calling thread until the request completes, then
    /// surfaces any recorded error. This is one of the three blocking
    /// suspension points the library exposes to application code.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.0.state.lock();
        while *state == RequestState::Op {
            self.0.condvar.wait(&mut state);
        }
        drop(state);
        self.check_errors()
    }

    /// Non-blocking completion check.
    pub fn poll(&self) -> bool {
        *self.0.state.lock() != RequestState::Op
    }

    /// Re-raises a recorded I/O error, if any. Idempotent: repeated calls
    /// observe the same error without side effects.
    pub fn check_errors(&self) -> Result<()> {
        let guard = self.0.error.lock();
        match &*guard {
            Some(e) => Err(ExMemError::Io {
                path: None,
                source: io::Error::new(e.kind(), e.to_string()),
            }),
            None => Ok(()),
        }
    }
}

/// Blocks until every request in `reqs` has completed. Returns the first
/// error encountered, if any, after waiting for all of them (so that no
/// buffer is reclaimed by a caller while still in flight).
pub fn wait_all<'a, I>(reqs: I) -> Result<()>
where
    I: IntoIterator<Item = &'a RequestHandle>,
{
    let mut first_err = None;
    for req in reqs {
        let r = req.wait();
        if first_err.is_none() && r.is_err() {
            first_err = r.err();
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Blocks until at least one request in `reqs` has completed, returning
/// its index. Ties (multiple already complete) resolve to the
/// lowest index, mirroring the source's first-match semantics.
pub fn wait_any(reqs: &[RequestHandle]) -> Option<usize> {
    if reqs.is_empty() {
        return None;
    }
    // Busy-poll with an exponential-then-yielding back-off; a production
    // queue could instead register each request's condvar, but a shared
    // multi-wait condvar across heterogeneous per-disk queues would
    // require a broadcast channel per queue worker. `Backoff` keeps all
    // suspension points centralized in `RequestHandle` while avoiding a
    // tight spin once the wait runs long.
    let backoff = crossbeam_utils::Backoff::new();
    loop {
        for (i, r) in reqs.iter().enumerate() {
            if r.poll() {
                return Some(i);
            }
        }
        if backoff.is_completed() {
            std::thread::yield_now();
        } else {
            backoff.snooze();
        }
    }
}

/// Non-blocking scan returning the index of the first completed request,
/// if any.
pub fn poll_any(reqs: &[RequestHandle]) -> Option<usize> {
    reqs.iter().position(|r| r.poll())
}
