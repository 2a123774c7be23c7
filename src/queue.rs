//! Per-disk worker queue (§4.2). Each [`Disk`] owns one worker thread and
//! two FIFO sub-queues (reads, writes) guarded by independent locks, plus a
//! counting semaphore over total pending work. Grounded in
//! `original_source/io/request_queue_impl_qwqr.cpp` ("qwqr" = queue-with-
//! queues-for-reads-and-writes), reworked from STXXL's condition-variable
//! dispatcher into a plain blocking worker thread per the thread-per-disk
//! model of §5.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::error::{ExMemError, Result};
use crate::file::FileBackend;
use crate::request::{Direction, RawBuf, RequestHandle};

/// Read/write alternation policy for a disk's worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityOp {
    /// Drain reads until empty, then serve one write, then back to reads.
    Read,
    /// Symmetric: drain writes until empty, then serve one read.
    Write,
    /// Strict round-robin between non-empty sub-queues.
    None,
}

struct Semaphore {
    count: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Semaphore {
            count: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    fn post(&self) {
        *self.count.lock() += 1;
        self.condvar.notify_one();
    }

    /// Blocks until work is available or the queue is draining with
    /// nothing left; returns `false` only when the caller should stop.
    fn wait_for_work_or_shutdown(&self, terminating: &AtomicBool) -> bool {
        let mut count = self.count.lock();
        loop {
            if *count > 0 {
                *count -= 1;
                return true;
            }
            if terminating.load(Ordering::Acquire) {
                return false;
            }
            self.condvar.wait(&mut count);
        }
    }

    fn wake_all(&self) {
        self.condvar.notify_all();
    }
}

struct SubQueues {
    reads: Mutex<VecDeque<RequestHandle>>,
    writes: Mutex<VecDeque<RequestHandle>>,
}

impl SubQueues {
    fn new() -> Self {
        SubQueues {
            reads: Mutex::new(VecDeque::new()),
            writes: Mutex::new(VecDeque::new()),
        }
    }

    fn len(&self) -> usize {
        self.reads.lock().len() + self.writes.lock().len()
    }
}

/// One disk's asynchronous I/O front end: submit requests here, a worker
/// thread drains them in priority order and serves them against the
/// backing [`FileBackend`].
pub struct Disk {
    file: Arc<dyn FileBackend>,
    queues: Arc<SubQueues>,
    sem: Arc<Semaphore>,
    terminating: Arc<AtomicBool>,
    priority_op: PriorityOp,
    worker: Option<JoinHandle<()>>,
    /// Toggled between dispatches under `PriorityOp::None` so that reads
    /// and writes alternate rather than one starving the other.
    none_toggle: Arc<Mutex<Direction>>,
}

impl Disk {
    pub fn new(file: Arc<dyn FileBackend>, priority_op: PriorityOp) -> Self {
        let queues = Arc::new(SubQueues::new());
        let sem = Arc::new(Semaphore::new());
        let terminating = Arc::new(AtomicBool::new(false));
        let none_toggle = Arc::new(Mutex::new(Direction::Read));

        let worker = {
            let queues = Arc::clone(&queues);
            let sem = Arc::clone(&sem);
            let terminating = Arc::clone(&terminating);
            let none_toggle = Arc::clone(&none_toggle);
            std::thread::Builder::new()
                .name("exmem-disk-worker".into())
                .spawn(move || worker_loop(queues, sem, terminating, priority_op, none_toggle))
                .expect("failed to spawn disk worker thread")
        };

        Disk {
            file,
            queues,
            sem,
            terminating,
            priority_op,
            worker: Some(worker),
            none_toggle,
        }
    }

    pub fn file(&self) -> &Arc<dyn FileBackend> {
        &self.file
    }

    fn submit(
        &self,
        buf: RawBuf,
        offset: u64,
        direction: Direction,
        on_complete: Option<Box<dyn FnOnce(&RequestHandle) + Send>>,
    ) -> Result<RequestHandle> {
        if self.terminating.load(Ordering::Acquire) {
            return Err(ExMemError::QueueShuttingDown);
        }
        let req = RequestHandle::new(Arc::clone(&self.file), buf, offset, direction, on_complete);
        match direction {
            Direction::Read => self.queues.reads.lock().push_back(req.clone()),
            Direction::Write => self.queues.writes.lock().push_back(req.clone()),
        }
        self.sem.post();
        Ok(req)
    }

    /// Schedules an asynchronous read of `buf.len()` bytes from `offset`.
    pub fn aread(&self, buf: &mut [u8], offset: u64) -> Result<RequestHandle> {
        let raw = RawBuf {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
        };
        self.submit(raw, offset, Direction::Read, None)
    }

    /// Schedules an asynchronous write of `buf` to `offset`.
    pub fn awrite(&self, buf: &[u8], offset: u64) -> Result<RequestHandle> {
        let raw = RawBuf {
            ptr: buf.as_ptr() as *mut u8,
            len: buf.len(),
        };
        self.submit(raw, offset, Direction::Write, None)
    }

    pub fn aread_with_callback(
        &self,
        buf: &mut [u8],
        offset: u64,
        on_complete: Box<dyn FnOnce(&RequestHandle) + Send>,
    ) -> Result<RequestHandle> {
        let raw = RawBuf {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
        };
        self.submit(raw, offset, Direction::Read, Some(on_complete))
    }

    pub fn awrite_with_callback(
        &self,
        buf: &[u8],
        offset: u64,
        on_complete: Box<dyn FnOnce(&RequestHandle) + Send>,
    ) -> Result<RequestHandle> {
        let raw = RawBuf {
            ptr: buf.as_ptr() as *mut u8,
            len: buf.len(),
        };
        self.submit(raw, offset, Direction::Write, Some(on_complete))
    }

    /// Removes `req` from its sub-queue if it has not yet been dispatched.
    /// Returns whether removal happened; an in-flight request cannot be
    /// cancelled.
    pub fn cancel_request(&self, req: &RequestHandle) -> bool {
        let mut reads = self.queues.reads.lock();
        if let Some(pos) = reads.iter().position(|r| r.ptr_eq(req)) {
            reads.remove(pos);
            drop(reads);
            self.drain_one_semaphore_slot();
            return true;
        }
        drop(reads);

        let mut writes = self.queues.writes.lock();
        if let Some(pos) = writes.iter().position(|r| r.ptr_eq(req)) {
            writes.remove(pos);
            drop(writes);
            self.drain_one_semaphore_slot();
            return true;
        }
        false
    }

    fn drain_one_semaphore_slot(&self) {
        let mut count = self.sem.count.lock();
        if *count > 0 {
            *count -= 1;
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queues.len()
    }

    pub fn priority_op(&self) -> PriorityOp {
        self.priority_op
    }

    /// Sets the queue's terminate flag, wakes the worker, and joins it. Any
    /// requests still queued (but not dispatched) are simply abandoned;
    /// in-flight work is allowed to finish.
    pub fn shutdown(&mut self) {
        self.terminating.store(true, Ordering::Release);
        self.sem.wake_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Disk {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}

fn worker_loop(
    queues: Arc<SubQueues>,
    sem: Arc<Semaphore>,
    terminating: Arc<AtomicBool>,
    priority_op: PriorityOp,
    none_toggle: Arc<Mutex<Direction>>,
) {
    loop {
        if !sem.wait_for_work_or_shutdown(&terminating) {
            // Termination requested and nothing left to hand out — but a
            // racing producer may have posted between our empty-check and
            // here, so re-check the queues before giving up.
            if queues.len() == 0 {
                return;
            }
            continue;
        }

        let req = match pick_request(&queues, priority_op, &none_toggle) {
            Some(r) => r,
            None => continue,
        };
        req.serve();
    }
}

fn pick_request(
    queues: &SubQueues,
    priority_op: PriorityOp,
    none_toggle: &Mutex<Direction>,
) -> Option<RequestHandle> {
    match priority_op {
        PriorityOp::Read => {
            if let Some(r) = queues.reads.lock().pop_front() {
                return Some(r);
            }
            queues.writes.lock().pop_front()
        }
        PriorityOp::Write => {
            if let Some(w) = queues.writes.lock().pop_front() {
                return Some(w);
            }
            queues.reads.lock().pop_front()
        }
        PriorityOp::None => {
            let mut toggle = none_toggle.lock();
            let (first, second) = match *toggle {
                Direction::Read => (Direction::Read, Direction::Write),
                Direction::Write => (Direction::Write, Direction::Read),
            };
            for dir in [first, second] {
                let popped = match dir {
                    Direction::Read => queues.reads.lock().pop_front(),
                    Direction::Write => queues.writes.lock().pop_front(),
                };
                if let Some(r) = popped {
                    *toggle = second;
                    return Some(r);
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::sim::SimFile;

    #[test]
    fn round_trips_through_worker() {
        let disk = Disk::new(Arc::new(SimFile::new()), PriorityOp::None);
        disk.file().set_size(4096).unwrap();
        let data = vec![9u8; 128];
        let w = disk.awrite(&data, 0).unwrap();
        w.wait().unwrap();

        let mut out = vec![0u8; 128];
        let r = disk.aread(&mut out, 0).unwrap();
        r.wait().unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn cancel_before_dispatch_shrinks_queue() {
        let disk = Disk::new(Arc::new(SimFile::new()), PriorityOp::None);
        disk.file().set_size(4096).unwrap();
        // Keep the worker busy so the next submission stays queued long
        // enough to cancel.
        let blocker_data = vec![0u8; 64];
        let _blocker = disk.awrite(&blocker_data, 0).unwrap();

        let data = vec![1u8; 64];
        let req = disk.awrite(&data, 64).unwrap();
        let before = disk.queue_len();
        let cancelled = disk.cancel_request(&req);
        // Either we won the race and cancelled it (queue shrinks), or the
        // worker already dispatched it (cancel returns false); both are
        // spec-legal outcomes of the race, but at least one must hold.
        if cancelled {
            assert!(disk.queue_len() <= before);
        }
    }
}
