//! Direct-I/O backend (`O_DIRECT`), alignment-checked. Grounded directly in
//! the teacher's `UringStorage::open_segment`: the same `custom_flags`
//! technique, minus the `tokio-uring` submission queue, since this crate
//! runs the thread-per-disk blocking model of §5 rather than async/await.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;

use parking_lot::Mutex;

use super::{check_alignment, FileBackend};

/// Typical direct-I/O disk-block alignment; offsets, buffer addresses, and
/// transfer sizes must all be multiples of this.
pub const DIRECT_ALIGNMENT: usize = 4096;

pub struct DirectFile {
    file: Mutex<File>,
}

impl DirectFile {
    pub fn open(path: &Path, _autogrow: bool) -> crate::error::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
            .map_err(|e| crate::error::ExMemError::io(path.to_path_buf(), e))?;
        Ok(DirectFile {
            file: Mutex::new(file),
        })
    }
}

impl FileBackend for DirectFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        check_alignment(DIRECT_ALIGNMENT, buf.as_ptr(), buf.len(), offset)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        self.file.lock().read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        check_alignment(DIRECT_ALIGNMENT, buf.as_ptr(), buf.len(), offset)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        self.file.lock().write_at(buf, offset)?;
        Ok(buf.len())
    }

    fn size(&self) -> io::Result<u64> {
        self.file.lock().metadata().map(|m| m.len())
    }

    fn set_size(&self, new_size: u64) -> io::Result<()> {
        self.file.lock().set_len(new_size)
    }

    fn lock(&self) -> io::Result<()> {
        let file = self.file.lock();
        unsafe {
            use std::os::unix::io::AsRawFd;
            let rc = libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB);
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn required_alignment(&self) -> Option<usize> {
        Some(DIRECT_ALIGNMENT)
    }
}

/// A heap allocation aligned to [`DIRECT_ALIGNMENT`], for callers that need
/// to hand `O_DIRECT`-safe buffers to [`DirectFile`].
pub struct AlignedBuf {
    ptr: std::ptr::NonNull<u8>,
    layout: std::alloc::Layout,
}

unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    pub fn new(size: usize) -> Self {
        let layout = std::alloc::Layout::from_size_align(size.max(1), DIRECT_ALIGNMENT)
            .expect("invalid layout for aligned buffer");
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let ptr = std::ptr::NonNull::new(ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        AlignedBuf { ptr, layout }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_buf_is_aligned() {
        let buf = AlignedBuf::new(8192);
        assert_eq!(buf.as_slice().as_ptr() as usize % DIRECT_ALIGNMENT, 0);
    }

    #[test]
    fn rejects_unaligned_offset() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        // O_DIRECT may not be supported on the test filesystem (e.g. tmpfs
        // or overlayfs); only assert the alignment precondition, which is
        // checked before the syscall ever runs.
        if let Ok(f) = DirectFile::open(tmp.path(), false) {
            let mut buf = [0u8; 17];
            let err = f.read_at(&mut buf, 0);
            assert!(err.is_err());
        }
    }
}
