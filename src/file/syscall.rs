//! Buffered syscall backend: ordinary `pread`/`pwrite` via `std::fs::File`
//! plus the `FileExt` positioned-I/O extension, no alignment requirements.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use parking_lot::Mutex;

use super::FileBackend;

pub struct SyscallFile {
    file: Mutex<File>,
}

impl SyscallFile {
    pub fn open(path: &Path, _autogrow: bool) -> crate::error::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| crate::error::ExMemError::io(path.to_path_buf(), e))?;
        Ok(SyscallFile {
            file: Mutex::new(file),
        })
    }
}

impl FileBackend for SyscallFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let file = self.file.lock();
        file.read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let file = self.file.lock();
        file.write_at(buf, offset)?;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_bytes() {
        let tmp = NamedTempFile::new().unwrap();
        let f = SyscallFile::open(tmp.path(), false).unwrap();
        f.set_size(4096).unwrap();
        let data = vec![7u8; 512];
        f.write_at(&data, 1024).unwrap();
        let mut out = vec![0u8; 512];
        f.read_at(&mut out, 1024).unwrap();
        assert_eq!(out, data);
    }
}
