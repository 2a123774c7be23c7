//! In-process simulated disk backed by a `Vec<u8>`. Used by tests and
//! benchmarks that want the full request/queue/pool machinery exercised
//! without touching the filesystem, mirroring the role STXXL's
//! `simdisk_file` plays in its own test suite.

use std::io;

use parking_lot::Mutex;

use super::FileBackend;

pub struct SimFile {
    data: Mutex<Vec<u8>>,
}

impl SimFile {
    pub fn new() -> Self {
        SimFile {
            data: Mutex::new(Vec::new()),
        }
    }
}

impl Default for SimFile {
    fn default() -> Self {
        Self::new()
    }
}

impl FileBackend for SimFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.data.lock();
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        if end > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read past end of simulated disk: {end} > {}", data.len()),
            ));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(buf.len())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.data.lock().len() as u64)
    }

    fn set_size(&self, new_size: u64) -> io::Result<()> {
        self.data.lock().resize(new_size as usize, 0);
        Ok(())
    }

    fn lock(&self) -> io::Result<()> {
        Ok(())
    }

    fn delete_region(&self, offset: u64, size: u64) -> io::Result<()> {
        let mut data = self.data.lock();
        let start = offset as usize;
        let end = (start + size as usize).min(data.len());
        if start < end {
            data[start..end].fill(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_lazily_on_write() {
        let f = SimFile::new();
        f.write_at(&[1, 2, 3], 10).unwrap();
        assert_eq!(f.size().unwrap(), 13);
        let mut out = [0u8; 3];
        f.read_at(&mut out, 10).unwrap();
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn read_past_end_errors() {
        let f = SimFile::new();
        f.set_size(4).unwrap();
        let mut out = [0u8; 8];
        assert!(f.read_at(&mut out, 0).is_err());
    }
}
