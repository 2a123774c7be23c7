//! Memory-mapped backend, using `memmap2` the way the wider retrieval pack
//! reaches for a dedicated crate per concern rather than hand-rolling
//! `mmap(2)` calls.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use memmap2::MmapMut;
use parking_lot::Mutex;

use super::FileBackend;

struct MapState {
    file: std::fs::File,
    map: Option<MmapMut>,
    len: u64,
}

pub struct MmapFile {
    state: Mutex<MapState>,
}

impl MmapFile {
    pub fn open(path: &Path, initial_capacity: u64) -> crate::error::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| crate::error::ExMemError::io(path.to_path_buf(), e))?;

        let len = file
            .metadata()
            .map_err(|e| crate::error::ExMemError::io(path.to_path_buf(), e))?
            .len()
            .max(initial_capacity);
        if len > 0 {
            file.set_len(len)
                .map_err(|e| crate::error::ExMemError::io(path.to_path_buf(), e))?;
        }

        let map = if len > 0 {
            Some(unsafe {
                MmapMut::map_mut(&file).map_err(|e| crate::error::ExMemError::io(path.to_path_buf(), e))?
            })
        } else {
            None
        };

        Ok(MmapFile {
            state: Mutex::new(MapState { file, map, len }),
        })
    }

    /// Remaps the file after a `set_size` call changed its length.
    fn remap(state: &mut MapState) -> io::Result<()> {
        state.map = if state.len > 0 {
            Some(unsafe { MmapMut::map_mut(&state.file)? })
        } else {
            None
        };
        Ok(())
    }
}

impl FileBackend for MmapFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let state = self.state.lock();
        let map = state
            .map
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "mmap file is empty"))?;
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        if end > map.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read past end of mapping: {end} > {}", map.len()),
            ));
        }
        buf.copy_from_slice(&map[start..end]);
        Ok(buf.len())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let mut state = self.state.lock();
        let start = offset as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        if end as u64 > state.len {
            let new_len = end as u64;
            state.file.set_len(new_len)?;
            state.len = new_len;
            Self::remap(&mut state)?;
        }
        let map = state.map.as_mut().expect("mapped after growth above");
        map[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.state.lock().len)
    }

    fn set_size(&self, new_size: u64) -> io::Result<()> {
        let mut state = self.state.lock();
        state.file.set_len(new_size)?;
        state.len = new_size;
        Self::remap(&mut state)
    }

    fn lock(&self) -> io::Result<()> {
        let state = self.state.lock();
        unsafe {
            use std::os::unix::io::AsRawFd;
            let rc = libc::flock(state.file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB);
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
    fn grows_and_round_trips() {
        let tmp = NamedTempFile::new().unwrap();
        let f = MmapFile::open(tmp.path(), 0).unwrap();
        let data = vec![42u8; 256];
        f.write_at(&data, 4096).unwrap();
        let mut out = vec![0u8; 256];
        f.read_at(&mut out, 4096).unwrap();
        assert_eq!(out, data);
        assert!(f.size().unwrap() >= 4096 + 256);
    }
}
