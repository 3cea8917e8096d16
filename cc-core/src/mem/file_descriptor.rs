//! File descriptor binding for an allocator's backing store: create the
//! directory if absent, map the file read/write/shared, unmap on drop.
//! Grounded on the mmap binding pattern used by commit-log index files in
//! the wider storage-engine corpus this crate's style is drawn from.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{CResult, Error};

pub struct FileDescriptor {
    path: PathBuf,
    mmap: MmapMut,
}

impl FileDescriptor {
    /// Creates (or truncates-up) `path` to `size` bytes and maps it
    /// read/write/shared, populating pages eagerly.
    pub fn create(path: impl AsRef<Path>, size: u64) -> CResult<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        file.set_len(size)?;

        // SAFETY: the file is exclusively owned by this FileDescriptor for
        // the mapping's lifetime; no other process is expected to truncate
        // it concurrently.
        let mmap = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| Error::internal(format!("mmap {} failed: {e}", path.display())))?;

        Ok(FileDescriptor { path: path.to_path_buf(), mmap })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    pub fn mmap(&self) -> &MmapMut {
        &self.mmap
    }
}
