//! The mapped file behind the ring.
use core::sync::atomic::AtomicU8;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapRaw;

use crate::error::OpenError;

/// One memory-mapped log file of fixed capacity.
///
/// Never modified after `open`. A reconfiguration installs a new handle instead; this one is
/// unmapped and its file closed once the last stream writing into it is dropped.
pub struct BufferHandle {
    mapping: MmapRaw,
    /// Held so the descriptor lives exactly as long as the mapping.
    #[allow(dead_code)]
    file: File,
    directory: PathBuf,
    path: PathBuf,
    generation: u64,
}

impl BufferHandle {
    /// Create (or truncate) `<directory>/<executable>.<pid>.log` with `capacity` bytes and map it.
    pub fn open(directory: &Path, capacity: usize, generation: u64) -> Result<Self, OpenError> {
        if capacity == 0 {
            return Err(OpenError::ZeroCapacity);
        }

        fs::create_dir_all(directory).map_err(|source| OpenError::CreateDirectory {
            path: directory.to_owned(),
            source,
        })?;

        let path = directory.join(log_file_name());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .and_then(|file| file.set_len(capacity as u64).map(|()| file))
            .map_err(|source| OpenError::CreateFile {
                path: path.clone(),
                source,
            })?;

        let mapping = MmapRaw::map_raw(&file).map_err(|source| OpenError::Map {
            path: path.clone(),
            source,
        })?;

        Ok(BufferHandle {
            mapping,
            file,
            directory: directory.to_owned(),
            path,
            generation,
        })
    }

    /// The mapped bytes.
    ///
    /// Every thread writes through its own cursor concurrently, possibly over the same bytes after
    /// a wraparound, so the region is only ever touched through atomics.
    pub fn bytes(&self) -> &[AtomicU8] {
        // Safety: the pointer and length describe the live mapping owned by `self`, and the
        // returned borrow cannot outlive it. Mapped file pages are initialized (zero-filled past
        // the written data). `AtomicU8` has the layout of `u8` and no uniqueness requirements on
        // the pointer, so sharing it between threads and with the kernel's page cache is fine.
        unsafe {
            core::slice::from_raw_parts(
                self.mapping.as_ptr() as *const AtomicU8,
                self.mapping.len(),
            )
        }
    }

    pub fn capacity(&self) -> usize {
        self.mapping.len()
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity of this handle among all handles installed by one facility.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl core::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("path", &self.path)
            .field("capacity", &self.capacity())
            .field("generation", &self.generation)
            .finish()
    }
}

/// `<executable file name>.<process id>.log`, so instances of one program sharing a directory
/// never collide.
pub fn log_file_name() -> String {
    format!("{}.{}.log", executable_name(), std::process::id())
}

fn executable_name() -> String {
    fn file_name(path: &Path) -> Option<String> {
        path.file_name().map(|name| name.to_string_lossy().into_owned())
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| file_name(&exe))
        .or_else(|| {
            let arg0 = std::env::args_os().next()?;
            file_name(Path::new(&arg0))
        })
        .unwrap_or_else(|| "process".to_owned())
}
