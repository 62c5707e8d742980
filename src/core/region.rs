use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::{MmapMut, MmapOptions};

use crate::core::layout::{RingHeader, HEADER_SIZE};
use crate::core::mmap::{lock_range, MmapFile};
use crate::core::{Error, Result};

enum Backing {
    Anonymous(MmapMut),
    File { mmap: MmapFile, path: PathBuf },
}

/// One contiguous memory region holding a ring header and its slots.
///
/// Every access after initialization goes through atomics, so the region is
/// shared by reference between threads and by file mapping between processes.
pub struct SharedRegion {
    backing: Backing,
    base: *mut u8,
    len: usize,
}

// SAFETY: the region owns its mapping; `base` stays valid until drop and all
// concurrent access to the mapped bytes goes through atomic types.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Maps a zeroed anonymous region visible to every thread of this process.
    pub(crate) fn anonymous(len: usize, init: impl FnOnce(&SharedRegion)) -> Result<Self> {
        if len < HEADER_SIZE {
            return Err(Error::Unsupported("region smaller than ring header"));
        }
        let mut map = MmapOptions::new().len(len).map_anon()?;
        let base = map.as_mut_ptr();
        let region = Self {
            backing: Backing::Anonymous(map),
            base,
            len,
        };
        init(&region);
        Ok(region)
    }

    /// Creates a file-backed region. The file only appears at `path` after
    /// `init` ran, so attachers never map a half-written header.
    pub(crate) fn create_file(
        path: &Path,
        len: usize,
        init: impl FnOnce(&SharedRegion),
    ) -> Result<Self> {
        if len < HEADER_SIZE {
            return Err(Error::Unsupported("region smaller than ring header"));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // `a.ring` stages as `a.ring.tmp`, so `a.ring` and `a.queue` never share a temp file.
        let mut tmp_name = path
            .file_name()
            .ok_or(Error::Unsupported("ring path has no file name"))?
            .to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        let mut mmap = MmapFile::create(&tmp_path, len)?;
        let base = mmap.as_mut_ptr();
        let region = Self {
            backing: Backing::File {
                mmap,
                path: path.to_path_buf(),
            },
            base,
            len,
        };
        init(&region);
        std::fs::rename(&tmp_path, path)?;
        Ok(region)
    }

    pub(crate) fn open_file(path: &Path) -> Result<Self> {
        let mut mmap = MmapFile::open(path)?;
        if mmap.len() < HEADER_SIZE {
            return Err(Error::LayoutMismatch("ring file smaller than header"));
        }
        let base = mmap.as_mut_ptr();
        let len = mmap.len();
        Ok(Self {
            backing: Backing::File {
                mmap,
                path: path.to_path_buf(),
            },
            base,
            len,
        })
    }

    pub fn header(&self) -> &RingHeader {
        // SAFETY: the mapping is page aligned, at least HEADER_SIZE long and
        // RingHeader consists only of atomics and padding.
        unsafe { &*(self.base as *const RingHeader) }
    }

    /// The 64-bit word at `byte_offset`. Offsets come from `SlotGeometry` and
    /// are always 8-byte aligned.
    pub(crate) fn word(&self, byte_offset: usize) -> &AtomicU64 {
        debug_assert!(byte_offset % 8 == 0);
        debug_assert!(byte_offset + 8 <= self.len);
        // SAFETY: in bounds and aligned per the assertions above; AtomicU64
        // has the same layout as u64.
        unsafe { &*(self.base.add(byte_offset) as *const AtomicU64) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Anonymous(_) => None,
            Backing::File { path, .. } => Some(path),
        }
    }

    pub(crate) fn lock(&self) -> Result<()> {
        lock_range(self.base as *const u8, self.len)
    }

    pub(crate) fn flush(&self) -> Result<()> {
        match &self.backing {
            Backing::Anonymous(_) => Ok(()),
            Backing::File { mmap, .. } => mmap.flush_async(),
        }
    }
}

/// Cloneable reference to a ring region, passed to every participant that
/// attaches to the same buffer.
#[derive(Clone)]
pub struct SharedHandle {
    region: Arc<SharedRegion>,
}

impl SharedHandle {
    pub(crate) fn new(region: Arc<SharedRegion>) -> Self {
        Self { region }
    }

    /// Maps a file-backed ring created by another process.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let region = SharedRegion::open_file(path.as_ref())?;
        region.header().wait_ready()?;
        Ok(Self {
            region: Arc::new(region),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.region.header().capacity.load(Ordering::Acquire)
    }

    pub fn record_width(&self) -> usize {
        self.region.header().record_width.load(Ordering::Acquire) as usize
    }

    pub fn record_kind(&self) -> u32 {
        self.region.header().record_kind.load(Ordering::Acquire)
    }

    pub fn path(&self) -> Option<&Path> {
        self.region.path()
    }

    pub(crate) fn region(&self) -> &Arc<SharedRegion> {
        &self.region
    }
}

impl std::fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedHandle")
            .field("len", &self.region.len())
            .field("path", &self.region.path())
            .finish()
    }
}
