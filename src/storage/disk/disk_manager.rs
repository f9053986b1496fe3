use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{ArborError, PageId, Result, INVALID_PAGE_ID, PAGE_SIZE};

/// DiskManager reads and writes fixed-size pages of a single database file
/// and hands out page identifiers.
///
/// Deallocated page ids are kept on a free list and handed out again before
/// the file is extended.
pub struct DiskManager {
    /// The database file
    db_file: Mutex<File>,
    /// Path to the database file
    db_path: PathBuf,
    /// Number of pages the file spans
    num_pages: AtomicU32,
    /// Page ids released by `deallocate_page`
    free_pages: Mutex<Vec<PageId>>,
    num_reads: AtomicU32,
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens (or creates) the database file at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        debug!(path = %db_path.as_ref().display(), num_pages, "opened database file");

        Ok(Self {
            db_file: Mutex::new(file),
            db_path: db_path.as_ref().to_path_buf(),
            num_pages: AtomicU32::new(num_pages),
            free_pages: Mutex::new(Vec::new()),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        })
    }

    /// Reads a page into `data`, which must be exactly `PAGE_SIZE` bytes.
    /// Bytes past the end of the file read as zeros.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if page_id == INVALID_PAGE_ID {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data[filled..].fill(0);

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes `data` (exactly `PAGE_SIZE` bytes) to the page's slot in the file.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if page_id == INVALID_PAGE_ID {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a zeroed page, reusing a released id when one is available.
    pub fn allocate_page(&self) -> Result<PageId> {
        let reused = self.free_pages.lock().pop();
        let page_id = match reused {
            Some(page_id) => page_id,
            None => PageId::new(self.num_pages.fetch_add(1, Ordering::SeqCst)),
        };

        self.write_page(page_id, &[0u8; PAGE_SIZE])?;
        debug!(%page_id, reused = reused.is_some(), "allocated page");
        Ok(page_id)
    }

    /// Returns a page id to the free list. The file is never shrunk.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if page_id == INVALID_PAGE_ID || page_id.as_u32() >= self.get_num_pages() {
            return Err(ArborError::InvalidPageId(page_id));
        }

        let mut free_pages = self.free_pages.lock();
        if !free_pages.contains(&page_id) {
            free_pages.push(page_id);
            debug!(%page_id, "deallocated page");
        }
        Ok(())
    }

    /// Whether `page_id` is backed by the file and not waiting on the free list.
    pub fn is_allocated(&self, page_id: PageId) -> bool {
        page_id != INVALID_PAGE_ID
            && page_id.as_u32() < self.get_num_pages()
            && !self.free_pages.lock().contains(&page_id)
    }

    /// Returns the number of pages the file spans.
    pub fn get_num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Relaxed)
    }

    /// Returns the number of page ids waiting to be reused.
    pub fn get_num_free_pages(&self) -> usize {
        self.free_pages.lock().len()
    }

    pub fn get_num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    /// Flushes buffered writes to the device.
    pub fn sync(&self) -> Result<()> {
        self.db_file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.db_file.get_mut().sync_all();
    }
}
