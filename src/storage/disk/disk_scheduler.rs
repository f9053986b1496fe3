use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{trace, warn};

use crate::common::{ArborError, PageId, Result, DEFAULT_DISK_QUEUE_DEPTH, PAGE_SIZE};

use super::DiskManager;

/// Owned page buffer moved between callers and the worker thread
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

/// A disk I/O request. The buffer travels with the request and comes back
/// through the completion channel, so no memory is shared with the worker.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        data: PageBuf,
        done: Sender<Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        done: Sender<Result<PageBuf>>,
    },
}

impl DiskRequest {
    fn page_id(&self) -> PageId {
        match self {
            DiskRequest::Read { page_id, .. } | DiskRequest::Write { page_id, .. } => *page_id,
        }
    }
}

/// DiskScheduler runs a background worker that processes page I/O requests
/// in arrival order.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    /// `None` once shutdown has started; dropping the sender stops the worker
    request_sender: Option<Sender<DiskRequest>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawns the worker thread.
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(DEFAULT_DISK_QUEUE_DEPTH);

        let dm = Arc::clone(&disk_manager);
        let worker_handle = thread::Builder::new()
            .name("arbor-disk-scheduler".into())
            .spawn(move || Self::run_worker(dm, receiver))
            .ok();

        Self {
            disk_manager,
            request_sender: Some(sender),
            worker_handle,
        }
    }

    /// Queues a request for the worker.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        if self.worker_handle.is_none() {
            return Err(ArborError::DiskScheduler("worker thread not running".into()));
        }
        let sender = self
            .request_sender
            .as_ref()
            .ok_or_else(|| ArborError::DiskScheduler("scheduler is shutting down".into()))?;
        sender
            .send(request)
            .map_err(|e| ArborError::DiskScheduler(format!("failed to schedule request: {}", e)))
    }

    /// Reads a page and blocks until the worker has filled `data`.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (done, rx) = bounded(1);
        self.schedule(DiskRequest::Read {
            page_id,
            data: Box::new([0u8; PAGE_SIZE]),
            done,
        })?;

        let buf = Self::wait(rx)?;
        data.copy_from_slice(&buf[..]);
        Ok(())
    }

    /// Writes a page and blocks until it has reached the disk manager.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut buf: PageBuf = Box::new([0u8; PAGE_SIZE]);
        buf.copy_from_slice(data);

        let (done, rx) = bounded(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data: buf,
            done,
        })?;

        Self::wait(rx).map(|_| ())
    }

    fn wait(rx: Receiver<Result<PageBuf>>) -> Result<PageBuf> {
        rx.recv().map_err(|e| {
            ArborError::DiskScheduler(format!("failed to receive completion: {}", e))
        })?
    }

    /// Processes requests until every sender is gone.
    fn run_worker(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        for request in receiver.iter() {
            Self::process_request(&disk_manager, request);
        }
    }

    fn process_request(disk_manager: &DiskManager, request: DiskRequest) {
        let page_id = request.page_id();
        let (outcome, done) = match request {
            DiskRequest::Read {
                page_id,
                mut data,
                done,
            } => (
                disk_manager.read_page(page_id, &mut data[..]).map(|_| data),
                done,
            ),
            DiskRequest::Write {
                page_id,
                data,
                done,
            } => (disk_manager.write_page(page_id, &data[..]).map(|_| data), done),
        };

        match &outcome {
            Ok(_) => trace!(%page_id, "disk request completed"),
            Err(e) => warn!(%page_id, error = %e, "disk request failed"),
        }
        let _ = done.send(outcome);
    }

    /// Returns the underlying DiskManager.
    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain the queue and exit
        self.request_sender.take();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_disk_scheduler_read_write() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let page_id = scheduler.disk_manager().allocate_page().unwrap();

        let mut write_data = [0u8; PAGE_SIZE];
        write_data[0] = 42;
        write_data[100] = 255;
        scheduler.schedule_write_sync(page_id, &write_data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        scheduler
            .schedule_read_sync(page_id, &mut read_data)
            .unwrap();

        assert_eq!(read_data[0], 42);
        assert_eq!(read_data[100], 255);
    }

    #[test]
    fn test_disk_scheduler_propagates_errors() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = DiskScheduler::new(dm);

        let data = [0u8; PAGE_SIZE];
        let result = scheduler.schedule_write_sync(crate::common::INVALID_PAGE_ID, &data);
        assert!(matches!(result, Err(ArborError::InvalidPageId(_))));
    }

    #[test]
    fn test_disk_scheduler_concurrent_writers() {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let scheduler = Arc::new(DiskScheduler::new(dm));

        let page_ids: Vec<_> = (0..8)
            .map(|_| scheduler.disk_manager().allocate_page().unwrap())
            .collect();

        let handles: Vec<_> = page_ids
            .iter()
            .map(|&pid| {
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || {
                    let data = [pid.as_u32() as u8 + 1; PAGE_SIZE];
                    scheduler.schedule_write_sync(pid, &data).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for &pid in &page_ids {
            let mut data = [0u8; PAGE_SIZE];
            scheduler.schedule_read_sync(pid, &mut data).unwrap();
            assert_eq!(data[PAGE_SIZE - 1], pid.as_u32() as u8 + 1);
        }
    }
}
