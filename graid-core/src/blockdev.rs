// vim: tw=80
//! The boundary between the RAID engine and the kernel I/O layer.
//!
//! A [`BlockDev`] is one physical (or simulated) drive.  The engine only
//! needs raw positional reads and writes plus a size query; everything else
//! (scheduling, retries, device discovery) belongs to the layer below.

use std::{
    pin::Pin,
    sync::Mutex,
};

use futures::future;
#[cfg(test)] use mockall::automock;

use crate::{
    types::*,
    util::*,
};

/// Future representing an operation on a member disk.
pub type BoxDiskFut = Pin<Box<dyn futures::Future<Output = Result<()>>
    + Send + Sync>>;

/// One physical drive, as seen by the RAID engine.
///
/// Completion is signaled by the returned future; the engine never blocks a
/// thread waiting for a disk.
#[cfg_attr(test, automock)]
pub trait BlockDev: Send + Sync {
    /// Size of the device in LBAs.
    fn size(&self) -> LbaT;

    /// Read a contiguous portion of the device into `buf`.
    fn read_at(&self, buf: IoVecMut, lba: LbaT) -> BoxDiskFut;

    /// Write a contiguous portion of the device.
    fn write_at(&self, buf: IoVec, lba: LbaT) -> BoxDiskFut;

    /// Write a scatter-gather list contiguously, beginning at `lba`.
    fn writev_at(&self, bufs: SGList, lba: LbaT) -> BoxDiskFut;

    /// Ensure all previously written data has reached stable storage.
    fn sync_all(&self) -> BoxDiskFut;
}

/// A memory-backed [`BlockDev`].
///
/// Used by the functional test suite, and handy for staging arrays before
/// real devices exist.  All operations complete immediately.
pub struct MemDev {
    lbas: LbaT,
    data: Mutex<Vec<u8>>,
}

impl MemDev {
    pub fn new(lbas: LbaT) -> Self {
        let data = Mutex::new(vec![0u8; lbas as usize * BYTES_PER_LBA]);
        MemDev { lbas, data }
    }

    fn check_range(&self, lba: LbaT, len: usize) -> Result<usize> {
        if len % BYTES_PER_LBA != 0 {
            return Err(Error::EINVAL);
        }
        let begin = lba as usize * BYTES_PER_LBA;
        if begin + len > self.lbas as usize * BYTES_PER_LBA {
            return Err(Error::ENXIO);
        }
        Ok(begin)
    }
}

impl BlockDev for MemDev {
    fn size(&self) -> LbaT {
        self.lbas
    }

    fn read_at(&self, mut buf: IoVecMut, lba: LbaT) -> BoxDiskFut {
        let r = self.check_range(lba, buf.len()).map(|begin| {
            let data = self.data.lock().unwrap();
            let len = buf.len();
            buf[..].copy_from_slice(&data[begin..begin + len]);
        });
        Box::pin(future::ready(r))
    }

    fn write_at(&self, buf: IoVec, lba: LbaT) -> BoxDiskFut {
        let r = self.check_range(lba, buf.len()).map(|begin| {
            let mut data = self.data.lock().unwrap();
            data[begin..begin + buf.len()].copy_from_slice(&buf[..]);
        });
        Box::pin(future::ready(r))
    }

    fn writev_at(&self, bufs: SGList, lba: LbaT) -> BoxDiskFut {
        let len: usize = bufs.iter().map(|iov| iov.len()).sum();
        let r = self.check_range(lba, len).map(|mut begin| {
            let mut data = self.data.lock().unwrap();
            for iov in bufs.iter() {
                data[begin..begin + iov.len()].copy_from_slice(&iov[..]);
                begin += iov.len();
            }
        });
        Box::pin(future::ready(r))
    }

    fn sync_all(&self) -> BoxDiskFut {
        Box::pin(future::ok(()))
    }
}

// LCOV_EXCL_STOP
