//! Hugepage-backed shared memory for DMA packet rings.
//!
//! Rings are backed by anonymous SysV shared-memory segments so they can be
//! allocated from the 2 MiB hugepage pool (`SHM_HUGETLB`), pinned, and
//! registered with the adapter for zero-copy access. Each segment is marked
//! for removal immediately after attach: the physical pages return to the
//! OS when the last attachment goes away, even if the owning process dies
//! without detaching.

use std::io;
use std::ptr::NonNull;

use tracing::{info, warn};

use crate::error::{Error, Result};

/// Hugepage allocation granularity (2 MiB).
pub const HUGEPAGE_ALIGN_2MB: u64 = 0x20_0000;

/// Round a byte request up to the next hugepage multiple.
///
/// Requests below one hugepage are rounded up to exactly one.
pub fn round_up_to_hugepage(request: u64) -> u64 {
    if request < HUGEPAGE_ALIGN_2MB {
        HUGEPAGE_ALIGN_2MB
    } else if request % HUGEPAGE_ALIGN_2MB != 0 {
        let remainder = request & (HUGEPAGE_ALIGN_2MB - 1);
        request + (HUGEPAGE_ALIGN_2MB - remainder)
    } else {
        request
    }
}

/// One mapped SysV shared-memory segment backing a packet ring.
///
/// The mapping is exclusively owned: accessors hand out slices over the
/// whole `[0, actual_size)` range, and the segment detaches on drop. Any
/// memory registration taken against the segment must be released before
/// the owning value is dropped.
#[derive(Debug)]
pub struct HugePageMemory {
    addr: NonNull<u8>,
    request_size: u64,
    actual_size: u64,
    shmid: i32,
}

// Exclusive owner of the mapping; no aliasing handed out across threads.
unsafe impl Send for HugePageMemory {}

impl HugePageMemory {
    /// Base address of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Base address as an integer, for descriptor construction.
    pub fn base_addr(&self) -> usize {
        self.addr.as_ptr() as usize
    }

    /// Bytes originally requested.
    pub fn request_size(&self) -> u64 {
        self.request_size
    }

    /// Bytes actually reserved, rounded up to hugepage granularity.
    pub fn actual_size(&self) -> u64 {
        self.actual_size
    }

    /// OS shared-memory identifier of the backing segment.
    pub fn shmid(&self) -> i32 {
        self.shmid
    }

    /// The whole mapped region.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.addr.as_ptr(), self.actual_size as usize) }
    }

    /// The whole mapped region, writable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.addr.as_ptr(), self.actual_size as usize) }
    }
}

impl Drop for HugePageMemory {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.addr.as_ptr() as *const libc::c_void);
        }
    }
}

/// Reserve a zero-filled, locked shared-memory region for DMA use.
///
/// The request is rounded up to 2 MiB granularity, reserved with read/write
/// access (from the hugepage pool when `use_huge_pages` is set), attached,
/// marked for automatic removal, and zero-filled.
///
/// # Errors
/// `NoMemory` when reservation or attach fails; the message carries the
/// requested/actual sizes and the OS error.
pub fn allocate_huge_memory(request_size: u64, use_huge_pages: bool) -> Result<HugePageMemory> {
    if request_size == 0 {
        return Err(Error::NoMemory(
            "zero-sized hugepage request".to_string(),
        ));
    }

    let actual_size = round_up_to_hugepage(request_size);
    info!(request_size, actual_size, "reserving shared-memory segment");

    let mut flags = libc::IPC_CREAT | 0o600;
    if use_huge_pages {
        flags |= libc::SHM_HUGETLB;
    }

    let shmid = unsafe { libc::shmget(libc::IPC_PRIVATE, actual_size as libc::size_t, flags) };
    if shmid < 0 {
        let err = io::Error::last_os_error();
        warn!(request_size, actual_size, %err, "shmget failed");
        return Err(Error::NoMemory(format!(
            "cannot reserve {} bytes ({} requested) of {}memory: {} (errno {})",
            actual_size,
            request_size,
            if use_huge_pages { "hugepage " } else { "shared " },
            err,
            err.raw_os_error().unwrap_or(0)
        )));
    }

    let raw = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
    if raw as isize == -1 {
        let err = io::Error::last_os_error();
        // Never attached, so RMID alone is enough to release the segment.
        unsafe {
            libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut());
        }
        warn!(shmid, actual_size, %err, "shmat failed");
        return Err(Error::NoMemory(format!(
            "cannot attach {} bytes of shared memory: {} (errno {})",
            actual_size,
            err,
            err.raw_os_error().unwrap_or(0)
        )));
    }

    // Mark for removal now; the segment lives until the last detach.
    if unsafe { libc::shmctl(shmid, libc::IPC_RMID, std::ptr::null_mut()) } != 0 {
        let err = io::Error::last_os_error();
        warn!(shmid, %err, "segment will not auto-delete");
    }

    let Some(addr) = NonNull::new(raw as *mut u8) else {
        unsafe {
            libc::shmdt(raw as *const libc::c_void);
        }
        return Err(Error::NoMemory(
            "shmat returned a null mapping".to_string(),
        ));
    };

    unsafe {
        std::ptr::write_bytes(addr.as_ptr(), 0, actual_size as usize);
    }

    Ok(HugePageMemory {
        addr,
        request_size,
        actual_size,
        shmid,
    })
}
