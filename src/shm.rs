//! Low-level POSIX shared memory regions

use crate::error::{Result, ShmemError};
use rustix::fd::OwnedFd;
use rustix::fs::ftruncate;
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::io;
use std::ptr::NonNull;

/// Longest POSIX shm name accepted, leading slash included
pub const MAX_NAME_LEN: usize = 255;

/// Check that `name` is a portable POSIX shm object name (`/name`)
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if !name.starts_with('/') {
        Some("must start with '/'")
    } else if name.len() == 1 {
        Some("is empty after '/'")
    } else if name[1..].contains('/') {
        Some("must not contain '/' after the first character")
    } else if name.len() > MAX_NAME_LEN {
        Some("is too long")
    } else if name.contains('\0') {
        Some("must not contain NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ShmemError::InvalidChannelName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

fn c_name(name: &str) -> Result<CString> {
    validate_name(name)?;
    CString::new(name).map_err(|_| ShmemError::InvalidChannelName {
        name: name.to_string(),
        reason: "must not contain NUL",
    })
}

/// Handle to a mapped shared memory region
pub struct ShmRegion {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping is process-wide; concurrent access to its contents is
// synchronized by the queue protocol built on top of it
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Create a region of `size` zeroed bytes, owned by this handle
    ///
    /// An existing region of the same name, such as one left behind by a
    /// crashed owner, is taken over and overwritten. Any process that still
    /// has it mapped loses its contents.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let c_name = c_name(name)?;

        let fd = match shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP,
        ) {
            Ok(fd) => fd,
            Err(Errno::EXIST) => {
                tracing::warn!(
                    channel = name,
                    "shared memory region already exists, overwriting it; \
                     processes still mapping it will see their data reset"
                );
                shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
                    ShmemError::ShmCreate {
                        name: name.to_string(),
                        source: e.into(),
                    }
                })?
            }
            Err(e) => {
                return Err(ShmemError::ShmCreate {
                    name: name.to_string(),
                    source: e.into(),
                })
            }
        };

        ftruncate(&fd, size as u64).map_err(|e| ShmemError::Truncate(e.into()))?;

        let addr = map(&fd, size)?;

        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        tracing::debug!(channel = name, size, "created shared memory region");

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: true,
        })
    }

    /// Open an existing region, mapping its full size
    pub fn open(name: &str) -> Result<Self> {
        let c_name = c_name(name)?;

        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            ShmemError::ShmOpen {
                name: name.to_string(),
                source: e.into(),
            }
        })?;

        let stat = rustix::fs::fstat(&fd).map_err(|e| ShmemError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = stat.st_size as usize;

        let addr = map(&fd, size)?;

        tracing::debug!(channel = name, size, "opened shared memory region");

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether dropping this handle unlinks the region
    #[inline(always)]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }
}

fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
    if size == 0 {
        return Err(ShmemError::Mmap(io::Error::new(
            io::ErrorKind::InvalidData,
            "shared memory region is empty",
        )));
    }

    let addr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| ShmemError::Mmap(e.into()))?
    };

    NonNull::new(addr.cast::<u8>())
        .ok_or_else(|| ShmemError::Mmap(io::Error::new(io::ErrorKind::Other, "mmap returned null")))
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }

        if self.is_owner {
            if let Ok(c_name) = CString::new(self.name.as_str()) {
                let _ = shm_unlink(c_name.as_c_str());
            }
        }
    }
}
