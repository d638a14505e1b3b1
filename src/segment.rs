//! Low-level POSIX shared memory segments

use crate::error::{Result, ShmError};
use rustix::fd::OwnedFd;
use rustix::fs::{fstat, ftruncate};
use rustix::io::Errno;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::ptr::NonNull;

fn posix_name(name: &str) -> CString {
    // POSIX requires a leading slash; it never appears in registry keys
    // or on the wire.
    CString::new(format!("/{name}")).expect("segment names contain no NUL")
}

/// A mapped OS-level shared memory segment.
///
/// Created by exactly one process, attachable by any number of others.
/// Dropping a `Segment` releases this process's mapping only; destroying
/// the segment itself is a separate, explicit [`unlink`] call that the
/// lifecycle context issues for segments it created.
pub struct Segment {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    mapped: bool,
}

// SAFETY: the segment is a plain byte region; all access goes through
// raw pointers and the registry serializes lifecycle mutation.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Create a new segment of `size` bytes, failing if the name is taken.
    ///
    /// Creation is exclusive (`O_EXCL`) so that a collision surfaces as
    /// [`ShmError::NameExists`] for the caller to recover from instead of
    /// silently opening another process's segment.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let c_name = posix_name(name);

        let fd = shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH,
        )
        .map_err(|e| {
            if e == Errno::EXIST {
                ShmError::NameExists {
                    name: name.to_string(),
                }
            } else {
                ShmError::CreateSegment {
                    name: name.to_string(),
                    source: e.into(),
                }
            }
        })?;

        ftruncate(&fd, size as u64).map_err(|e| ShmError::Resize(e.into()))?;

        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
            .map_err(|e| ShmError::Map(e.into()))?
        };
        let addr = NonNull::new(addr.cast::<u8>()).expect("mmap returned null");

        // Fresh segments start zeroed
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            mapped: true,
        })
    }

    /// Attach to an existing segment by name.
    ///
    /// The size comes from the segment itself, not the caller.
    pub fn open(name: &str) -> Result<Self> {
        let c_name = posix_name(name);

        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
            if e == Errno::NOENT {
                ShmError::NotFound {
                    name: name.to_string(),
                }
            } else {
                ShmError::OpenSegment {
                    name: name.to_string(),
                    source: e.into(),
                }
            }
        })?;

        let stat = fstat(&fd).map_err(|e| ShmError::OpenSegment {
            name: name.to_string(),
            source: e.into(),
        })?;
        let size = stat.st_size as usize;

        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
            .map_err(|e| ShmError::Map(e.into()))?
        };
        let addr = NonNull::new(addr.cast::<u8>()).expect("mmap returned null");

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            mapped: true,
        })
    }

    /// Get raw pointer to the mapped bytes
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Size of the segment in bytes
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Name of the segment (without the POSIX leading slash)
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release this process's mapping, propagating the platform error.
    ///
    /// The segment itself stays alive until its creator unlinks it.
    pub fn close(mut self) -> Result<()> {
        self.mapped = false;
        unsafe { munmap(self.addr.as_ptr().cast(), self.size) }
            .map_err(|e| ShmError::Unmap(e.into()))
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if self.mapped {
            unsafe {
                let _ = munmap(self.addr.as_ptr().cast(), self.size);
            }
        }
    }
}

/// Destroy the named segment.
///
/// Legal exactly once per segment; afterwards the name is reusable.
/// A missing segment maps to [`ShmError::NotFound`] so best-effort
/// cleanup can tell "already gone" from real failures.
pub fn unlink(name: &str) -> Result<()> {
    let c_name = posix_name(name);
    shm_unlink(c_name.as_c_str()).map_err(|e| {
        if e == Errno::NOENT {
            ShmError::NotFound {
                name: name.to_string(),
            }
        } else {
            ShmError::Unlink {
                name: name.to_string(),
                source: e.into(),
            }
        }
    })
}
