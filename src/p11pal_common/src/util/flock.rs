// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use libc;
use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::ops::{Deref, DerefMut};
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Wrap an `std::fs::File` object, ensuring that its inner FD is locked
/// via `libc::flock`.
///
/// Config files are read under a shared lock. Flash image files are held under an
/// exclusive lock for as long as the owning backend lives, so that two processes
/// never program the same simulated part at once.
pub struct LockedFile(File);

impl LockedFile {
    /// Open the file at `path` in read-only mode, holding a shared lock.
    pub fn open_ro<P: AsRef<Path>>(path: P) -> IoResult<Self> {
        OpenOptions::new()
            .read(true)
            .open(path)
            .and_then(|f| Self::from_file(f, libc::LOCK_SH))
    }

    /// Open (creating it if needed) the file at `path` in read-write mode, holding an
    /// exclusive lock.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> IoResult<Self> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .and_then(|f| Self::from_file(f, libc::LOCK_EX))
    }

    /// Same as `open_rw()`, but fail with `WouldBlock` instead of waiting when another
    /// process holds the lock.
    pub fn try_open_rw<P: AsRef<Path>>(path: P) -> IoResult<Self> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .and_then(|f| Self::from_file(f, libc::LOCK_EX | libc::LOCK_NB))
    }

    /// Get a mutable reference to the inner `File` object.
    pub fn as_mut_file(&mut self) -> &mut File {
        &mut self.0
    }

    fn from_file(file: File, flock_op: libc::c_int) -> IoResult<Self> {
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), flock_op) };
            if rc == 0 {
                break;
            }
            let err = IoError::last_os_error();

            // If our wait was interrupted, try to acquire the lock again.
            if err.kind() != ErrorKind::Interrupted {
                return Err(err);
            }
        }
        Ok(Self(file))
    }
}

impl Deref for LockedFile {
    type Target = File;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for LockedFile {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.0.as_raw_fd(), libc::LOCK_UN);
        }
    }
}
