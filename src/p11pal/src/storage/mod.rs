// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Persistent storage underneath the object store. Boards reach their flash, EEPROM or
//! file system through very different driver calls; all of them reduce to a set of
//! fixed-size regions that can be read at any offset and rewritten only as a whole.

pub mod file;
pub mod flash;

pub use file::{FileBackend, FileFlash};
pub use flash::{Flash, FlashBackend, MemFlash};

/// Index of a storage region (a flash erase page, or a backing file).
pub type RegionId = usize;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    RegionInvalid,
    OutOfRange,
    EraseFailed,
    ProgramFailed,
    VerifyFailed,
    IoError(std::io::ErrorKind),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Region mutation callback used by `StorageBackend::atomic_update()`. It receives a
/// scratch copy of the entire region.
pub type Mutator<'a> = &'a mut dyn FnMut(&mut [u8]) -> Result<()>;

/// Byte-addressable persistent storage, organized in independently rewritable regions.
pub trait StorageBackend: Send {
    fn region_count(&self) -> usize;

    fn region_len(&self, region: RegionId) -> Result<usize>;

    /// Read `buf.len()` bytes of `region`, starting at `offset`. Never-written storage
    /// reads as the erase pattern (0xFF).
    fn read(&self, region: RegionId, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Read-modify-write an entire region: copy it to a scratch buffer, apply `mutator`,
    /// erase and rewrite the region, then verify by reading it back. If the mutator fails
    /// the region is left untouched. A failure after the erase leaves the region content
    /// undefined; the caller owns that failure domain.
    fn atomic_update(&mut self, region: RegionId, mutator: Mutator) -> Result<()>;
}

impl From<std::io::Error> for Error {
    fn from(src: std::io::Error) -> Self {
        Self::IoError(src.kind())
    }
}

pub(crate) fn check_bounds(offset: usize, len: usize, limit: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(Error::OutOfRange),
    }
}

impl StorageBackend for Box<dyn StorageBackend> {
    fn region_count(&self) -> usize {
        (**self).region_count()
    }

    fn region_len(&self, region: RegionId) -> Result<usize> {
        (**self).region_len(region)
    }

    fn read(&self, region: RegionId, offset: usize, buf: &mut [u8]) -> Result<()> {
        (**self).read(region, offset, buf)
    }

    fn atomic_update(&mut self, region: RegionId, mutator: Mutator) -> Result<()> {
        (**self).atomic_update(region, mutator)
    }
}
