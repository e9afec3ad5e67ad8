// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use p11pal_common::util::LockedFile;

use super::flash::{Flash, ERASED_BYTE};
use super::{check_bounds, Error, Mutator, RegionId, Result, StorageBackend};

/// Flash simulation persisted in a host image file. The image is held under an exclusive
/// lock for as long as this object lives.
pub struct FileFlash {
    file: LockedFile,
    page_size: usize,
    page_count: usize,
}

impl FileFlash {
    /// Open (or create) the image at `path`. A missing or short image is padded with the
    /// erase pattern, so it reads as a blank part.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize, page_count: usize) -> Result<Self> {
        let file = LockedFile::open_rw(path.as_ref())?;
        let capacity = page_size * page_count;
        let current = file.metadata()?.len() as usize;
        if current < capacity {
            debug!(
                "Padding flash image {} from {} to {} bytes",
                path.as_ref().display(),
                current,
                capacity
            );
            let pad = vec![ERASED_BYTE; capacity - current];
            file.write_all_at(&pad, current as u64)?;
            file.sync_data()?;
        }
        Ok(Self {
            file,
            page_size,
            page_count,
        })
    }
}

impl Flash for FileFlash {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> usize {
        self.page_count
    }

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(addr, buf.len(), self.capacity())?;
        self.file.read_exact_at(buf, addr as u64)?;
        Ok(())
    }

    fn erase_page(&mut self, page: usize) -> Result<()> {
        if page >= self.page_count {
            return Err(Error::OutOfRange);
        }
        let blank = vec![ERASED_BYTE; self.page_size];
        self.file
            .write_all_at(&blank, (page * self.page_size) as u64)
            .map_err(|_| Error::EraseFailed)?;
        Ok(())
    }

    fn program(&mut self, addr: usize, data: &[u8]) -> Result<()> {
        check_bounds(addr, data.len(), self.capacity())?;
        let mut current = vec![0u8; data.len()];
        self.file.read_exact_at(&mut current, addr as u64)?;
        if current.iter().zip(data).any(|(old, new)| old & new != *new) {
            return Err(Error::ProgramFailed);
        }
        self.file
            .write_all_at(data, addr as u64)
            .and_then(|_| self.file.sync_data())
            .map_err(|_| Error::ProgramFailed)?;
        Ok(())
    }
}

/// Storage backend keeping each region in its own host file, the way the desktop ports
/// persist `FreeRTOS_P11_*.dat` files. A missing file reads as an erased region.
pub struct FileBackend {
    dir: PathBuf,
    regions: Vec<(String, usize)>,
}

impl FileBackend {
    /// `regions` lists the backing file name and fixed length of every region.
    pub fn new<P: Into<PathBuf>>(dir: P, regions: Vec<(String, usize)>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, regions })
    }

    fn region(&self, region: RegionId) -> Result<(PathBuf, usize)> {
        self.regions
            .get(region)
            .map(|(name, len)| (self.dir.join(name), *len))
            .ok_or(Error::RegionInvalid)
    }

    fn load(path: &Path, len: usize) -> Result<Vec<u8>> {
        let mut data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        data.resize(len, ERASED_BYTE);
        Ok(data)
    }
}

impl StorageBackend for FileBackend {
    fn region_count(&self) -> usize {
        self.regions.len()
    }

    fn region_len(&self, region: RegionId) -> Result<usize> {
        self.region(region).map(|(_, len)| len)
    }

    fn read(&self, region: RegionId, offset: usize, buf: &mut [u8]) -> Result<()> {
        let (path, len) = self.region(region)?;
        check_bounds(offset, buf.len(), len)?;
        let data = Self::load(&path, len)?;
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
        Ok(())
    }

    /// Other processes sharing the directory are kept out of the read-modify-write by a
    /// lock on a sibling file, since the rename replaces the region file itself.
    fn atomic_update(&mut self, region: RegionId, mutator: Mutator) -> Result<()> {
        let (path, len) = self.region(region)?;
        let _lock = LockedFile::open_rw(path.with_extension("lock")).map_err(|e| {
            error!("Unable to lock {}: {:?}", path.display(), e);
            Error::from(e)
        })?;
        let current = Self::load(&path, len)?;
        let mut scratch = current.clone();
        mutator(&mut scratch)?;
        if scratch == current {
            return Ok(());
        }

        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = fs::File::create(&tmp_path).map_err(|_| Error::ProgramFailed)?;
            tmp.write_all(&scratch)
                .and_then(|_| tmp.sync_all())
                .map_err(|_| Error::ProgramFailed)?;
        }
        fs::rename(&tmp_path, &path).map_err(|e| {
            error!("Unable to replace {}: {:?}", path.display(), e);
            Error::ProgramFailed
        })?;

        if Self::load(&path, len)? != scratch {
            return Err(Error::VerifyFailed);
        }
        Ok(())
    }
}
