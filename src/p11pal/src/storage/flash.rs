// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{check_bounds, Error, Mutator, RegionId, Result, StorageBackend};

/// Erased NOR flash reads as all ones.
pub const ERASED_BYTE: u8 = 0xFF;

/// A NOR-like flash device: erase works on whole pages and sets every bit, programming
/// can only clear bits.
pub trait Flash: Send {
    fn page_size(&self) -> usize;

    fn page_count(&self) -> usize;

    fn capacity(&self) -> usize {
        self.page_size() * self.page_count()
    }

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<()>;

    fn erase_page(&mut self, page: usize) -> Result<()>;

    /// Program `data` at `addr`. Fails with `ProgramFailed` if any bit would have to go
    /// from 0 to 1, i.e. the target range was not erased first.
    fn program(&mut self, addr: usize, data: &[u8]) -> Result<()>;
}

/// RAM-backed flash, used for host simulation and tests. Faults can be injected into the
/// next erase or program operation to exercise the storage failure paths.
pub struct MemFlash {
    page_size: usize,
    mem: Vec<u8>,
    erase_count: usize,
    fail_next_erase: bool,
    fail_next_program: bool,
}

impl MemFlash {
    pub fn new(page_size: usize, page_count: usize) -> Self {
        Self {
            page_size,
            mem: vec![ERASED_BYTE; page_size * page_count],
            erase_count: 0,
            fail_next_erase: false,
            fail_next_program: false,
        }
    }

    pub fn inject_erase_fault(&mut self) {
        self.fail_next_erase = true;
    }

    pub fn inject_program_fault(&mut self) {
        self.fail_next_program = true;
    }

    /// Number of page erases performed so far.
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.mem
    }
}

impl Flash for MemFlash {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn page_count(&self) -> usize {
        self.mem.len() / self.page_size
    }

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(addr, buf.len(), self.mem.len())?;
        buf.copy_from_slice(&self.mem[addr..addr + buf.len()]);
        Ok(())
    }

    fn erase_page(&mut self, page: usize) -> Result<()> {
        if page >= self.page_count() {
            return Err(Error::OutOfRange);
        }
        if self.fail_next_erase {
            self.fail_next_erase = false;
            return Err(Error::EraseFailed);
        }
        let start = page * self.page_size;
        for byte in self.mem[start..start + self.page_size].iter_mut() {
            *byte = ERASED_BYTE;
        }
        self.erase_count += 1;
        Ok(())
    }

    fn program(&mut self, addr: usize, data: &[u8]) -> Result<()> {
        check_bounds(addr, data.len(), self.mem.len())?;
        if self.fail_next_program {
            self.fail_next_program = false;
            // A real part that browns out mid-write leaves a partially programmed range.
            let half = data.len() / 2;
            for (dst, src) in self.mem[addr..addr + half].iter_mut().zip(data) {
                *dst &= *src;
            }
            return Err(Error::ProgramFailed);
        }
        let target = &mut self.mem[addr..addr + data.len()];
        if target.iter().zip(data).any(|(old, new)| old & new != *new) {
            return Err(Error::ProgramFailed);
        }
        target.copy_from_slice(data);
        Ok(())
    }
}

/// Storage backend over a flash device, with one region per erase page.
///
/// Every update rewrites the whole page, so objects colocated in one page are carried
/// over through the scratch copy.
pub struct FlashBackend<F: Flash> {
    flash: F,
}

impl<F: Flash> FlashBackend<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn page_addr(&self, region: RegionId) -> Result<usize> {
        if region >= self.flash.page_count() {
            return Err(Error::RegionInvalid);
        }
        Ok(region * self.flash.page_size())
    }
}

impl<F: Flash> StorageBackend for FlashBackend<F> {
    fn region_count(&self) -> usize {
        self.flash.page_count()
    }

    fn region_len(&self, region: RegionId) -> Result<usize> {
        self.page_addr(region).map(|_| self.flash.page_size())
    }

    fn read(&self, region: RegionId, offset: usize, buf: &mut [u8]) -> Result<()> {
        let base = self.page_addr(region)?;
        check_bounds(offset, buf.len(), self.flash.page_size())?;
        self.flash.read(base + offset, buf)
    }

    fn atomic_update(&mut self, region: RegionId, mutator: Mutator) -> Result<()> {
        let base = self.page_addr(region)?;
        let page_size = self.flash.page_size();

        let mut current = vec![0u8; page_size];
        self.flash.read(base, &mut current)?;
        let mut scratch = current.clone();
        mutator(&mut scratch)?;
        if scratch == current {
            return Ok(());
        }

        trace!("Rewriting flash page {}", region);
        self.flash.erase_page(region)?;
        self.flash.program(base, &scratch)?;

        self.flash.read(base, &mut current)?;
        if current != scratch {
            error!("Flash page {} verify-after-write mismatch", region);
            return Err(Error::VerifyFailed);
        }
        Ok(())
    }
}
