// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! On-flash image format shared with the bootloader.
//!
//! Each bank starts with a 32-byte boot descriptor whose first 8 bytes are the image
//! header: the `@AFRTOS` magic followed by a flags byte. Image data follows the header;
//! the trailer carrying the signature is written after the image, on a quad-word
//! boundary. Flag transitions only ever clear bits, so they can be programmed in place.

use p11pal::storage::Flash;

use crate::{Error, Result};

pub const IMAGE_MAGIC: &[u8; 7] = b"@AFRTOS";
pub const HEADER_LEN: usize = 8;
pub const DESCRIPTOR_LEN: usize = 32;

pub const FLAG_NEW: u8 = 0xFF;
pub const FLAG_PENDING_COMMIT: u8 = 0xFE;
pub const FLAG_VALID: u8 = 0xFC;
pub const FLAG_INVALID: u8 = 0xF8;

/// NVM programming granularity; the trailer is aligned to it.
pub const NVM_QUAD_LEN: usize = 16;

pub const SIGNATURE_TYPE: &str = "sig-sha256-ecdsa";
pub const SIGNATURE_TYPE_LEN: usize = 32;
pub const MAX_SIGNATURE_LEN: usize = 256;
pub const TRAILER_LEN: usize = SIGNATURE_TYPE_LEN + 4 + MAX_SIGNATURE_LEN;

/// Split of the flash device into the running (lower) and update (upper) bank.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Banks {
    page_size: usize,
    bank_pages: usize,
}

impl Banks {
    pub fn new<F: Flash>(flash: &F) -> Result<Self> {
        let bank_pages = flash.page_count() / 2;
        let banks = Self {
            page_size: flash.page_size(),
            bank_pages,
        };
        if bank_pages == 0 || banks.bank_len() <= DESCRIPTOR_LEN + TRAILER_LEN {
            return Err(Error::BankLayoutInvalid);
        }
        Ok(banks)
    }

    pub fn bank_len(&self) -> usize {
        self.page_size * self.bank_pages
    }

    pub fn running_bank(&self) -> usize {
        0
    }

    pub fn update_bank(&self) -> usize {
        self.bank_len()
    }

    /// Largest image the update bank holds, leaving room for the descriptor and trailer.
    pub fn max_image_size(&self) -> usize {
        self.bank_len() - DESCRIPTOR_LEN - TRAILER_LEN
    }

    /// Flash address of image byte `offset` in the update bank.
    pub fn image_addr(&self, offset: usize) -> usize {
        self.update_bank() + HEADER_LEN + offset
    }

    pub fn trailer_addr(&self, image_end: usize) -> usize {
        align_up(self.image_addr(image_end), NVM_QUAD_LEN)
    }

    pub fn erase_update_bank<F: Flash>(&self, flash: &mut F) -> Result<()> {
        for page in self.bank_pages..2 * self.bank_pages {
            flash.erase_page(page)?;
        }
        Ok(())
    }
}

fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) / align * align
}

/// Flags of the image at `bank`, or `None` if the bank holds no image header.
pub fn read_flags<F: Flash>(flash: &F, bank: usize) -> Result<Option<u8>> {
    let mut header = [0u8; HEADER_LEN];
    flash.read(bank, &mut header)?;
    if &header[..IMAGE_MAGIC.len()] != IMAGE_MAGIC {
        return Ok(None);
    }
    Ok(Some(header[IMAGE_MAGIC.len()]))
}

/// Program a full header into an erased bank.
pub fn write_header<F: Flash>(flash: &mut F, bank: usize, flags: u8) -> Result<()> {
    let mut header = [0u8; HEADER_LEN];
    header[..IMAGE_MAGIC.len()].copy_from_slice(IMAGE_MAGIC);
    header[IMAGE_MAGIC.len()] = flags;
    flash.program(bank, &header)?;
    Ok(())
}

/// Move an existing header to `flags`, which must only clear bits.
pub fn update_flags<F: Flash>(flash: &mut F, bank: usize, flags: u8) -> Result<()> {
    flash.program(bank + IMAGE_MAGIC.len(), &[flags])?;
    Ok(())
}

pub fn encode_trailer(signature: &[u8]) -> Result<Vec<u8>> {
    if signature.len() > MAX_SIGNATURE_LEN {
        return Err(Error::SignatureCheckFailed);
    }
    let mut trailer = vec![0u8; TRAILER_LEN];
    trailer[..SIGNATURE_TYPE.len()].copy_from_slice(SIGNATURE_TYPE.as_bytes());
    trailer[SIGNATURE_TYPE_LEN..SIGNATURE_TYPE_LEN + 4]
        .copy_from_slice(&(signature.len() as u32).to_le_bytes());
    trailer[SIGNATURE_TYPE_LEN + 4..SIGNATURE_TYPE_LEN + 4 + signature.len()]
        .copy_from_slice(signature);
    Ok(trailer)
}
