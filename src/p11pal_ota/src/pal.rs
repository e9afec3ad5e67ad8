// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use p11pal::backend::Device;
use p11pal::crypto;
use p11pal::pkcs11;
use p11pal::storage::Flash;

use crate::image::{self, Banks};
use crate::platform::Platform;
use crate::{Error, Result};

/// Chunk size used when feeding the staged image to the verifier.
const VERIFY_CHUNK_LEN: usize = 1024;

/// An OTA file as described by the job document.
#[derive(Clone, Debug, Default)]
pub struct FileContext {
    pub file_path: String,
    /// Label of the signer certificate or public key in the token.
    pub cert_label: String,
    pub signature: Option<Vec<u8>>,
    pub file_size: usize,
}

/// Requested state for the most recently transferred image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ImageState {
    Testing,
    Accepted,
    Rejected,
    Aborted,
}

/// State of the image as seen by the bootloader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PalImageState {
    Valid,
    PendingCommit,
    Invalid,
}

/// Proof that the staged image passed its signature check. It can only be obtained from
/// `OtaPal::close_file()` and is the only way to reach `OtaPal::activate_new_image()`.
#[derive(Debug)]
pub struct VerifiedImage {
    generation: u64,
    size: usize,
}

impl VerifiedImage {
    pub fn size(&self) -> usize {
        self.size
    }
}

struct Transfer {
    file_path: String,
    low: usize,
    high: usize,
}

pub struct OtaPal<F: Flash, P: Platform> {
    flash: F,
    platform: P,
    banks: Banks,
    device: Arc<Mutex<Device>>,
    fallback_label: String,
    transfer: Option<Transfer>,
    generation: u64,
}

impl<F: Flash, P: Platform> OtaPal<F, P> {
    /// `fallback_label` names the token object used when the signer named by a file
    /// context cannot be found, normally the code-verification key.
    pub fn new(
        flash: F,
        platform: P,
        device: Arc<Mutex<Device>>,
        fallback_label: &str,
    ) -> Result<Self> {
        let banks = Banks::new(&flash)?;
        Ok(Self {
            flash,
            platform,
            banks,
            device,
            fallback_label: fallback_label.to_string(),
            transfer: None,
            generation: 0,
        })
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn max_image_size(&self) -> usize {
        self.banks.max_image_size()
    }

    pub fn create_file_for_rx(&mut self, ctx: &FileContext) -> Result<()> {
        trace!("create_file_for_rx() called");

        if self.transfer.is_some() {
            error!("An OTA transfer is already in progress");
            return Err(Error::TransferActive);
        }
        if ctx.file_size > self.banks.max_image_size() {
            error!(
                "{} is {} bytes, the update bank holds {}",
                ctx.file_path,
                ctx.file_size,
                self.banks.max_image_size()
            );
            return Err(Error::OutOfRange);
        }
        self.erase_update_bank().map_err(|e| {
            error!("Failed to erase the update bank: {:?}", e);
            e
        })?;
        self.transfer = Some(Transfer {
            file_path: ctx.file_path.clone(),
            low: self.banks.max_image_size(),
            high: 0,
        });
        info!("Receive file created: {}", ctx.file_path);
        Ok(())
    }

    /// Program one block of the image at `offset`. Returns the number of bytes written.
    pub fn write_block(&mut self, ctx: &FileContext, offset: usize, data: &[u8]) -> Result<usize> {
        let max_image_size = self.banks.max_image_size();
        let transfer = self.transfer_for(ctx)?;
        let end = match offset.checked_add(data.len()) {
            Some(end) if end <= max_image_size => end,
            _ => return Err(Error::OutOfRange),
        };
        transfer.low = transfer.low.min(offset);
        transfer.high = transfer.high.max(end);
        let addr = self.banks.image_addr(offset);
        self.flash.program(addr, data)?;
        Ok(data.len())
    }

    /// Authenticate the staged image and close the transfer. The transfer is released
    /// whatever the outcome; an image failing the check is erased.
    pub fn close_file(&mut self, ctx: &FileContext) -> Result<VerifiedImage> {
        trace!("close_file() called");

        self.transfer_for(ctx)?;
        let transfer = match self.transfer.take() {
            Some(transfer) => transfer,
            None => return Err(Error::InvalidContext),
        };
        let signature = match ctx.signature.as_ref() {
            Some(signature) if transfer.high > transfer.low => signature,
            _ => {
                error!("No signature or no image data for {}", ctx.file_path);
                return Err(Error::SignatureCheckFailed);
            }
        };

        if let Err(e) = self.check_signature(ctx, &transfer, signature) {
            error!("Signature verification failed for {}: {:?}", ctx.file_path, e);
            if let Err(e) = self.erase_update_bank() {
                warn!("Failed to erase the rejected image: {:?}", e);
            }
            return Err(e);
        }
        info!("{} signature verification passed", image::SIGNATURE_TYPE);

        let trailer = image::encode_trailer(signature)?;
        image::write_header(&mut self.flash, self.banks.update_bank(), image::FLAG_NEW)?;
        let trailer_addr = self.banks.trailer_addr(transfer.high);
        debug!("Writing trailer at {:#x}", trailer_addr);
        self.flash.program(trailer_addr, &trailer)?;

        Ok(VerifiedImage {
            generation: self.generation,
            size: transfer.high,
        })
    }

    /// Reset into the new image.
    pub fn activate_new_image(&mut self, image: VerifiedImage) -> Result<()> {
        trace!("activate_new_image() called");

        if image.generation != self.generation || self.transfer.is_some() {
            error!("Verified image was replaced by a later transfer");
            return Err(Error::StaleImage);
        }
        info!("Activating the new image ({} bytes)", image.size);
        self.platform.reset_device()
    }

    pub fn abort(&mut self, ctx: &FileContext) -> Result<()> {
        trace!("abort() called");

        if self.transfer.take().is_some() {
            info!("Aborted transfer of {}", ctx.file_path);
        }
        Ok(())
    }

    /// Record the outcome of the self test, or drop a staged image. The running image
    /// can only be committed while it is pending commit.
    pub fn set_image_state(&mut self, state: ImageState) -> Result<()> {
        trace!("set_image_state({:?}) called", state);

        let running = self.banks.running_bank();
        let pending = image::read_flags(&self.flash, running)? == Some(image::FLAG_PENDING_COMMIT);

        match (pending, state) {
            (_, ImageState::Testing) => Ok(()),
            (true, ImageState::Accepted) => {
                image::update_flags(&mut self.flash, running, image::FLAG_VALID)?;
                info!("Accepted and committed final image");
                self.platform.disable_watchdog();
                // The previous firmware is no longer needed.
                if let Err(e) = self.erase_update_bank() {
                    warn!("Failed to erase the other image: {:?}", e);
                }
                Ok(())
            }
            (true, ImageState::Rejected) | (true, ImageState::Aborted) => {
                image::update_flags(&mut self.flash, running, image::FLAG_INVALID)?;
                info!("Marked running image invalid ({:?})", state);
                Ok(())
            }
            (false, ImageState::Accepted) => {
                error!("Not in commit pending, cannot mark the image valid");
                Err(Error::CommitFailed)
            }
            (false, ImageState::Rejected) | (false, ImageState::Aborted) => {
                info!("Dropping staged image ({:?})", state);
                self.erase_update_bank()
            }
        }
    }

    pub fn get_image_state(&self) -> Result<PalImageState> {
        let running = image::read_flags(&self.flash, self.banks.running_bank())?;
        let flags = match running {
            None => return Ok(PalImageState::Invalid),
            Some(image::FLAG_PENDING_COMMIT) => return Ok(PalImageState::PendingCommit),
            Some(_) => image::read_flags(&self.flash, self.banks.update_bank())?,
        };
        Ok(match flags {
            Some(image::FLAG_PENDING_COMMIT) => PalImageState::PendingCommit,
            Some(image::FLAG_VALID) | Some(image::FLAG_NEW) => PalImageState::Valid,
            _ => PalImageState::Invalid,
        })
    }

    /// Any image proof issued for the update bank is void from here on, even if the erase
    /// fails partway.
    fn erase_update_bank(&mut self) -> Result<()> {
        self.generation += 1;
        self.banks.erase_update_bank(&mut self.flash)
    }

    fn transfer_for(&mut self, ctx: &FileContext) -> Result<&mut Transfer> {
        match self.transfer.as_mut() {
            Some(transfer) if transfer.file_path == ctx.file_path => Ok(transfer),
            _ => Err(Error::InvalidContext),
        }
    }

    fn check_signature(
        &self,
        ctx: &FileContext,
        transfer: &Transfer,
        signature: &[u8],
    ) -> Result<()> {
        let device = self.device.lock().map_err(|_| Error::DeviceLockPoisoned)?;
        let slot_id = *device
            .slot_list(true)?
            .first()
            .ok_or(Error::DeviceError(p11pal::Error::SlotIdInvalid))?;
        drop(device);

        let session = self
            .device
            .lock()
            .map_err(|_| Error::DeviceLockPoisoned)?
            .open_session(slot_id, pkcs11::CKF_SERIAL_SESSION)?;
        let ret = self.verify_span(session, ctx, transfer, signature);
        match self.device.lock() {
            Ok(mut device) => {
                if let Err(e) = device.close_session(session) {
                    warn!("Failed to close verification session: {:?}", e);
                }
            }
            Err(_) => warn!("Device lock poisoned, verification session left open"),
        }
        ret
    }

    fn verify_span(
        &self,
        session: pkcs11::CK_SESSION_HANDLE,
        ctx: &FileContext,
        transfer: &Transfer,
        signature: &[u8],
    ) -> Result<()> {
        let device = self.device.lock().map_err(|_| Error::DeviceLockPoisoned)?;

        let mut key = device.find_object(session, ctx.cert_label.as_bytes(), None)?;
        if key == pkcs11::CK_INVALID_HANDLE {
            warn!(
                "No signer with label {:?}, using {:?}",
                ctx.cert_label, self.fallback_label
            );
            key = device.find_object(session, self.fallback_label.as_bytes(), None)?;
        }
        if key == pkcs11::CK_INVALID_HANDLE {
            return Err(Error::BadSignerCert);
        }
        device
            .verify_init(session, pkcs11::CKM_ECDSA_SHA256, key)
            .map_err(|e| {
                error!("Unusable signer object: {:?}", e);
                Error::BadSignerCert
            })?;

        let mut buf = vec![0u8; VERIFY_CHUNK_LEN];
        let mut offset = transfer.low;
        while offset < transfer.high {
            let len = VERIFY_CHUNK_LEN.min(transfer.high - offset);
            self.flash
                .read(self.banks.image_addr(offset), &mut buf[..len])?;
            device.verify_update(session, &buf[..len])?;
            offset += len;
        }
        device
            .verify_final(session, signature)
            .map_err(|e| match e {
                p11pal::Error::CryptoError(crypto::Error::SignatureInvalid)
                | p11pal::Error::CryptoError(crypto::Error::BadSigFormat) => {
                    Error::SignatureCheckFailed
                }
                e => Error::DeviceError(e),
            })
    }
}
