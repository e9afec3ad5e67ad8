// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! OTA platform abstraction for dual-bank flash parts: new firmware is staged in the
//! update bank, authenticated through the PKCS#11 session layer, and only then handed to
//! the platform for a reset into the new image.

#[macro_use]
extern crate log;

pub mod image;
pub mod pal;
pub mod platform;

pub use pal::{FileContext, ImageState, OtaPal, PalImageState, VerifiedImage};
pub use platform::Platform;

use p11pal::storage::Error as FlashError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    /// The flash device cannot be split into two image banks.
    BankLayoutInvalid,
    /// No signer key or certificate could be found, or it could not be used.
    BadSignerCert,
    /// Accepting an image is only possible while it runs in self-test mode.
    CommitFailed,
    DeviceError(p11pal::Error),
    DeviceLockPoisoned,
    FlashError(FlashError),
    /// The file context does not belong to the transfer in progress.
    InvalidContext,
    OutOfRange,
    ResetFailed,
    SignatureCheckFailed,
    /// The verified image has been replaced by a later transfer.
    StaleImage,
    TransferActive,
}

impl From<FlashError> for Error {
    fn from(src: FlashError) -> Self {
        Self::FlashError(src)
    }
}

impl From<p11pal::Error> for Error {
    fn from(src: p11pal::Error) -> Self {
        Self::DeviceError(src)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
