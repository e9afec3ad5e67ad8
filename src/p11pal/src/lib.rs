// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

extern crate lazy_static;
#[macro_use]
extern crate log;

#[macro_use]
pub mod util;
pub mod api;
pub mod backend;
pub mod crypto;
pub mod pkcs11;
pub mod storage;
pub mod store;

use crate::crypto::Error as CryptoError;
use crate::store::Error as StoreError;
use backend::token::Error as TokenError;

/// Object store as used by the session layer and the PAL entry points: the backend is
/// picked from the device config at runtime.
pub type Store = store::ObjectStore<Box<dyn storage::StorageBackend>>;

/// Module, slot and token capabilities and information
pub mod defs {
    use super::pkcs11;

    pub use p11pal_common::defs::*;

    pub const CRYPTOKI_VERSION: pkcs11::CK_VERSION = ck_version!(
        pkcs11::CRYPTOKI_VERSION_MAJOR,
        pkcs11::CRYPTOKI_VERSION_MINOR
    );

    pub const DEVICE_VERSION: pkcs11::CK_VERSION = ck_version!(0, 1);

    pub const SLOT_HARDWARE_VERSION: pkcs11::CK_VERSION = ck_version!(0, 1);
    pub const SLOT_FIRMWARE_VERSION: pkcs11::CK_VERSION = ck_version!(0, 1);

    pub const TOKEN_HARDWARE_VERSION: pkcs11::CK_VERSION = ck_version!(0, 1);
    pub const TOKEN_FIRMWARE_VERSION: pkcs11::CK_VERSION = ck_version!(0, 1);
    pub const TOKEN_UTC_TIME: &str = "";
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    AttributeSensitive,
    CryptoError(CryptoError),
    CryptokiAlreadyInitialized,
    CryptokiNotInitialized,
    KeyHandleInvalid,
    KeyTypeInconsistent,
    MechanismInvalid,
    ObjectHandleInvalid,
    OperationActive,
    OperationNotInitialized,
    SessionHandleInvalid,
    SessionLockPoisoned,
    SessionParallelNotSupported,
    SessionReadOnly,
    SlotIdInvalid,
    StoreError(StoreError),
    TemplateInconsistent,
    TokenError(TokenError),
    UserNotLoggedIn,
}

impl Error {
    pub fn ck_rv(&self) -> pkcs11::CK_RV {
        match self {
            Self::AttributeSensitive => pkcs11::CKR_ATTRIBUTE_SENSITIVE,
            Self::CryptoError(CryptoError::BadMech) => pkcs11::CKR_MECHANISM_INVALID,
            Self::CryptoError(CryptoError::BadKeyFormat) => pkcs11::CKR_KEY_TYPE_INCONSISTENT,
            Self::CryptoError(CryptoError::BadSigFormat) => pkcs11::CKR_SIGNATURE_LEN_RANGE,
            Self::CryptoError(CryptoError::DataLenRange) => pkcs11::CKR_DATA_LEN_RANGE,
            Self::CryptoError(CryptoError::DataMissing) => pkcs11::CKR_DATA_LEN_RANGE,
            Self::CryptoError(CryptoError::OperationActive) => pkcs11::CKR_OPERATION_ACTIVE,
            Self::CryptoError(CryptoError::SignatureInvalid) => pkcs11::CKR_SIGNATURE_INVALID,
            Self::CryptoError(_) => pkcs11::CKR_FUNCTION_FAILED,
            Self::CryptokiAlreadyInitialized => pkcs11::CKR_CRYPTOKI_ALREADY_INITIALIZED,
            Self::CryptokiNotInitialized => pkcs11::CKR_CRYPTOKI_NOT_INITIALIZED,
            Self::KeyHandleInvalid => pkcs11::CKR_KEY_HANDLE_INVALID,
            Self::KeyTypeInconsistent => pkcs11::CKR_KEY_TYPE_INCONSISTENT,
            Self::MechanismInvalid => pkcs11::CKR_MECHANISM_INVALID,
            Self::ObjectHandleInvalid => pkcs11::CKR_OBJECT_HANDLE_INVALID,
            Self::OperationActive => pkcs11::CKR_OPERATION_ACTIVE,
            Self::OperationNotInitialized => pkcs11::CKR_OPERATION_NOT_INITIALIZED,
            Self::SessionHandleInvalid => pkcs11::CKR_SESSION_HANDLE_INVALID,
            Self::SessionParallelNotSupported => pkcs11::CKR_SESSION_PARALLEL_NOT_SUPPORTED,
            Self::SessionReadOnly => pkcs11::CKR_SESSION_READ_ONLY,
            Self::SlotIdInvalid => pkcs11::CKR_SLOT_ID_INVALID,
            // The session layer reports a missing object through its handle, unlike the
            // PAL entry points which call it a function failure.
            Self::StoreError(StoreError::ObjectAbsent) => pkcs11::CKR_OBJECT_HANDLE_INVALID,
            Self::StoreError(StoreError::LabelUnknown) => pkcs11::CKR_ATTRIBUTE_VALUE_INVALID,
            Self::StoreError(StoreError::ObjectTooLarge) => pkcs11::CKR_DEVICE_MEMORY,
            Self::StoreError(e) => e.ck_rv(),
            Self::TemplateInconsistent => pkcs11::CKR_TEMPLATE_INCONSISTENT,
            Self::TokenError(TokenError::MechNotFound) => pkcs11::CKR_MECHANISM_INVALID,
            Self::TokenError(TokenError::PinIncorrect) => pkcs11::CKR_PIN_INCORRECT,
            Self::TokenError(TokenError::PinLenRange) => pkcs11::CKR_PIN_LEN_RANGE,
            Self::TokenError(TokenError::SessionCount) => pkcs11::CKR_SESSION_COUNT,
            Self::TokenError(TokenError::SessionHandleInvalid) => {
                pkcs11::CKR_SESSION_HANDLE_INVALID
            }
            Self::TokenError(TokenError::UserAlreadyLoggedIn) => pkcs11::CKR_USER_ALREADY_LOGGED_IN,
            Self::TokenError(TokenError::UserNotLoggedIn) => pkcs11::CKR_USER_NOT_LOGGED_IN,
            Self::TokenError(TokenError::UserTypeInvalid) => pkcs11::CKR_USER_TYPE_INVALID,
            Self::UserNotLoggedIn => pkcs11::CKR_USER_NOT_LOGGED_IN,
            Self::TokenError(TokenError::SessionLockPoisoned) | Self::SessionLockPoisoned => {
                pkcs11::CKR_GENERAL_ERROR
            }
        }
    }
}

impl From<Error> for pkcs11::CK_RV {
    fn from(src: Error) -> pkcs11::CK_RV {
        src.ck_rv()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    #[test]
    fn test_store_errors_at_session_layer() {
        assert_eq!(
            Error::StoreError(StoreError::ObjectAbsent).ck_rv(),
            pkcs11::CKR_OBJECT_HANDLE_INVALID
        );
        // The PAL mapping still reports a plain failure for the same condition.
        assert_eq!(StoreError::ObjectAbsent.ck_rv(), pkcs11::CKR_FUNCTION_FAILED);
        assert_eq!(
            Error::StoreError(StoreError::StorageError(storage::Error::VerifyFailed)).ck_rv(),
            pkcs11::CKR_DEVICE_ERROR
        );
        assert_eq!(
            pkcs11::CK_RV::from(Error::CryptoError(CryptoError::SignatureInvalid)),
            pkcs11::CKR_SIGNATURE_INVALID
        );
    }
}
