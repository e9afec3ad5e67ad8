// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::pkcs11;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    UnknownMech,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MechDigest {
    Sha256,
}

/// Mechanisms offered by the token: SHA-256 digesting and ECDSA over P-256, either on a
/// caller-computed digest or hashing the message itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mechanism {
    Digest(MechDigest),
    Ecdsa(Option<MechDigest>),
}

impl Mechanism {
    const EC_KEY_BITS: pkcs11::CK_ULONG = 256;

    pub fn from_ck_type(mech_type: pkcs11::CK_MECHANISM_TYPE) -> Result<Self, Error> {
        match mech_type {
            pkcs11::CKM_SHA256 => Ok(Self::Digest(MechDigest::Sha256)),
            pkcs11::CKM_ECDSA => Ok(Self::Ecdsa(None)),
            pkcs11::CKM_ECDSA_SHA256 => Ok(Self::Ecdsa(Some(MechDigest::Sha256))),
            _ => Err(Error::UnknownMech),
        }
    }

    pub fn ck_type(&self) -> pkcs11::CK_MECHANISM_TYPE {
        match self {
            Self::Digest(MechDigest::Sha256) => pkcs11::CKM_SHA256,
            Self::Ecdsa(None) => pkcs11::CKM_ECDSA,
            Self::Ecdsa(Some(MechDigest::Sha256)) => pkcs11::CKM_ECDSA_SHA256,
        }
    }

    pub fn ck_info(&self) -> pkcs11::CK_MECHANISM_INFO {
        let bits = match self {
            Self::Digest(_) => 0,
            Self::Ecdsa(_) => Self::EC_KEY_BITS,
        };
        pkcs11::CK_MECHANISM_INFO {
            ulMinKeySize: bits,
            ulMaxKeySize: bits,
            flags: self.ck_flags(),
        }
    }

    pub fn ck_flags(&self) -> pkcs11::CK_FLAGS {
        match self {
            Self::Digest(_) => pkcs11::CKF_DIGEST,
            Self::Ecdsa(_) => pkcs11::CKF_SIGN | pkcs11::CKF_VERIFY,
        }
    }

    /// Only hashing mechanisms accept `*Update()` calls. Raw `CKM_ECDSA` takes exactly
    /// one 32-byte digest.
    pub fn is_multipart(&self) -> bool {
        match self {
            Self::Digest(_) => true,
            Self::Ecdsa(digest) => digest.is_some(),
        }
    }

    pub fn is_sign_verify(&self) -> bool {
        matches!(self, Self::Ecdsa(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ck_type_mapping() {
        for ck_type in [pkcs11::CKM_SHA256, pkcs11::CKM_ECDSA, pkcs11::CKM_ECDSA_SHA256].iter() {
            let mech = Mechanism::from_ck_type(*ck_type).unwrap();
            assert_eq!(mech.ck_type(), *ck_type);
        }
        assert_eq!(Mechanism::from_ck_type(0x0001), Err(Error::UnknownMech));
    }

    #[test]
    fn test_multipart() {
        assert!(!Mechanism::Ecdsa(None).is_multipart());
        assert!(Mechanism::Ecdsa(Some(MechDigest::Sha256)).is_multipart());
        assert!(Mechanism::Digest(MechDigest::Sha256).is_multipart());
        assert_eq!(
            Mechanism::Ecdsa(None).ck_info().flags,
            pkcs11::CKF_SIGN | pkcs11::CKF_VERIFY
        );
    }
}
