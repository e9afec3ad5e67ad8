// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use rand_core::{OsRng, RngCore};

use super::{
    DigestCtx, EcdsaSignCtx, EcdsaVerifyCtx, Error, PrivateKey, Provider, PublicKey, Result,
    Sha256DigestCtx, SignCtx, VerifyCtx,
};
use crate::backend::mech::{MechDigest, Mechanism};

pub const PROVIDER_NAME: &str = "soft-p256";

const MECH_LIST: [Mechanism; 3] = [
    Mechanism::Digest(MechDigest::Sha256),
    Mechanism::Ecdsa(None),
    Mechanism::Ecdsa(Some(MechDigest::Sha256)),
];

/// Software token: ECDSA P-256 and SHA-256 in pure Rust, randomness from the OS.
#[derive(Default)]
pub struct SoftProvider;

impl SoftProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Provider for SoftProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn mechanisms(&self) -> &[Mechanism] {
        &MECH_LIST
    }

    fn digest_ctx(&self, mech: &Mechanism) -> Result<Box<dyn DigestCtx>> {
        match mech {
            Mechanism::Digest(MechDigest::Sha256) => Ok(Box::new(Sha256DigestCtx::new())),
            _ => Err(Error::BadMech),
        }
    }

    fn sign_ctx(&self, mech: &Mechanism, private_key: &[u8]) -> Result<Box<dyn SignCtx>> {
        let key = PrivateKey::from_bytes(private_key)?;
        Ok(Box::new(EcdsaSignCtx::new(mech, key)?))
    }

    fn verify_ctx(&self, mech: &Mechanism, public_key: &[u8]) -> Result<Box<dyn VerifyCtx>> {
        // Boards that keep both halves of the key pair in one record hand the private key
        // over for the public key handle.
        let key = PublicKey::from_bytes(public_key).or_else(|e| {
            PrivateKey::from_bytes(public_key)
                .map(|k| k.public_key())
                .map_err(|_| e)
        })?;
        Ok(Box::new(EcdsaVerifyCtx::new(mech, key)?))
    }

    fn generate_random(&self, buf: &mut [u8]) -> Result<()> {
        OsRng.try_fill_bytes(buf).map_err(|e| {
            error!("OS RNG failure: {}", e);
            Error::RngFailed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key::tests::{cert_der, TEST_SCALAR};

    #[test]
    fn test_sign_then_verify_with_certificate() {
        let provider = SoftProvider::new();
        let mech = Mechanism::Ecdsa(Some(MechDigest::Sha256));
        let sig = provider
            .sign_ctx(&mech, &TEST_SCALAR)
            .unwrap()
            .sign(b"payload")
            .unwrap();
        provider
            .verify_ctx(&mech, &cert_der())
            .unwrap()
            .verify(b"payload", &sig)
            .unwrap();
    }

    #[test]
    fn test_verify_with_key_pair_record() {
        let provider = SoftProvider::new();
        let mech = Mechanism::Ecdsa(Some(MechDigest::Sha256));
        let sig = provider
            .sign_ctx(&mech, &TEST_SCALAR)
            .unwrap()
            .sign(b"payload")
            .unwrap();
        provider
            .verify_ctx(&mech, &TEST_SCALAR)
            .unwrap()
            .verify(b"payload", &sig)
            .unwrap();
    }

    #[test]
    fn test_bad_key_material() {
        let provider = SoftProvider::new();
        let mech = Mechanism::Ecdsa(None);
        assert_eq!(
            provider.sign_ctx(&mech, b"junk").err(),
            Some(Error::BadKeyFormat)
        );
        assert!(provider.verify_ctx(&mech, b"junk").is_err());
        assert!(provider.digest_ctx(&mech).is_err());
    }

    #[test]
    fn test_generate_random() {
        let provider = SoftProvider::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        provider.generate_random(&mut a).unwrap();
        provider.generate_random(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
