// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::Signature;
use sha2::{Digest, Sha256};

use super::sign::{ECDSA_P256_SIG_LEN, ECDSA_PREHASH_LEN};
use super::{Error, OpCtxState, PublicKey};
use crate::backend::Mechanism;

pub trait VerifyCtx: Send {
    fn update(&mut self, data: &[u8]) -> Result<(), Error>;
    fn finalize(self: Box<Self>, signature: &[u8]) -> Result<(), Error>;
    fn verify(self: Box<Self>, data: &[u8], signature: &[u8]) -> Result<(), Error>;
    fn enter_state(&mut self, state: OpCtxState) -> Result<(), Error>;
}

pub struct EcdsaVerifyCtx {
    state: OpCtxState,
    key: PublicKey,
    hasher: Option<Sha256>,
}

impl EcdsaVerifyCtx {
    pub fn new(mech: &Mechanism, key: PublicKey) -> Result<Self, Error> {
        let hasher = match mech {
            Mechanism::Ecdsa(None) => None,
            Mechanism::Ecdsa(Some(_)) => Some(Sha256::new()),
            Mechanism::Digest(_) => return Err(Error::BadMech),
        };
        Ok(Self {
            state: OpCtxState::Initialized,
            key,
            hasher,
        })
    }

    fn verify_prehash(&self, digest: &[u8], signature: &[u8]) -> Result<(), Error> {
        if digest.len() != ECDSA_PREHASH_LEN {
            return Err(Error::DataLenRange);
        }
        let sig = parse_signature(signature)?;
        self.key
            .verifying_key()
            .verify_prehash(digest, &sig)
            .map_err(|_| Error::SignatureInvalid)
    }
}

/// Signatures come either in the Cryptoki `r || s` form or DER-encoded, as produced by
/// most signing services.
pub fn parse_signature(signature: &[u8]) -> Result<Signature, Error> {
    let sig = if signature.len() == ECDSA_P256_SIG_LEN {
        Signature::from_slice(signature)
    } else {
        Signature::from_der(signature)
    }
    .map_err(|_| Error::BadSigFormat)?;
    // Signers are free to emit high-S signatures; the verifier only takes low-S.
    Ok(sig.normalize_s().unwrap_or(sig))
}

impl VerifyCtx for EcdsaVerifyCtx {
    fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        self.enter_state(OpCtxState::MultipartActive)?;
        self.hasher
            .as_mut()
            .ok_or(Error::BadMech)?
            .update(data);
        Ok(())
    }

    fn finalize(mut self: Box<Self>, signature: &[u8]) -> Result<(), Error> {
        self.enter_state(OpCtxState::MultipartReady)?;
        let digest = self.hasher.take().ok_or(Error::BadMech)?.finalize();
        self.verify_prehash(digest.as_slice(), signature)
    }

    fn verify(mut self: Box<Self>, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        self.enter_state(OpCtxState::SinglepartActive)?;
        match self.hasher.take() {
            Some(mut hasher) => {
                hasher.update(data);
                self.verify_prehash(hasher.finalize().as_slice(), signature)
            }
            None => self.verify_prehash(data, signature),
        }
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<(), Error> {
        self.state.enter(state)
    }
}
