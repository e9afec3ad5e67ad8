// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::Signature;
use sha2::{Digest, Sha256};

use super::{Error, OpCtxState, PrivateKey};
use crate::backend::Mechanism;

/// Length of a P-256 signature in the Cryptoki `r || s` form.
pub const ECDSA_P256_SIG_LEN: usize = 64;
/// Raw `CKM_ECDSA` signs a caller-supplied SHA-256 digest.
pub const ECDSA_PREHASH_LEN: usize = 32;

pub trait SignCtx: Send {
    fn update(&mut self, data: &[u8]) -> Result<(), Error>;
    fn finalize(self: Box<Self>) -> Result<Vec<u8>, Error>;
    fn sign(self: Box<Self>, data: &[u8]) -> Result<Vec<u8>, Error>;
    fn sig_len_ck(&self) -> usize;
    fn enter_state(&mut self, state: OpCtxState) -> Result<(), Error>;
}

/// ECDSA P-256 signing. With `CKM_ECDSA_SHA256` the context hashes the message itself
/// and accepts multi-part input; with `CKM_ECDSA` the input is the digest.
pub struct EcdsaSignCtx {
    state: OpCtxState,
    key: PrivateKey,
    hasher: Option<Sha256>,
}

impl EcdsaSignCtx {
    pub fn new(mech: &Mechanism, key: PrivateKey) -> Result<Self, Error> {
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

    fn sign_prehash(&self, digest: &[u8]) -> Result<Vec<u8>, Error> {
        if digest.len() != ECDSA_PREHASH_LEN {
            return Err(Error::DataLenRange);
        }
        let sig: Signature = self
            .key
            .signing_key()
            .sign_prehash(digest)
            .map_err(|_| Error::Sign)?;
        Ok(sig.to_bytes().to_vec())
    }
}

impl SignCtx for EcdsaSignCtx {
    fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        self.enter_state(OpCtxState::MultipartActive)?;
        self.hasher
            .as_mut()
            .ok_or(Error::BadMech)?
            .update(data);
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>, Error> {
        self.enter_state(OpCtxState::MultipartReady)?;
        let digest = self.hasher.take().ok_or(Error::BadMech)?.finalize();
        self.sign_prehash(digest.as_slice())
    }

    fn sign(mut self: Box<Self>, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.enter_state(OpCtxState::SinglepartActive)?;
        match self.hasher.take() {
            Some(mut hasher) => {
                hasher.update(data);
                self.sign_prehash(hasher.finalize().as_slice())
            }
            None => self.sign_prehash(data),
        }
    }

    fn sig_len_ck(&self) -> usize {
        ECDSA_P256_SIG_LEN
    }

    fn enter_state(&mut self, state: OpCtxState) -> Result<(), Error> {
        self.state.enter(state)
    }
}
