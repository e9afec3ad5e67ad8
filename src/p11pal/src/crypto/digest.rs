// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use sha2::{Digest, Sha256};

use super::{Error, OpCtxState};

/// Message digest context. Each session can have one active message digest context at a
/// time.
pub trait DigestCtx: Send {
    fn len(&self) -> usize;
    fn update(&mut self, data: &[u8]) -> Result<(), Error>;
    fn finalize(self: Box<Self>) -> Result<Vec<u8>, Error>;
    fn digest(self: Box<Self>, data: &[u8]) -> Result<Vec<u8>, Error>;
}

pub struct Sha256DigestCtx {
    state: OpCtxState,
    hasher: Sha256,
}

impl Sha256DigestCtx {
    pub const LEN: usize = 32;

    pub fn new() -> Self {
        Self {
            state: OpCtxState::Initialized,
            hasher: Sha256::new(),
        }
    }
}

impl Default for Sha256DigestCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl DigestCtx for Sha256DigestCtx {
    fn len(&self) -> usize {
        Self::LEN
    }

    fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        self.state.enter(OpCtxState::MultipartActive)?;
        self.hasher.update(data);
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<Vec<u8>, Error> {
        self.state.enter(OpCtxState::MultipartReady)?;
        Ok(self.hasher.finalize().to_vec())
    }

    fn digest(mut self: Box<Self>, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.state.enter(OpCtxState::SinglepartActive)?;
        self.hasher.update(data);
        Ok(self.hasher.finalize().to_vec())
    }
}
