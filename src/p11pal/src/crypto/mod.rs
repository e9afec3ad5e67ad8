// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic capability table used by the session layer. The token never touches
//! primitives directly: it fetches a `Provider` once, at module initialization, and asks
//! it for per-operation contexts.

use std::sync::Arc;

pub mod cert;
pub mod digest;
pub mod key;
pub mod sign;
pub mod soft;
pub mod verify;

pub use digest::{DigestCtx, Sha256DigestCtx};
pub use key::{PrivateKey, PublicKey};
pub use sign::{EcdsaSignCtx, SignCtx};
pub use soft::SoftProvider;
pub use verify::{EcdsaVerifyCtx, VerifyCtx};

use crate::backend::Mechanism;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    BadMech,
    BadKeyFormat,
    BadSigFormat,
    CertParse,
    DataLenRange,
    DataMissing,
    GeneralError,
    OperationActive,
    PemParse,
    RngFailed,
    Sign,
    SignatureInvalid,
}
pub type Result<T> = std::result::Result<T, Error>;

/// Operation Context state. An operation context state is stored
/// in order to avoid misbehaving applications calling the incorrect
/// cryptographic interfaces (i.e. C_SignInit() -> C_Sign() -> C_SignUpdate())
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OpCtxState {
    Initialized,
    SinglepartActive,
    MultipartActive,
    MultipartReady,
}

impl OpCtxState {
    /// Transition to `next`, rejecting any mix of single-part and multi-part calls.
    pub fn enter(&mut self, next: OpCtxState) -> Result<()> {
        let ret = match (*self, next) {
            (Self::Initialized, _) => Ok(()),
            (Self::SinglepartActive, Self::SinglepartActive) => Ok(()),
            (Self::SinglepartActive, _) => Err(Error::OperationActive),
            (Self::MultipartActive, Self::MultipartActive) => Ok(()),
            (Self::MultipartActive, Self::MultipartReady) => Ok(()),
            (Self::MultipartActive, _) => Err(Error::OperationActive),
            (Self::MultipartReady, Self::MultipartReady) => Ok(()),
            (Self::MultipartReady, _) => Err(Error::OperationActive),
        };
        if ret.is_ok() {
            *self = next;
        }
        ret
    }
}

/// The function list a token module exposes. Keys are handed over in their stored form
/// (the raw object payload) and parsed by the provider.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn mechanisms(&self) -> &[Mechanism];

    fn digest_ctx(&self, mech: &Mechanism) -> Result<Box<dyn DigestCtx>>;

    fn sign_ctx(&self, mech: &Mechanism, private_key: &[u8]) -> Result<Box<dyn SignCtx>>;

    fn verify_ctx(&self, mech: &Mechanism, public_key: &[u8]) -> Result<Box<dyn VerifyCtx>>;

    fn generate_random(&self, buf: &mut [u8]) -> Result<()>;
}

/// Well-known entry point for the default (software) token.
pub fn function_list() -> Arc<dyn Provider> {
    Arc::new(SoftProvider::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_ctx_state_rejects_mixing() {
        let mut state = OpCtxState::Initialized;
        state.enter(OpCtxState::MultipartActive).unwrap();
        state.enter(OpCtxState::MultipartActive).unwrap();
        assert_eq!(
            state.enter(OpCtxState::SinglepartActive),
            Err(Error::OperationActive)
        );
        state.enter(OpCtxState::MultipartReady).unwrap();
        assert_eq!(state, OpCtxState::MultipartReady);

        let mut state = OpCtxState::Initialized;
        state.enter(OpCtxState::SinglepartActive).unwrap();
        assert_eq!(
            state.enter(OpCtxState::MultipartActive),
            Err(Error::OperationActive)
        );
        assert_eq!(state, OpCtxState::SinglepartActive);
    }

    #[test]
    fn test_function_list_is_soft_token() {
        let provider = function_list();
        assert_eq!(provider.name(), soft::PROVIDER_NAME);
        assert_eq!(provider.mechanisms().len(), 3);
    }
}
