// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::cmp;
use std::sync::Arc;

use p11pal_common::config::FindPolicy;

use super::Mechanism;
use crate::crypto::{DigestCtx, Provider, SignCtx, VerifyCtx};
use crate::pkcs11;
use crate::store::{self, ObjectHandle, ObjectRole, ObjectValue};
use crate::{Error, Result, Store};

struct FindCtx {
    handles: Vec<ObjectHandle>,
    index: usize,
}

impl FindCtx {
    fn new(handles: Vec<ObjectHandle>) -> Self {
        Self { handles, index: 0 }
    }
    fn next_chunk(&mut self, count: usize) -> &[ObjectHandle] {
        let end = cmp::min(self.index + count, self.handles.len());
        let ret = &self.handles[self.index..end];
        self.index += ret.len();
        ret
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionState {
    RoPublic,
    RoUser,
    RwPublic,
    RwUser,
}

impl SessionState {
    fn new(rw: bool, user: bool) -> Self {
        match (rw, user) {
            (false, false) => Self::RoPublic,
            (false, true) => Self::RoUser,
            (true, false) => Self::RwPublic,
            (true, true) => Self::RwUser,
        }
    }

    fn to_ck_state(&self) -> pkcs11::CK_STATE {
        match self {
            Self::RoPublic => pkcs11::CKS_RO_PUBLIC_SESSION,
            Self::RoUser => pkcs11::CKS_RO_USER_FUNCTIONS,
            Self::RwPublic => pkcs11::CKS_RW_PUBLIC_SESSION,
            Self::RwUser => pkcs11::CKS_RW_USER_FUNCTIONS,
        }
    }

    pub fn is_rw(&self) -> bool {
        matches!(self, Self::RwPublic | Self::RwUser)
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::RoUser | Self::RwUser)
    }
}

/// Per-session state: the login view, at most one search and one context per operation
/// kind. Object access goes straight to the shared store.
pub struct Session {
    slot_id: pkcs11::CK_SLOT_ID,
    state: SessionState,
    store: Arc<Store>,
    provider: Arc<dyn Provider>,
    find_policy: FindPolicy,
    login_required: bool,
    find_ctx: Option<FindCtx>,
    digest_ctx: Option<Box<dyn DigestCtx>>,
    sign_ctx: Option<Box<dyn SignCtx>>,
    verify_ctx: Option<Box<dyn VerifyCtx>>,
}

impl Session {
    pub fn new(
        slot_id: pkcs11::CK_SLOT_ID,
        rw: bool,
        user: bool,
        store: Arc<Store>,
        provider: Arc<dyn Provider>,
        find_policy: FindPolicy,
        login_required: bool,
    ) -> Self {
        Self {
            slot_id,
            state: SessionState::new(rw, user),
            store,
            provider,
            find_policy,
            login_required,
            find_ctx: None,
            digest_ctx: None,
            sign_ctx: None,
            verify_ctx: None,
        }
    }

    pub fn ck_info(&self) -> pkcs11::CK_SESSION_INFO {
        let mut flags = pkcs11::CKF_SERIAL_SESSION;
        if self.state.is_rw() {
            flags |= pkcs11::CKF_RW_SESSION;
        }
        pkcs11::CK_SESSION_INFO {
            slotID: self.slot_id,
            state: self.state.to_ck_state(),
            flags,
            ulDeviceError: pkcs11::CKR_OK,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_user(&mut self, user: bool) {
        self.state = SessionState::new(self.state.is_rw(), user);
    }

    /// Write `value` as the object named by `label`. Only the fixed set of credential
    /// roles exists, so creating an object overwrites the role's previous value.
    pub fn create_object(
        &mut self,
        class: pkcs11::CK_OBJECT_CLASS,
        label: &[u8],
        value: &[u8],
    ) -> Result<ObjectHandle> {
        if !self.state.is_rw() {
            return Err(Error::SessionReadOnly);
        }
        let role = self
            .store
            .labels()
            .role_for(label)
            .ok_or(Error::StoreError(store::Error::LabelUnknown))?;
        if role.class() != class {
            return Err(Error::TemplateInconsistent);
        }
        self.check_write_access(role)?;
        self.store.save(label, value).map_err(Error::StoreError)
    }

    /// Objects cannot be removed from their slot; destroying one overwrites its payload
    /// with zeroes, which the presence-checking find treats as absent.
    pub fn destroy_object(&mut self, handle: ObjectHandle) -> Result<()> {
        if !self.state.is_rw() {
            return Err(Error::SessionReadOnly);
        }
        let role = handle.role().ok_or(Error::ObjectHandleInvalid)?;
        self.check_write_access(role)?;
        let len = self.object_value(handle)?.len();
        let label = self.store.labels().label(role).to_vec();
        self.store
            .save(label.as_slice(), vec![0u8; len].as_slice())
            .map(|_| ())
            .map_err(Error::StoreError)
    }

    /// Writing a role whose storage is shared with a private role touches private key
    /// material, so it needs the same login as the private role itself.
    fn check_write_access(&self, role: ObjectRole) -> Result<()> {
        let layout = self.store.layout();
        let private = role.is_private()
            || ObjectRole::ALL
                .iter()
                .any(|other| other.is_private() && layout.is_declared_alias(role, *other));
        if private {
            self.check_user_logged_in()?;
        }
        Ok(())
    }

    /// Object payload, for objects that are not sensitive.
    pub fn object_value(&self, handle: ObjectHandle) -> Result<ObjectValue> {
        handle.role().ok_or(Error::ObjectHandleInvalid)?;
        self.store.get_value(handle).map_err(|e| match e {
            store::Error::ObjectAbsent | store::Error::ObjectHandleInvalid => {
                Error::ObjectHandleInvalid
            }
            e => Error::StoreError(e),
        })
    }

    pub fn get_object_value(&self, handle: ObjectHandle) -> Result<ObjectValue> {
        let role = handle.role().ok_or(Error::ObjectHandleInvalid)?;
        if role.is_private() {
            return Err(Error::AttributeSensitive);
        }
        self.object_value(handle)
    }

    /// Start a search for the object named by `label`, optionally restricted to `class`.
    pub fn find_init(
        &mut self,
        label: &[u8],
        class: Option<pkcs11::CK_OBJECT_CLASS>,
    ) -> Result<()> {
        if self.find_ctx.is_some() {
            return Err(Error::OperationActive);
        }
        if label.is_empty() {
            return Err(Error::StoreError(store::Error::ArgumentsBad));
        }
        let handles = self
            .store
            .find_with_policy(label, self.find_policy)
            .map_err(Error::StoreError)?
            .into_iter()
            .filter(|h| match (h.role(), class) {
                (Some(role), Some(class)) => role.class() == class,
                (Some(_), None) => true,
                (None, _) => false,
            })
            .collect();
        self.find_ctx = Some(FindCtx::new(handles));
        Ok(())
    }

    pub fn find_next_chunk(&mut self, count: usize) -> Result<Vec<ObjectHandle>> {
        self.find_ctx
            .as_mut()
            .map(|ctx| ctx.next_chunk(count).to_vec())
            .ok_or(Error::OperationNotInitialized)
    }

    pub fn find_finalize(&mut self) -> Result<()> {
        self.find_ctx
            .take()
            .ok_or(Error::OperationNotInitialized)?;
        Ok(())
    }

    pub fn digest_init(&mut self, mech: &Mechanism) -> Result<()> {
        if self.digest_ctx.is_some() {
            return Err(Error::OperationActive);
        }
        self.digest_ctx = Some(self.provider.digest_ctx(mech).map_err(|e| {
            debug!("Digest init failed: {:?}", e);
            Error::MechanismInvalid
        })?);
        Ok(())
    }

    pub fn digest_ctx(&mut self) -> &mut Option<Box<dyn DigestCtx>> {
        &mut self.digest_ctx
    }

    pub fn sign_init(&mut self, mech: &Mechanism, key_handle: ObjectHandle) -> Result<()> {
        if self.sign_ctx.is_some() {
            return Err(Error::OperationActive);
        }
        if !mech.is_sign_verify() {
            return Err(Error::MechanismInvalid);
        }
        self.check_user_logged_in()?;
        let key = self.key_value(key_handle, |role| role.class() == pkcs11::CKO_PRIVATE_KEY)?;
        self.sign_ctx = Some(
            self.provider
                .sign_ctx(mech, key.data())
                .map_err(Error::CryptoError)?,
        );
        Ok(())
    }

    pub fn sign_ctx(&mut self) -> &mut Option<Box<dyn SignCtx>> {
        &mut self.sign_ctx
    }

    pub fn verify_init(&mut self, mech: &Mechanism, key_handle: ObjectHandle) -> Result<()> {
        if self.verify_ctx.is_some() {
            return Err(Error::OperationActive);
        }
        if !mech.is_sign_verify() {
            return Err(Error::MechanismInvalid);
        }
        let key = self.key_value(key_handle, |role| {
            role.class() == pkcs11::CKO_PUBLIC_KEY || role.class() == pkcs11::CKO_CERTIFICATE
        })?;
        self.verify_ctx = Some(
            self.provider
                .verify_ctx(mech, key.data())
                .map_err(Error::CryptoError)?,
        );
        Ok(())
    }

    pub fn verify_ctx(&mut self) -> &mut Option<Box<dyn VerifyCtx>> {
        &mut self.verify_ctx
    }

    pub fn generate_random(&self, buf: &mut [u8]) -> Result<()> {
        self.provider
            .generate_random(buf)
            .map_err(Error::CryptoError)
    }

    fn check_user_logged_in(&self) -> Result<()> {
        if !self.login_required || self.state.is_user() {
            Ok(())
        } else {
            Err(Error::UserNotLoggedIn)
        }
    }

    fn key_value<F>(&self, key_handle: ObjectHandle, usable: F) -> Result<ObjectValue>
    where
        F: Fn(ObjectRole) -> bool,
    {
        let role = key_handle.role().ok_or(Error::KeyHandleInvalid)?;
        if !usable(role) {
            return Err(Error::KeyTypeInconsistent);
        }
        self.object_value(key_handle).map_err(|e| match e {
            Error::ObjectHandleInvalid => Error::KeyHandleInvalid,
            e => e,
        })
    }
}
