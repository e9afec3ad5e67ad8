// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use p11pal_common::config;

use super::{Mechanism, Session, Slot, Token};
use crate::crypto::Provider;
use crate::defs;
use crate::pkcs11;
use crate::store::{ObjectHandle, ObjectValue};
use crate::{Error, Result, Store};

/// The module instance. It starts uninitialized; `initialize()` attaches the single slot
/// with its token over the object store, `finalize()` drops it together with every open
/// session. All calls in between are routed by session handle.
pub struct Device {
    slot: Option<Slot>,
    next_session_handle: pkcs11::CK_SESSION_HANDLE,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    pub fn new() -> Self {
        Self {
            slot: None,
            next_session_handle: 1,
        }
    }

    /// Once per process, until `finalize()`. The provider is fetched by the caller
    /// through its well-known entry point and kept for the lifetime of the module.
    pub fn initialize(
        &mut self,
        store: Arc<Store>,
        provider: Arc<dyn Provider>,
        config: &config::Token,
    ) -> Result<()> {
        if self.slot.is_some() {
            return Err(Error::CryptokiAlreadyInitialized);
        }
        info!(
            "Initializing module with provider {} ({:?} layout)",
            provider.name(),
            store.layout().profile()
        );
        let token = Token::new(defs::SLOT_ID, store, provider, config);
        self.slot = Some(Slot::new(defs::SLOT_ID, token));
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<()> {
        self.slot
            .take()
            .ok_or(Error::CryptokiNotInitialized)
            .map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.is_some()
    }

    pub fn ck_info(&self) -> Result<pkcs11::CK_INFO> {
        self.slot()?;
        Ok(pkcs11::CK_INFO {
            cryptokiVersion: defs::CRYPTOKI_VERSION,
            manufacturerID: ck_padded_str!(defs::MANUFACTURER, 32),
            flags: 0,
            libraryDescription: ck_padded_str!(defs::DEVICE_DESCRIPTION, 32),
            libraryVersion: defs::DEVICE_VERSION,
        })
    }

    /// The token is always present, so `token_present` does not filter anything.
    pub fn slot_list(&self, _token_present: bool) -> Result<Vec<pkcs11::CK_SLOT_ID>> {
        Ok(vec![self.slot()?.id()])
    }

    pub fn slot_info(&self, slot_id: pkcs11::CK_SLOT_ID) -> Result<pkcs11::CK_SLOT_INFO> {
        Ok(self.slot_by_id(slot_id)?.ck_info())
    }

    pub fn token_info(&self, slot_id: pkcs11::CK_SLOT_ID) -> Result<pkcs11::CK_TOKEN_INFO> {
        Ok(self.slot_by_id(slot_id)?.token().ck_info())
    }

    pub fn mechanism_list(
        &self,
        slot_id: pkcs11::CK_SLOT_ID,
    ) -> Result<Vec<pkcs11::CK_MECHANISM_TYPE>> {
        Ok(self
            .slot_by_id(slot_id)?
            .token()
            .mech_list()
            .iter()
            .map(Mechanism::ck_type)
            .collect())
    }

    pub fn mechanism_info(
        &self,
        slot_id: pkcs11::CK_SLOT_ID,
        mech_type: pkcs11::CK_MECHANISM_TYPE,
    ) -> Result<pkcs11::CK_MECHANISM_INFO> {
        self.slot_by_id(slot_id)?
            .token()
            .mech(mech_type)
            .map(|mech| mech.ck_info())
            .map_err(Error::TokenError)
    }

    pub fn open_session(
        &mut self,
        slot_id: pkcs11::CK_SLOT_ID,
        flags: pkcs11::CK_FLAGS,
    ) -> Result<pkcs11::CK_SESSION_HANDLE> {
        if flags & pkcs11::CKF_SERIAL_SESSION == 0 {
            return Err(Error::SessionParallelNotSupported);
        }
        let handle = self.next_session_handle;
        self.slot_by_id_mut(slot_id)?
            .token_mut()
            .open_session(handle, flags & pkcs11::CKF_RW_SESSION != 0)
            .map_err(Error::TokenError)?;
        self.next_session_handle += 1;
        debug!("Opened session {} on slot {}", handle, slot_id);
        Ok(handle)
    }

    pub fn close_session(&mut self, handle: pkcs11::CK_SESSION_HANDLE) -> Result<()> {
        self.token_mut()?
            .close_session(handle)
            .map_err(|_| Error::SessionHandleInvalid)
    }

    pub fn close_all_sessions(&mut self, slot_id: pkcs11::CK_SLOT_ID) -> Result<()> {
        self.slot_by_id_mut(slot_id)?
            .token_mut()
            .close_all_sessions();
        Ok(())
    }

    pub fn session_info(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
    ) -> Result<pkcs11::CK_SESSION_INFO> {
        self.with_session(handle, |session| Ok(session.ck_info()))
    }

    pub fn login(
        &mut self,
        handle: pkcs11::CK_SESSION_HANDLE,
        user_type: pkcs11::CK_USER_TYPE,
        pin: &str,
    ) -> Result<()> {
        self.token_mut()?
            .login(handle, user_type, pin)
            .map_err(Error::TokenError)
    }

    pub fn logout(&mut self, handle: pkcs11::CK_SESSION_HANDLE) -> Result<()> {
        self.token_mut()?.logout(handle).map_err(Error::TokenError)
    }

    pub fn create_object(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
        class: pkcs11::CK_OBJECT_CLASS,
        label: &[u8],
        value: &[u8],
    ) -> Result<pkcs11::CK_OBJECT_HANDLE> {
        self.with_session(handle, |session| {
            session
                .create_object(class, label, value)
                .map(pkcs11::CK_OBJECT_HANDLE::from)
        })
    }

    pub fn destroy_object(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
        object: pkcs11::CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.with_session(handle, |session| {
            session.destroy_object(ObjectHandle::from(object))
        })
    }

    pub fn get_object_value(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
        object: pkcs11::CK_OBJECT_HANDLE,
    ) -> Result<ObjectValue> {
        self.with_session(handle, |session| {
            session.get_object_value(ObjectHandle::from(object))
        })
    }

    pub fn find_objects_init(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
        label: &[u8],
        class: Option<pkcs11::CK_OBJECT_CLASS>,
    ) -> Result<()> {
        self.with_session(handle, |session| session.find_init(label, class))
    }

    pub fn find_objects(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
        max_count: usize,
    ) -> Result<Vec<pkcs11::CK_OBJECT_HANDLE>> {
        self.with_session(handle, |session| {
            Ok(session
                .find_next_chunk(max_count)?
                .into_iter()
                .map(pkcs11::CK_OBJECT_HANDLE::from)
                .collect())
        })
    }

    pub fn find_objects_final(&self, handle: pkcs11::CK_SESSION_HANDLE) -> Result<()> {
        self.with_session(handle, |session| session.find_finalize())
    }

    /// One-shot search for the object named by `label`. No match is not an error: the
    /// returned handle is `CK_INVALID_HANDLE` and callers must check it before use.
    pub fn find_object(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
        label: &[u8],
        class: Option<pkcs11::CK_OBJECT_CLASS>,
    ) -> Result<pkcs11::CK_OBJECT_HANDLE> {
        self.with_session(handle, |session| {
            session.find_init(label, class)?;
            let found = session.find_next_chunk(1);
            session.find_finalize()?;
            Ok(found?
                .first()
                .map(|h| pkcs11::CK_OBJECT_HANDLE::from(*h))
                .unwrap_or(pkcs11::CK_INVALID_HANDLE))
        })
    }

    pub fn digest_init(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
        mech_type: pkcs11::CK_MECHANISM_TYPE,
    ) -> Result<()> {
        let mech = self.mech(mech_type)?;
        self.with_session(handle, |session| session.digest_init(&mech))
    }

    pub fn digest(&self, handle: pkcs11::CK_SESSION_HANDLE, data: &[u8]) -> Result<Vec<u8>> {
        self.with_session(handle, |session| {
            session
                .digest_ctx()
                .take()
                .ok_or(Error::OperationNotInitialized)?
                .digest(data)
                .map_err(Error::CryptoError)
        })
    }

    pub fn digest_update(&self, handle: pkcs11::CK_SESSION_HANDLE, data: &[u8]) -> Result<()> {
        self.with_session(handle, |session| {
            let ctx = session.digest_ctx();
            let ret = ctx
                .as_mut()
                .ok_or(Error::OperationNotInitialized)?
                .update(data)
                .map_err(Error::CryptoError);
            if ret.is_err() {
                ctx.take();
            }
            ret
        })
    }

    pub fn digest_final(&self, handle: pkcs11::CK_SESSION_HANDLE) -> Result<Vec<u8>> {
        self.with_session(handle, |session| {
            session
                .digest_ctx()
                .take()
                .ok_or(Error::OperationNotInitialized)?
                .finalize()
                .map_err(Error::CryptoError)
        })
    }

    pub fn sign_init(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
        mech_type: pkcs11::CK_MECHANISM_TYPE,
        key: pkcs11::CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let mech = self.mech(mech_type)?;
        self.with_session(handle, |session| {
            session.sign_init(&mech, ObjectHandle::from(key))
        })
    }

    pub fn sign(&self, handle: pkcs11::CK_SESSION_HANDLE, data: &[u8]) -> Result<Vec<u8>> {
        self.with_session(handle, |session| {
            session
                .sign_ctx()
                .take()
                .ok_or(Error::OperationNotInitialized)?
                .sign(data)
                .map_err(Error::CryptoError)
        })
    }

    pub fn sign_update(&self, handle: pkcs11::CK_SESSION_HANDLE, data: &[u8]) -> Result<()> {
        self.with_session(handle, |session| {
            let ctx = session.sign_ctx();
            let ret = ctx
                .as_mut()
                .ok_or(Error::OperationNotInitialized)?
                .update(data)
                .map_err(Error::CryptoError);
            if ret.is_err() {
                ctx.take();
            }
            ret
        })
    }

    pub fn sign_final(&self, handle: pkcs11::CK_SESSION_HANDLE) -> Result<Vec<u8>> {
        self.with_session(handle, |session| {
            session
                .sign_ctx()
                .take()
                .ok_or(Error::OperationNotInitialized)?
                .finalize()
                .map_err(Error::CryptoError)
        })
    }

    pub fn verify_init(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
        mech_type: pkcs11::CK_MECHANISM_TYPE,
        key: pkcs11::CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let mech = self.mech(mech_type)?;
        self.with_session(handle, |session| {
            session.verify_init(&mech, ObjectHandle::from(key))
        })
    }

    pub fn verify(
        &self,
        handle: pkcs11::CK_SESSION_HANDLE,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        self.with_session(handle, |session| {
            session
                .verify_ctx()
                .take()
                .ok_or(Error::OperationNotInitialized)?
                .verify(data, signature)
                .map_err(Error::CryptoError)
        })
    }

    pub fn verify_update(&self, handle: pkcs11::CK_SESSION_HANDLE, data: &[u8]) -> Result<()> {
        self.with_session(handle, |session| {
            let ctx = session.verify_ctx();
            let ret = ctx
                .as_mut()
                .ok_or(Error::OperationNotInitialized)?
                .update(data)
                .map_err(Error::CryptoError);
            if ret.is_err() {
                ctx.take();
            }
            ret
        })
    }

    pub fn verify_final(&self, handle: pkcs11::CK_SESSION_HANDLE, signature: &[u8]) -> Result<()> {
        self.with_session(handle, |session| {
            session
                .verify_ctx()
                .take()
                .ok_or(Error::OperationNotInitialized)?
                .finalize(signature)
                .map_err(Error::CryptoError)
        })
    }

    pub fn generate_random(&self, handle: pkcs11::CK_SESSION_HANDLE, buf: &mut [u8]) -> Result<()> {
        self.with_session(handle, |session| session.generate_random(buf))
    }

    fn slot(&self) -> Result<&Slot> {
        self.slot.as_ref().ok_or(Error::CryptokiNotInitialized)
    }

    fn slot_by_id(&self, slot_id: pkcs11::CK_SLOT_ID) -> Result<&Slot> {
        let slot = self.slot()?;
        if slot.id() != slot_id {
            return Err(Error::SlotIdInvalid);
        }
        Ok(slot)
    }

    fn slot_by_id_mut(&mut self, slot_id: pkcs11::CK_SLOT_ID) -> Result<&mut Slot> {
        let slot = self.slot.as_mut().ok_or(Error::CryptokiNotInitialized)?;
        if slot.id() != slot_id {
            return Err(Error::SlotIdInvalid);
        }
        Ok(slot)
    }

    fn token_mut(&mut self) -> Result<&mut Token> {
        self.slot
            .as_mut()
            .map(Slot::token_mut)
            .ok_or(Error::CryptokiNotInitialized)
    }

    fn mech(&self, mech_type: pkcs11::CK_MECHANISM_TYPE) -> Result<Mechanism> {
        self.slot()?
            .token()
            .mech(mech_type)
            .map_err(|_| Error::MechanismInvalid)
    }

    fn with_session<F, T>(&self, handle: pkcs11::CK_SESSION_HANDLE, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let sarc: Arc<Mutex<Session>> = self
            .slot()?
            .token()
            .session(handle)
            .ok_or(Error::SessionHandleInvalid)?;
        let mut session = sarc.lock().map_err(|_| Error::SessionLockPoisoned)?;
        f(&mut session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto;
    use crate::crypto::key::tests::{cert_der, TEST_SCALAR};
    use crate::store::tests::boxed_store;
    use p11pal_common::config::{FindPolicy, Profile};
    use sha2::{Digest, Sha256};

    const RW: pkcs11::CK_FLAGS = pkcs11::CKF_SERIAL_SESSION | pkcs11::CKF_RW_SESSION;

    fn token_config(pin: Option<&str>, find_policy: FindPolicy) -> config::Token {
        config::Token {
            pin: pin.map(String::from),
            max_sessions: 2,
            find_policy,
        }
    }

    fn device_with(profile: Profile, token: config::Token) -> Device {
        let mut device = Device::new();
        device
            .initialize(Arc::new(boxed_store(profile)), crypto::function_list(), &token)
            .unwrap();
        device
    }

    fn device() -> Device {
        device_with(
            Profile::Colocated,
            token_config(None, FindPolicy::RequirePresent),
        )
    }

    fn provision(device: &Device, session: pkcs11::CK_SESSION_HANDLE) {
        device
            .create_object(
                session,
                pkcs11::CKO_PRIVATE_KEY,
                defs::LABEL_DEVICE_PRIVATE_KEY.as_bytes(),
                &TEST_SCALAR,
            )
            .unwrap();
        device
            .create_object(
                session,
                pkcs11::CKO_CERTIFICATE,
                defs::LABEL_DEVICE_CERTIFICATE.as_bytes(),
                &cert_der(),
            )
            .unwrap();
    }

    #[test]
    fn test_initialize_once() {
        let mut device = Device::new();
        assert!(!device.is_initialized());
        assert_eq!(
            device.open_session(defs::SLOT_ID, RW).err(),
            Some(Error::CryptokiNotInitialized)
        );
        let store = Arc::new(boxed_store(Profile::Colocated));
        let config = token_config(None, FindPolicy::LabelOnly);
        device
            .initialize(store.clone(), crypto::function_list(), &config)
            .unwrap();
        assert_eq!(
            device.initialize(store, crypto::function_list(), &config),
            Err(Error::CryptokiAlreadyInitialized)
        );
        device.finalize().unwrap();
        assert_eq!(device.finalize(), Err(Error::CryptokiNotInitialized));
    }

    #[test]
    fn test_slot_and_token_info() {
        let device = device();
        assert_eq!(device.slot_list(true).unwrap(), vec![defs::SLOT_ID]);
        assert_eq!(device.slot_info(7).err(), Some(Error::SlotIdInvalid));
        let info = device.slot_info(defs::SLOT_ID).unwrap();
        assert_ne!(info.flags & pkcs11::CKF_TOKEN_PRESENT, 0);
        let info = device.token_info(defs::SLOT_ID).unwrap();
        assert_eq!(&info.label[..8], b"FreeRTOS");
        assert_eq!(info.flags & pkcs11::CKF_LOGIN_REQUIRED, 0);
        let mechs = device.mechanism_list(defs::SLOT_ID).unwrap();
        assert!(mechs.contains(&pkcs11::CKM_ECDSA_SHA256));
        assert_eq!(
            device
                .mechanism_info(defs::SLOT_ID, pkcs11::CKM_ECDSA)
                .unwrap()
                .ulMaxKeySize,
            256
        );
    }

    #[test]
    fn test_session_lifecycle() {
        let mut device = device();
        assert_eq!(
            device.open_session(defs::SLOT_ID, pkcs11::CKF_RW_SESSION),
            Err(Error::SessionParallelNotSupported)
        );
        let a = device.open_session(defs::SLOT_ID, RW).unwrap();
        let b = device
            .open_session(defs::SLOT_ID, pkcs11::CKF_SERIAL_SESSION)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(
            device.open_session(defs::SLOT_ID, RW).err(),
            Some(Error::TokenError(super::super::token::Error::SessionCount))
        );
        assert_eq!(
            device.session_info(a).unwrap().state,
            pkcs11::CKS_RW_PUBLIC_SESSION
        );
        assert_eq!(
            device.session_info(b).unwrap().state,
            pkcs11::CKS_RO_PUBLIC_SESSION
        );
        device.close_session(a).unwrap();
        assert_eq!(device.close_session(a), Err(Error::SessionHandleInvalid));
        assert_eq!(device.session_info(a).err(), Some(Error::SessionHandleInvalid));
        device.close_all_sessions(defs::SLOT_ID).unwrap();
        assert_eq!(device.session_info(b).err(), Some(Error::SessionHandleInvalid));
    }

    #[test]
    fn test_login_applies_to_every_session() {
        let mut device = device_with(
            Profile::Colocated,
            token_config(Some("0000"), FindPolicy::RequirePresent),
        );
        let a = device.open_session(defs::SLOT_ID, RW).unwrap();
        let b = device
            .open_session(defs::SLOT_ID, pkcs11::CKF_SERIAL_SESSION)
            .unwrap();
        assert_eq!(
            device.login(a, pkcs11::CKU_USER, "1234").err().map(|e| e.ck_rv()),
            Some(pkcs11::CKR_PIN_INCORRECT)
        );
        device.login(a, pkcs11::CKU_USER, "0000").unwrap();
        assert_eq!(
            device.session_info(b).unwrap().state,
            pkcs11::CKS_RO_USER_FUNCTIONS
        );
        assert_eq!(
            device.login(b, pkcs11::CKU_USER, "0000").err().map(|e| e.ck_rv()),
            Some(pkcs11::CKR_USER_ALREADY_LOGGED_IN)
        );
        device.logout(b).unwrap();
        assert_eq!(
            device.session_info(a).unwrap().state,
            pkcs11::CKS_RW_PUBLIC_SESSION
        );
        assert_eq!(
            device.logout(a).err().map(|e| e.ck_rv()),
            Some(pkcs11::CKR_USER_NOT_LOGGED_IN)
        );
    }

    #[test]
    fn test_create_object_checks() {
        let mut device = device();
        let ro = device
            .open_session(defs::SLOT_ID, pkcs11::CKF_SERIAL_SESSION)
            .unwrap();
        let rw = device.open_session(defs::SLOT_ID, RW).unwrap();
        let label = defs::LABEL_DEVICE_CERTIFICATE.as_bytes();

        assert_eq!(
            device.create_object(ro, pkcs11::CKO_CERTIFICATE, label, b"cert"),
            Err(Error::SessionReadOnly)
        );
        assert_eq!(
            device.create_object(rw, pkcs11::CKO_PRIVATE_KEY, label, b"cert"),
            Err(Error::TemplateInconsistent)
        );
        assert_eq!(
            device
                .create_object(rw, pkcs11::CKO_CERTIFICATE, b"Other", b"cert")
                .err()
                .map(|e| e.ck_rv()),
            Some(pkcs11::CKR_ATTRIBUTE_VALUE_INVALID)
        );
        let h = device
            .create_object(rw, pkcs11::CKO_CERTIFICATE, label, b"cert")
            .unwrap();
        assert_ne!(h, pkcs11::CK_INVALID_HANDLE);
        assert_eq!(device.get_object_value(ro, h).unwrap().data(), b"cert");
    }

    #[test]
    fn test_find_object() {
        let mut device = device();
        let s = device.open_session(defs::SLOT_ID, RW).unwrap();
        let label = defs::LABEL_DEVICE_CERTIFICATE.as_bytes();

        // Not yet provisioned: success, but no handle.
        assert_eq!(
            device.find_object(s, label, None).unwrap(),
            pkcs11::CK_INVALID_HANDLE
        );
        provision(&device, s);
        let h = device.find_object(s, label, None).unwrap();
        assert_ne!(h, pkcs11::CK_INVALID_HANDLE);
        assert_eq!(device.find_object(s, label, None).unwrap(), h);
        assert_eq!(
            device
                .find_object(s, label, Some(pkcs11::CKO_PUBLIC_KEY))
                .unwrap(),
            pkcs11::CK_INVALID_HANDLE
        );
        assert_eq!(
            device.find_object(s, b"Unknown", None).unwrap(),
            pkcs11::CK_INVALID_HANDLE
        );
    }

    #[test]
    fn test_find_label_only_policy() {
        let mut device = device_with(
            Profile::PerObject,
            token_config(None, FindPolicy::LabelOnly),
        );
        let s = device.open_session(defs::SLOT_ID, RW).unwrap();
        let h = device
            .find_object(s, defs::LABEL_ROOT_CERTIFICATE.as_bytes(), None)
            .unwrap();
        assert_ne!(h, pkcs11::CK_INVALID_HANDLE);
        assert_eq!(
            device.get_object_value(s, h).err(),
            Some(Error::ObjectHandleInvalid)
        );
    }

    #[test]
    fn test_find_steps() {
        let mut device = device();
        let s = device.open_session(defs::SLOT_ID, RW).unwrap();
        provision(&device, s);
        assert_eq!(
            device.find_objects(s, 1),
            Err(Error::OperationNotInitialized)
        );
        device
            .find_objects_init(s, defs::LABEL_DEVICE_CERTIFICATE.as_bytes(), None)
            .unwrap();
        assert_eq!(
            device.find_objects_init(s, defs::LABEL_DEVICE_CERTIFICATE.as_bytes(), None),
            Err(Error::OperationActive)
        );
        assert_eq!(device.find_objects(s, 10).unwrap().len(), 1);
        assert!(device.find_objects(s, 10).unwrap().is_empty());
        device.find_objects_final(s).unwrap();
        assert_eq!(
            device.find_objects_final(s),
            Err(Error::OperationNotInitialized)
        );
    }

    #[test]
    fn test_private_key_is_sensitive() {
        let mut device = device();
        let s = device.open_session(defs::SLOT_ID, RW).unwrap();
        provision(&device, s);
        let key = device
            .find_object(s, defs::LABEL_DEVICE_PRIVATE_KEY.as_bytes(), None)
            .unwrap();
        assert_eq!(
            device.get_object_value(s, key).err(),
            Some(Error::AttributeSensitive)
        );
        assert_eq!(
            device.get_object_value(s, 0).err(),
            Some(Error::ObjectHandleInvalid)
        );
    }

    #[test]
    fn test_destroy_object_hides_it() {
        let mut device = device();
        let s = device.open_session(defs::SLOT_ID, RW).unwrap();
        provision(&device, s);
        let label = defs::LABEL_DEVICE_CERTIFICATE.as_bytes();
        let h = device.find_object(s, label, None).unwrap();
        device.destroy_object(s, h).unwrap();
        assert_eq!(
            device.find_object(s, label, None).unwrap(),
            pkcs11::CK_INVALID_HANDLE
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let mut device = device();
        let s = device.open_session(defs::SLOT_ID, RW).unwrap();
        provision(&device, s);
        let key = device
            .find_object(s, defs::LABEL_DEVICE_PRIVATE_KEY.as_bytes(), None)
            .unwrap();
        let cert = device
            .find_object(s, defs::LABEL_DEVICE_CERTIFICATE.as_bytes(), None)
            .unwrap();

        device.sign_init(s, pkcs11::CKM_ECDSA_SHA256, key).unwrap();
        assert_eq!(
            device.sign_init(s, pkcs11::CKM_ECDSA_SHA256, key),
            Err(Error::OperationActive)
        );
        device.sign_update(s, b"new ").unwrap();
        device.sign_update(s, b"firmware").unwrap();
        let sig = device.sign_final(s).unwrap();
        assert_eq!(sig.len(), 64);

        device.verify_init(s, pkcs11::CKM_ECDSA_SHA256, cert).unwrap();
        device.verify(s, b"new firmware", &sig).unwrap();

        let digest = Sha256::digest(b"new firmware");
        device.verify_init(s, pkcs11::CKM_ECDSA, cert).unwrap();
        device.verify(s, digest.as_slice(), &sig).unwrap();

        device.verify_init(s, pkcs11::CKM_ECDSA_SHA256, cert).unwrap();
        assert_eq!(
            device.verify(s, b"old firmware", &sig).err().map(|e| e.ck_rv()),
            Some(pkcs11::CKR_SIGNATURE_INVALID)
        );
        assert_eq!(
            device.verify(s, b"new firmware", &sig),
            Err(Error::OperationNotInitialized)
        );
    }

    #[test]
    fn test_key_checks() {
        let mut device = device();
        let s = device.open_session(defs::SLOT_ID, RW).unwrap();
        provision(&device, s);
        let key = device
            .find_object(s, defs::LABEL_DEVICE_PRIVATE_KEY.as_bytes(), None)
            .unwrap();
        let cert = device
            .find_object(s, defs::LABEL_DEVICE_CERTIFICATE.as_bytes(), None)
            .unwrap();
        assert_eq!(
            device.sign_init(s, pkcs11::CKM_ECDSA, cert),
            Err(Error::KeyTypeInconsistent)
        );
        assert_eq!(
            device.verify_init(s, pkcs11::CKM_ECDSA, key),
            Err(Error::KeyTypeInconsistent)
        );
        assert_eq!(
            device.sign_init(s, pkcs11::CKM_SHA256, key),
            Err(Error::MechanismInvalid)
        );
        assert_eq!(
            device.sign_init(s, 0xdead, key),
            Err(Error::MechanismInvalid)
        );
        // The root certificate was never provisioned.
        assert_eq!(
            device.verify_init(s, pkcs11::CKM_ECDSA, 5),
            Err(Error::KeyHandleInvalid)
        );
    }

    #[test]
    fn test_sign_requires_login_with_pin() {
        let mut device = device_with(
            Profile::SharedKeyPair,
            token_config(Some("0000"), FindPolicy::RequirePresent),
        );
        let s = device.open_session(defs::SLOT_ID, RW).unwrap();
        device.login(s, pkcs11::CKU_USER, "0000").unwrap();
        provision(&device, s);
        device.logout(s).unwrap();

        let key = device
            .find_object(s, defs::LABEL_DEVICE_PRIVATE_KEY.as_bytes(), None)
            .unwrap();
        assert_eq!(
            device.sign_init(s, pkcs11::CKM_ECDSA_SHA256, key),
            Err(Error::UserNotLoggedIn)
        );
        device.login(s, pkcs11::CKU_USER, "0000").unwrap();
        device.sign_init(s, pkcs11::CKM_ECDSA_SHA256, key).unwrap();
        let sig = device.sign(s, b"data").unwrap();

        // The public key handle shares the private key record on this layout.
        let pubkey = device
            .find_object(s, defs::LABEL_DEVICE_PUBLIC_KEY.as_bytes(), None)
            .unwrap();
        device
            .verify_init(s, pkcs11::CKM_ECDSA_SHA256, pubkey)
            .unwrap();
        device.verify(s, b"data", &sig).unwrap();
    }

    #[test]
    fn test_shared_key_pair_writes_require_login() {
        let mut device = device_with(
            Profile::SharedKeyPair,
            token_config(Some("0000"), FindPolicy::RequirePresent),
        );
        let s = device.open_session(defs::SLOT_ID, RW).unwrap();
        device.login(s, pkcs11::CKU_USER, "0000").unwrap();
        provision(&device, s);
        device.logout(s).unwrap();

        let label = defs::LABEL_DEVICE_PUBLIC_KEY.as_bytes();
        let pubkey = device.find_object(s, label, None).unwrap();
        assert_eq!(
            device.destroy_object(s, pubkey),
            Err(Error::UserNotLoggedIn)
        );
        assert_eq!(
            device.create_object(s, pkcs11::CKO_PUBLIC_KEY, label, b"public key"),
            Err(Error::UserNotLoggedIn)
        );
        let key = device
            .find_object(s, defs::LABEL_DEVICE_PRIVATE_KEY.as_bytes(), None)
            .unwrap();
        assert_ne!(key, pkcs11::CK_INVALID_HANDLE);

        device.login(s, pkcs11::CKU_USER, "0000").unwrap();
        device.destroy_object(s, pubkey).unwrap();
        assert_eq!(
            device
                .find_object(s, defs::LABEL_DEVICE_PRIVATE_KEY.as_bytes(), None)
                .unwrap(),
            pkcs11::CK_INVALID_HANDLE
        );
    }

    #[test]
    fn test_public_key_writes_without_login_when_not_shared() {
        let mut device = device_with(
            Profile::PerObject,
            token_config(Some("0000"), FindPolicy::RequirePresent),
        );
        let s = device.open_session(defs::SLOT_ID, RW).unwrap();
        let label = defs::LABEL_DEVICE_PUBLIC_KEY.as_bytes();
        let pubkey = device
            .create_object(s, pkcs11::CKO_PUBLIC_KEY, label, b"public key")
            .unwrap();
        device.destroy_object(s, pubkey).unwrap();
        assert_eq!(
            device.create_object(
                s,
                pkcs11::CKO_PRIVATE_KEY,
                defs::LABEL_DEVICE_PRIVATE_KEY.as_bytes(),
                &TEST_SCALAR
            ),
            Err(Error::UserNotLoggedIn)
        );
    }

    #[test]
    fn test_digest_and_random() {
        let mut device = device();
        let s = device
            .open_session(defs::SLOT_ID, pkcs11::CKF_SERIAL_SESSION)
            .unwrap();
        device.digest_init(s, pkcs11::CKM_SHA256).unwrap();
        device.digest_update(s, b"a").unwrap();
        device.digest_update(s, b"bc").unwrap();
        assert_eq!(
            device.digest_final(s).unwrap(),
            Sha256::digest(b"abc").to_vec()
        );
        device.digest_init(s, pkcs11::CKM_SHA256).unwrap();
        assert_eq!(
            device.digest(s, b"abc").unwrap(),
            Sha256::digest(b"abc").to_vec()
        );
        assert_eq!(
            device.digest_init(s, pkcs11::CKM_ECDSA),
            Err(Error::MechanismInvalid)
        );

        let mut buf = [0u8; 16];
        device.generate_random(s, &mut buf).unwrap();
        assert!(buf.iter().any(|b| *b != 0));
    }
}
