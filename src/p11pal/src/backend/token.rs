// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use p11pal_common::config::{self, FindPolicy};

use super::session::Session;
use super::Mechanism;
use crate::crypto::Provider;
use crate::defs;
use crate::pkcs11;
use crate::Store;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    MechNotFound,
    PinIncorrect,
    PinLenRange,
    SessionCount,
    SessionHandleInvalid,
    SessionLockPoisoned,
    UserAlreadyLoggedIn,
    UserNotLoggedIn,
    UserTypeInvalid,
}
pub type Result<T> = std::result::Result<T, Error>;

/// Slot token container. Holds every session opened against the slot, the object store
/// the sessions share and the crypto provider. Login is a token-wide state: logging in
/// or out through one session changes all of them.
pub struct Token {
    slot_id: pkcs11::CK_SLOT_ID,
    sessions: HashMap<pkcs11::CK_SESSION_HANDLE, Arc<Mutex<Session>>>,
    store: Arc<Store>,
    provider: Arc<dyn Provider>,
    pin: Option<String>,
    max_sessions: usize,
    find_policy: FindPolicy,
    user_login: bool,
}

impl Token {
    pub fn new(
        slot_id: pkcs11::CK_SLOT_ID,
        store: Arc<Store>,
        provider: Arc<dyn Provider>,
        config: &config::Token,
    ) -> Self {
        Self {
            slot_id,
            sessions: HashMap::new(),
            store,
            provider,
            pin: config.pin.clone(),
            max_sessions: config.max_sessions,
            find_policy: config.find_policy,
            user_login: false,
        }
    }

    pub fn ck_info(&self) -> pkcs11::CK_TOKEN_INFO {
        let mut flags = pkcs11::CKF_TOKEN_INITIALIZED | pkcs11::CKF_RNG;
        if self.pin.is_some() {
            flags |= pkcs11::CKF_LOGIN_REQUIRED | pkcs11::CKF_USER_PIN_INITIALIZED;
        }
        let rw_count = self
            .sessions
            .values()
            .filter(|s| s.lock().map(|s| s.state().is_rw()).unwrap_or(false))
            .count();
        let serial = format!("P11PAL{:02}", self.slot_id);

        pkcs11::CK_TOKEN_INFO {
            label: ck_padded_str!(defs::TOKEN_LABEL, 32),
            manufacturerID: ck_padded_str!(defs::MANUFACTURER, 32),
            model: ck_padded_str!(defs::TOKEN_MODEL, 16),
            serialNumber: ck_padded_str!(serial.as_str(), 16),
            flags,
            ulMaxSessionCount: self.max_sessions as pkcs11::CK_ULONG,
            ulSessionCount: self.sessions.len() as pkcs11::CK_ULONG,
            ulMaxRwSessionCount: self.max_sessions as pkcs11::CK_ULONG,
            ulRwSessionCount: rw_count as pkcs11::CK_ULONG,
            ulMaxPinLen: defs::TOKEN_MAX_PIN_LEN as pkcs11::CK_ULONG,
            ulMinPinLen: defs::TOKEN_MIN_PIN_LEN as pkcs11::CK_ULONG,
            ulTotalPublicMemory: pkcs11::CK_UNAVAILABLE_INFORMATION,
            ulFreePublicMemory: pkcs11::CK_UNAVAILABLE_INFORMATION,
            ulTotalPrivateMemory: pkcs11::CK_UNAVAILABLE_INFORMATION,
            ulFreePrivateMemory: pkcs11::CK_UNAVAILABLE_INFORMATION,
            hardwareVersion: defs::TOKEN_HARDWARE_VERSION,
            firmwareVersion: defs::TOKEN_FIRMWARE_VERSION,
            utcTime: ck_padded_str!(defs::TOKEN_UTC_TIME, 16),
        }
    }

    pub fn open_session(&mut self, handle: pkcs11::CK_SESSION_HANDLE, rw: bool) -> Result<()> {
        if self.sessions.len() >= self.max_sessions {
            return Err(Error::SessionCount);
        }
        self.sessions.insert(
            handle,
            Arc::new(Mutex::new(Session::new(
                self.slot_id,
                rw,
                // An active user login carries over to every new session.
                self.user_login,
                self.store.clone(),
                self.provider.clone(),
                self.find_policy,
                self.pin.is_some(),
            ))),
        );
        Ok(())
    }

    pub fn close_session(&mut self, handle: pkcs11::CK_SESSION_HANDLE) -> Result<()> {
        self.sessions
            .remove(&handle)
            .ok_or(Error::SessionHandleInvalid)?;
        if self.sessions.is_empty() {
            // Closing the last session logs the user out.
            self.user_login = false;
        }
        Ok(())
    }

    pub fn close_all_sessions(&mut self) {
        self.sessions.clear();
        self.user_login = false;
    }

    pub fn session(&self, handle: pkcs11::CK_SESSION_HANDLE) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(&handle).cloned()
    }

    /// Log the normal user in. Without a configured PIN any PIN is accepted.
    pub fn login(
        &mut self,
        session_handle: pkcs11::CK_SESSION_HANDLE,
        user_type: pkcs11::CK_USER_TYPE,
        pin: &str,
    ) -> Result<()> {
        if user_type != pkcs11::CKU_USER {
            return Err(Error::UserTypeInvalid);
        }
        if pin.len() > defs::TOKEN_MAX_PIN_LEN {
            return Err(Error::PinLenRange);
        }
        self.session(session_handle)
            .ok_or(Error::SessionHandleInvalid)?;
        if self.user_login {
            return Err(Error::UserAlreadyLoggedIn);
        }
        if let Some(expected) = self.pin.as_ref() {
            if expected.as_str() != pin {
                return Err(Error::PinIncorrect);
            }
        }
        self.set_user_state(true)?;

        // Token now has an active user login
        self.user_login = true;

        Ok(())
    }

    pub fn logout(&mut self, session_handle: pkcs11::CK_SESSION_HANDLE) -> Result<()> {
        self.session(session_handle)
            .ok_or(Error::SessionHandleInvalid)?;
        if !self.user_login {
            return Err(Error::UserNotLoggedIn);
        }
        self.set_user_state(false)?;

        // Token now has an inactive user login
        self.user_login = false;

        Ok(())
    }

    pub fn mech_list(&self) -> Vec<Mechanism> {
        self.provider.mechanisms().to_vec()
    }

    pub fn mech(&self, mech_type: pkcs11::CK_MECHANISM_TYPE) -> Result<Mechanism> {
        self.provider
            .mechanisms()
            .iter()
            .find(|mech| mech.ck_type() == mech_type)
            .copied()
            .ok_or(Error::MechNotFound)
    }

    fn set_user_state(&self, user: bool) -> Result<()> {
        for sarc in self.sessions.values() {
            sarc.lock()
                .map_err(|_| Error::SessionLockPoisoned)?
                .set_user(user);
        }
        Ok(())
    }
}
