// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The `PKCS11_PAL_*` entry points a FreeRTOS PKCS#11 token module links against. They
//! operate on one process-wide object store, opened by `PKCS11_PAL_Initialize()` from the
//! device config.

#![allow(non_snake_case)]

use lazy_static::lazy_static;
use std::io;
use std::ptr;
use std::sync::{Arc, Mutex};

use p11pal_common::config::{self, Config, FindPolicy};
use p11pal_common::logger::Logger;

use crate::pkcs11;
use crate::store::{self, ObjectHandle};
use crate::util::CkRawAttr;
use crate::Store;

struct Pal {
    store: Arc<Store>,
    find_policy: FindPolicy,
}

lazy_static! {
    static ref PAL: Mutex<Option<Pal>> = Mutex::new(None);
}

/// Utility macro for fetching the process-wide store.
/// The PAL lock is only held while the store reference is cloned; `$on_err` is returned
/// from the calling function when the PAL has not been initialized.
macro_rules! lock_store {
    ($store:ident, $on_err:expr) => {
        lock_store!($store, _find_policy, $on_err);
    };
    ($store:ident, $find_policy:ident, $on_err:expr) => {
        let ($store, $find_policy) = match PAL.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(pal) => (pal.store.clone(), pal.find_policy),
                None => {
                    error!("PAL used before PKCS11_PAL_Initialize()");
                    return $on_err;
                }
            },
            Err(_) => {
                error!("PAL store lock poisoned");
                return $on_err;
            }
        };
    };
}

/// The store, for in-process consumers (e.g. the OTA PAL) sharing the PAL's view.
pub fn store() -> Option<Arc<Store>> {
    PAL.lock()
        .ok()
        .and_then(|guard| guard.as_ref().map(|pal| pal.store.clone()))
}

fn load_config() -> Result<Config, config::Error> {
    let path = Config::default_path();
    match Config::load_ro(&path) {
        Err(config::Error::IoError(ref e)) if e.kind() == io::ErrorKind::NotFound => {
            Ok(Config::default())
        }
        ret => ret,
    }
}

#[no_mangle]
pub extern "C" fn PKCS11_PAL_Initialize() -> pkcs11::CK_RV {
    let mut guard = match PAL.lock() {
        Ok(guard) => guard,
        Err(_) => return pkcs11::CKR_GENERAL_ERROR,
    };
    if guard.is_some() {
        return pkcs11::CKR_CRYPTOKI_ALREADY_INITIALIZED;
    }

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            Logger::init(None);
            error!("Unable to load config: {:?}", e);
            return pkcs11::CKR_GENERAL_ERROR;
        }
    };
    Logger::init(config.log.as_ref());
    trace!("PKCS11_PAL_Initialize() called");

    match store::open(&config) {
        Ok(store) => {
            *guard = Some(Pal {
                store: Arc::new(store),
                find_policy: config.token.find_policy,
            });
            pkcs11::CKR_OK
        }
        Err(e) => {
            error!("Unable to open object store: {:?}", e);
            e.ck_rv()
        }
    }
}

#[no_mangle]
pub extern "C" fn PKCS11_PAL_SaveObject(
    pxLabel: pkcs11::CK_ATTRIBUTE_PTR,
    pucData: pkcs11::CK_BYTE_PTR,
    ulDataSize: pkcs11::CK_ULONG,
) -> pkcs11::CK_OBJECT_HANDLE {
    trace!("PKCS11_PAL_SaveObject() called");

    if pxLabel.is_null() || pucData.is_null() {
        error!("PKCS11_PAL_SaveObject() called with NULL label or data");
        return pkcs11::CK_INVALID_HANDLE;
    }
    lock_store!(store, pkcs11::CK_INVALID_HANDLE);

    let label = unsafe { CkRawAttr::from_raw_ptr_unchecked(pxLabel) };
    let label = match label.val_bytes() {
        Ok(bytes) => bytes,
        Err(_) => return pkcs11::CK_INVALID_HANDLE,
    };
    let data = unsafe { std::slice::from_raw_parts(pucData, ulDataSize as usize) };

    match store.save(label, data) {
        Ok(handle) => handle.into(),
        Err(e) => {
            error!("PKCS11_PAL_SaveObject() failed: {:?}", e);
            pkcs11::CK_INVALID_HANDLE
        }
    }
}

/// Label lookup under the configured find policy. No match yields `CK_INVALID_HANDLE`.
#[no_mangle]
pub extern "C" fn PKCS11_PAL_FindObject(
    pxLabel: pkcs11::CK_BYTE_PTR,
    usLength: pkcs11::CK_ULONG,
) -> pkcs11::CK_OBJECT_HANDLE {
    trace!("PKCS11_PAL_FindObject() called");

    if pxLabel.is_null() || usLength == 0 {
        return pkcs11::CK_INVALID_HANDLE;
    }
    lock_store!(store, find_policy, pkcs11::CK_INVALID_HANDLE);

    let label = unsafe { std::slice::from_raw_parts(pxLabel, usLength as usize) };
    match store.find_with_policy(label, find_policy) {
        Ok(Some(handle)) => handle.into(),
        Ok(None) => pkcs11::CK_INVALID_HANDLE,
        Err(e) => {
            error!("PKCS11_PAL_FindObject() failed: {:?}", e);
            pkcs11::CK_INVALID_HANDLE
        }
    }
}

/// Hand out a heap copy of the object's payload. Every successful call must be paired
/// with `PKCS11_PAL_GetObjectValueCleanup()`.
#[no_mangle]
pub extern "C" fn PKCS11_PAL_GetObjectValue(
    xHandle: pkcs11::CK_OBJECT_HANDLE,
    ppucData: *mut pkcs11::CK_BYTE_PTR,
    pulDataSize: pkcs11::CK_ULONG_PTR,
    pIsPrivate: pkcs11::CK_BBOOL_PTR,
) -> pkcs11::CK_RV {
    trace!("PKCS11_PAL_GetObjectValue() called");

    if ppucData.is_null() || pulDataSize.is_null() || pIsPrivate.is_null() {
        return pkcs11::CKR_ARGUMENTS_BAD;
    }
    lock_store!(store, pkcs11::CKR_CRYPTOKI_NOT_INITIALIZED);

    let value = match store.get_value(ObjectHandle::from(xHandle)) {
        Ok(value) => value,
        Err(e) => {
            debug!("PKCS11_PAL_GetObjectValue({}) failed: {:?}", xHandle, e);
            return e.ck_rv();
        }
    };
    let is_private = if value.is_private() {
        pkcs11::CK_TRUE
    } else {
        pkcs11::CK_FALSE
    };
    let buf: Box<[u8]> = value.data().to_vec().into_boxed_slice();
    let len = buf.len();
    store.release_value(value);

    unsafe {
        ptr::write(ppucData, Box::into_raw(buf) as pkcs11::CK_BYTE_PTR);
        ptr::write(pulDataSize, len as pkcs11::CK_ULONG);
        ptr::write(pIsPrivate, is_private);
    }
    pkcs11::CKR_OK
}

/// Wipe and free a buffer returned by `PKCS11_PAL_GetObjectValue()`.
#[no_mangle]
pub extern "C" fn PKCS11_PAL_GetObjectValueCleanup(
    pucData: pkcs11::CK_BYTE_PTR,
    ulDataSize: pkcs11::CK_ULONG,
) {
    trace!("PKCS11_PAL_GetObjectValueCleanup() called");

    if pucData.is_null() {
        return;
    }
    let mut buf =
        unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(pucData, ulDataSize as usize)) };
    for b in buf.iter_mut() {
        unsafe { ptr::write_volatile(b, 0) };
    }
}

#[no_mangle]
pub extern "C" fn PKCS11_PAL_DestroyObject(xHandle: pkcs11::CK_OBJECT_HANDLE) -> pkcs11::CK_RV {
    trace!("PKCS11_PAL_DestroyObject() called");

    lock_store!(store, pkcs11::CKR_CRYPTOKI_NOT_INITIALIZED);
    match store.destroy(ObjectHandle::from(xHandle)) {
        Ok(()) => pkcs11::CKR_OK,
        Err(e) => e.ck_rv(),
    }
}
