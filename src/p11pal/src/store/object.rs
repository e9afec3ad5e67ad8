// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::role::ObjectRole;
use crate::pkcs11;

/// Handle of a stored object: the object role index plus one. Zero is
/// `CK_INVALID_HANDLE` and never names an object.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub const INVALID: Self = Self(pkcs11::CK_INVALID_HANDLE);

    pub fn for_role(role: ObjectRole) -> Self {
        Self(role.index() as u64 + 1)
    }

    pub fn role(self) -> Option<ObjectRole> {
        (self.0 as usize)
            .checked_sub(1)
            .and_then(ObjectRole::from_index)
    }

    pub fn is_valid(self) -> bool {
        self.role().is_some()
    }
}

impl From<pkcs11::CK_OBJECT_HANDLE> for ObjectHandle {
    fn from(src: pkcs11::CK_OBJECT_HANDLE) -> Self {
        Self(src)
    }
}

impl From<ObjectHandle> for u64 {
    fn from(src: ObjectHandle) -> Self {
        src.0
    }
}

/// A copy of a stored object's payload, as returned by `ObjectStore::get_value()`.
/// Private payloads are wiped when the value is dropped.
pub struct ObjectValue {
    role: ObjectRole,
    data: Vec<u8>,
}

impl ObjectValue {
    pub(super) fn new(role: ObjectRole, data: Vec<u8>) -> Self {
        Self { role, data }
    }

    pub fn role(&self) -> ObjectRole {
        self.role
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Classification of the handle the value was read through. On the shared key pair
    /// profile the public key handle reports `false` even though its bytes are the
    /// private key record.
    pub fn is_private(&self) -> bool {
        self.role.is_private()
    }
}

impl Drop for ObjectValue {
    fn drop(&mut self) {
        if self.is_private() {
            for byte in self.data.iter_mut() {
                // Volatile so the wipe is not elided along with the dead buffer.
                unsafe { std::ptr::write_volatile(byte, 0) };
            }
        }
    }
}

impl std::fmt::Debug for ObjectValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectValue")
            .field("role", &self.role)
            .field("len", &self.data.len())
            .finish()
    }
}
