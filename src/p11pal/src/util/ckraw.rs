// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::Error;
use crate::pkcs11;

/// Borrowed view of a caller-owned `CK_ATTRIBUTE`.
pub struct CkRawAttr(pkcs11::CK_ATTRIBUTE_PTR);

impl CkRawAttr {
    /// # Safety
    /// `ptr` must be non-null and point to a `CK_ATTRIBUTE` whose `pValue`, when set,
    /// holds `ulValueLen` readable bytes for as long as the wrapper is used.
    pub unsafe fn from_raw_ptr_unchecked(ptr: pkcs11::CK_ATTRIBUTE_PTR) -> Self {
        Self(ptr)
    }

    pub fn type_(&self) -> pkcs11::CK_ATTRIBUTE_TYPE {
        unsafe { (*self.0).type_ }
    }

    pub fn len(&self) -> pkcs11::CK_ULONG {
        unsafe { (*self.0).ulValueLen }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn val_bytes(&self) -> Result<&[u8], Error> {
        let val_ptr = unsafe { (*self.0).pValue };
        if val_ptr.is_null() {
            return Err(Error::NullPtrDeref);
        }
        unsafe {
            Ok(std::slice::from_raw_parts(
                val_ptr as *const u8,
                self.len() as usize,
            ))
        }
    }
}
