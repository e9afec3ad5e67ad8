// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::token::Token;
use crate::defs;
use crate::pkcs11;

/// Device slot container. Every board exposes exactly one slot, with the token over the
/// object store permanently present.
pub struct Slot {
    id: pkcs11::CK_SLOT_ID,
    token: Token,
}

impl Slot {
    pub fn new(id: pkcs11::CK_SLOT_ID, token: Token) -> Self {
        Self { id, token }
    }

    pub fn id(&self) -> pkcs11::CK_SLOT_ID {
        self.id
    }

    pub fn ck_info(&self) -> pkcs11::CK_SLOT_INFO {
        pkcs11::CK_SLOT_INFO {
            slotDescription: ck_padded_str!(defs::SLOT_DESCRIPTION, 64),
            manufacturerID: ck_padded_str!(defs::MANUFACTURER, 32),
            flags: pkcs11::CKF_TOKEN_PRESENT | pkcs11::CKF_HW_SLOT,
            hardwareVersion: defs::SLOT_HARDWARE_VERSION,
            firmwareVersion: defs::SLOT_FIRMWARE_VERSION,
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn token_mut(&mut self) -> &mut Token {
        &mut self.token
    }
}
