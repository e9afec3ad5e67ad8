// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use p11pal_common::config;

use crate::pkcs11;

/// The closed set of credential objects a token can hold. Declaration order is the
/// handle order: a role's handle is its index plus one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectRole {
    DeviceCertificate,
    DevicePrivateKey,
    DevicePublicKey,
    CodeVerificationKey,
    RootCertificate,
}

impl ObjectRole {
    pub const COUNT: usize = 5;

    pub const ALL: [ObjectRole; Self::COUNT] = [
        Self::DeviceCertificate,
        Self::DevicePrivateKey,
        Self::DevicePublicKey,
        Self::CodeVerificationKey,
        Self::RootCertificate,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn class(self) -> pkcs11::CK_OBJECT_CLASS {
        match self {
            Self::DeviceCertificate | Self::RootCertificate => pkcs11::CKO_CERTIFICATE,
            Self::DevicePrivateKey => pkcs11::CKO_PRIVATE_KEY,
            Self::DevicePublicKey | Self::CodeVerificationKey => pkcs11::CKO_PUBLIC_KEY,
        }
    }

    /// Only the device private key is non-exportable.
    pub fn is_private(self) -> bool {
        self == Self::DevicePrivateKey
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::DeviceCertificate => "device-certificate",
            Self::DevicePrivateKey => "device-private-key",
            Self::DevicePublicKey => "device-public-key",
            Self::CodeVerificationKey => "code-verification-key",
            Self::RootCertificate => "root-certificate",
        }
    }
}

/// Label bytes for every object role.
#[derive(Clone, Debug)]
pub struct LabelSet {
    labels: [Vec<u8>; ObjectRole::COUNT],
}

impl LabelSet {
    pub fn label(&self, role: ObjectRole) -> &[u8] {
        self.labels[role.index()].as_slice()
    }

    /// Exact byte match against the configured labels. Callers passing C strings must
    /// strip the terminating NUL first.
    pub fn role_for(&self, label: &[u8]) -> Option<ObjectRole> {
        self.labels
            .iter()
            .position(|l| l.as_slice() == label)
            .and_then(ObjectRole::from_index)
    }
}

impl From<&config::Labels> for LabelSet {
    fn from(src: &config::Labels) -> Self {
        let all = src.all();
        Self {
            labels: [
                all[0].as_bytes().to_vec(),
                all[1].as_bytes().to_vec(),
                all[2].as_bytes().to_vec(),
                all[3].as_bytes().to_vec(),
                all[4].as_bytes().to_vec(),
            ],
        }
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::from(&config::Labels::default())
    }
}
