// Copyright 2020-2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

extern crate libc;

pub mod config;
pub mod logger;
pub mod util;

pub mod defs {
    /// Manufacturer of the various PKCS#11 objects (library, tokens, slots).
    pub const MANUFACTURER: &str = "Amazon";

    /// The filesystem path used to look up the PAL config file, unless overridden through
    /// `CONFIG_PATH_ENV`.
    pub const DEVICE_CONFIG_PATH: &str = "./p11pal.json";
    /// Environment variable naming an alternative config file path.
    pub const CONFIG_PATH_ENV: &str = "P11PAL_CONFIG";
    /// PKCS#11 module description.
    pub const DEVICE_DESCRIPTION: &str = "FreeRTOS PKCS#11 PAL";

    /// The single slot exposed by every board port.
    pub const SLOT_ID: u64 = 1;
    /// PKCS#11 slot description.
    pub const SLOT_DESCRIPTION: &str = "FreeRTOS PKCS#11 slot";

    /// PKCS#11 token label and model.
    pub const TOKEN_LABEL: &str = "FreeRTOS";
    pub const TOKEN_MODEL: &str = "p11pal-token";
    /// Minimum and maximum length (in bytes) of a token PIN.
    pub const TOKEN_MIN_PIN_LEN: usize = 0;
    pub const TOKEN_MAX_PIN_LEN: usize = 64;

    /// Maximum length (in bytes) of an object label.
    pub const MAX_LABEL_LEN: usize = 32;

    /// Default object labels (`pkcs11configLABEL_*`).
    pub const LABEL_DEVICE_CERTIFICATE: &str = "Device Cert";
    pub const LABEL_DEVICE_PRIVATE_KEY: &str = "Device Priv TLS Key";
    pub const LABEL_DEVICE_PUBLIC_KEY: &str = "Device Pub TLS Key";
    pub const LABEL_CODE_VERIFICATION_KEY: &str = "Code Verify Key";
    pub const LABEL_ROOT_CERTIFICATE: &str = "Root Cert";

    pub const DEFAULT_MAX_SESSIONS: usize = 10;
    pub const DEFAULT_MAX_OBJECT_SIZE: usize = 2048;
    /// Presence marker written in front of every stored object.
    pub const DEFAULT_OBJECT_MAGIC: u64 = 0x00AB_CDEF;
    pub const DEFAULT_MAGIC_WIDTH: u8 = 4;
    pub const DEFAULT_PAGE_SIZE: usize = 16384;
    pub const DEFAULT_PAGE_COUNT: usize = 8;
    pub const DEFAULT_FLASH_IMAGE_PATH: &str = "./p11pal-flash.bin";

    pub const DEFAULT_LOG_LEVEL: log::Level = log::Level::Warn;
    pub const DEFAULT_LOG_TIMESTAMP: bool = false;
}
