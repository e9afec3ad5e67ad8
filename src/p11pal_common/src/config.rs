// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json;
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::defs;
use crate::util::LockedFile;

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),
    SerdeError(serde_json::error::Error),
    Invalid(&'static str),
}

/// Object labels, one per recognized object role. These are build-time configuration on
/// the boards (`pkcs11configLABEL_*`); here they come from the config file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Labels {
    #[serde(default = "Labels::default_device_certificate")]
    pub device_certificate: String,
    #[serde(default = "Labels::default_device_private_key")]
    pub device_private_key: String,
    #[serde(default = "Labels::default_device_public_key")]
    pub device_public_key: String,
    #[serde(default = "Labels::default_code_verification_key")]
    pub code_verification_key: String,
    #[serde(default = "Labels::default_root_certificate")]
    pub root_certificate: String,
}

/// How the persistent objects are laid out on the storage backend.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub enum Profile {
    /// All objects share one erase page (PIC32MZ, XMC4800).
    Colocated,
    /// One storage region per object.
    PerObject,
    /// Like `PerObject`, but the device private and public key share one record
    /// (MediaTek, Winner Micro).
    SharedKeyPair,
}

/// Persistent storage backing the object store.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Storage {
    /// A simulated NOR flash part, persisted in a host image file.
    Flash {
        image_path: String,
        #[serde(default = "Storage::default_page_size")]
        page_size: usize,
        #[serde(default = "Storage::default_page_count")]
        page_count: usize,
    },
    /// One host file per storage region.
    Files { dir: String },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Store {
    #[serde(default = "Store::default_profile")]
    pub profile: Profile,
    #[serde(default = "Store::default_max_object_size")]
    pub max_object_size: usize,
    #[serde(default = "Store::default_magic")]
    pub magic: u64,
    #[serde(default = "Store::default_magic_width")]
    pub magic_width: u8,
    #[serde(default = "Store::default_storage")]
    pub storage: Storage,
}

/// Policy applied by `C_FindObjects`: either any recognized label yields a handle, or the
/// object must also be present in storage.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub enum FindPolicy {
    LabelOnly,
    RequirePresent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Token {
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default = "Token::default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "Token::default_find_policy")]
    pub find_policy: FindPolicy,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Log {
    pub level: LogLevel,
    pub enable_timestamp: Option<bool>,
}

/// Device config, usually stored in the file system at `crate::defs::DEVICE_CONFIG_PATH`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub store: Store,
    #[serde(default)]
    pub token: Token,
    #[serde(default)]
    pub log: Option<Log>,
}

impl Config {
    /// Path of the config file: `$P11PAL_CONFIG` if set, `DEVICE_CONFIG_PATH` otherwise.
    pub fn default_path() -> PathBuf {
        std::env::var_os(defs::CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(defs::DEVICE_CONFIG_PATH))
    }

    /// Load the config in read-only mode.
    /// The config file lock is held only until the the data is read and parsed.
    pub fn load_ro<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let mut file = LockedFile::open_ro(path).map_err(Error::IoError)?;
        let config: Self = serde_json::from_reader(BufReader::new(file.as_mut_file()))
            .map_err(Error::SerdeError)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json).map_err(Error::SerdeError)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config to `path`, replacing any previous content.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut file = LockedFile::open_rw(path).map_err(Error::IoError)?;
        file.seek(SeekFrom::Start(0)).map_err(Error::IoError)?;
        file.set_len(0).map_err(Error::IoError)?;
        {
            let writer = BufWriter::new(file.as_mut_file());
            serde_json::to_writer_pretty(writer, self).map_err(Error::SerdeError)?;
        }
        file.flush().map_err(Error::IoError)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        let labels = self.labels.all();
        for (i, label) in labels.iter().enumerate() {
            if label.is_empty() || label.len() > defs::MAX_LABEL_LEN {
                return Err(Error::Invalid("label length out of range"));
            }
            if labels[..i].contains(label) {
                return Err(Error::Invalid("duplicate label"));
            }
        }
        match self.store.magic_width {
            4 if self.store.magic > u32::MAX as u64 => {
                return Err(Error::Invalid("magic does not fit in 4 bytes"))
            }
            4 | 8 => (),
            _ => return Err(Error::Invalid("magic width must be 4 or 8")),
        }
        if self.store.max_object_size == 0 {
            return Err(Error::Invalid("max_object_size must be non-zero"));
        }
        if self.token.max_sessions == 0 {
            return Err(Error::Invalid("max_sessions must be non-zero"));
        }
        if let Some(pin) = self.token.pin.as_ref() {
            if pin.len() < defs::TOKEN_MIN_PIN_LEN || pin.len() > defs::TOKEN_MAX_PIN_LEN {
                return Err(Error::Invalid("pin length out of range"));
            }
        }
        if let Storage::Flash {
            page_size,
            page_count,
            ..
        } = self.store.storage
        {
            if page_size == 0 || page_count == 0 {
                return Err(Error::Invalid("empty flash geometry"));
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            labels: Labels::default(),
            store: Store::default(),
            token: Token::default(),
            log: None,
        }
    }
}

impl Labels {
    /// Labels in role order: certificate, private key, public key, code verification key,
    /// root certificate.
    pub fn all(&self) -> [&str; 5] {
        [
            self.device_certificate.as_str(),
            self.device_private_key.as_str(),
            self.device_public_key.as_str(),
            self.code_verification_key.as_str(),
            self.root_certificate.as_str(),
        ]
    }

    fn default_device_certificate() -> String {
        defs::LABEL_DEVICE_CERTIFICATE.to_string()
    }
    fn default_device_private_key() -> String {
        defs::LABEL_DEVICE_PRIVATE_KEY.to_string()
    }
    fn default_device_public_key() -> String {
        defs::LABEL_DEVICE_PUBLIC_KEY.to_string()
    }
    fn default_code_verification_key() -> String {
        defs::LABEL_CODE_VERIFICATION_KEY.to_string()
    }
    fn default_root_certificate() -> String {
        defs::LABEL_ROOT_CERTIFICATE.to_string()
    }
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            device_certificate: Self::default_device_certificate(),
            device_private_key: Self::default_device_private_key(),
            device_public_key: Self::default_device_public_key(),
            code_verification_key: Self::default_code_verification_key(),
            root_certificate: Self::default_root_certificate(),
        }
    }
}

impl Storage {
    fn default_page_size() -> usize {
        defs::DEFAULT_PAGE_SIZE
    }
    fn default_page_count() -> usize {
        defs::DEFAULT_PAGE_COUNT
    }
}

impl Store {
    fn default_profile() -> Profile {
        Profile::Colocated
    }
    fn default_max_object_size() -> usize {
        defs::DEFAULT_MAX_OBJECT_SIZE
    }
    fn default_magic() -> u64 {
        defs::DEFAULT_OBJECT_MAGIC
    }
    fn default_magic_width() -> u8 {
        defs::DEFAULT_MAGIC_WIDTH
    }
    fn default_storage() -> Storage {
        Storage::Flash {
            image_path: defs::DEFAULT_FLASH_IMAGE_PATH.to_string(),
            page_size: defs::DEFAULT_PAGE_SIZE,
            page_count: defs::DEFAULT_PAGE_COUNT,
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            profile: Self::default_profile(),
            max_object_size: Self::default_max_object_size(),
            magic: Self::default_magic(),
            magic_width: Self::default_magic_width(),
            storage: Self::default_storage(),
        }
    }
}

impl Token {
    fn default_max_sessions() -> usize {
        defs::DEFAULT_MAX_SESSIONS
    }
    fn default_find_policy() -> FindPolicy {
        FindPolicy::RequirePresent
    }
}

impl Default for Token {
    fn default() -> Self {
        Self {
            pin: None,
            max_sessions: Self::default_max_sessions(),
            find_policy: Self::default_find_policy(),
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(src: LogLevel) -> Self {
        match src {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}
