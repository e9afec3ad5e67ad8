// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Label-addressed persistent store for the fixed set of token credentials.
//!
//! Every object role owns a slot in the storage backend (see `Layout`). Objects that
//! share an erase page are updated through `StorageBackend::atomic_update()`, which
//! carries the neighbouring records over in its scratch copy. All backend access goes
//! through one lock, so two saves to colocated labels cannot clobber each other.

pub mod layout;
pub mod object;
pub mod record;
pub mod role;

use std::sync::{Mutex, MutexGuard};

use p11pal_common::config::{self, FindPolicy, Profile};

use crate::pkcs11;
use crate::storage::{self, FileBackend, FileFlash, FlashBackend, StorageBackend};

pub use layout::{Layout, RecordFormat, Slot};
pub use object::{ObjectHandle, ObjectValue};
pub use role::{LabelSet, ObjectRole};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Error {
    /// Empty label or empty payload.
    ArgumentsBad,
    LabelUnknown,
    ObjectTooLarge,
    ObjectHandleInvalid,
    ObjectAbsent,
    LayoutInvalid(&'static str),
    StorageError(storage::Error),
    LockPoisoned,
}

impl Error {
    /// Return code reported through the `PKCS11_PAL_*` entry points.
    pub fn ck_rv(&self) -> pkcs11::CK_RV {
        match self {
            Self::ArgumentsBad | Self::LabelUnknown | Self::ObjectTooLarge => {
                pkcs11::CKR_ARGUMENTS_BAD
            }
            Self::ObjectHandleInvalid => pkcs11::CKR_OBJECT_HANDLE_INVALID,
            Self::ObjectAbsent => pkcs11::CKR_FUNCTION_FAILED,
            Self::StorageError(storage::Error::IoError(_)) => pkcs11::CKR_FUNCTION_FAILED,
            Self::StorageError(_) => pkcs11::CKR_DEVICE_ERROR,
            Self::LayoutInvalid(_) | Self::LockPoisoned => pkcs11::CKR_GENERAL_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Host file names used by the file-per-region backend, by region index.
const COLOCATED_FILES: [&str; 1] = ["FreeRTOS_P11_Objects.dat"];
const PER_OBJECT_FILES: [&str; 5] = [
    "FreeRTOS_P11_Certificate.dat",
    "FreeRTOS_P11_Key.dat",
    "FreeRTOS_P11_PubKey.dat",
    "FreeRTOS_P11_CodeSignKey.dat",
    "FreeRTOS_P11_RootCert.dat",
];
const SHARED_KEY_PAIR_FILES: [&str; 4] = [
    "FreeRTOS_P11_Certificate.dat",
    "FreeRTOS_P11_Key.dat",
    "FreeRTOS_P11_CodeSignKey.dat",
    "FreeRTOS_P11_RootCert.dat",
];

pub struct ObjectStore<B: StorageBackend> {
    backend: Mutex<B>,
    labels: LabelSet,
    layout: Layout,
}

impl<B: StorageBackend> ObjectStore<B> {
    pub fn new(backend: B, labels: LabelSet, layout: Layout) -> Result<Self> {
        layout.validate(&backend)?;
        Ok(Self {
            backend: Mutex::new(backend),
            labels,
            layout,
        })
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Write `data` as the object named by `label` and return its handle. The existing
    /// value is left untouched when the label is unknown or `data` does not fit.
    pub fn save(&self, label: &[u8], data: &[u8]) -> Result<ObjectHandle> {
        let role = self.role_for(label)?;
        if data.is_empty() {
            return Err(Error::ArgumentsBad);
        }
        let slot = *self.layout.slot(role);
        if data.len() > slot.capacity {
            warn!(
                "Object {} too large: {} > {}",
                role.name(),
                data.len(),
                slot.capacity
            );
            return Err(Error::ObjectTooLarge);
        }

        let format = *self.layout.format();
        let record_len = self.layout.record_len(&slot);
        let mut backend = self.lock()?;
        backend
            .atomic_update(slot.region, &mut |region: &mut [u8]| {
                record::encode(
                    &format,
                    data,
                    &mut region[slot.offset..slot.offset + record_len],
                );
                Ok(())
            })
            .map_err(|e| {
                error!("Unable to save {}: {:?}", role.name(), e);
                Error::StorageError(e)
            })?;

        debug!("Saved {} ({} bytes)", role.name(), data.len());
        Ok(ObjectHandle::for_role(role))
    }

    /// Label recognition only: the handle is returned whether or not the object has been
    /// saved. Use `exists()` for the presence check.
    pub fn find(&self, label: &[u8]) -> Option<ObjectHandle> {
        self.labels.role_for(label).map(ObjectHandle::for_role)
    }

    /// Whether the object named by `handle` currently holds a valid record.
    pub fn exists(&self, handle: ObjectHandle) -> Result<bool> {
        let role = handle.role().ok_or(Error::ObjectHandleInvalid)?;
        let backend = self.lock()?;
        Ok(self.payload_len(&*backend, role)?.is_some())
    }

    /// `find()` under a lookup policy. With `RequirePresent`, absent objects and objects
    /// overwritten with zeroes (the token's way of destroying them) yield no handle.
    pub fn find_with_policy(
        &self,
        label: &[u8],
        policy: FindPolicy,
    ) -> Result<Option<ObjectHandle>> {
        let handle = match self.find(label) {
            Some(handle) => handle,
            None => return Ok(None),
        };
        if policy == FindPolicy::LabelOnly {
            return Ok(Some(handle));
        }
        match self.get_value(handle) {
            Ok(value) if value.data().iter().any(|b| *b != 0) => Ok(Some(handle)),
            Ok(_) | Err(Error::ObjectAbsent) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get_value(&self, handle: ObjectHandle) -> Result<ObjectValue> {
        let role = handle.role().ok_or(Error::ObjectHandleInvalid)?;
        let slot = *self.layout.slot(role);
        let hlen = self.layout.format().header_len();

        let backend = self.lock()?;
        let len = self
            .payload_len(&*backend, role)?
            .ok_or(Error::ObjectAbsent)?;
        let mut data = vec![0u8; len];
        backend
            .read(slot.region, slot.offset + hlen, &mut data)
            .map_err(Error::StorageError)?;
        Ok(ObjectValue::new(role, data))
    }

    /// Release a value obtained from `get_value()`. Private payloads are zeroed.
    pub fn release_value(&self, value: ObjectValue) {
        trace!("Releasing {} value", value.role().name());
        drop(value);
    }

    /// Objects cannot be deleted; this only checks the handle.
    pub fn destroy(&self, handle: ObjectHandle) -> Result<()> {
        handle.role().ok_or(Error::ObjectHandleInvalid)?;
        Ok(())
    }

    /// Invalidate every stored object. Used by the provisioning reset.
    pub fn erase_all(&self) -> Result<()> {
        let mut backend = self.lock()?;
        for role in ObjectRole::ALL.iter() {
            let slot = *self.layout.slot(*role);
            let record_len = self.layout.record_len(&slot);
            backend
                .atomic_update(slot.region, &mut |region: &mut [u8]| {
                    record::erase(&mut region[slot.offset..slot.offset + record_len]);
                    Ok(())
                })
                .map_err(Error::StorageError)?;
        }
        info!("Erased all objects");
        Ok(())
    }

    pub fn max_object_size(&self, label: &[u8]) -> Option<usize> {
        self.labels
            .role_for(label)
            .map(|role| self.layout.slot(role).capacity)
    }

    pub fn into_backend(self) -> Result<B> {
        self.backend.into_inner().map_err(|_| Error::LockPoisoned)
    }

    fn role_for(&self, label: &[u8]) -> Result<ObjectRole> {
        if label.is_empty() {
            return Err(Error::ArgumentsBad);
        }
        self.labels.role_for(label).ok_or_else(|| {
            debug!("Unknown label {:?}", String::from_utf8_lossy(label));
            Error::LabelUnknown
        })
    }

    fn payload_len(&self, backend: &B, role: ObjectRole) -> Result<Option<usize>> {
        let slot = self.layout.slot(role);
        let format = self.layout.format();
        let mut header = vec![0u8; format.header_len()];
        backend
            .read(slot.region, slot.offset, &mut header)
            .map_err(Error::StorageError)?;
        Ok(record::decode_header(format, &header, slot.capacity))
    }

    fn lock(&self) -> Result<MutexGuard<B>> {
        self.backend.lock().map_err(|_| Error::LockPoisoned)
    }
}

/// Open the store described by the device config.
pub fn open(config: &config::Config) -> Result<ObjectStore<Box<dyn StorageBackend>>> {
    let layout = Layout::from_config(&config.store)?;
    let backend: Box<dyn StorageBackend> = match &config.store.storage {
        config::Storage::Flash {
            image_path,
            page_size,
            page_count,
        } => Box::new(FlashBackend::new(
            FileFlash::open(image_path, *page_size, *page_count).map_err(Error::StorageError)?,
        )),
        config::Storage::Files { dir } => {
            let names: &[&str] = match layout.profile() {
                Profile::Colocated => &COLOCATED_FILES,
                Profile::PerObject => &PER_OBJECT_FILES,
                Profile::SharedKeyPair => &SHARED_KEY_PAIR_FILES,
            };
            let regions = names
                .iter()
                .zip(layout.region_requirements())
                .map(|(name, len)| (name.to_string(), len))
                .collect();
            Box::new(FileBackend::new(dir, regions).map_err(Error::StorageError)?)
        }
    };
    ObjectStore::new(backend, LabelSet::from(&config.labels), layout)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemFlash;
    use p11pal_common::defs;

    const PAGE_SIZE: usize = 16384;

    fn store(profile: Profile) -> ObjectStore<FlashBackend<MemFlash>> {
        let format = RecordFormat::new(defs::DEFAULT_OBJECT_MAGIC, 4).unwrap();
        ObjectStore::new(
            FlashBackend::new(MemFlash::new(PAGE_SIZE, 5)),
            LabelSet::default(),
            Layout::for_profile(profile, format, 2048),
        )
        .unwrap()
    }

    /// In-memory store behind the boxed backend the session layer works with.
    pub fn boxed_store(profile: Profile) -> crate::Store {
        let format = RecordFormat::new(defs::DEFAULT_OBJECT_MAGIC, 4).unwrap();
        let backend: Box<dyn StorageBackend> =
            Box::new(FlashBackend::new(MemFlash::new(PAGE_SIZE, 5)));
        ObjectStore::new(
            backend,
            LabelSet::default(),
            Layout::for_profile(profile, format, 2048),
        )
        .unwrap()
    }

    fn cert() -> &'static [u8] {
        defs::LABEL_DEVICE_CERTIFICATE.as_bytes()
    }

    fn priv_key() -> &'static [u8] {
        defs::LABEL_DEVICE_PRIVATE_KEY.as_bytes()
    }

    fn pub_key() -> &'static [u8] {
        defs::LABEL_DEVICE_PUBLIC_KEY.as_bytes()
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect()
    }

    #[test]
    fn test_round_trip_every_label() {
        for profile in [Profile::Colocated, Profile::PerObject, Profile::SharedKeyPair].iter() {
            let store = store(*profile);
            for (i, role) in ObjectRole::ALL.iter().enumerate() {
                if *profile == Profile::SharedKeyPair && *role == ObjectRole::DevicePublicKey {
                    continue;
                }
                let label = store.labels().label(*role).to_vec();
                let data = pattern(100 + i * 300, i as u8);
                let handle = store.save(&label, &data).unwrap();
                assert!(handle.is_valid());
                let value = store.get_value(handle).unwrap();
                assert_eq!(value.data(), data.as_slice());
                assert_eq!(value.is_private(), role.is_private());
                store.release_value(value);
            }
            // Colocated saves must not have clobbered each other.
            let value = store.get_value(store.find(cert()).unwrap()).unwrap();
            assert_eq!(value.data(), pattern(100, 0).as_slice());
        }
    }

    #[test]
    fn test_absent_before_provisioning() {
        let store = store(Profile::Colocated);
        for role in ObjectRole::ALL.iter() {
            let label = store.labels().label(*role).to_vec();
            let handle = store.find(&label).unwrap();
            assert_eq!(store.exists(handle), Ok(false));
            assert_eq!(store.get_value(handle).err(), Some(Error::ObjectAbsent));
            assert_eq!(
                store.find_with_policy(&label, FindPolicy::RequirePresent),
                Ok(None)
            );
            assert_eq!(
                store.find_with_policy(&label, FindPolicy::LabelOnly),
                Ok(Some(handle))
            );
        }
    }

    #[test]
    fn test_resave_replaces_payload() {
        let store = store(Profile::Colocated);
        store.save(cert(), &pattern(1500, 1)).unwrap();
        let handle = store.save(cert(), b"short").unwrap();
        let value = store.get_value(handle).unwrap();
        assert_eq!(value.data(), b"short");
    }

    #[test]
    fn test_concurrent_colocated_saves() {
        let store = std::sync::Arc::new(store(Profile::Colocated));
        let workers: Vec<_> = ObjectRole::ALL
            .iter()
            .enumerate()
            .map(|(i, role)| {
                let store = store.clone();
                let label = store.labels().label(*role).to_vec();
                std::thread::spawn(move || {
                    for round in 0..20u8 {
                        let data = pattern(200 + i * 100, round ^ i as u8);
                        store.save(&label, &data).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        for (i, role) in ObjectRole::ALL.iter().enumerate() {
            let handle = store.find(store.labels().label(*role)).unwrap();
            let value = store.get_value(handle).unwrap();
            assert_eq!(value.data(), pattern(200 + i * 100, 19 ^ i as u8).as_slice());
        }
    }

    #[test]
    fn test_find_is_stable() {
        let store = store(Profile::PerObject);
        store.save(cert(), b"cert").unwrap();
        assert_eq!(store.find(cert()), store.find(cert()));
        assert_eq!(store.find(cert()), Some(ObjectHandle::for_role(ObjectRole::DeviceCertificate)));
        assert_eq!(store.find(b"Unknown"), None);
    }

    #[test]
    fn test_oversize_rejected_without_modification() {
        let store = store(Profile::Colocated);
        let handle = store.save(cert(), b"original").unwrap();
        let erases = store.lock().unwrap().flash().erase_count();

        assert_eq!(
            store.save(cert(), &pattern(2049, 3)),
            Err(Error::ObjectTooLarge)
        );
        assert_eq!(store.get_value(handle).unwrap().data(), b"original");
        assert_eq!(store.lock().unwrap().flash().erase_count(), erases);
        assert_eq!(store.save(cert(), &pattern(2048, 3)), Ok(handle));
    }

    #[test]
    fn test_bad_input() {
        let store = store(Profile::Colocated);
        assert_eq!(store.save(b"", b"data"), Err(Error::ArgumentsBad));
        assert_eq!(store.save(cert(), b""), Err(Error::ArgumentsBad));
        assert_eq!(store.save(b"Nope", b"data"), Err(Error::LabelUnknown));
        assert_eq!(store.max_object_size(cert()), Some(2048));
        assert_eq!(store.max_object_size(b"Nope"), None);
    }

    #[test]
    fn test_provision_certificate_then_read() {
        let store = store(Profile::Colocated);
        let cert_bytes = pattern(812, 0x5A);
        let handle = store.save(cert(), &cert_bytes).unwrap();
        assert_ne!(u64::from(handle), pkcs11::CK_INVALID_HANDLE);

        let value = store.get_value(handle).unwrap();
        assert_eq!(value.len(), 812);
        assert_eq!(value.data(), cert_bytes.as_slice());
        assert!(!value.is_private());
        store.release_value(value);
    }

    #[test]
    fn test_shared_key_pair_privacy() {
        let store = store(Profile::SharedKeyPair);
        let key_bytes = pattern(138, 0x42);
        let hk = store.save(priv_key(), &key_bytes).unwrap();
        assert!(store.get_value(hk).unwrap().is_private());

        let hp = store.find(pub_key()).unwrap();
        assert_ne!(hk, hp);
        let value = store.get_value(hp).unwrap();
        assert_eq!(value.data(), key_bytes.as_slice());
        assert!(!value.is_private());

        // Writing the public key label lands in the same record.
        store.save(pub_key(), b"public").unwrap();
        assert_eq!(store.get_value(hk).unwrap().data(), b"public");
    }

    #[test]
    fn test_invalid_handle() {
        let store = store(Profile::Colocated);
        store.save(cert(), b"cert").unwrap();
        assert_eq!(
            store.get_value(ObjectHandle::INVALID).err(),
            Some(Error::ObjectHandleInvalid)
        );
        assert_eq!(
            store.get_value(ObjectHandle::from(42u64)).err(),
            Some(Error::ObjectHandleInvalid)
        );
        assert_eq!(store.exists(ObjectHandle::INVALID), Err(Error::ObjectHandleInvalid));
        assert_eq!(store.destroy(ObjectHandle::INVALID), Err(Error::ObjectHandleInvalid));
    }

    #[test]
    fn test_destroy_is_noop() {
        let store = store(Profile::Colocated);
        let handle = store.save(cert(), b"cert").unwrap();
        store.destroy(handle).unwrap();
        assert_eq!(store.get_value(handle).unwrap().data(), b"cert");
    }

    #[test]
    fn test_zeroed_object_reads_absent_under_strict_find() {
        let store = store(Profile::Colocated);
        store.save(cert(), b"cert").unwrap();
        store.save(cert(), &[0u8; 4]).unwrap();
        assert_eq!(
            store.find_with_policy(cert(), FindPolicy::RequirePresent),
            Ok(None)
        );
        assert!(store
            .find_with_policy(cert(), FindPolicy::LabelOnly)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_erase_all() {
        let store = store(Profile::Colocated);
        let h1 = store.save(cert(), b"cert").unwrap();
        let h2 = store.save(priv_key(), b"key").unwrap();
        store.erase_all().unwrap();
        assert_eq!(store.exists(h1), Ok(false));
        assert_eq!(store.exists(h2), Ok(false));
    }

    #[test]
    fn test_storage_failure_is_reported() {
        let store = store(Profile::Colocated);
        store.lock().unwrap().flash_mut().inject_erase_fault();
        assert_eq!(
            store.save(cert(), b"cert"),
            Err(Error::StorageError(storage::Error::EraseFailed))
        );
        assert_eq!(
            Error::StorageError(storage::Error::EraseFailed).ck_rv(),
            pkcs11::CKR_DEVICE_ERROR
        );
    }

    #[test]
    fn test_magic_mismatch_reads_absent() {
        let store = store(Profile::Colocated);
        store.save(cert(), b"cert").unwrap();
        let flash = store.into_backend().unwrap().into_inner();

        let format = RecordFormat::new(0x1234_5678, 4).unwrap();
        let store = ObjectStore::new(
            FlashBackend::new(flash),
            LabelSet::default(),
            Layout::for_profile(Profile::Colocated, format, 2048),
        )
        .unwrap();
        let handle = store.find(cert()).unwrap();
        assert_eq!(store.exists(handle), Ok(false));
    }

    #[test]
    fn test_open_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config::Config::default();
        config.store.profile = Profile::PerObject;
        config.store.storage = config::Storage::Files {
            dir: dir.path().to_string_lossy().into_owned(),
        };

        {
            let store = open(&config).unwrap();
            store.save(cert(), b"persisted").unwrap();
        }
        assert!(dir.path().join("FreeRTOS_P11_Certificate.dat").exists());
        let store = open(&config).unwrap();
        let handle = store.find(cert()).unwrap();
        assert_eq!(store.get_value(handle).unwrap().data(), b"persisted");
    }

    #[test]
    fn test_open_flash_image_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config::Config::default();
        config.store.storage = config::Storage::Flash {
            image_path: dir.path().join("flash.bin").to_string_lossy().into_owned(),
            page_size: PAGE_SIZE,
            page_count: 2,
        };
        {
            let store = open(&config).unwrap();
            store.save(priv_key(), b"key").unwrap();
        }
        let store = open(&config).unwrap();
        let value = store.get_value(store.find(priv_key()).unwrap()).unwrap();
        assert_eq!(value.data(), b"key");
        assert!(value.is_private());
    }
}
