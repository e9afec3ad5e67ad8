// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use p11pal_common::config::{self, Profile};

use super::role::ObjectRole;
use super::{Error, Result};
use crate::storage::{RegionId, StorageBackend};

/// Size of the little-endian `size: u32` record field.
const SIZE_FIELD_LEN: usize = 4;

/// Record header format: `{ magic, size: u32 }`, both little-endian.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecordFormat {
    pub magic: u64,
    pub magic_width: usize,
}

impl RecordFormat {
    pub fn new(magic: u64, magic_width: usize) -> Result<Self> {
        let erased = match magic_width {
            4 => u32::MAX as u64,
            8 => u64::MAX,
            _ => return Err(Error::LayoutInvalid("magic width must be 4 or 8")),
        };
        if magic > erased {
            return Err(Error::LayoutInvalid("magic does not fit its width"));
        }
        // A magic equal to the erase pattern would make blank flash look provisioned.
        if magic == erased {
            return Err(Error::LayoutInvalid("magic equals the erase pattern"));
        }
        Ok(Self { magic, magic_width })
    }

    pub fn header_len(&self) -> usize {
        self.magic_width + SIZE_FIELD_LEN
    }
}

/// Where one object record lives: `capacity` is the largest payload the slot accepts,
/// the record itself spans `header_len() + capacity` bytes from `offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Slot {
    pub region: RegionId,
    pub offset: usize,
    pub capacity: usize,
}

#[derive(Clone, Debug)]
pub struct Layout {
    slots: [Slot; ObjectRole::COUNT],
    format: RecordFormat,
    profile: Profile,
}

impl Layout {
    /// Build the slot table for a storage profile.
    ///
    /// * `Colocated`: every record packed back to back in region 0.
    /// * `PerObject`: one region per role, in role order.
    /// * `SharedKeyPair`: as `PerObject`, but the device private and public keys alias
    ///   one record in region 1, leaving 4 regions in use.
    pub fn for_profile(profile: Profile, format: RecordFormat, max_object_size: usize) -> Self {
        let record_len = format.header_len() + max_object_size;
        let slot = |region, offset| Slot {
            region,
            offset,
            capacity: max_object_size,
        };
        let slots = match profile {
            Profile::Colocated => [
                slot(0, 0),
                slot(0, record_len),
                slot(0, 2 * record_len),
                slot(0, 3 * record_len),
                slot(0, 4 * record_len),
            ],
            Profile::PerObject => [slot(0, 0), slot(1, 0), slot(2, 0), slot(3, 0), slot(4, 0)],
            Profile::SharedKeyPair => [slot(0, 0), slot(1, 0), slot(1, 0), slot(2, 0), slot(3, 0)],
        };
        Self {
            slots,
            format,
            profile,
        }
    }

    pub fn from_config(store: &config::Store) -> Result<Self> {
        let format = RecordFormat::new(store.magic, store.magic_width as usize)?;
        Ok(Self::for_profile(
            store.profile,
            format,
            store.max_object_size,
        ))
    }

    /// Number of regions the profile needs, and the minimum length of each.
    pub fn region_requirements(&self) -> Vec<usize> {
        let count = self.slots.iter().map(|s| s.region + 1).max().unwrap_or(0);
        let mut lens = vec![0usize; count];
        for slot in self.slots.iter() {
            let end = slot.offset + self.record_len(slot);
            if lens[slot.region] < end {
                lens[slot.region] = end;
            }
        }
        lens
    }

    pub fn slot(&self, role: ObjectRole) -> &Slot {
        &self.slots[role.index()]
    }

    pub fn format(&self) -> &RecordFormat {
        &self.format
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn record_len(&self, slot: &Slot) -> usize {
        self.format.header_len() + slot.capacity
    }

    /// The device key pair alias, present only for the `SharedKeyPair` profile.
    pub fn is_declared_alias(&self, a: ObjectRole, b: ObjectRole) -> bool {
        let pair = |x, y| {
            x == ObjectRole::DevicePrivateKey && y == ObjectRole::DevicePublicKey
        };
        self.profile == Profile::SharedKeyPair && (pair(a, b) || pair(b, a))
    }

    /// Check the slot table against the backend geometry. Overlapping slots are an error,
    /// except for the declared key pair alias.
    pub fn validate<B: StorageBackend + ?Sized>(&self, backend: &B) -> Result<()> {
        for role in ObjectRole::ALL.iter() {
            let slot = self.slot(*role);
            if slot.capacity == 0 {
                return Err(Error::LayoutInvalid("zero slot capacity"));
            }
            let region_len = backend
                .region_len(slot.region)
                .map_err(|_| Error::LayoutInvalid("slot region does not exist"))?;
            let end = slot
                .offset
                .checked_add(self.record_len(slot))
                .ok_or(Error::LayoutInvalid("slot end overflows"))?;
            if end > region_len {
                return Err(Error::LayoutInvalid("slot does not fit its region"));
            }
        }

        for (i, a) in ObjectRole::ALL.iter().enumerate() {
            for b in ObjectRole::ALL[i + 1..].iter() {
                let (sa, sb) = (self.slot(*a), self.slot(*b));
                if sa.region != sb.region {
                    continue;
                }
                let overlap = sa.offset < sb.offset + self.record_len(sb)
                    && sb.offset < sa.offset + self.record_len(sa);
                if !overlap {
                    continue;
                }
                if !(self.is_declared_alias(*a, *b) && sa == sb) {
                    return Err(Error::LayoutInvalid("overlapping object slots"));
                }
            }
        }
        Ok(())
    }
}
