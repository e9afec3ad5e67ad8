// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::Result;

/// Board hooks needed by the OTA PAL.
pub trait Platform {
    /// Reset into the bootloader, which picks up a newly staged image. On hardware this
    /// does not return.
    fn reset_device(&mut self) -> Result<()>;

    /// Called once the running image has been committed.
    fn disable_watchdog(&mut self) {}
}
