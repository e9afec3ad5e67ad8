// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod device;
pub mod mech;
pub mod session;
pub mod slot;
pub mod token;

pub use device::Device;
pub use mech::Mechanism;
pub use session::Session;
pub use slot::Slot;
pub use token::Token;
