// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Counter and meter collaborators.
//!
//! The counter, meter, and ageing subsystems live outside the table
//! engine. The engine drives them through these traits, keyed strictly
//! by entry handle; what they do with the handle is their business.

use crate::api::EntryHandle;
use crate::engine::phv::FieldSource;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The color a meter assigns to a packet.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum MeterColor {
    Green,
    Yellow,
    Red,
}

impl Display for MeterColor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        };
        write!(f, "{}", s)
    }
}

/// A direct counter attached to a table; incremented on every hit.
pub trait DirectCounter: Send + Sync {
    fn increment(&self, hdl: EntryHandle, bytes: u64);
}

/// A direct meter attached to a table; executed on every hit.
pub trait DirectMeter: Send + Sync {
    fn execute(&self, hdl: EntryHandle, pkt: &dyn FieldSource) -> MeterColor;
}
