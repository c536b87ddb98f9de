// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types crossing the control-plane boundary of the match-action table
//! engine: handles, match parameters, action entries, error codes, and
//! dump views. Everything here is serde-serializable; these types appear
//! in persisted snapshots and must stay wire-stable.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod action;
pub mod bytes;
pub mod cmd;
pub mod handle;
pub mod params;

pub use action::*;
pub use bytes::*;
pub use cmd::*;
pub use handle::*;
pub use params::*;
