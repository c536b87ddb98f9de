// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! MATE is the match-action table engine of a software
//! packet-processing runtime: it classifies parsed packets against
//! programmer-installed rules (exact, longest-prefix, ternary, range)
//! and resolves the action to execute, including indirect references to
//! shared action members and weighted selector groups.
//!
//! Packet parsing, the control-plane transport, and the full
//! counter/meter/ageing subsystems live outside this crate; the engine
//! consumes them through the narrow interfaces in [`engine::phv`] and
//! [`engine::stat`].

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod api;
pub mod engine;
pub mod time;
