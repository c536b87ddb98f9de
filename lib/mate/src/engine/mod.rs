// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The match-action table engine.
//!
//! Control-plane callers install rules (match parameters bound to an
//! action, a member, or a group) into tables; the per-packet path
//! classifies packets against them and gets back the action to run.
//! Dependency order, leaves first: key builder, match unit, direct
//! table, indirect table, indirect table with selection.

pub mod hash;
pub mod indirect;
pub mod key;
pub mod match_unit;
pub mod phv;
pub mod registry;
pub mod stat;
pub mod table;

#[cfg(test)]
pub(crate) fn test_logger() -> slog::Logger {
    use slog::Drain;

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}
