// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Action entries bound to table rows and members.

use crate::bytes::ByteKey;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// An action plus its bound argument data.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ActionSpec {
    /// Name of the action, as declared in the table's action set.
    pub name: String,
    /// Argument data, one byte string per declared parameter.
    pub args: Vec<ByteKey>,
}

impl ActionSpec {
    pub fn new(name: &str, args: Vec<ByteKey>) -> Self {
        Self { name: name.to_string(), args }
    }

    /// An action taking no arguments.
    pub fn nullary(name: &str) -> Self {
        Self { name: name.to_string(), args: vec![] }
    }
}

impl Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// The value resolved by a table hit: the action to execute and the
/// control node to hand the packet to next. `next_node` is a name
/// resolved by the pipeline layer; `None` marks the end of the pipeline.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ActionEntry {
    pub action: ActionSpec,
    pub next_node: Option<String>,
}

impl ActionEntry {
    pub fn new(action: ActionSpec, next_node: Option<&str>) -> Self {
        Self { action, next_node: next_node.map(str::to_string) }
    }
}

impl Display for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.next_node {
            Some(next) => write!(f, "{} -> {}", self.action, next),
            None => write!(f, "{} -> end", self.action),
        }
    }
}
