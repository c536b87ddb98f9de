// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Control-plane result and dump types.

use crate::action::ActionEntry;
use crate::handle::EntryHandle;
use crate::handle::GroupHandle;
use crate::handle::MemberHandle;
use crate::params::MatchKind;
use crate::params::MatchParam;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// The error returned by every control-plane operation.
///
/// This is a deliberately flat enumeration: callers switch on the code,
/// and the codes travel across the control-plane boundary unchanged. A
/// failed mutator leaves the table untouched. A lookup miss is not an
/// error.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Error, PartialEq, Serialize,
)]
pub enum MatchError {
    #[error("table is at max capacity")]
    TableFull,
    #[error("invalid entry handle")]
    InvalidHandle,
    #[error("expired entry handle")]
    ExpiredHandle,
    #[error("counters are not enabled for this table")]
    CountersDisabled,
    #[error("no meter is attached to this table")]
    MetersDisabled,
    #[error("ageing is not enabled for this table")]
    AgeingDisabled,
    #[error("no table registered under that name")]
    InvalidTableName,
    #[error("action is not in the table's action set")]
    InvalidActionName,
    #[error("operation not supported by this table type")]
    WrongTableType,
    #[error("invalid member handle")]
    InvalidMbrHandle,
    #[error("member is still referenced")]
    MbrStillUsed,
    #[error("member is already in the group")]
    MbrAlreadyInGrp,
    #[error("member is not in the group")]
    MbrNotInGrp,
    #[error("invalid group handle")]
    InvalidGrpHandle,
    #[error("group is still referenced")]
    GrpStillUsed,
    #[error("group has no members")]
    EmptyGrp,
    #[error("an entry with that key already exists")]
    DuplicateEntry,
    #[error("match parameters do not fit the table's key schema")]
    BadMatchKey,
    #[error("invalid meter operation")]
    InvalidMeterOperation,
    #[error("the default action is const")]
    DefaultActionIsConst,
    #[error("the default entry is const")]
    DefaultEntryIsConst,
    #[error("the table has no default entry")]
    NoDefaultEntry,
    #[error("unspecified error")]
    Error,
}

pub type MatchResult<T> = Result<T, MatchError>;

/// Capacity and usage statistics for one table.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TableUsage {
    /// Maximum number of entries in the table.
    pub size: u32,
    /// Current number of entries in the table.
    pub occupancy: u32,
    /// Total number of entries inserted over time.
    pub inserts: u64,
    /// Total number of entries deleted over time.
    pub deletes: u64,
    /// Number of entries updated in place over time.
    pub updates: u64,
    /// Number of inserts rejected as duplicates.
    pub collisions: u64,
    /// Number of inserts that failed due to space exhaustion.
    pub exhaustion: u64,
}

impl TableUsage {
    pub fn new(size: u32) -> Self {
        Self { size, ..Default::default() }
    }
}

/// Per-entry counter state.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct CounterDump {
    pub bytes: u64,
    pub packets: u64,
}

/// One table entry, reconstructed into original parameter order.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EntryDump<V> {
    pub handle: EntryHandle,
    pub params: Vec<MatchParam>,
    pub priority: i32,
    /// Time to live in milliseconds; 0 means the entry does not age.
    pub ttl_ms: u64,
    pub value: V,
}

/// A whole-table view for introspection.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TableDump<V> {
    pub name: String,
    pub kind: MatchKind,
    pub usage: TableUsage,
    pub default_entry: Option<V>,
    pub entries: Vec<EntryDump<V>>,
}

/// One member of an indirect table's action pool.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MemberDump {
    pub handle: MemberHandle,
    pub action: ActionEntry,
    /// Table rows and group containments currently pointing at this
    /// member.
    pub ref_count: u32,
}

/// One selector group.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GroupDump {
    pub handle: GroupHandle,
    /// Members in selection order.
    pub members: Vec<MemberHandle>,
    /// Table rows currently pointing at this group.
    pub ref_count: u32,
}
