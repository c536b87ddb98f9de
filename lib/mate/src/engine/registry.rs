// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Name-to-table dispatch.
//!
//! Control-plane transports address tables by name. The registry maps
//! names to the right table flavor, rejecting a lookup through the
//! wrong one, and snapshots or restores every registered table in one
//! pass.

use crate::api::MatchError;
use crate::api::MatchResult;
use crate::engine::indirect::IndirectTable;
use crate::engine::table::Table;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::Logger;
use std::collections::BTreeMap;

pub enum TableVariant {
    Direct(Table),
    Indirect(IndirectTable),
}

impl TableVariant {
    pub fn name(&self) -> &str {
        match self {
            Self::Direct(t) => t.name(),
            Self::Indirect(t) => t.name(),
        }
    }
}

#[derive(Deserialize, Serialize)]
struct RegistryHeader {
    tables: Vec<String>,
}

/// All tables of one packet-processing pipeline, keyed by name.
pub struct TableRegistry {
    log: Logger,
    tables: BTreeMap<String, TableVariant>,
}

impl TableRegistry {
    pub fn new(log: &Logger) -> Self {
        Self { log: log.clone(), tables: BTreeMap::new() }
    }

    pub fn add(&mut self, table: TableVariant) -> MatchResult<()> {
        let name = table.name().to_string();
        if self.tables.contains_key(&name) {
            return Err(MatchError::Error);
        }
        debug!(self.log, "registered table {}", name);
        self.tables.insert(name, table);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> MatchResult<&TableVariant> {
        self.tables.get(name).ok_or(MatchError::InvalidTableName)
    }

    /// The direct table registered under `name`.
    pub fn direct(&self, name: &str) -> MatchResult<&Table> {
        match self.get(name)? {
            TableVariant::Direct(t) => Ok(t),
            TableVariant::Indirect(_) => Err(MatchError::WrongTableType),
        }
    }

    /// The indirect table registered under `name`, with or without
    /// selection support.
    pub fn indirect(&self, name: &str) -> MatchResult<&IndirectTable> {
        match self.get(name)? {
            TableVariant::Indirect(t) => Ok(t),
            TableVariant::Direct(_) => Err(MatchError::WrongTableType),
        }
    }

    /// The indirect-with-selection table registered under `name`.
    pub fn selector(&self, name: &str) -> MatchResult<&IndirectTable> {
        let table = self.indirect(name)?;
        if !table.is_ws() {
            return Err(MatchError::WrongTableType);
        }
        Ok(table)
    }

    /// Snapshot every table: a header naming them in order, then each
    /// table's persisted form.
    pub fn save(&self) -> String {
        let header =
            RegistryHeader { tables: self.tables.keys().cloned().collect() };

        let mut out = String::new();
        out.push_str(&serde_json::to_string(&header).expect("header json"));
        out.push('\n');
        for table in self.tables.values() {
            match table {
                TableVariant::Direct(t) => out.push_str(&t.serialize()),
                TableVariant::Indirect(t) => out.push_str(&t.serialize()),
            }
        }
        out
    }

    /// Restore every table from a [`save()`](Self::save) dump. The set
    /// of registered tables must match the dump.
    pub fn load(&self, dump: &str) -> MatchResult<()> {
        let mut lines = dump.lines();
        let header: RegistryHeader = lines
            .next()
            .and_then(|l| serde_json::from_str(l).ok())
            .ok_or(MatchError::Error)?;

        if header.tables != self.names() {
            return Err(MatchError::Error);
        }

        for name in &header.tables {
            match self.get(name)? {
                TableVariant::Direct(t) => t.deserialize_lines(&mut lines)?,
                TableVariant::Indirect(t) => {
                    t.deserialize_lines(&mut lines)?
                }
            }
        }

        debug!(self.log, "restored {} tables", header.tables.len());
        Ok(())
    }

    /// Clear every table.
    pub fn reset(&self) {
        for table in self.tables.values() {
            match table {
                TableVariant::Direct(t) => t.reset(),
                TableVariant::Indirect(t) => t.reset(),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::ActionEntry;
    use crate::api::ActionSpec;
    use crate::api::ByteKey;
    use crate::api::MatchKind;
    use crate::api::MatchParam;
    use crate::api::NO_PRIORITY;
    use crate::engine::key::MatchKeyBuilder;
    use crate::engine::phv::FieldRef;
    use crate::engine::table::TableBuilder;
    use crate::engine::test_logger;

    fn registry() -> (TableRegistry, slog::Logger) {
        let log = test_logger();
        let mut reg = TableRegistry::new(&log);

        let mut tb = TableBuilder::new("acl", 8, &log);
        tb.match_field(FieldRef::new(0, 0), 32, MatchKind::Ternary, "src");
        tb.action("drop");
        reg.add(TableVariant::Direct(tb.build())).unwrap();

        let mut tb = TableBuilder::new("route", 8, &log);
        tb.match_field(FieldRef::new(0, 1), 32, MatchKind::Lpm, "dst");
        tb.action("set_nhop");
        let mut skey = MatchKeyBuilder::new();
        skey.push_back_field(FieldRef::new(0, 0), 32, MatchKind::Exact, "src");
        let ws = tb.build_selector(8, 4, skey, Some("crc32")).unwrap();
        reg.add(TableVariant::Indirect(ws)).unwrap();

        (reg, log)
    }

    #[test]
    fn dispatch_by_name_and_type() {
        let (reg, _log) = registry();

        assert!(reg.direct("acl").is_ok());
        assert!(reg.indirect("route").is_ok());
        assert!(reg.selector("route").is_ok());

        assert_eq!(
            reg.direct("route").err(),
            Some(MatchError::WrongTableType)
        );
        assert_eq!(
            reg.indirect("acl").err(),
            Some(MatchError::WrongTableType)
        );
        assert_eq!(
            reg.direct("nat").err(),
            Some(MatchError::InvalidTableName)
        );
        assert_eq!(reg.names(), vec!["acl".to_string(), "route".to_string()]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let (mut reg, log) = registry();
        let mut tb = TableBuilder::new("acl", 8, &log);
        tb.match_field(FieldRef::new(0, 0), 32, MatchKind::Exact, "src");
        assert_eq!(
            reg.add(TableVariant::Direct(tb.build())),
            Err(MatchError::Error)
        );
    }

    #[test]
    fn save_load_round_trip() {
        let (reg, _log) = registry();

        reg.direct("acl")
            .unwrap()
            .add_entry(
                &[MatchParam::Ternary {
                    key: ByteKey::from([10, 0, 0, 0]),
                    mask: ByteKey::from([0xff, 0, 0, 0]),
                }],
                ActionEntry::new(ActionSpec::nullary("drop"), None),
                7,
            )
            .unwrap();

        let route = reg.selector("route").unwrap();
        let m = route
            .add_member(ActionEntry::new(
                ActionSpec::new("set_nhop", vec![ByteKey::from([1, 2, 3, 4])]),
                None,
            ))
            .unwrap();
        route
            .add_entry(
                &[MatchParam::Lpm {
                    key: ByteKey::from([10, 0, 0, 0]),
                    prefix_len: 8,
                }],
                m,
                NO_PRIORITY,
            )
            .unwrap();

        let dump = reg.save();
        reg.reset();
        reg.load(&dump).unwrap();
        assert_eq!(reg.save(), dump);

        assert_eq!(reg.direct("acl").unwrap().usage().occupancy, 1);
        assert_eq!(
            reg.selector("route").unwrap().get_member(m).unwrap().ref_count,
            1
        );
    }
}
