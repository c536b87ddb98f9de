// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Direct match-action tables.
//!
//! A direct table binds a match unit to inline action entries and a
//! default entry for misses. Each table owns a single reader-writer
//! lock: the packet path (`lookup`, `apply_action`) and the ageing scan
//! take it for read, every control-plane mutator takes it for write.
//! Per-entry statistics mutate under the read lock through relaxed
//! atomics; see `match_unit`.

use crate::api::ActionEntry;
use crate::api::ByteKey;
use crate::api::CounterDump;
use crate::api::EntryDump;
use crate::api::EntryHandle;
use crate::api::MatchError;
use crate::api::MatchKind;
use crate::api::MatchParam;
use crate::api::MatchResult;
use crate::api::TableDump;
use crate::api::TableUsage;
use crate::engine::key::MatchKeyBuilder;
use crate::engine::match_unit::EntryRecord;
use crate::engine::match_unit::MatchUnit;
use crate::engine::phv::FieldRef;
use crate::engine::phv::FieldSource;
use crate::engine::stat::DirectCounter;
use crate::engine::stat::DirectMeter;
use crate::engine::stat::MeterColor;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::o;
use slog::Logger;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::RwLock;

/// Builds a table: key schema, capacity, action set, and the optional
/// per-entry subsystems. The schema is frozen when the table is built.
pub struct TableBuilder {
    pub(crate) name: String,
    pub(crate) log: Logger,
    pub(crate) key: MatchKeyBuilder,
    pub(crate) size: u32,
    pub(crate) actions: BTreeSet<String>,
    pub(crate) with_counters: bool,
    pub(crate) with_ageing: bool,
    pub(crate) const_default_action: Option<String>,
}

impl TableBuilder {
    pub fn new(name: &str, size: u32, log: &Logger) -> Self {
        let log = log.new(o!("table" => name.to_string()));
        Self {
            name: name.to_string(),
            log,
            key: MatchKeyBuilder::new(),
            size,
            actions: BTreeSet::new(),
            with_counters: false,
            with_ageing: false,
            const_default_action: None,
        }
    }

    /// Declare one match field, in control-plane parameter order.
    pub fn match_field(
        &mut self,
        source: FieldRef,
        bit_width: u32,
        kind: MatchKind,
        name: &str,
    ) -> &mut Self {
        self.key.push_back_field(source, bit_width, kind, name);
        self
    }

    /// Declare a field matched on a sub-range of its bits.
    pub fn match_field_masked(
        &mut self,
        source: FieldRef,
        bit_width: u32,
        kind: MatchKind,
        mask: ByteKey,
        name: &str,
    ) -> &mut Self {
        self.key.push_back_field_masked(source, bit_width, kind, mask, name);
        self
    }

    /// Permit an action name; entries naming anything else are
    /// rejected.
    pub fn action(&mut self, name: &str) -> &mut Self {
        self.actions.insert(name.to_string());
        self
    }

    /// Enable per-entry hit counters.
    pub fn counters(&mut self) -> &mut Self {
        self.with_counters = true;
        self
    }

    /// Enable per-entry TTL ageing.
    pub fn ageing(&mut self) -> &mut Self {
        self.with_ageing = true;
        self
    }

    /// Pin the default entry's action to `name`. The entry's arguments
    /// may still change unless the entry itself is marked const.
    pub fn const_default_action(&mut self, name: &str) -> &mut Self {
        self.const_default_action = Some(name.to_string());
        self
    }

    /// Build a direct table.
    pub fn build(mut self) -> Table {
        self.key.build();
        let key = Arc::new(self.key);
        let kind = key.kind();
        debug!(self.log, "created table"; "kind" => %kind, "size" => self.size);

        Table {
            name: self.name,
            kind,
            log: self.log,
            state: RwLock::new(DirectState {
                unit: MatchUnit::new(key, self.size),
                actions: self.actions,
                default_entry: None,
                default_entry_const: false,
                const_default_action: self.const_default_action,
                with_counters: self.with_counters,
                with_ageing: self.with_ageing,
                meter: None,
                counter: None,
                usage: TableUsage::new(self.size),
            }),
        }
    }
}

struct DirectState {
    unit: MatchUnit<Arc<ActionEntry>>,
    actions: BTreeSet<String>,
    default_entry: Option<Arc<ActionEntry>>,
    default_entry_const: bool,
    const_default_action: Option<String>,
    with_counters: bool,
    with_ageing: bool,
    meter: Option<Arc<dyn DirectMeter>>,
    counter: Option<Arc<dyn DirectCounter>>,
    usage: TableUsage,
}

impl DirectState {
    fn check_action(&self, action: &ActionEntry) -> MatchResult<()> {
        if self.actions.contains(&action.action.name) {
            Ok(())
        } else {
            Err(MatchError::InvalidActionName)
        }
    }
}

/// The outcome of running a packet through a table.
#[derive(Clone, Debug)]
pub struct ApplyResult {
    pub hit: bool,
    pub handle: Option<EntryHandle>,
    /// The resolved action entry; `None` on a miss with no default.
    pub action: Option<Arc<ActionEntry>>,
    pub meter_color: Option<MeterColor>,
}

// Header line of a table's persisted form.
#[derive(Deserialize, Serialize)]
struct TableHeader {
    name: String,
    kind: MatchKind,
    default_entry: Option<ActionEntry>,
    default_entry_const: bool,
}

/// A direct match-action table.
pub struct Table {
    name: String,
    kind: MatchKind,
    log: Logger,
    state: RwLock<DirectState>,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    pub fn usage(&self) -> TableUsage {
        let state = self.state.read().unwrap();
        let mut usage = state.usage.clone();
        usage.occupancy = state.unit.occupancy();
        usage
    }

    /// The hot-path classification: hit or miss plus the stored value.
    pub fn lookup(
        &self,
        pkt: &dyn FieldSource,
    ) -> Option<(EntryHandle, Arc<ActionEntry>)> {
        self.state.read().unwrap().unit.lookup(pkt)
    }

    /// Classify a packet and resolve the action to execute: the hit
    /// entry's action (after driving the attached meter and counter),
    /// or the default entry on a miss.
    pub fn apply_action(&self, pkt: &dyn FieldSource) -> ApplyResult {
        let state = self.state.read().unwrap();

        match state.unit.lookup(pkt) {
            Some((hdl, action)) => {
                if let Some(counter) = &state.counter {
                    counter.increment(hdl, pkt.packet_len() as u64);
                }
                let meter_color =
                    state.meter.as_ref().map(|m| m.execute(hdl, pkt));
                ApplyResult {
                    hit: true,
                    handle: Some(hdl),
                    action: Some(action),
                    meter_color,
                }
            }
            None => ApplyResult {
                hit: false,
                handle: None,
                action: state.default_entry.clone(),
                meter_color: None,
            },
        }
    }

    pub fn add_entry(
        &self,
        params: &[MatchParam],
        action: ActionEntry,
        priority: i32,
    ) -> MatchResult<EntryHandle> {
        let mut state = self.state.write().unwrap();
        state.check_action(&action)?;

        match state.unit.add_entry(params, Arc::new(action), priority) {
            Ok(hdl) => {
                state.usage.inserts += 1;
                debug!(self.log, "added entry {}", hdl);
                Ok(hdl)
            }
            Err(e) => {
                match e {
                    MatchError::DuplicateEntry => state.usage.collisions += 1,
                    MatchError::TableFull => state.usage.exhaustion += 1,
                    _ => (),
                }
                Err(e)
            }
        }
    }

    pub fn delete_entry(&self, hdl: EntryHandle) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        state.unit.delete_entry(hdl)?;
        state.usage.deletes += 1;
        debug!(self.log, "deleted entry {}", hdl);
        Ok(())
    }

    pub fn modify_entry(
        &self,
        hdl: EntryHandle,
        action: ActionEntry,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        state.check_action(&action)?;
        state.unit.modify_entry(hdl, Arc::new(action))?;
        state.usage.updates += 1;
        debug!(self.log, "modified entry {}", hdl);
        Ok(())
    }

    pub fn get_entry(
        &self,
        hdl: EntryHandle,
    ) -> MatchResult<EntryDump<Arc<ActionEntry>>> {
        self.state.read().unwrap().unit.get_entry(hdl)
    }

    pub fn get_entry_from_key(
        &self,
        params: &[MatchParam],
        priority: i32,
    ) -> MatchResult<EntryHandle> {
        self.state.read().unwrap().unit.get_entry_from_key(params, priority)
    }

    pub fn get_entries(&self) -> Vec<EntryDump<Arc<ActionEntry>>> {
        self.state.read().unwrap().unit.get_entries()
    }

    /// Set the entry returned on a miss. `make_const` freezes it for
    /// good.
    pub fn set_default_action(
        &self,
        action: ActionEntry,
        make_const: bool,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        if state.default_entry_const {
            return Err(MatchError::DefaultEntryIsConst);
        }
        if let Some(name) = &state.const_default_action {
            if *name != action.action.name {
                return Err(MatchError::DefaultActionIsConst);
            }
        }
        state.check_action(&action)?;

        debug!(self.log, "set default action {}", action);
        state.default_entry = Some(Arc::new(action));
        state.default_entry_const = make_const;
        Ok(())
    }

    pub fn default_entry(&self) -> MatchResult<Arc<ActionEntry>> {
        self.state
            .read()
            .unwrap()
            .default_entry
            .clone()
            .ok_or(MatchError::NoDefaultEntry)
    }

    pub fn reset_default_entry(&self) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        if state.default_entry_const {
            return Err(MatchError::DefaultEntryIsConst);
        }
        state.default_entry = None;
        Ok(())
    }

    pub fn set_entry_ttl(
        &self,
        hdl: EntryHandle,
        ttl_ms: u64,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.with_ageing {
            return Err(MatchError::AgeingDisabled);
        }
        state.unit.set_ttl(hdl, ttl_ms)
    }

    /// Flag expired entries for the ageing thread. The scan holds only
    /// the read lock; the caller deletes the returned handles in its
    /// own write pass.
    pub fn sweep_entries(&self) -> MatchResult<Vec<EntryHandle>> {
        let state = self.state.read().unwrap();
        if !state.with_ageing {
            return Err(MatchError::AgeingDisabled);
        }
        Ok(state.unit.sweep())
    }

    pub fn read_counters(&self, hdl: EntryHandle) -> MatchResult<CounterDump> {
        let state = self.state.read().unwrap();
        if !state.with_counters {
            return Err(MatchError::CountersDisabled);
        }
        state.unit.counters(hdl)
    }

    pub fn reset_counters(&self, hdl: EntryHandle) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.with_counters {
            return Err(MatchError::CountersDisabled);
        }
        state.unit.reset_counters(hdl)
    }

    /// Attach the external counter collaborator driven on every hit.
    pub fn attach_counter(
        &self,
        counter: Arc<dyn DirectCounter>,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.with_counters {
            return Err(MatchError::CountersDisabled);
        }
        state.counter = Some(counter);
        Ok(())
    }

    /// Attach the meter collaborator driven on every hit. A table has
    /// at most one.
    pub fn attach_meter(&self, meter: Arc<dyn DirectMeter>) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        if state.meter.is_some() {
            return Err(MatchError::InvalidMeterOperation);
        }
        state.meter = Some(meter);
        Ok(())
    }

    pub fn execute_meter(
        &self,
        hdl: EntryHandle,
        pkt: &dyn FieldSource,
    ) -> MatchResult<MeterColor> {
        let state = self.state.read().unwrap();
        // Validate the handle even though the meter owns the state.
        let _ = state.unit.get_value(hdl)?;
        match &state.meter {
            Some(meter) => Ok(meter.execute(hdl, pkt)),
            None => Err(MatchError::MetersDisabled),
        }
    }

    /// A full introspection view: usage, default entry, and every live
    /// entry read back into original parameter order.
    pub fn dump(&self) -> TableDump<ActionEntry> {
        let state = self.state.read().unwrap();
        let mut usage = state.usage.clone();
        usage.occupancy = state.unit.occupancy();

        TableDump {
            name: self.name.clone(),
            kind: self.kind,
            usage,
            default_entry: state.default_entry.as_deref().cloned(),
            entries: state
                .unit
                .get_entries()
                .into_iter()
                .map(|e| EntryDump {
                    handle: e.handle,
                    params: e.params,
                    priority: e.priority,
                    ttl_ms: e.ttl_ms,
                    value: (*e.value).clone(),
                })
                .collect(),
        }
    }

    /// Write the persisted form: a header line, the live-entry count,
    /// then one record per live slot in slot order.
    pub fn serialize(&self) -> String {
        let state = self.state.read().unwrap();
        let header = TableHeader {
            name: self.name.clone(),
            kind: self.kind,
            default_entry: state.default_entry.as_deref().cloned(),
            default_entry_const: state.default_entry_const,
        };

        let mut out = String::new();
        out.push_str(&serde_json::to_string(&header).expect("header json"));
        out.push('\n');

        let records = state.unit.snapshot();
        out.push_str(&format!("{}\n", records.len()));
        for rec in &records {
            out.push_str(&serde_json::to_string(rec).expect("record json"));
            out.push('\n');
        }
        out
    }

    /// Rebuild state from a persisted form, reconstructing identical
    /// handles and repopulating the lookup structure.
    pub fn deserialize(&self, dump: &str) -> MatchResult<()> {
        self.deserialize_lines(&mut dump.lines())
    }

    pub(crate) fn deserialize_lines(
        &self,
        lines: &mut std::str::Lines<'_>,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();

        let header: TableHeader = lines
            .next()
            .and_then(|l| serde_json::from_str(l).ok())
            .ok_or(MatchError::Error)?;
        if header.name != self.name || header.kind != self.kind {
            return Err(MatchError::Error);
        }

        let count: usize = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or(MatchError::Error)?;

        state.unit.reset();
        state.default_entry = header.default_entry.map(Arc::new);
        state.default_entry_const = header.default_entry_const;

        for _ in 0..count {
            let rec: EntryRecord<Arc<ActionEntry>> = lines
                .next()
                .and_then(|l| serde_json::from_str(l).ok())
                .ok_or(MatchError::Error)?;
            state.unit.restore(rec)?;
        }

        state.usage.occupancy = state.unit.occupancy();
        debug!(self.log, "restored {} entries", count);
        Ok(())
    }

    /// Drop all entries and the default entry.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        state.unit.reset();
        state.default_entry = None;
        state.default_entry_const = false;
        state.usage = TableUsage::new(state.unit.capacity());
    }
}
