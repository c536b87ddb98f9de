// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Indirect tables: rows reference shared action objects (members)
//! instead of storing actions inline, and optionally selector groups of
//! members with hash-based selection.
//!
//! Members and groups are pooled with their own versioned handle
//! spaces. A member's reference count tracks the table rows and group
//! containments pointing at it; a group's tracks the rows bound to it.
//! Deletion is refused while a reference count is non-zero, which is
//! both necessary and sufficient for safe ordering since rows hold
//! handles, never pointers.

use crate::api::ActionEntry;
use crate::api::CounterDump;
use crate::api::EntryDump;
use crate::api::EntryHandle;
use crate::api::GroupDump;
use crate::api::GroupHandle;
use crate::api::IndirectIndex;
use crate::api::MatchError;
use crate::api::MatchKind;
use crate::api::MatchParam;
use crate::api::MatchResult;
use crate::api::MemberDump;
use crate::api::MemberHandle;
use crate::api::TableDump;
use crate::api::TableUsage;
use crate::engine::hash;
use crate::engine::hash::SelectionHash;
use crate::engine::key::MatchKeyBuilder;
use crate::engine::match_unit::EntryRecord;
use crate::engine::match_unit::EntryStore;
use crate::engine::match_unit::HandleError;
use crate::engine::match_unit::MatchUnit;
use crate::engine::phv::FieldSource;
use crate::engine::table::ApplyResult;
use crate::engine::table::TableBuilder;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::error;
use slog::Logger;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::RwLock;

struct Member {
    action: Arc<ActionEntry>,
    ref_count: u32,
}

#[derive(Deserialize, Serialize)]
struct MemberRecord {
    hdl: u32,
    action: ActionEntry,
}

struct MemberPool {
    store: EntryStore<Member>,
}

impl MemberPool {
    fn new(size: u32) -> Self {
        Self { store: EntryStore::new(size) }
    }

    fn check(&self, hdl: MemberHandle) -> MatchResult<u32> {
        match self.store.check(hdl.index(), hdl.version()) {
            Ok(()) => Ok(hdl.index()),
            Err(HandleError::Invalid) | Err(HandleError::Expired) => {
                Err(MatchError::InvalidMbrHandle)
            }
        }
    }

    fn handle(&self, idx: u32) -> MemberHandle {
        MemberHandle::new(idx, self.store.version(idx))
    }

    fn add(&mut self, action: Arc<ActionEntry>) -> MatchResult<MemberHandle> {
        let idx = self
            .store
            .alloc(Member { action, ref_count: 0 })
            .ok_or(MatchError::TableFull)?;
        Ok(self.handle(idx))
    }

    fn delete(&mut self, hdl: MemberHandle) -> MatchResult<()> {
        let idx = self.check(hdl)?;
        if self.store.get(idx).expect("checked slot").ref_count > 0 {
            return Err(MatchError::MbrStillUsed);
        }
        let _ = self.store.free_slot(idx);
        Ok(())
    }

    fn modify(
        &mut self,
        hdl: MemberHandle,
        action: Arc<ActionEntry>,
    ) -> MatchResult<()> {
        let idx = self.check(hdl)?;
        self.store.get_mut(idx).expect("checked slot").action = action;
        Ok(())
    }

    fn action(&self, hdl: MemberHandle) -> MatchResult<Arc<ActionEntry>> {
        let idx = self.check(hdl)?;
        Ok(self.store.get(idx).expect("checked slot").action.clone())
    }

    fn ref_inc(&mut self, hdl: MemberHandle) {
        let member =
            self.store.get_mut(hdl.index()).expect("referenced member");
        member.ref_count += 1;
    }

    fn ref_dec(&mut self, hdl: MemberHandle) {
        let member =
            self.store.get_mut(hdl.index()).expect("referenced member");
        assert!(member.ref_count > 0, "member ref-count underflow");
        member.ref_count -= 1;
    }

    fn dump(&self, hdl: MemberHandle) -> MatchResult<MemberDump> {
        let idx = self.check(hdl)?;
        let member = self.store.get(idx).expect("checked slot");
        Ok(MemberDump {
            handle: hdl,
            action: (*member.action).clone(),
            ref_count: member.ref_count,
        })
    }

    fn dump_all(&self) -> Vec<MemberDump> {
        self.store
            .live()
            .map(|(idx, member)| MemberDump {
                handle: self.handle(idx),
                action: (*member.action).clone(),
                ref_count: member.ref_count,
            })
            .collect()
    }

    fn snapshot(&self) -> Vec<MemberRecord> {
        self.store
            .live()
            .map(|(idx, member)| MemberRecord {
                hdl: self.handle(idx).raw(),
                action: (*member.action).clone(),
            })
            .collect()
    }

    fn restore(&mut self, rec: MemberRecord) -> MatchResult<()> {
        let hdl = MemberHandle::from_raw(rec.hdl);
        self.store.restore(
            hdl.index(),
            hdl.version(),
            Member { action: Arc::new(rec.action), ref_count: 0 },
        )
    }

    fn reset(&mut self) {
        self.store.reset();
    }
}

struct Group {
    /// Members keyed by slot index: selection ordinals follow the
    /// member-handle space, as a bit-set would.
    members: BTreeMap<u32, MemberHandle>,
    ref_count: u32,
}

#[derive(Deserialize, Serialize)]
struct GroupRecord {
    hdl: u32,
    members: Vec<u32>,
}

struct GroupPool {
    store: EntryStore<Group>,
}

impl GroupPool {
    fn new(size: u32) -> Self {
        Self { store: EntryStore::new(size) }
    }

    fn check(&self, hdl: GroupHandle) -> MatchResult<u32> {
        match self.store.check(hdl.index(), hdl.version()) {
            Ok(()) => Ok(hdl.index()),
            Err(HandleError::Invalid) | Err(HandleError::Expired) => {
                Err(MatchError::InvalidGrpHandle)
            }
        }
    }

    fn handle(&self, idx: u32) -> GroupHandle {
        GroupHandle::new(idx, self.store.version(idx))
    }

    fn create(&mut self) -> MatchResult<GroupHandle> {
        let idx = self
            .store
            .alloc(Group { members: BTreeMap::new(), ref_count: 0 })
            .ok_or(MatchError::TableFull)?;
        Ok(self.handle(idx))
    }

    fn get(&self, hdl: GroupHandle) -> MatchResult<&Group> {
        let idx = self.check(hdl)?;
        Ok(self.store.get(idx).expect("checked slot"))
    }

    fn get_mut(&mut self, hdl: GroupHandle) -> MatchResult<&mut Group> {
        let idx = self.check(hdl)?;
        Ok(self.store.get_mut(idx).expect("checked slot"))
    }

    fn ref_inc(&mut self, hdl: GroupHandle) {
        let group =
            self.store.get_mut(hdl.index()).expect("referenced group");
        group.ref_count += 1;
    }

    fn ref_dec(&mut self, hdl: GroupHandle) {
        let group =
            self.store.get_mut(hdl.index()).expect("referenced group");
        assert!(group.ref_count > 0, "group ref-count underflow");
        group.ref_count -= 1;
    }

    fn dump_all(&self) -> Vec<GroupDump> {
        self.store
            .live()
            .map(|(idx, group)| GroupDump {
                handle: self.handle(idx),
                members: group.members.values().copied().collect(),
                ref_count: group.ref_count,
            })
            .collect()
    }

    fn snapshot(&self) -> Vec<GroupRecord> {
        self.store
            .live()
            .map(|(idx, group)| GroupRecord {
                hdl: self.handle(idx).raw(),
                members: group.members.values().map(|m| m.raw()).collect(),
            })
            .collect()
    }

    fn reset(&mut self) {
        self.store.reset();
    }
}

// Selection state for an indirect-with-selection table.
struct Selection {
    groups: GroupPool,
    /// Builds the bytes the selection hash runs over.
    key: Arc<MatchKeyBuilder>,
    /// Absent functor: always pick the first member.
    hash: Option<Arc<dyn SelectionHash>>,
}

struct IndirectState {
    unit: MatchUnit<IndirectIndex>,
    members: MemberPool,
    selection: Option<Selection>,
    actions: BTreeSet<String>,
    default_index: Option<IndirectIndex>,
    with_counters: bool,
    with_ageing: bool,
    usage: TableUsage,
}

impl IndirectState {
    // Adjust the ref-count of whatever an index points at.
    fn ref_inc(&mut self, index: IndirectIndex) {
        match index {
            IndirectIndex::Member(m) => self.members.ref_inc(m),
            IndirectIndex::Group(g) => {
                self.selection
                    .as_mut()
                    .expect("group index in non-selector table")
                    .groups
                    .ref_inc(g);
            }
        }
    }

    fn ref_dec(&mut self, index: IndirectIndex) {
        match index {
            IndirectIndex::Member(m) => self.members.ref_dec(m),
            IndirectIndex::Group(g) => {
                self.selection
                    .as_mut()
                    .expect("group index in non-selector table")
                    .groups
                    .ref_dec(g);
            }
        }
    }

    fn selection(&self) -> MatchResult<&Selection> {
        self.selection.as_ref().ok_or(MatchError::WrongTableType)
    }

    fn selection_mut(&mut self) -> MatchResult<&mut Selection> {
        self.selection.as_mut().ok_or(MatchError::WrongTableType)
    }
}

// Header line of an indirect table's persisted form.
#[derive(Deserialize, Serialize)]
struct IndirectHeader {
    name: String,
    kind: MatchKind,
    ws: bool,
    default_index: Option<IndirectIndex>,
}

/// An indirect match-action table, optionally with selector groups.
pub struct IndirectTable {
    name: String,
    kind: MatchKind,
    log: Logger,
    state: RwLock<IndirectState>,
}

impl TableBuilder {
    /// Build an indirect table with a member pool of `mbr_size`.
    pub fn build_indirect(mut self, mbr_size: u32) -> IndirectTable {
        self.key.build();
        let key = Arc::new(self.key);
        let kind = key.kind();
        debug!(self.log, "created indirect table";
            "kind" => %kind, "size" => self.size, "members" => mbr_size);

        IndirectTable {
            name: self.name,
            kind,
            log: self.log,
            state: RwLock::new(IndirectState {
                unit: MatchUnit::new(key, self.size),
                members: MemberPool::new(mbr_size),
                selection: None,
                actions: self.actions,
                default_index: None,
                with_counters: self.with_counters,
                with_ageing: self.with_ageing,
                usage: TableUsage::new(self.size),
            }),
        }
    }

    /// Build an indirect-with-selection table. `selector_key` names the
    /// fields hashed for member selection; `hash_name` picks a
    /// registered functor, or `None` for first-member selection.
    pub fn build_selector(
        self,
        mbr_size: u32,
        grp_size: u32,
        mut selector_key: MatchKeyBuilder,
        hash_name: Option<&str>,
    ) -> MatchResult<IndirectTable> {
        let hash = match hash_name {
            Some(name) => {
                Some(hash::find(name).ok_or(MatchError::Error)?)
            }
            None => None,
        };
        selector_key.build();

        let mut table = self.build_indirect(mbr_size);
        table.state.get_mut().unwrap().selection = Some(Selection {
            groups: GroupPool::new(grp_size),
            key: Arc::new(selector_key),
            hash,
        });
        Ok(table)
    }
}

impl IndirectTable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MatchKind {
        self.kind
    }

    /// Does this table support selector groups?
    pub fn is_ws(&self) -> bool {
        self.state.read().unwrap().selection.is_some()
    }

    pub fn usage(&self) -> TableUsage {
        let state = self.state.read().unwrap();
        let mut usage = state.usage.clone();
        usage.occupancy = state.unit.occupancy();
        usage
    }

    // ================================================================
    // Member operations
    // ================================================================

    pub fn add_member(&self, action: ActionEntry) -> MatchResult<MemberHandle> {
        let mut state = self.state.write().unwrap();
        if !state.actions.contains(&action.action.name) {
            return Err(MatchError::InvalidActionName);
        }
        let hdl = state.members.add(Arc::new(action))?;
        debug!(self.log, "added member {}", hdl);
        Ok(hdl)
    }

    /// Delete a member. Fails while any table row or group still
    /// points at it.
    pub fn delete_member(&self, hdl: MemberHandle) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        state.members.delete(hdl)?;
        debug!(self.log, "deleted member {}", hdl);
        Ok(())
    }

    pub fn modify_member(
        &self,
        hdl: MemberHandle,
        action: ActionEntry,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        if !state.actions.contains(&action.action.name) {
            return Err(MatchError::InvalidActionName);
        }
        state.members.modify(hdl, Arc::new(action))
    }

    pub fn get_member(&self, hdl: MemberHandle) -> MatchResult<MemberDump> {
        self.state.read().unwrap().members.dump(hdl)
    }

    pub fn get_members(&self) -> Vec<MemberDump> {
        self.state.read().unwrap().members.dump_all()
    }

    // ================================================================
    // Group operations (selector tables only)
    // ================================================================

    pub fn create_group(&self) -> MatchResult<GroupHandle> {
        let mut state = self.state.write().unwrap();
        let hdl = state.selection_mut()?.groups.create()?;
        debug!(self.log, "created group {}", hdl);
        Ok(hdl)
    }

    /// Delete a group. Fails while table rows point at it; contained
    /// members are released.
    pub fn delete_group(&self, hdl: GroupHandle) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        let selection = state.selection_mut()?;
        let group = selection.groups.get(hdl)?;
        if group.ref_count > 0 {
            return Err(MatchError::GrpStillUsed);
        }

        let members: Vec<MemberHandle> =
            group.members.values().copied().collect();
        let idx = hdl.index();
        let _ = selection.groups.store.free_slot(idx);
        for m in members {
            state.members.ref_dec(m);
        }
        debug!(self.log, "deleted group {}", hdl);
        Ok(())
    }

    pub fn add_member_to_group(
        &self,
        mbr: MemberHandle,
        grp: GroupHandle,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        state.members.check(mbr)?;
        let selection = state.selection_mut()?;
        let group = selection.groups.get_mut(grp)?;
        if group.members.contains_key(&mbr.index()) {
            return Err(MatchError::MbrAlreadyInGrp);
        }
        group.members.insert(mbr.index(), mbr);
        state.members.ref_inc(mbr);
        Ok(())
    }

    pub fn remove_member_from_group(
        &self,
        mbr: MemberHandle,
        grp: GroupHandle,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        state.members.check(mbr)?;
        let selection = state.selection_mut()?;
        let group = selection.groups.get_mut(grp)?;
        if group.members.remove(&mbr.index()).is_none() {
            return Err(MatchError::MbrNotInGrp);
        }
        state.members.ref_dec(mbr);
        Ok(())
    }

    pub fn get_group(&self, hdl: GroupHandle) -> MatchResult<GroupDump> {
        let state = self.state.read().unwrap();
        let selection = state.selection()?;
        let group = selection.groups.get(hdl)?;
        Ok(GroupDump {
            handle: hdl,
            members: group.members.values().copied().collect(),
            ref_count: group.ref_count,
        })
    }

    pub fn get_groups(&self) -> MatchResult<Vec<GroupDump>> {
        let state = self.state.read().unwrap();
        Ok(state.selection()?.groups.dump_all())
    }

    // ================================================================
    // Entry operations
    // ================================================================

    /// Bind a row to a member.
    pub fn add_entry(
        &self,
        params: &[MatchParam],
        mbr: MemberHandle,
        priority: i32,
    ) -> MatchResult<EntryHandle> {
        let mut state = self.state.write().unwrap();
        state.members.check(mbr)?;
        self.add_index(&mut state, params, IndirectIndex::Member(mbr), priority)
    }

    /// Bind a row to a group. Rejected while the group has no members.
    pub fn add_entry_ws(
        &self,
        params: &[MatchParam],
        grp: GroupHandle,
        priority: i32,
    ) -> MatchResult<EntryHandle> {
        let mut state = self.state.write().unwrap();
        let group = state.selection()?.groups.get(grp)?;
        if group.members.is_empty() {
            return Err(MatchError::EmptyGrp);
        }
        self.add_index(&mut state, params, IndirectIndex::Group(grp), priority)
    }

    fn add_index(
        &self,
        state: &mut IndirectState,
        params: &[MatchParam],
        index: IndirectIndex,
        priority: i32,
    ) -> MatchResult<EntryHandle> {
        match state.unit.add_entry(params, index, priority) {
            Ok(hdl) => {
                state.ref_inc(index);
                state.usage.inserts += 1;
                debug!(self.log, "added entry {} -> {}", hdl, index);
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
        let index = state.unit.get_value(hdl)?;
        state.unit.delete_entry(hdl)?;
        state.ref_dec(index);
        state.usage.deletes += 1;
        debug!(self.log, "deleted entry {}", hdl);
        Ok(())
    }

    /// Point a row at a different member.
    pub fn modify_entry(
        &self,
        hdl: EntryHandle,
        mbr: MemberHandle,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        state.members.check(mbr)?;
        self.modify_index(&mut state, hdl, IndirectIndex::Member(mbr))
    }

    /// Point a row at a different group.
    pub fn modify_entry_ws(
        &self,
        hdl: EntryHandle,
        grp: GroupHandle,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        let group = state.selection()?.groups.get(grp)?;
        if group.members.is_empty() {
            return Err(MatchError::EmptyGrp);
        }
        self.modify_index(&mut state, hdl, IndirectIndex::Group(grp))
    }

    fn modify_index(
        &self,
        state: &mut IndirectState,
        hdl: EntryHandle,
        index: IndirectIndex,
    ) -> MatchResult<()> {
        let old = state.unit.get_value(hdl)?;
        state.unit.modify_entry(hdl, index)?;
        state.ref_dec(old);
        state.ref_inc(index);
        state.usage.updates += 1;
        Ok(())
    }

    pub fn get_entry(
        &self,
        hdl: EntryHandle,
    ) -> MatchResult<EntryDump<IndirectIndex>> {
        self.state.read().unwrap().unit.get_entry(hdl)
    }

    pub fn get_entries(&self) -> Vec<EntryDump<IndirectIndex>> {
        self.state.read().unwrap().unit.get_entries()
    }

    pub fn set_default_member(&self, mbr: MemberHandle) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        state.members.check(mbr)?;
        self.set_default_index(&mut state, IndirectIndex::Member(mbr))
    }

    pub fn set_default_group(&self, grp: GroupHandle) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();
        state.selection()?.groups.check(grp)?;
        self.set_default_index(&mut state, IndirectIndex::Group(grp))
    }

    fn set_default_index(
        &self,
        state: &mut IndirectState,
        index: IndirectIndex,
    ) -> MatchResult<()> {
        if let Some(old) = state.default_index {
            state.ref_dec(old);
        }
        state.ref_inc(index);
        state.default_index = Some(index);
        debug!(self.log, "set default {}", index);
        Ok(())
    }

    pub fn default_index(&self) -> MatchResult<IndirectIndex> {
        self.state
            .read()
            .unwrap()
            .default_index
            .ok_or(MatchError::NoDefaultEntry)
    }

    // ================================================================
    // Packet path
    // ================================================================

    pub fn lookup(
        &self,
        pkt: &dyn FieldSource,
    ) -> Option<(EntryHandle, IndirectIndex)> {
        self.state.read().unwrap().unit.lookup(pkt)
    }

    /// Classify a packet and resolve the hit (or default) index through
    /// the member pool to an action entry.
    pub fn apply_action(&self, pkt: &dyn FieldSource) -> ApplyResult {
        let state = self.state.read().unwrap();

        let (hit, handle, index) = match state.unit.lookup(pkt) {
            Some((hdl, index)) => (true, Some(hdl), Some(index)),
            None => (false, None, state.default_index),
        };

        let action =
            index.and_then(|index| self.resolve(&state, index, pkt));
        ApplyResult { hit, handle, action, meter_color: None }
    }

    fn resolve(
        &self,
        state: &IndirectState,
        index: IndirectIndex,
        pkt: &dyn FieldSource,
    ) -> Option<Arc<ActionEntry>> {
        let mbr = match index {
            IndirectIndex::Member(m) => m,
            IndirectIndex::Group(g) => {
                let selection =
                    state.selection.as_ref().expect("selector table");
                let group = selection.groups.get(g).ok()?;
                self.choose_from_group(selection, group, pkt)?
            }
        };

        match state.members.action(mbr) {
            Ok(action) => Some(action),
            Err(_) => {
                // Ref-counting makes a dangling member unreachable;
                // getting here is an engine bug.
                error!(self.log, "dangling member {} in lookup", mbr);
                None
            }
        }
    }

    /// Pick one member of a hit group: the selection hash over the
    /// packet's selector key, modulo the member count, gives the
    /// ordinal. The ordinal-to-member assignment reshuffles when the
    /// membership changes; selection is only stable between edits.
    fn choose_from_group(
        &self,
        selection: &Selection,
        group: &Group,
        pkt: &dyn FieldSource,
    ) -> Option<MemberHandle> {
        if group.members.is_empty() {
            // A bound group can be emptied after binding.
            error!(self.log, "selection from empty group");
            return None;
        }

        let ordinal = match &selection.hash {
            Some(hash) => {
                let key = selection.key.build_key(pkt);
                (hash.hash(&key) % group.members.len() as u64) as usize
            }
            None => 0,
        };

        group.members.values().nth(ordinal).copied()
    }

    // ================================================================
    // Ageing and counters
    // ================================================================

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

    // ================================================================
    // Persistence
    // ================================================================

    /// A full introspection view of the rows; members and groups have
    /// their own dump calls.
    pub fn dump(&self) -> TableDump<IndirectIndex> {
        let state = self.state.read().unwrap();
        let mut usage = state.usage.clone();
        usage.occupancy = state.unit.occupancy();

        TableDump {
            name: self.name.clone(),
            kind: self.kind,
            usage,
            default_entry: state.default_index,
            entries: state.unit.get_entries(),
        }
    }

    /// The persisted form: a header line, then the member, group, and
    /// entry sections, each a count line followed by one record per
    /// line. Reference counts are not persisted; restore derives them.
    pub fn serialize(&self) -> String {
        let state = self.state.read().unwrap();
        let header = IndirectHeader {
            name: self.name.clone(),
            kind: self.kind,
            ws: state.selection.is_some(),
            default_index: state.default_index,
        };

        let mut out = String::new();
        out.push_str(&serde_json::to_string(&header).expect("header json"));
        out.push('\n');

        let members = state.members.snapshot();
        out.push_str(&format!("{}\n", members.len()));
        for rec in &members {
            out.push_str(&serde_json::to_string(rec).expect("member json"));
            out.push('\n');
        }

        let groups = match &state.selection {
            Some(selection) => selection.groups.snapshot(),
            None => vec![],
        };
        out.push_str(&format!("{}\n", groups.len()));
        for rec in &groups {
            out.push_str(&serde_json::to_string(rec).expect("group json"));
            out.push('\n');
        }

        let entries = state.unit.snapshot();
        out.push_str(&format!("{}\n", entries.len()));
        for rec in &entries {
            out.push_str(&serde_json::to_string(rec).expect("entry json"));
            out.push('\n');
        }
        out
    }

    pub fn deserialize(&self, dump: &str) -> MatchResult<()> {
        self.deserialize_lines(&mut dump.lines())
    }

    pub(crate) fn deserialize_lines(
        &self,
        mut lines: &mut std::str::Lines<'_>,
    ) -> MatchResult<()> {
        let mut state = self.state.write().unwrap();

        let header: IndirectHeader = lines
            .next()
            .and_then(|l| serde_json::from_str(l).ok())
            .ok_or(MatchError::Error)?;
        if header.name != self.name
            || header.kind != self.kind
            || header.ws != state.selection.is_some()
        {
            return Err(MatchError::Error);
        }

        state.unit.reset();
        state.members.reset();
        if let Some(selection) = &mut state.selection {
            selection.groups.reset();
        }
        state.default_index = None;

        fn section_count<'a>(
            lines: &mut impl Iterator<Item = &'a str>,
        ) -> MatchResult<usize> {
            lines
                .next()
                .and_then(|l| l.trim().parse().ok())
                .ok_or(MatchError::Error)
        }

        let nmembers = section_count(&mut lines)?;
        for _ in 0..nmembers {
            let rec: MemberRecord = lines
                .next()
                .and_then(|l| serde_json::from_str(l).ok())
                .ok_or(MatchError::Error)?;
            state.members.restore(rec)?;
        }

        let ngroups = section_count(&mut lines)?;
        for _ in 0..ngroups {
            let rec: GroupRecord = lines
                .next()
                .and_then(|l| serde_json::from_str(l).ok())
                .ok_or(MatchError::Error)?;
            let hdl = GroupHandle::from_raw(rec.hdl);
            let members: BTreeMap<u32, MemberHandle> = rec
                .members
                .iter()
                .map(|&raw| {
                    let m = MemberHandle::from_raw(raw);
                    (m.index(), m)
                })
                .collect();

            let selection =
                state.selection.as_mut().ok_or(MatchError::Error)?;
            selection.groups.store.restore(
                hdl.index(),
                hdl.version(),
                Group { members: members.clone(), ref_count: 0 },
            )?;
            for m in members.values() {
                state.members.ref_inc(*m);
            }
        }

        let nentries = section_count(&mut lines)?;
        for _ in 0..nentries {
            let rec: EntryRecord<IndirectIndex> = lines
                .next()
                .and_then(|l| serde_json::from_str(l).ok())
                .ok_or(MatchError::Error)?;
            let index = rec.value;
            state.unit.restore(rec)?;
            state.ref_inc(index);
        }

        if let Some(index) = header.default_index {
            state.ref_inc(index);
            state.default_index = Some(index);
        }

        state.usage.occupancy = state.unit.occupancy();
        debug!(self.log, "restored {} members, {} groups, {} entries",
            nmembers, ngroups, nentries);
        Ok(())
    }

    /// Drop all entries, members, groups, and the default.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        state.unit.reset();
        state.members.reset();
        if let Some(selection) = &mut state.selection {
            selection.groups.reset();
        }
        state.default_index = None;
        let size = state.unit.capacity();
        state.usage = TableUsage::new(size);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::ActionSpec;
    use crate::api::ByteKey;
    use crate::api::NO_PRIORITY;
    use crate::engine::phv::FieldRef;
    use crate::engine::phv::HeaderId;
    use crate::engine::phv::Phv;
    use crate::engine::test_logger;

    fn nexthop(ip: [u8; 4]) -> ActionEntry {
        ActionEntry::new(
            ActionSpec::new("set_nhop", vec![ByteKey::from(ip)]),
            Some("egress"),
        )
    }

    fn builder(name: &str) -> TableBuilder {
        let log = test_logger();
        let mut tb = TableBuilder::new(name, 8, &log);
        tb.match_field(FieldRef::new(0, 0), 32, MatchKind::Lpm, "ipv4.dst");
        tb.action("set_nhop");
        tb
    }

    fn selector_key() -> MatchKeyBuilder {
        let mut kb = MatchKeyBuilder::new();
        kb.push_back_field(FieldRef::new(0, 1), 32, MatchKind::Exact, "src");
        kb
    }

    fn selector_table(name: &str, hash: Option<&str>) -> IndirectTable {
        builder(name)
            .build_selector(8, 4, selector_key(), hash)
            .unwrap()
    }

    fn lpm(key: [u8; 4], prefix_len: u32) -> Vec<MatchParam> {
        vec![MatchParam::Lpm { key: ByteKey::from(key), prefix_len }]
    }

    fn pkt(dst: [u8; 4], src: [u8; 4]) -> Phv {
        let mut phv = Phv::new();
        phv.push_header(HeaderId(0), 2);
        phv.set_field(FieldRef::new(0, 0), &dst);
        phv.set_field(FieldRef::new(0, 1), &src);
        phv.set_packet_len(64);
        phv
    }

    #[test]
    fn member_lifecycle() {
        let table = builder("ecmp").build_indirect(4);
        assert!(!table.is_ws());

        let m = table.add_member(nexthop([192, 168, 0, 1])).unwrap();
        assert_eq!(table.get_member(m).unwrap().ref_count, 0);

        let e = table.add_entry(&lpm([10, 0, 0, 0], 8), m, NO_PRIORITY)
            .unwrap();
        assert_eq!(table.get_member(m).unwrap().ref_count, 1);
        assert_eq!(table.delete_member(m), Err(MatchError::MbrStillUsed));

        table.delete_entry(e).unwrap();
        assert_eq!(table.get_member(m).unwrap().ref_count, 0);
        table.delete_member(m).unwrap();
        assert_eq!(
            table.get_member(m),
            Err(MatchError::InvalidMbrHandle)
        );
    }

    #[test]
    fn apply_resolves_member() {
        let table = builder("ecmp").build_indirect(4);
        let m1 = table.add_member(nexthop([192, 168, 0, 1])).unwrap();
        let m2 = table.add_member(nexthop([192, 168, 0, 2])).unwrap();
        let e = table.add_entry(&lpm([10, 0, 0, 0], 8), m1, NO_PRIORITY)
            .unwrap();

        let res = table.apply_action(&pkt([10, 1, 1, 1], [1, 1, 1, 1]));
        assert!(res.hit);
        assert_eq!(
            res.action.unwrap().action.args[0],
            ByteKey::from([192, 168, 0, 1])
        );

        // Shared members: a modify moves the ref-count.
        table.modify_entry(e, m2).unwrap();
        assert_eq!(table.get_member(m1).unwrap().ref_count, 0);
        assert_eq!(table.get_member(m2).unwrap().ref_count, 1);
        let res = table.apply_action(&pkt([10, 1, 1, 1], [1, 1, 1, 1]));
        assert_eq!(
            res.action.unwrap().action.args[0],
            ByteKey::from([192, 168, 0, 2])
        );

        // Miss resolves through the default member.
        let res = table.apply_action(&pkt([99, 0, 0, 1], [1, 1, 1, 1]));
        assert!(!res.hit);
        assert!(res.action.is_none());
        table.set_default_member(m1).unwrap();
        let res = table.apply_action(&pkt([99, 0, 0, 1], [1, 1, 1, 1]));
        assert!(!res.hit);
        assert_eq!(
            res.action.unwrap().action.args[0],
            ByteKey::from([192, 168, 0, 1])
        );
    }

    #[test]
    fn group_ops_need_selector_table() {
        let table = builder("ecmp").build_indirect(4);
        assert_eq!(table.create_group(), Err(MatchError::WrongTableType));
        assert_eq!(table.get_groups(), Err(MatchError::WrongTableType));
    }

    #[test]
    fn ref_count_safety() {
        let table = selector_table("ecmp_ws", Some("crc32"));
        let m = table.add_member(nexthop([192, 168, 0, 1])).unwrap();
        let g = table.create_group().unwrap();

        // Binding a row to a group with one member pins the member both
        // through the group and transitively through the row.
        table.add_member_to_group(m, g).unwrap();
        let e = table.add_entry_ws(&lpm([10, 0, 0, 0], 8), g, NO_PRIORITY)
            .unwrap();
        assert_eq!(table.delete_member(m), Err(MatchError::MbrStillUsed));
        assert_eq!(table.delete_group(g), Err(MatchError::GrpStillUsed));

        // Release in order: member out of group, then delete.
        table.remove_member_from_group(m, g).unwrap();
        table.delete_member(m).unwrap();

        table.delete_entry(e).unwrap();
        table.delete_group(g).unwrap();
    }

    #[test]
    fn group_membership_errors() {
        let table = selector_table("ecmp_ws", Some("crc32"));
        let m = table.add_member(nexthop([192, 168, 0, 1])).unwrap();
        let g = table.create_group().unwrap();

        assert_eq!(
            table.add_entry_ws(&lpm([10, 0, 0, 0], 8), g, NO_PRIORITY),
            Err(MatchError::EmptyGrp)
        );
        assert_eq!(
            table.remove_member_from_group(m, g),
            Err(MatchError::MbrNotInGrp)
        );

        table.add_member_to_group(m, g).unwrap();
        assert_eq!(
            table.add_member_to_group(m, g),
            Err(MatchError::MbrAlreadyInGrp)
        );

        // Deleting the group releases its members.
        assert_eq!(table.get_member(m).unwrap().ref_count, 1);
        table.delete_group(g).unwrap();
        assert_eq!(table.get_member(m).unwrap().ref_count, 0);
    }

    #[test]
    fn selection_is_deterministic() {
        let table = selector_table("ecmp_ws", Some("crc32"));
        let m1 = table.add_member(nexthop([192, 168, 0, 1])).unwrap();
        let m2 = table.add_member(nexthop([192, 168, 0, 2])).unwrap();
        let g = table.create_group().unwrap();
        table.add_member_to_group(m1, g).unwrap();
        table.add_member_to_group(m2, g).unwrap();
        table.add_entry_ws(&lpm([10, 0, 0, 0], 8), g, NO_PRIORITY).unwrap();

        let src = [1, 2, 3, 4];
        let want = {
            // The selector key is the source address; ordinals follow
            // member slot order.
            let ordinal = crc32fast::hash(&src) as u64 % 2;
            let ips =
                [ByteKey::from([192, 168, 0, 1]), ByteKey::from([192, 168, 0, 2])];
            ips[ordinal as usize].clone()
        };

        for _ in 0..3 {
            let res = table.apply_action(&pkt([10, 1, 1, 1], src));
            assert!(res.hit);
            assert_eq!(res.action.unwrap().action.args[0], want);
        }
    }

    #[test]
    fn selection_without_hash_picks_first() {
        let table = selector_table("ecmp_ws", None);
        let m1 = table.add_member(nexthop([192, 168, 0, 1])).unwrap();
        let m2 = table.add_member(nexthop([192, 168, 0, 2])).unwrap();
        let g = table.create_group().unwrap();
        // Insert out of slot order; selection still follows slot order.
        table.add_member_to_group(m2, g).unwrap();
        table.add_member_to_group(m1, g).unwrap();
        table.add_entry_ws(&lpm([10, 0, 0, 0], 8), g, NO_PRIORITY).unwrap();

        let res = table.apply_action(&pkt([10, 1, 1, 1], [5, 6, 7, 8]));
        assert_eq!(
            res.action.unwrap().action.args[0],
            ByteKey::from([192, 168, 0, 1])
        );
        let _ = (m1, m2);
    }

    #[test]
    fn serialize_round_trip() {
        let table = selector_table("ecmp_ws", Some("crc32"));
        let m1 = table.add_member(nexthop([192, 168, 0, 1])).unwrap();
        let m2 = table.add_member(nexthop([192, 168, 0, 2])).unwrap();
        let g = table.create_group().unwrap();
        table.add_member_to_group(m1, g).unwrap();
        table.add_member_to_group(m2, g).unwrap();
        let e1 = table
            .add_entry_ws(&lpm([10, 0, 0, 0], 8), g, NO_PRIORITY)
            .unwrap();
        let e2 = table
            .add_entry(&lpm([10, 9, 0, 0], 16), m1, NO_PRIORITY)
            .unwrap();
        table.set_default_member(m2).unwrap();

        let dump = table.serialize();
        table.reset();
        table.deserialize(&dump).unwrap();
        assert_eq!(table.serialize(), dump);

        // Handles survive, and so do derived ref-counts.
        assert_eq!(
            table.get_entry(e1).unwrap().value,
            IndirectIndex::Group(g)
        );
        assert_eq!(
            table.get_entry(e2).unwrap().value,
            IndirectIndex::Member(m1)
        );
        // m1: group containment + row; m2: group containment + default.
        assert_eq!(table.get_member(m1).unwrap().ref_count, 2);
        assert_eq!(table.get_member(m2).unwrap().ref_count, 2);
        assert_eq!(table.get_group(g).unwrap().ref_count, 1);

        let res = table.apply_action(&pkt([10, 9, 1, 1], [1, 1, 1, 1]));
        assert!(res.hit);
        assert_eq!(
            res.action.unwrap().action.args[0],
            ByteKey::from([192, 168, 0, 1])
        );
    }
}
