// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The generic match unit: a handle-indexed entry store plus a
//! pluggable lookup structure, one per match kind.
//!
//! Entries live in a fixed-capacity slot vector. Each slot carries an
//! 8-bit version that increments on every delete, so a handle minted
//! before a delete/reuse cycle fails validation afterwards. The lookup
//! structure maps canonical keys to slot numbers: a hash map for exact
//! matches, per-prefix-length hash maps probed longest-first for LPM,
//! and a priority-ordered scan list shared by ternary and range.

use crate::api::ByteKey;
use crate::api::CounterDump;
use crate::api::EntryDump;
use crate::api::EntryHandle;
use crate::api::MatchError;
use crate::api::MatchKind;
use crate::api::MatchParam;
use crate::api::MatchResult;
use crate::api::HDL_MAX_INDEX;
use crate::api::NO_PRIORITY;
use crate::engine::key::EntryData;
use crate::engine::key::MatchKeyBuilder;
use crate::engine::phv::FieldSource;
use crate::time::Moment;
use crate::time::Ttl;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

pub(crate) enum HandleError {
    Invalid,
    Expired,
}

struct Slot<T> {
    value: Option<T>,
    version: u8,
}

/// A fixed-capacity slot vector with versioned slots and a
/// lowest-first free pool.
pub(crate) struct EntryStore<T> {
    slots: Vec<Slot<T>>,
    free: BTreeSet<u32>,
}

impl<T> EntryStore<T> {
    pub fn new(size: u32) -> Self {
        assert!(size > 0 && size <= HDL_MAX_INDEX);
        let mut slots = Vec::with_capacity(size as usize);
        slots.resize_with(size as usize, || Slot { value: None, version: 0 });
        Self { slots, free: (0..size).collect() }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn occupancy(&self) -> u32 {
        self.capacity() - self.free.len() as u32
    }

    /// Place `value` in the lowest free slot, returning its index.
    pub fn alloc(&mut self, value: T) -> Option<u32> {
        let idx = self.free.pop_first()?;
        self.slots[idx as usize].value = Some(value);
        Some(idx)
    }

    /// Free a live slot, bumping its version so outstanding handles
    /// expire.
    pub fn free_slot(&mut self, idx: u32) -> T {
        let slot = &mut self.slots[idx as usize];
        let value = slot.value.take().expect("freeing a free slot");
        slot.version = slot.version.wrapping_add(1);
        self.free.insert(idx);
        value
    }

    pub fn check(&self, idx: u32, version: u8) -> Result<(), HandleError> {
        let slot = self
            .slots
            .get(idx as usize)
            .filter(|s| s.value.is_some())
            .ok_or(HandleError::Invalid)?;
        if slot.version != version {
            return Err(HandleError::Expired);
        }
        Ok(())
    }

    pub fn get(&self, idx: u32) -> Option<&T> {
        self.slots.get(idx as usize).and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, idx: u32) -> Option<&mut T> {
        self.slots.get_mut(idx as usize).and_then(|s| s.value.as_mut())
    }

    pub fn version(&self, idx: u32) -> u8 {
        self.slots[idx as usize].version
    }

    /// Live slots in slot order.
    pub fn live(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value.as_ref().map(|v| (i as u32, v))
        })
    }

    /// Reoccupy a specific slot at a specific version, for snapshot
    /// restore. The slot must currently be free.
    pub fn restore(
        &mut self,
        idx: u32,
        version: u8,
        value: T,
    ) -> MatchResult<()> {
        if idx >= self.capacity() || !self.free.remove(&idx) {
            return Err(MatchError::Error);
        }
        let slot = &mut self.slots[idx as usize];
        slot.value = Some(value);
        slot.version = version;
        Ok(())
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.value = None;
            slot.version = 0;
        }
        self.free = (0..self.capacity()).collect();
    }
}

/// Per-entry bookkeeping: hit counters, ageing state, and nothing else.
///
/// Counters and the last-touched stamp are written from the lookup path
/// while only the table's read lock is held; concurrent lookups race on
/// them through relaxed atomics. That race is intentional, trading
/// perfectly atomic statistics for lookup throughput.
pub(crate) struct EntryMeta {
    bytes: AtomicU64,
    packets: AtomicU64,
    last_hit_ms: AtomicU64,
    ttl_ms: u64,
}

impl EntryMeta {
    fn new() -> Self {
        Self {
            bytes: AtomicU64::new(0),
            packets: AtomicU64::new(0),
            last_hit_ms: AtomicU64::new(0),
            ttl_ms: 0,
        }
    }

    fn hit(&self, now_ms: u64, bytes: u64) {
        self.bytes.fetch_add(bytes, Relaxed);
        self.packets.fetch_add(1, Relaxed);
        self.last_hit_ms.store(now_ms, Relaxed);
    }

    // Slot reuse resets the meta in place.
    fn reset(&mut self, now_ms: u64) {
        self.bytes.store(0, Relaxed);
        self.packets.store(0, Relaxed);
        self.last_hit_ms.store(now_ms, Relaxed);
        self.ttl_ms = 0;
    }

    fn counters(&self) -> CounterDump {
        CounterDump {
            bytes: self.bytes.load(Relaxed),
            packets: self.packets.load(Relaxed),
        }
    }
}

struct Entry<V> {
    data: EntryData,
    value: V,
}

struct LpmBucket {
    mask: ByteKey,
    map: HashMap<ByteKey, u32>,
}

// The pluggable lookup structure, a closed set keyed by match kind.
// Ternary and range share the priority-ordered scan list; the key
// builder knows which fields bound-compare instead of mask-compare.
enum Index {
    Exact(HashMap<ByteKey, u32>),
    Lpm(BTreeMap<u32, LpmBucket>),
    Priority(Vec<u32>),
}

/// One serialized table entry, one line of the persisted form.
#[derive(Debug, Deserialize, Serialize)]
pub struct EntryRecord<V> {
    pub hdl: u32,
    pub key: ByteKey,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mask: Option<ByteKey>,
    pub prefix_len: u32,
    pub priority: i32,
    pub ttl_ms: u64,
    pub value: V,
}

/// A match unit: entry storage and lookup for one table.
pub struct MatchUnit<V> {
    builder: Arc<MatchKeyBuilder>,
    store: EntryStore<Entry<V>>,
    meta: Vec<EntryMeta>,
    index: Index,
    /// Epoch for the millisecond stamps in `meta`.
    base: Moment,
}

impl<V: Clone> MatchUnit<V> {
    pub fn new(builder: Arc<MatchKeyBuilder>, size: u32) -> Self {
        let index = match builder.kind() {
            MatchKind::Exact => Index::Exact(HashMap::new()),
            MatchKind::Lpm => Index::Lpm(BTreeMap::new()),
            MatchKind::Ternary | MatchKind::Range => {
                Index::Priority(Vec::new())
            }
            MatchKind::Valid => unreachable!("no valid-kind tables"),
        };

        let mut meta = Vec::with_capacity(size as usize);
        meta.resize_with(size as usize, EntryMeta::new);

        Self {
            builder,
            store: EntryStore::new(size),
            meta,
            index,
            base: Moment::now(),
        }
    }

    pub fn kind(&self) -> MatchKind {
        self.builder.kind()
    }

    pub fn key_builder(&self) -> &Arc<MatchKeyBuilder> {
        &self.builder
    }

    pub fn capacity(&self) -> u32 {
        self.store.capacity()
    }

    pub fn occupancy(&self) -> u32 {
        self.store.occupancy()
    }

    fn now_ms(&self) -> u64 {
        Moment::now().delta_as_millis(self.base)
    }

    fn handle(&self, slot: u32) -> EntryHandle {
        EntryHandle::new(slot, self.store.version(slot))
    }

    fn check(&self, hdl: EntryHandle) -> MatchResult<u32> {
        match self.store.check(hdl.index(), hdl.version()) {
            Ok(()) => Ok(hdl.index()),
            Err(HandleError::Invalid) => Err(MatchError::InvalidHandle),
            Err(HandleError::Expired) => Err(MatchError::ExpiredHandle),
        }
    }

    /// The per-packet operation: build the canonical key and probe the
    /// lookup structure. A miss is a valid outcome, not an error.
    pub fn lookup(&self, pkt: &dyn FieldSource) -> Option<(EntryHandle, V)> {
        let key = self.builder.build_key(pkt);
        let slot = self.search(&key)?;
        self.meta[slot as usize].hit(self.now_ms(), pkt.packet_len() as u64);

        let entry = self.store.get(slot).expect("indexed slot is live");
        Some((self.handle(slot), entry.value.clone()))
    }

    fn search(&self, key: &ByteKey) -> Option<u32> {
        match &self.index {
            Index::Exact(map) => map.get(key).copied(),

            // Probe longest prefix first; the first hit wins.
            Index::Lpm(buckets) => buckets.iter().rev().find_map(
                |(_, bucket)| {
                    let mut masked = key.clone();
                    masked.and_with(&bucket.mask);
                    bucket.map.get(&masked).copied()
                },
            ),

            // Highest priority first; insertion order breaks ties.
            Index::Priority(ordered) => {
                ordered.iter().copied().find(|&slot| {
                    let entry =
                        self.store.get(slot).expect("indexed slot is live");
                    self.builder.entry_matches(&entry.data, key)
                })
            }
        }
    }

    // Find the slot holding an identical canonical key (and priority,
    // for priority-ordered kinds).
    fn find_slot(&self, data: &EntryData) -> Option<u32> {
        match &self.index {
            Index::Exact(map) => map.get(&data.key).copied(),
            Index::Lpm(buckets) => buckets
                .get(&data.prefix_len)
                .and_then(|b| b.map.get(&data.key).copied()),
            Index::Priority(ordered) => {
                ordered.iter().copied().find(|&slot| {
                    let e = self.store.get(slot).expect("indexed slot");
                    e.data.key == data.key
                        && e.data.mask == data.mask
                        && e.data.priority == data.priority
                })
            }
        }
    }

    fn index_insert(&mut self, data: &EntryData, slot: u32) {
        let store = &self.store;
        match &mut self.index {
            Index::Exact(map) => {
                map.insert(data.key.clone(), slot);
            }
            Index::Lpm(buckets) => {
                let width = data.key.len();
                let bucket =
                    buckets.entry(data.prefix_len).or_insert_with(|| {
                        LpmBucket {
                            mask: ByteKey::prefix_mask(
                                width,
                                data.prefix_len,
                            ),
                            map: HashMap::new(),
                        }
                    });
                bucket.map.insert(data.key.clone(), slot);
            }
            Index::Priority(ordered) => {
                // First position of strictly lower priority, so equal
                // priorities keep insertion order.
                let pos = ordered
                    .iter()
                    .position(|&s| {
                        let e = store.get(s).expect("indexed slot");
                        e.data.priority < data.priority
                    })
                    .unwrap_or(ordered.len());
                ordered.insert(pos, slot);
            }
        }
    }

    fn index_remove(&mut self, data: &EntryData, slot: u32) {
        match &mut self.index {
            Index::Exact(map) => {
                map.remove(&data.key);
            }
            Index::Lpm(buckets) => {
                let bucket =
                    buckets.get_mut(&data.prefix_len).expect("lpm bucket");
                bucket.map.remove(&data.key);
                if bucket.map.is_empty() {
                    buckets.remove(&data.prefix_len);
                }
            }
            Index::Priority(ordered) => {
                ordered.retain(|&s| s != slot);
            }
        }
    }

    pub fn add_entry(
        &mut self,
        params: &[MatchParam],
        value: V,
        priority: i32,
    ) -> MatchResult<EntryHandle> {
        self.builder.sanity_check(params)?;
        let mut data = self.builder.params_to_entry(params)?;
        data.priority = match self.kind() {
            MatchKind::Ternary | MatchKind::Range => priority,
            _ => NO_PRIORITY,
        };

        if self.find_slot(&data).is_some() {
            return Err(MatchError::DuplicateEntry);
        }

        let slot = self
            .store
            .alloc(Entry { data: data.clone(), value })
            .ok_or(MatchError::TableFull)?;
        self.index_insert(&data, slot);

        let now_ms = self.now_ms();
        self.meta[slot as usize].reset(now_ms);
        Ok(self.handle(slot))
    }

    pub fn delete_entry(&mut self, hdl: EntryHandle) -> MatchResult<()> {
        let slot = self.check(hdl)?;
        let data = self.store.get(slot).expect("checked slot").data.clone();
        self.index_remove(&data, slot);
        let _ = self.store.free_slot(slot);
        Ok(())
    }

    /// Replace only the value; key and priority are untouched so the
    /// lookup structure needs no update.
    pub fn modify_entry(
        &mut self,
        hdl: EntryHandle,
        value: V,
    ) -> MatchResult<()> {
        let slot = self.check(hdl)?;
        self.store.get_mut(slot).expect("checked slot").value = value;
        Ok(())
    }

    pub fn get_value(&self, hdl: EntryHandle) -> MatchResult<V> {
        let slot = self.check(hdl)?;
        Ok(self.store.get(slot).expect("checked slot").value.clone())
    }

    pub fn get_entry(&self, hdl: EntryHandle) -> MatchResult<EntryDump<V>> {
        let slot = self.check(hdl)?;
        Ok(self.dump_slot(slot))
    }

    fn dump_slot(&self, slot: u32) -> EntryDump<V> {
        let entry = self.store.get(slot).expect("live slot");
        EntryDump {
            handle: self.handle(slot),
            params: self.builder.entry_to_params(&entry.data),
            priority: entry.data.priority,
            ttl_ms: self.meta[slot as usize].ttl_ms,
            value: entry.value.clone(),
        }
    }

    /// Resolve the handle of the entry matching this exact parameter
    /// spec, if one exists.
    pub fn get_entry_from_key(
        &self,
        params: &[MatchParam],
        priority: i32,
    ) -> MatchResult<EntryHandle> {
        self.builder.sanity_check(params)?;
        let mut data = self.builder.params_to_entry(params)?;
        data.priority = match self.kind() {
            MatchKind::Ternary | MatchKind::Range => priority,
            _ => NO_PRIORITY,
        };
        self.find_slot(&data)
            .map(|slot| self.handle(slot))
            .ok_or(MatchError::InvalidHandle)
    }

    /// Live entries in slot order.
    pub fn get_entries(&self) -> Vec<EntryDump<V>> {
        self.store.live().map(|(slot, _)| self.dump_slot(slot)).collect()
    }

    pub fn set_ttl(
        &mut self,
        hdl: EntryHandle,
        ttl_ms: u64,
    ) -> MatchResult<()> {
        let slot = self.check(hdl)?;
        self.meta[slot as usize].ttl_ms = ttl_ms;
        Ok(())
    }

    /// Collect the handles of expired entries. The caller deletes them
    /// in a separate write pass; this scan only reads.
    pub fn sweep(&self) -> Vec<EntryHandle> {
        let now_ms = self.now_ms();
        self.store
            .live()
            .filter(|&(slot, _)| {
                let meta = &self.meta[slot as usize];
                Ttl::new_millis(meta.ttl_ms)
                    .is_expired(meta.last_hit_ms.load(Relaxed), now_ms)
            })
            .map(|(slot, _)| self.handle(slot))
            .collect()
    }

    pub fn counters(&self, hdl: EntryHandle) -> MatchResult<CounterDump> {
        let slot = self.check(hdl)?;
        Ok(self.meta[slot as usize].counters())
    }

    pub fn reset_counters(&mut self, hdl: EntryHandle) -> MatchResult<()> {
        let slot = self.check(hdl)?;
        let meta = &self.meta[slot as usize];
        meta.bytes.store(0, Relaxed);
        meta.packets.store(0, Relaxed);
        Ok(())
    }

    /// Records for the persisted form, in slot order.
    pub fn snapshot(&self) -> Vec<EntryRecord<V>> {
        self.store
            .live()
            .map(|(slot, entry)| EntryRecord {
                hdl: self.handle(slot).raw(),
                key: entry.data.key.clone(),
                mask: entry.data.mask.clone(),
                prefix_len: entry.data.prefix_len,
                priority: entry.data.priority,
                ttl_ms: self.meta[slot as usize].ttl_ms,
                value: entry.value.clone(),
            })
            .collect()
    }

    /// Reoccupy one slot from a persisted record, reconstructing the
    /// identical handle and re-registering the key.
    pub fn restore(&mut self, rec: EntryRecord<V>) -> MatchResult<()> {
        let hdl = EntryHandle::from_raw(rec.hdl);
        let data = EntryData {
            key: rec.key,
            mask: rec.mask,
            prefix_len: rec.prefix_len,
            priority: rec.priority,
        };

        self.store.restore(
            hdl.index(),
            hdl.version(),
            Entry { data: data.clone(), value: rec.value },
        )?;
        self.index_insert(&data, hdl.index());

        let now_ms = self.now_ms();
        let meta = &mut self.meta[hdl.index() as usize];
        meta.reset(now_ms);
        meta.ttl_ms = rec.ttl_ms;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.store.reset();
        match &mut self.index {
            Index::Exact(map) => map.clear(),
            Index::Lpm(buckets) => buckets.clear(),
            Index::Priority(ordered) => ordered.clear(),
        }
        let now_ms = self.now_ms();
        for meta in &mut self.meta {
            meta.reset(now_ms);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::phv::FieldRef;
    use crate::engine::phv::HeaderId;
    use crate::engine::phv::Phv;

    fn ipv4_dst_builder(kind: MatchKind) -> Arc<MatchKeyBuilder> {
        let mut kb = MatchKeyBuilder::new();
        kb.push_back_field(FieldRef::new(0, 0), 32, kind, "ipv4.dst");
        kb.build();
        Arc::new(kb)
    }

    fn pkt(dst: [u8; 4]) -> Phv {
        let mut phv = Phv::new();
        phv.push_header(HeaderId(0), 1);
        phv.set_field(FieldRef::new(0, 0), &dst);
        phv.set_packet_len(100);
        phv
    }

    fn exact(bytes: [u8; 4]) -> Vec<MatchParam> {
        vec![MatchParam::Exact(ByteKey::from(bytes))]
    }

    #[test]
    fn handle_staleness() {
        let mut unit: MatchUnit<u32> =
            MatchUnit::new(ipv4_dst_builder(MatchKind::Exact), 4);

        let hdl = unit.add_entry(&exact([10, 0, 0, 1]), 7, NO_PRIORITY)
            .unwrap();
        assert_eq!(unit.get_value(hdl).unwrap(), 7);

        unit.delete_entry(hdl).unwrap();
        assert_eq!(unit.get_value(hdl), Err(MatchError::InvalidHandle));
        assert_eq!(unit.delete_entry(hdl), Err(MatchError::InvalidHandle));

        // The slot is reused with a bumped version: the old handle now
        // reports expired, not the new entry.
        let hdl2 = unit.add_entry(&exact([10, 0, 0, 2]), 8, NO_PRIORITY)
            .unwrap();
        assert_eq!(hdl2.index(), hdl.index());
        assert_eq!(hdl2.version(), hdl.version().wrapping_add(1));
        assert_eq!(unit.get_value(hdl), Err(MatchError::ExpiredHandle));
        assert_eq!(unit.get_value(hdl2).unwrap(), 8);
    }

    #[test]
    fn duplicate_rejected() {
        let mut unit: MatchUnit<u32> =
            MatchUnit::new(ipv4_dst_builder(MatchKind::Exact), 4);

        let hdl = unit.add_entry(&exact([10, 0, 0, 1]), 1, NO_PRIORITY)
            .unwrap();
        assert_eq!(
            unit.add_entry(&exact([10, 0, 0, 1]), 2, NO_PRIORITY),
            Err(MatchError::DuplicateEntry)
        );

        // The first entry is unaffected.
        assert_eq!(unit.get_value(hdl).unwrap(), 1);
        assert_eq!(unit.occupancy(), 1);
    }

    #[test]
    fn table_full_boundary() {
        let mut unit: MatchUnit<u32> =
            MatchUnit::new(ipv4_dst_builder(MatchKind::Exact), 3);

        let mut handles = vec![];
        for i in 0..3 {
            handles.push(
                unit.add_entry(&exact([10, 0, 0, i]), i as u32, NO_PRIORITY)
                    .unwrap(),
            );
        }
        assert_eq!(
            unit.add_entry(&exact([10, 0, 0, 9]), 9, NO_PRIORITY),
            Err(MatchError::TableFull)
        );

        unit.delete_entry(handles[1]).unwrap();
        unit.add_entry(&exact([10, 0, 0, 9]), 9, NO_PRIORITY).unwrap();
    }

    #[test]
    fn exact_lookup() {
        let mut unit: MatchUnit<u32> =
            MatchUnit::new(ipv4_dst_builder(MatchKind::Exact), 4);

        let hdl = unit.add_entry(&exact([10, 0, 0, 1]), 7, NO_PRIORITY)
            .unwrap();
        let (h, v) = unit.lookup(&pkt([10, 0, 0, 1])).unwrap();
        assert_eq!(h, hdl);
        assert_eq!(v, 7);
        assert!(unit.lookup(&pkt([10, 0, 0, 2])).is_none());

        // Lookup updates the per-entry counters.
        let counters = unit.counters(hdl).unwrap();
        assert_eq!(counters.packets, 1);
        assert_eq!(counters.bytes, 100);
    }

    #[test]
    fn lpm_longest_prefix_wins() {
        let mut unit: MatchUnit<&str> =
            MatchUnit::new(ipv4_dst_builder(MatchKind::Lpm), 4);

        let lpm = |key: [u8; 4], prefix_len| {
            vec![MatchParam::Lpm { key: ByteKey::from(key), prefix_len }]
        };
        unit.add_entry(&lpm([10, 0, 0, 0], 8), "A", NO_PRIORITY).unwrap();
        unit.add_entry(&lpm([10, 0, 0, 0], 24), "B", NO_PRIORITY).unwrap();

        let (_, v) = unit.lookup(&pkt([10, 0, 0, 5])).unwrap();
        assert_eq!(v, "B");
        let (_, v) = unit.lookup(&pkt([10, 1, 2, 3])).unwrap();
        assert_eq!(v, "A");
        assert!(unit.lookup(&pkt([11, 0, 0, 1])).is_none());
    }

    #[test]
    fn ternary_priority() {
        let mut unit: MatchUnit<&str> =
            MatchUnit::new(ipv4_dst_builder(MatchKind::Ternary), 4);

        let tern = |key: [u8; 4], mask: [u8; 4]| {
            vec![MatchParam::Ternary {
                key: ByteKey::from(key),
                mask: ByteKey::from(mask),
            }]
        };

        // A wildcard-all entry at low priority and a specific one at
        // high priority.
        unit.add_entry(&tern([0, 0, 0, 0], [0, 0, 0, 0]), "A", 1).unwrap();
        let b = unit
            .add_entry(
                &tern([0, 0, 0, 0xab], [0xff, 0xff, 0xff, 0xff]),
                "B",
                100,
            )
            .unwrap();

        let (_, v) = unit.lookup(&pkt([0, 0, 0, 0xab])).unwrap();
        assert_eq!(v, "B");

        unit.delete_entry(b).unwrap();
        let (_, v) = unit.lookup(&pkt([0, 0, 0, 0xab])).unwrap();
        assert_eq!(v, "A");

        // Same key and mask at a different priority is not a duplicate.
        unit.add_entry(&tern([0, 0, 0, 0], [0, 0, 0, 0]), "C", 50).unwrap();
        assert_eq!(
            unit.add_entry(&tern([0, 0, 0, 0], [0, 0, 0, 0]), "D", 50),
            Err(MatchError::DuplicateEntry)
        );
        let (_, v) = unit.lookup(&pkt([9, 9, 9, 9])).unwrap();
        assert_eq!(v, "C");
    }

    #[test]
    fn modify_keeps_handle() {
        let mut unit: MatchUnit<u32> =
            MatchUnit::new(ipv4_dst_builder(MatchKind::Exact), 4);

        let hdl = unit.add_entry(&exact([10, 0, 0, 1]), 1, NO_PRIORITY)
            .unwrap();
        unit.modify_entry(hdl, 2).unwrap();
        assert_eq!(unit.get_value(hdl).unwrap(), 2);
        let (h, v) = unit.lookup(&pkt([10, 0, 0, 1])).unwrap();
        assert_eq!((h, v), (hdl, 2));
    }

    #[test]
    fn get_entry_round_trip() {
        let mut unit: MatchUnit<u32> =
            MatchUnit::new(ipv4_dst_builder(MatchKind::Exact), 4);

        let params = exact([10, 0, 0, 1]);
        let hdl = unit.add_entry(&params, 1, NO_PRIORITY).unwrap();

        let dump = unit.get_entry(hdl).unwrap();
        assert_eq!(dump.handle, hdl);
        assert_eq!(dump.params, params);
        assert_eq!(dump.value, 1);

        assert_eq!(
            unit.get_entry_from_key(&params, NO_PRIORITY).unwrap(),
            hdl
        );
        assert_eq!(
            unit.get_entry_from_key(&exact([10, 0, 0, 2]), NO_PRIORITY),
            Err(MatchError::InvalidHandle)
        );
    }

    #[test]
    fn sweep_flags_expired() {
        let mut unit: MatchUnit<u32> =
            MatchUnit::new(ipv4_dst_builder(MatchKind::Exact), 4);

        let a = unit.add_entry(&exact([10, 0, 0, 1]), 1, NO_PRIORITY)
            .unwrap();
        let b = unit.add_entry(&exact([10, 0, 0, 2]), 2, NO_PRIORITY)
            .unwrap();
        unit.set_ttl(a, 1).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));

        // Entry b has no TTL and never expires.
        let expired = unit.sweep();
        assert_eq!(expired, vec![a]);
        assert!(unit.get_value(b).is_ok());
    }

    #[test]
    fn snapshot_restore_identical() {
        let mut unit: MatchUnit<u32> =
            MatchUnit::new(ipv4_dst_builder(MatchKind::Exact), 4);

        let a = unit.add_entry(&exact([10, 0, 0, 1]), 1, NO_PRIORITY)
            .unwrap();
        let b = unit.add_entry(&exact([10, 0, 0, 2]), 2, NO_PRIORITY)
            .unwrap();
        // Delete and re-add so slot 0's version is non-zero.
        unit.delete_entry(a).unwrap();
        let a2 = unit.add_entry(&exact([10, 0, 0, 3]), 3, NO_PRIORITY)
            .unwrap();
        unit.set_ttl(a2, 5_000).unwrap();

        let records: Vec<String> = unit
            .snapshot()
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect();

        unit.reset();
        assert_eq!(unit.occupancy(), 0);
        for line in &records {
            let rec: EntryRecord<u32> = serde_json::from_str(line).unwrap();
            unit.restore(rec).unwrap();
        }

        let records2: Vec<String> = unit
            .snapshot()
            .iter()
            .map(|r| serde_json::to_string(r).unwrap())
            .collect();
        assert_eq!(records, records2);

        // Previously valid handles are valid with identical values.
        assert_eq!(unit.get_value(a2).unwrap(), 3);
        assert_eq!(unit.get_value(b).unwrap(), 2);
        assert_eq!(unit.get_entry(a2).unwrap().ttl_ms, 5_000);
        assert_eq!(unit.get_value(a), Err(MatchError::ExpiredHandle));

        let (_, v) = unit.lookup(&pkt([10, 0, 0, 3])).unwrap();
        assert_eq!(v, 3);
    }
}
