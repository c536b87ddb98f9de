// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Match-key construction.
//!
//! A table's key schema is declared field by field and then frozen with
//! [`MatchKeyBuilder::build()`]. From then on the builder turns live
//! packets and control-plane match parameters into the canonical key
//! form the match units store and compare: a fixed-layout byte string,
//! already masked, with fields laid out in implementation-preferred
//! order (exact-like fields before ternary/range ones, so that the
//! maskable region of the key is contiguous). The original declaration
//! order is remembered so entries can be read back as the caller wrote
//! them.

use crate::api::ByteKey;
use crate::api::MatchError;
use crate::api::MatchKind;
use crate::api::MatchParam;
use crate::api::MatchResult;
use crate::api::NO_PRIORITY;
use crate::engine::phv::FieldRef;
use crate::engine::phv::FieldSource;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;

/// One declared field of a table's match key.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FieldDecl {
    pub name: String,
    pub source: FieldRef,
    pub bit_width: u32,
    pub kind: MatchKind,
    /// Optional per-field mask, applied to every constructed and
    /// looked-up key. Not allowed on VALID or RANGE fields.
    pub mask: Option<ByteKey>,
}

impl FieldDecl {
    /// Bytes this field occupies in the canonical key.
    fn nbytes(&self) -> usize {
        match self.kind {
            MatchKind::Valid => 1,
            _ => (self.bit_width as usize + 7) / 8,
        }
    }
}

/// The stored form of a match key: canonical key bytes plus the
/// algorithm-specific metadata the owning unit interprets.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct EntryData {
    pub key: ByteKey,
    /// Ternary: the mask. Range: upper bounds at range-field offsets,
    /// mask bytes elsewhere. Absent for exact/LPM entries.
    pub mask: Option<ByteKey>,
    /// Prefix length in bits over the whole canonical key; LPM only.
    pub prefix_len: u32,
    pub priority: i32,
}

/// Builds canonical keys for one table.
///
/// Immutable once [`build()`](Self::build) has run; shared by reference
/// by every lookup and conversion into the table.
#[derive(Clone, Debug)]
pub struct MatchKeyBuilder {
    fields: Vec<FieldDecl>,
    built: bool,
    /// Permuted position -> original field index.
    order: Vec<usize>,
    /// Original field index -> permuted position.
    position: Vec<usize>,
    /// Permuted position -> byte offset in the canonical key.
    offsets: Vec<usize>,
    key_width: usize,
    big_mask: Option<ByteKey>,
    kind: MatchKind,
}

// Sort rank grouping exact-like fields ahead of ternary/range ones.
fn rank(kind: MatchKind) -> u8 {
    match kind {
        MatchKind::Valid => 0,
        MatchKind::Exact => 1,
        MatchKind::Lpm => 2,
        MatchKind::Ternary => 3,
        MatchKind::Range => 4,
    }
}

impl Default for MatchKeyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchKeyBuilder {
    pub fn new() -> Self {
        Self {
            fields: vec![],
            built: false,
            order: vec![],
            position: vec![],
            offsets: vec![],
            key_width: 0,
            big_mask: None,
            kind: MatchKind::Exact,
        }
    }

    /// Register one match field. Fields are declared in the order the
    /// control plane supplies parameters.
    pub fn push_back_field(
        &mut self,
        source: FieldRef,
        bit_width: u32,
        kind: MatchKind,
        name: &str,
    ) {
        assert!(!self.built);
        self.fields.push(FieldDecl {
            name: name.to_string(),
            source,
            bit_width,
            kind,
            mask: None,
        });
    }

    /// Register a field matched on a sub-range of its bits.
    pub fn push_back_field_masked(
        &mut self,
        source: FieldRef,
        bit_width: u32,
        kind: MatchKind,
        mask: ByteKey,
        name: &str,
    ) {
        assert!(!self.built);
        assert!(kind != MatchKind::Valid && kind != MatchKind::Range);
        let decl = FieldDecl {
            name: name.to_string(),
            source,
            bit_width,
            kind,
            mask: None,
        };
        assert_eq!(mask.len(), decl.nbytes());
        self.fields.push(FieldDecl { mask: Some(mask), ..decl });
    }

    /// Freeze the schema: fix the field permutation, per-field offsets,
    /// the combined mask, and the table's match kind. Idempotent.
    pub fn build(&mut self) {
        if self.built {
            return;
        }

        let mut order: Vec<usize> = (0..self.fields.len()).collect();
        order.sort_by_key(|&i| rank(self.fields[i].kind));

        let mut position = vec![0; self.fields.len()];
        let mut offsets = Vec::with_capacity(order.len());
        let mut off = 0;
        for (p, &i) in order.iter().enumerate() {
            position[i] = p;
            offsets.push(off);
            off += self.fields[i].nbytes();
        }

        if self.fields.iter().any(|f| f.mask.is_some()) {
            let mut big_mask = ByteKey::with_capacity(off);
            for &i in &order {
                let f = &self.fields[i];
                match &f.mask {
                    Some(m) => big_mask.extend_from_slice(m),
                    None => big_mask.extend_repeated(0xff, f.nbytes()),
                }
            }
            self.big_mask = Some(big_mask);
        }

        let mut lpm = 0;
        let mut kind = MatchKind::Exact;
        for f in &self.fields {
            match f.kind {
                MatchKind::Range => {
                    kind = MatchKind::Range;
                    break;
                }
                MatchKind::Ternary => kind = MatchKind::Ternary,
                MatchKind::Lpm => lpm += 1,
                _ => (),
            }
        }
        if kind == MatchKind::Exact && lpm > 0 {
            // A single LPM field gives an LPM table; several degrade to
            // ternary, where each prefix becomes a mask.
            kind = if lpm == 1 { MatchKind::Lpm } else { MatchKind::Ternary };
        }

        self.order = order;
        self.position = position;
        self.offsets = offsets;
        self.key_width = off;
        self.kind = kind;
        self.built = true;
    }

    pub fn kind(&self) -> MatchKind {
        assert!(self.built);
        self.kind
    }

    /// Width of the canonical key in bytes.
    pub fn key_width(&self) -> usize {
        assert!(self.built);
        self.key_width
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn big_mask(&self) -> Option<&ByteKey> {
        self.big_mask.as_ref()
    }

    /// Build the canonical lookup key from a live packet.
    pub fn build_key(&self, pkt: &dyn FieldSource) -> ByteKey {
        assert!(self.built);
        let mut key = ByteKey::with_capacity(self.key_width);

        for &i in &self.order {
            let f = &self.fields[i];
            if f.kind == MatchKind::Valid {
                key.push(u8::from(pkt.is_valid(f.source.header)));
                continue;
            }

            let n = f.nbytes();
            if !pkt.is_valid(f.source.header) {
                // Absent fields read as zero.
                key.extend_repeated(0, n);
                continue;
            }

            let bytes = pkt.field_bytes(f.source);
            if bytes.len() >= n {
                key.extend_from_slice(&bytes[bytes.len() - n..]);
            } else {
                key.extend_repeated(0, n - bytes.len());
                key.extend_from_slice(bytes);
            }
        }

        if let Some(big_mask) = &self.big_mask {
            key.and_with(big_mask);
        }

        key
    }

    /// Reject parameter lists that do not fit the schema.
    pub fn sanity_check(&self, params: &[MatchParam]) -> MatchResult<()> {
        assert!(self.built);
        if params.len() != self.fields.len() {
            return Err(MatchError::BadMatchKey);
        }

        for (param, f) in params.iter().zip_eq(&self.fields) {
            if param.kind() != f.kind {
                return Err(MatchError::BadMatchKey);
            }

            let n = f.nbytes();
            let ok = match param {
                MatchParam::Exact(key) => key.len() == n,
                MatchParam::Lpm { key, prefix_len } => {
                    key.len() == n && *prefix_len <= f.bit_width
                }
                MatchParam::Ternary { key, mask } => {
                    key.len() == n && mask.len() == n
                }
                MatchParam::Range { low, high } => {
                    low.len() == n && high.len() == n && low <= high
                }
                MatchParam::Valid(_) => true,
            };
            if !ok {
                return Err(MatchError::BadMatchKey);
            }
        }

        Ok(())
    }

    /// Compile match parameters into the stored entry form for this
    /// table's match kind. The caller has already run
    /// [`sanity_check()`](Self::sanity_check).
    pub fn params_to_entry(
        &self,
        params: &[MatchParam],
    ) -> MatchResult<EntryData> {
        assert!(self.built);
        match self.kind {
            MatchKind::Exact => self.params_to_exact(params),
            MatchKind::Lpm => self.params_to_lpm(params),
            MatchKind::Ternary | MatchKind::Range => {
                self.params_to_masked(params)
            }
            MatchKind::Valid => unreachable!("no valid-kind tables"),
        }
    }

    fn params_to_exact(
        &self,
        params: &[MatchParam],
    ) -> MatchResult<EntryData> {
        let mut key = ByteKey::with_capacity(self.key_width);
        for &i in &self.order {
            match &params[i] {
                MatchParam::Exact(k) => key.extend_from_slice(k),
                MatchParam::Valid(v) => key.push(u8::from(*v)),
                _ => return Err(MatchError::BadMatchKey),
            }
        }

        if let Some(big_mask) = &self.big_mask {
            key.and_with(big_mask);
        }

        Ok(EntryData {
            key,
            mask: None,
            prefix_len: 0,
            priority: NO_PRIORITY,
        })
    }

    fn params_to_lpm(&self, params: &[MatchParam]) -> MatchResult<EntryData> {
        let mut key = ByteKey::with_capacity(self.key_width);
        let mut prefix_len = 0;
        for &i in &self.order {
            match &params[i] {
                MatchParam::Exact(k) => {
                    key.extend_from_slice(k);
                    prefix_len += 8 * k.len() as u32;
                }
                MatchParam::Valid(v) => {
                    key.push(u8::from(*v));
                    prefix_len += 8;
                }
                MatchParam::Lpm { key: k, prefix_len: pfx } => {
                    // The permutation puts the LPM field last, so the
                    // accumulated prefix is a contiguous leading run.
                    key.extend_from_slice(k);
                    prefix_len += pfx;
                }
                _ => return Err(MatchError::BadMatchKey),
            }
        }

        key.and_with(&ByteKey::prefix_mask(self.key_width, prefix_len));
        if let Some(big_mask) = &self.big_mask {
            key.and_with(big_mask);
        }

        Ok(EntryData { key, mask: None, prefix_len, priority: NO_PRIORITY })
    }

    fn params_to_masked(
        &self,
        params: &[MatchParam],
    ) -> MatchResult<EntryData> {
        let mut key = ByteKey::with_capacity(self.key_width);
        let mut mask = ByteKey::with_capacity(self.key_width);

        for &i in &self.order {
            let f = &self.fields[i];
            let n = f.nbytes();
            let mut field_mask = match &params[i] {
                MatchParam::Exact(k) => {
                    key.extend_from_slice(k);
                    ByteKey::ones(n)
                }
                MatchParam::Valid(v) => {
                    key.push(u8::from(*v));
                    ByteKey::ones(1)
                }
                MatchParam::Lpm { key: k, prefix_len } => {
                    key.extend_from_slice(k);
                    ByteKey::prefix_mask(n, *prefix_len)
                }
                MatchParam::Ternary { key: k, mask: m } => {
                    key.extend_from_slice(k);
                    m.clone()
                }
                MatchParam::Range { low, high } => {
                    // The "mask" region of a range field carries the
                    // upper bound; the key carries the lower.
                    key.extend_from_slice(low);
                    high.clone()
                }
            };

            if let Some(m) = &f.mask {
                field_mask.and_with(m);
            }
            mask.extend_from_slice(&field_mask);
        }

        // Canonicalize: stored keys are pre-masked so the equality and
        // prefix compares never re-mask. Range bounds are left intact.
        let mut masked = ByteKey::with_capacity(self.key_width);
        for (p, &i) in self.order.iter().enumerate() {
            let f = &self.fields[i];
            let off = self.offsets[p];
            let n = f.nbytes();
            if f.kind == MatchKind::Range {
                masked.extend_from_slice(&key[off..off + n]);
            } else {
                for b in 0..n {
                    masked.push(key[off + b] & mask[off + b]);
                }
            }
        }

        Ok(EntryData {
            key: masked,
            mask: Some(mask),
            prefix_len: 0,
            priority: NO_PRIORITY,
        })
    }

    /// Reconstruct the original-order parameter list from a stored
    /// entry, for read-back.
    pub fn entry_to_params(&self, entry: &EntryData) -> Vec<MatchParam> {
        assert!(self.built);
        let mut params = Vec::with_capacity(self.fields.len());

        for (i, f) in self.fields.iter().enumerate() {
            let p = self.position[i];
            let off = self.offsets[p];
            let n = f.nbytes();
            let key_region = ByteKey::from(&entry.key[off..off + n]);

            let param = match f.kind {
                MatchKind::Valid => MatchParam::Valid(entry.key[off] != 0),
                MatchKind::Exact => MatchParam::Exact(key_region),
                MatchKind::Lpm => {
                    let prefix_len = match &entry.mask {
                        // Inside a ternary/range key the prefix is
                        // recovered from the stored mask region.
                        Some(mask) => ByteKey::from(&mask[off..off + n])
                            .leading_ones(),
                        None => {
                            entry.prefix_len.saturating_sub(self.bits_before(p))
                        }
                    };
                    MatchParam::Lpm { key: key_region, prefix_len }
                }
                MatchKind::Ternary => {
                    let mask = entry.mask.as_ref().expect("ternary mask");
                    MatchParam::Ternary {
                        key: key_region,
                        mask: ByteKey::from(&mask[off..off + n]),
                    }
                }
                MatchKind::Range => {
                    let mask = entry.mask.as_ref().expect("range bounds");
                    MatchParam::Range {
                        low: key_region,
                        high: ByteKey::from(&mask[off..off + n]),
                    }
                }
            };
            params.push(param);
        }

        params
    }

    /// Does `entry` match the lookup key `key`, for ternary and range
    /// kinds? Exact and LPM compares live in their units' hash maps.
    pub fn entry_matches(&self, entry: &EntryData, key: &ByteKey) -> bool {
        let mask = entry.mask.as_ref().expect("masked entry");

        for (p, &i) in self.order.iter().enumerate() {
            let f = &self.fields[i];
            let off = self.offsets[p];
            let n = f.nbytes();

            if f.kind == MatchKind::Range {
                let region = &key[off..off + n];
                if region < &entry.key[off..off + n]
                    || region > &mask[off..off + n]
                {
                    return false;
                }
            } else {
                for b in off..off + n {
                    if key[b] & mask[b] != entry.key[b] {
                        return false;
                    }
                }
            }
        }

        true
    }

    // Bits contributed by fields ahead of permuted position `p`.
    fn bits_before(&self, p: usize) -> u32 {
        self.order[..p]
            .iter()
            .map(|&i| 8 * self.fields[i].nbytes() as u32)
            .sum()
    }
}
