// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet-field source boundary.
//!
//! Packet parsing and deparsing live outside this engine. The engine
//! reads field values through [`FieldSource`]; the concrete [`Phv`]
//! (packet header vector) here is the reference implementation used by
//! consumers and tests.

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// Identifies a header instance known to the field source.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct HeaderId(pub u32);

/// Identifies one field within a header instance.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct FieldRef {
    pub header: HeaderId,
    pub field: u32,
}

impl FieldRef {
    pub fn new(header: u32, field: u32) -> Self {
        Self { header: HeaderId(header), field }
    }
}

/// Read access to a parsed packet's field values.
///
/// Field bytes are in network order, most significant byte first. The
/// key builder only asks for a field's bytes when its header is
/// currently valid.
pub trait FieldSource {
    fn field_bytes(&self, field: FieldRef) -> &[u8];

    fn is_valid(&self, header: HeaderId) -> bool;

    /// The length of the packet this source was parsed from, used for
    /// byte counters.
    fn packet_len(&self) -> usize;
}

#[derive(Clone, Debug, Default)]
struct PhvHeader {
    valid: bool,
    fields: Vec<Vec<u8>>,
}

/// A packet header vector: per-header validity plus field byte values.
#[derive(Clone, Debug, Default)]
pub struct Phv {
    headers: BTreeMap<HeaderId, PhvHeader>,
    packet_len: usize,
}

impl Phv {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set_packet_len(&mut self, len: usize) {
        self.packet_len = len;
    }

    /// Register a header with `num_fields` fields, all initially empty
    /// and the header invalid.
    pub fn push_header(&mut self, header: HeaderId, num_fields: usize) {
        self.headers.insert(
            header,
            PhvHeader { valid: false, fields: vec![Vec::new(); num_fields] },
        );
    }

    pub fn set_valid(&mut self, header: HeaderId, valid: bool) {
        self.headers
            .get_mut(&header)
            .expect("unknown header in PHV")
            .valid = valid;
    }

    /// Set a field's bytes and mark its header valid.
    pub fn set_field(&mut self, field: FieldRef, bytes: &[u8]) {
        let hdr = self
            .headers
            .get_mut(&field.header)
            .expect("unknown header in PHV");
        hdr.fields[field.field as usize] = bytes.to_vec();
        hdr.valid = true;
    }
}

impl FieldSource for Phv {
    fn field_bytes(&self, field: FieldRef) -> &[u8] {
        let hdr =
            self.headers.get(&field.header).expect("unknown header in PHV");
        &hdr.fields[field.field as usize]
    }

    fn is_valid(&self, header: HeaderId) -> bool {
        self.headers.get(&header).map(|h| h.valid).unwrap_or(false)
    }

    fn packet_len(&self) -> usize {
        self.packet_len
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn phv_validity() {
        let mut phv = Phv::new();
        phv.push_header(HeaderId(0), 2);
        assert!(!phv.is_valid(HeaderId(0)));
        assert!(!phv.is_valid(HeaderId(9)));

        phv.set_field(FieldRef::new(0, 1), &[0xab, 0xcd]);
        assert!(phv.is_valid(HeaderId(0)));
        assert_eq!(phv.field_bytes(FieldRef::new(0, 1)), &[0xab, 0xcd]);
        assert_eq!(phv.field_bytes(FieldRef::new(0, 0)), &[] as &[u8]);

        phv.set_valid(HeaderId(0), false);
        assert!(!phv.is_valid(HeaderId(0)));
    }
}
