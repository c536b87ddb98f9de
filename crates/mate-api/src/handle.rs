// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Versioned handles to table entries, members, and groups.
//!
//! A handle packs an 8-bit version into the upper byte and a 24-bit
//! slot index into the lower three bytes. The slot index identifies a
//! storage slot which is reused after deletion; the version increments
//! on every delete, so a handle captured before a delete/reuse cycle is
//! detectable as stale. This encoding is part of the persisted-state
//! contract and must not change.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Number of bits carrying the slot index.
pub const HDL_INDEX_BITS: u32 = 24;

/// Mask extracting the slot index from a raw handle.
pub const HDL_INDEX_MASK: u32 = (1 << HDL_INDEX_BITS) - 1;

/// The largest representable slot index, and therefore the hard cap on
/// table, member pool, and group pool capacity.
pub const HDL_MAX_INDEX: u32 = HDL_INDEX_MASK;

macro_rules! versioned_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
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
        pub struct $name(u32);

        impl $name {
            /// Pack `index` and `version` into a handle.
            ///
            /// Panics if `index` does not fit in 24 bits; pools are
            /// sized below that bound at construction.
            pub fn new(index: u32, version: u8) -> Self {
                assert!(index <= HDL_MAX_INDEX);
                Self((version as u32) << HDL_INDEX_BITS | index)
            }

            /// The storage slot this handle refers to.
            pub fn index(self) -> u32 {
                self.0 & HDL_INDEX_MASK
            }

            /// The version the slot had when this handle was minted.
            pub fn version(self) -> u8 {
                (self.0 >> HDL_INDEX_BITS) as u8
            }

            /// The raw 32-bit encoding.
            pub fn raw(self) -> u32 {
                self.0
            }

            pub fn from_raw(raw: u32) -> Self {
                Self(raw)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }
    };
}

versioned_handle!(
    /// A handle to a table entry.
    EntryHandle
);

versioned_handle!(
    /// A handle to a member of an indirect table's action pool.
    MemberHandle
);

versioned_handle!(
    /// A handle to a selector group.
    GroupHandle
);

/// The value stored by an indirect table's match unit: a reference to
/// either a member or a group, never both.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum IndirectIndex {
    Member(MemberHandle),
    Group(GroupHandle),
}

impl Display for IndirectIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Member(m) => write!(f, "mbr:{}", m),
            Self::Group(g) => write!(f, "grp:{}", g),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pack_unpack() {
        let hdl = EntryHandle::new(0x00ab_cdef, 0x7f);
        assert_eq!(hdl.raw(), 0x7fab_cdef);
        assert_eq!(hdl.index(), 0x00ab_cdef);
        assert_eq!(hdl.version(), 0x7f);
        assert_eq!(EntryHandle::from_raw(hdl.raw()), hdl);
    }

    #[test]
    #[should_panic]
    fn index_too_wide() {
        let _ = EntryHandle::new(1 << HDL_INDEX_BITS, 0);
    }
}
