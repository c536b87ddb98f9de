// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Match parameters as supplied by control-plane callers.

use crate::bytes::ByteKey;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Priority given to an entry whose table kind does not use priorities.
pub const NO_PRIORITY: i32 = -1;

/// Default low priority for ternary/range entries.
pub const LOW_PRIORITY: i32 = 1;

/// Default high priority for ternary/range entries.
pub const HIGH_PRIORITY: i32 = 100;

/// The kind of match a field (or a whole table) performs.
///
/// A table's kind is derived from its fields: any RANGE field makes the
/// table a range table, otherwise any TERNARY field makes it ternary,
/// otherwise a single LPM field makes it LPM, otherwise it is exact.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum MatchKind {
    Exact,
    Lpm,
    Ternary,
    Range,
    Valid,
}

impl Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Exact => "exact",
            Self::Lpm => "lpm",
            Self::Ternary => "ternary",
            Self::Range => "range",
            Self::Valid => "valid",
        };
        write!(f, "{}", s)
    }
}

/// One match parameter, paired positionally with a declared field.
///
/// Parameters are never stored in this form; the key builder compiles
/// them into a canonical key (and mask) at add time and reconstructs
/// them on read-back.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MatchParam {
    Exact(ByteKey),
    Lpm { key: ByteKey, prefix_len: u32 },
    Ternary { key: ByteKey, mask: ByteKey },
    Range { low: ByteKey, high: ByteKey },
    Valid(bool),
}

impl MatchParam {
    pub fn kind(&self) -> MatchKind {
        match self {
            Self::Exact(_) => MatchKind::Exact,
            Self::Lpm { .. } => MatchKind::Lpm,
            Self::Ternary { .. } => MatchKind::Ternary,
            Self::Range { .. } => MatchKind::Range,
            Self::Valid(_) => MatchKind::Valid,
        }
    }
}

impl Display for MatchParam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "{}", key),
            Self::Lpm { key, prefix_len } => {
                write!(f, "{}/{}", key, prefix_len)
            }
            Self::Ternary { key, mask } => write!(f, "{}&&&{}", key, mask),
            Self::Range { low, high } => write!(f, "{}..{}", low, high),
            Self::Valid(v) => write!(f, "valid:{}", v),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display() {
        let p = MatchParam::Lpm {
            key: ByteKey::from([0x0a, 0x00, 0x00, 0x00]),
            prefix_len: 8,
        };
        assert_eq!(p.to_string(), "0a000000/8");
        assert_eq!(p.kind(), MatchKind::Lpm);
    }
}
