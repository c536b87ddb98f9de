// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::ops::Deref;
use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

/// A fixed-layout byte string.
///
/// Match keys, masks, and action arguments are all carried as byte
/// strings; the layout (field order and widths) is fixed by the key
/// builder at table-creation time. Serialized forms use hex, matching
/// the persisted snapshot format.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ByteKey {
    inner: Vec<u8>,
}

impl ByteKey {
    pub const fn new() -> Self {
        Self { inner: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { inner: Vec::with_capacity(cap) }
    }

    /// A key of `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        Self { inner: vec![0; len] }
    }

    /// A key of `len` 0xff bytes.
    pub fn ones(len: usize) -> Self {
        Self { inner: vec![0xff; len] }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner
    }

    pub fn push(&mut self, b: u8) {
        self.inner.push(b);
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.inner.extend_from_slice(bytes);
    }

    /// Append `n` copies of `b`.
    pub fn extend_repeated(&mut self, b: u8, n: usize) {
        self.inner.resize(self.inner.len() + n, b);
    }

    /// AND this key in place with `mask`.
    ///
    /// The two must be the same length; the key builder guarantees this
    /// for every mask it constructs.
    pub fn and_with(&mut self, mask: &ByteKey) {
        assert_eq!(self.inner.len(), mask.inner.len());
        for (b, m) in self.inner.iter_mut().zip(mask.inner.iter()) {
            *b &= m;
        }
    }

    /// The number of set bits.
    pub fn count_ones(&self) -> u32 {
        self.inner.iter().map(|b| b.count_ones()).sum()
    }

    /// The length of the leading run of set bits, in bits.
    ///
    /// Used to recover a prefix length from an LPM-style mask.
    pub fn leading_ones(&self) -> u32 {
        let mut count = 0;
        for b in &self.inner {
            let ones = b.leading_ones();
            count += ones;
            if ones < 8 {
                break;
            }
        }
        count
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(self.inner.len() * 2);
        for b in &self.inner {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    pub fn from_hex(hex: &str) -> Result<Self, String> {
        if hex.len() % 2 != 0 {
            return Err(format!("odd-length hex string: {}", hex));
        }

        let mut inner = Vec::with_capacity(hex.len() / 2);
        for i in (0..hex.len()).step_by(2) {
            let byte = u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("bad hex byte at {}: {}", i, e))?;
            inner.push(byte);
        }

        Ok(Self { inner })
    }

    /// A mask with the first `prefix_len` bits set, `len` bytes long.
    ///
    /// Panics if `prefix_len` exceeds the key width; callers validate
    /// prefix lengths before building masks.
    pub fn prefix_mask(len: usize, prefix_len: u32) -> Self {
        assert!(prefix_len as usize <= len * 8);
        let mut inner = vec![0u8; len];
        let full = (prefix_len / 8) as usize;
        for b in inner.iter_mut().take(full) {
            *b = 0xff;
        }
        let rem = prefix_len % 8;
        if rem != 0 {
            inner[full] = !(0xffu8 >> rem);
        }
        Self { inner }
    }
}

impl Deref for ByteKey {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner
    }
}

impl AsRef<[u8]> for ByteKey {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl From<Vec<u8>> for ByteKey {
    fn from(inner: Vec<u8>) -> Self {
        Self { inner }
    }
}

impl From<&[u8]> for ByteKey {
    fn from(bytes: &[u8]) -> Self {
        Self { inner: bytes.to_vec() }
    }
}

impl<const N: usize> From<[u8; N]> for ByteKey {
    fn from(bytes: [u8; N]) -> Self {
        Self { inner: bytes.to_vec() }
    }
}

impl Display for ByteKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for ByteKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ByteKey({})", self.to_hex())
    }
}

impl Serialize for ByteKey {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ByteKey {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let key = ByteKey::from([0xde, 0xad, 0x00, 0xef]);
        assert_eq!(key.to_hex(), "dead00ef");
        assert_eq!(ByteKey::from_hex("dead00ef").unwrap(), key);
        assert!(ByteKey::from_hex("abc").is_err());
        assert!(ByteKey::from_hex("zz").is_err());
    }

    #[test]
    fn prefix_mask() {
        let mask = ByteKey::prefix_mask(4, 24);
        assert_eq!(mask.bytes(), &[0xff, 0xff, 0xff, 0x00]);
        assert_eq!(mask.leading_ones(), 24);

        let mask = ByteKey::prefix_mask(4, 11);
        assert_eq!(mask.bytes(), &[0xff, 0xe0, 0x00, 0x00]);
        assert_eq!(mask.leading_ones(), 11);
        assert_eq!(mask.count_ones(), 11);

        let mask = ByteKey::prefix_mask(2, 0);
        assert_eq!(mask.bytes(), &[0x00, 0x00]);
        assert_eq!(mask.leading_ones(), 0);
    }

    #[test]
    fn and_with() {
        let mut key = ByteKey::from([0xab, 0xcd]);
        key.and_with(&ByteKey::from([0xff, 0x00]));
        assert_eq!(key.bytes(), &[0xab, 0x00]);
    }
}
