// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Pluggable selection hashes.
//!
//! Group selection hashes the selector key bytes of the current packet
//! to pick a member. Functors are registered by name so a runtime
//! configuration can refer to them; `crc32` is always available.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::RwLock;

/// A hash over selector key bytes.
pub trait SelectionHash: Send + Sync {
    fn hash(&self, data: &[u8]) -> u64;
}

/// The default functor.
pub struct Crc32Hash;

impl SelectionHash for Crc32Hash {
    fn hash(&self, data: &[u8]) -> u64 {
        crc32fast::hash(data) as u64
    }
}

type Registry = RwLock<BTreeMap<String, Arc<dyn SelectionHash>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = BTreeMap::<String, Arc<dyn SelectionHash>>::new();
        map.insert("crc32".to_string(), Arc::new(Crc32Hash));
        RwLock::new(map)
    })
}

/// Register a functor under `name`, replacing any previous one.
pub fn register(name: &str, hash: Arc<dyn SelectionHash>) {
    registry().write().unwrap().insert(name.to_string(), hash);
}

/// Find the functor registered under `name`.
pub fn find(name: &str) -> Option<Arc<dyn SelectionHash>> {
    registry().read().unwrap().get(name).cloned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crc32_registered() {
        let h = find("crc32").unwrap();
        // Deterministic for a given input.
        assert_eq!(h.hash(b"abcd"), h.hash(b"abcd"));
        assert_ne!(h.hash(b"abcd"), h.hash(b"abce"));
        assert!(find("no-such-hash").is_none());
    }

    #[test]
    fn register_custom() {
        struct First;
        impl SelectionHash for First {
            fn hash(&self, _data: &[u8]) -> u64 {
                0
            }
        }

        register("first", Arc::new(First));
        assert_eq!(find("first").unwrap().hash(b"anything"), 0);
    }
}
