// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments and TTLs.

use core::ops::Add;
use core::time::Duration;
use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;

/// A moment in monotonic time.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Moment {
    inner: Instant,
}

impl Moment {
    pub fn now() -> Self {
        Self { inner: Instant::now() }
    }

    /// Milliseconds elapsed since `earlier`, saturating to zero if
    /// `earlier` is in the future.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        self.inner
            .saturating_duration_since(earlier.inner)
            .as_millis() as u64
    }
}

impl Add<Duration> for Moment {
    type Output = Self;

    fn add(self, delta: Duration) -> Self {
        Self { inner: self.inner + delta }
    }
}

/// The Time To Live in milliseconds. A zero TTL means the entry does
/// not age.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ttl(u64);

impl Ttl {
    pub const fn new_millis(millis: u64) -> Self {
        Ttl(millis)
    }

    pub const fn new_seconds(seconds: u64) -> Self {
        Ttl(seconds * MILLIS)
    }

    pub fn as_milliseconds(&self) -> u64 {
        self.0
    }

    /// Is an entry last touched at `last_hit_ms` (milliseconds on some
    /// shared epoch) expired at `now_ms`? A zero TTL never expires.
    pub fn is_expired(&self, last_hit_ms: u64, now_ms: u64) -> bool {
        self.0 != 0 && now_ms.saturating_sub(last_hit_ms) >= self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ttl_expiry() {
        let ttl = Ttl::new_seconds(2);
        assert_eq!(ttl.as_milliseconds(), 2_000);
        assert!(!ttl.is_expired(1_000, 2_000));
        assert!(ttl.is_expired(1_000, 3_000));
        assert!(ttl.is_expired(1_000, 10_000));

        // A zero TTL never expires.
        let ttl = Ttl::new_millis(0);
        assert!(!ttl.is_expired(0, u64::MAX));
    }

    #[test]
    fn moment_delta() {
        let t0 = Moment::now();
        let t1 = t0 + Duration::from_millis(1_500);
        assert_eq!(t1.delta_as_millis(t0), 1_500);
        assert_eq!(t0.delta_as_millis(t1), 0);
    }
}
