// Copyright (C) 2020-2025  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Key/value stores with per-entry expiration.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use bherror::Error;

/// Error returned by a [`TtlCache`].
#[derive(strum_macros::Display, Debug, PartialEq, Clone)]
pub enum CacheError {
    /// The backing store cannot be reached or is corrupted.
    #[strum(to_string = "Cache unavailable")]
    Unavailable,
}

impl bherror::BhError for CacheError {}

/// The [`bherror::Result`] type with the error type of [`CacheError`].
pub type CacheResult<T> = bherror::Result<T, CacheError>;

/// A key/value store whose entries expire `ttl` seconds after they are written.
///
/// All times are seconds since the Unix epoch. Every method is atomic with respect to the
/// others.
pub trait TtlCache<V>: Send + Sync {
    /// Inserts `value` unless a live entry exists for `key`.
    ///
    /// Returns `true` if the value was inserted.
    fn insert_if_absent(&self, key: &str, value: V, ttl: u64, now: u64) -> CacheResult<bool>;

    /// Inserts or replaces the entry for `key`.
    fn set(&self, key: &str, value: V, ttl: u64, now: u64) -> CacheResult<()>;

    /// Returns the live entry for `key`.
    fn get(&self, key: &str, now: u64) -> CacheResult<Option<V>>;

    /// Removes and returns the live entry for `key`.
    fn take(&self, key: &str, now: u64) -> CacheResult<Option<V>>;
}

struct Entry<V> {
    value: V,
    expires_at: u64,
}

/// A process local [`TtlCache`].
///
/// Expired entries are dropped lazily, whenever a new entry is written.
pub struct InMemoryTtlCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> Default for InMemoryTtlCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> InMemoryTtlCache<V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, HashMap<String, Entry<V>>>> {
        self.entries
            .lock()
            .map_err(|_| Error::root(CacheError::Unavailable))
    }

    fn live_entries(&self, now: u64) -> CacheResult<MutexGuard<'_, HashMap<String, Entry<V>>>> {
        let mut entries = self.lock()?;
        entries.retain(|_, entry| entry.expires_at > now);

        Ok(entries)
    }
}

impl<V: Clone + Send> TtlCache<V> for InMemoryTtlCache<V> {
    fn insert_if_absent(&self, key: &str, value: V, ttl: u64, now: u64) -> CacheResult<bool> {
        let mut entries = self.live_entries(now)?;

        if entries.contains_key(key) {
            return Ok(false);
        }

        entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: now.saturating_add(ttl),
            },
        );

        Ok(true)
    }

    fn set(&self, key: &str, value: V, ttl: u64, now: u64) -> CacheResult<()> {
        self.live_entries(now)?.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: now.saturating_add(ttl),
            },
        );

        Ok(())
    }

    fn get(&self, key: &str, now: u64) -> CacheResult<Option<V>> {
        let entries = self.lock()?;

        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    fn take(&self, key: &str, now: u64) -> CacheResult<Option<V>> {
        let mut entries = self.lock()?;

        Ok(entries
            .remove(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[test]
    fn insert_if_absent_inserts_once() {
        let cache = InMemoryTtlCache::new();

        assert!(cache.insert_if_absent("id", true, 60, 1000).unwrap());
        assert!(!cache.insert_if_absent("id", true, 60, 1001).unwrap());
        assert_eq!(cache.get("id", 1059).unwrap(), Some(true));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = InMemoryTtlCache::new();
        cache.set("code", 1234, 10, 1000).unwrap();

        assert_eq!(cache.get("code", 1009).unwrap(), Some(1234));
        assert_eq!(cache.get("code", 1010).unwrap(), None);
        assert!(cache.insert_if_absent("code", 5678, 10, 1010).unwrap());
        assert_eq!(cache.get("code", 1011).unwrap(), Some(5678));
    }

    #[test]
    fn take_removes_the_entry() {
        let cache = InMemoryTtlCache::new();
        cache.set("code", 1234, 10, 1000).unwrap();

        assert_eq!(cache.take("code", 1001).unwrap(), Some(1234));
        assert_eq!(cache.take("code", 1001).unwrap(), None);
        assert_eq!(cache.get("code", 1001).unwrap(), None);
    }

    #[test]
    fn set_replaces_the_entry() {
        let cache = InMemoryTtlCache::new();
        cache.set("code", 1, 10, 1000).unwrap();
        cache.set("code", 2, 10, 1000).unwrap();

        assert_eq!(cache.get("code", 1000).unwrap(), Some(2));
    }

    #[test]
    fn concurrent_inserts_admit_a_single_winner() {
        let cache = Arc::new(InMemoryTtlCache::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if cache.insert_if_absent("id", true, 60, 1000).unwrap() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
