/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{borrow::Borrow, hash::Hash, time::Instant};

use parking_lot::Mutex;

/// LRU cache for DNS answers, keeping each entry until the record's
/// TTL expires.
pub(crate) struct DnsCache<K: Hash + Eq, V>(
    Mutex<lru_cache::LruCache<K, CachedValue<V>, ahash::RandomState>>,
);

struct CachedValue<V> {
    value: V,
    valid_until: Instant,
}

impl<K: Hash + Eq, V: Clone> DnsCache<K, V> {
    pub fn with_capacity(capacity: usize) -> Self {
        DnsCache(Mutex::new(lru_cache::LruCache::with_hasher(
            capacity,
            ahash::RandomState::new(),
        )))
    }

    pub fn get<Q: ?Sized>(&self, name: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq,
    {
        let mut cache = self.0.lock();
        let entry = cache.get_mut(name)?;
        if entry.valid_until >= Instant::now() {
            entry.value.clone().into()
        } else {
            cache.remove(name);
            None
        }
    }

    pub fn insert(&self, name: K, value: V, valid_until: Instant) -> V {
        self.0.lock().insert(
            name,
            CachedValue {
                value: value.clone(),
                valid_until,
            },
        );
        value
    }
}
