//! In-process fallback tier.
//!
//! Entries carry an optional deadline; expired entries are treated as absent
//! on read and removed by [`LocalStore::sweep_expired`].

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct LocalEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn new(value: String, ttl: Duration) -> Self {
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        Self { value, expires_at }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Default)]
pub struct LocalStore {
    entries: DashMap<String, LocalEntry>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero `ttl` keeps the entry until it is deleted or flushed.
    pub fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .insert(key.to_string(), LocalEntry::new(value, ttl));
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Read-modify-write increment.
    ///
    /// The read and the write are separate map operations, so concurrent
    /// callers can lose updates. Counters seeded here get `seed_ttl`; an
    /// existing counter keeps its deadline. A non-numeric value is replaced
    /// by `delta`.
    pub fn increment(&self, key: &str, delta: i64, seed_ttl: Duration) -> i64 {
        let current = self.entries.get(key).and_then(|entry| {
            if entry.is_expired(Instant::now()) {
                None
            } else {
                entry
                    .value
                    .parse::<i64>()
                    .ok()
                    .map(|value| (value, entry.expires_at))
            }
        });

        match current {
            Some((value, expires_at)) => {
                let next = value.saturating_add(delta);
                self.entries.insert(
                    key.to_string(),
                    LocalEntry {
                        value: next.to_string(),
                        expires_at,
                    },
                );
                next
            }
            None => {
                self.set(key, delta.to_string(), seed_ttl);
                delta
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop expired entries, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}
