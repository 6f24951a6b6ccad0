use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RedeemError<E> {
    #[error("no such entry")]
    Missing,

    #[error("entry expired")]
    Expired,

    #[error("entry rejected")]
    Rejected(E),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("a live entry already exists for this key")]
pub struct DuplicateEntry;

struct FlowEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> FlowEntry<T> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Lifetime-bounded store for in-flight broker records (pending logins,
/// authorization codes).
///
/// Each key is guarded by its shard lock, so check-then-remove sequences
/// performed through [`FlowStore::redeem_with`] and [`FlowStore::take`] are
/// atomic with respect to concurrent callers.
pub struct FlowStore<T> {
    entries: DashMap<String, FlowEntry<T>>,
    ttl: Duration,
}

impl<T: Clone> FlowStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Store `value` unless a live entry already holds `key`. An expired
    /// occupant is replaced.
    pub fn insert_new(&self, key: String, value: T) -> Result<(), DuplicateEntry> {
        let now = Instant::now();
        let entry = FlowEntry {
            value,
            expires_at: now + self.ttl,
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Err(DuplicateEntry);
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
        Ok(())
    }

    /// Copy of the live value under `key`, leaving it in place.
    pub fn peek(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Remove and return the live value under `key`. Only one caller can
    /// ever take a given entry.
    pub fn take(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        self.entries
            .remove_if(key, |_, entry| entry.is_live(now))
            .map(|(_, entry)| entry.value)
    }

    /// Run `check` against the entry while holding its lock and remove the
    /// entry only if `check` succeeds. A rejected entry stays redeemable;
    /// an expired one is evicted.
    pub fn redeem_with<R, E, F>(&self, key: &str, check: F) -> Result<R, RedeemError<E>>
    where
        F: FnOnce(&T) -> Result<R, E>,
    {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Vacant(_) => Err(RedeemError::Missing),
            Entry::Occupied(occupied) => {
                if !occupied.get().is_live(now) {
                    occupied.remove();
                    return Err(RedeemError::Expired);
                }
                match check(&occupied.get().value) {
                    Ok(result) => {
                        occupied.remove();
                        Ok(result)
                    }
                    Err(e) => Err(RedeemError::Rejected(e)),
                }
            }
        }
    }

    /// Evict every expired entry; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> FlowStore<String> {
        FlowStore::new(Duration::from_secs(60))
    }

    #[test]
    fn duplicate_live_key_is_rejected() {
        let store = store();
        store.insert_new("k".to_string(), "a".to_string()).unwrap();
        assert_eq!(
            store.insert_new("k".to_string(), "b".to_string()),
            Err(DuplicateEntry)
        );
        assert_eq!(store.peek("k").as_deref(), Some("a"));
    }

    #[test]
    fn expired_entries_are_invisible_and_replaceable() {
        let store: FlowStore<String> = FlowStore::new(Duration::ZERO);
        store.insert_new("k".to_string(), "a".to_string()).unwrap();
        assert_eq!(store.peek("k"), None);
        assert_eq!(store.take("k"), None);
        store.insert_new("k".to_string(), "b".to_string()).unwrap();
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn take_is_single_use() {
        let store = store();
        store.insert_new("k".to_string(), "a".to_string()).unwrap();
        assert_eq!(store.take("k").as_deref(), Some("a"));
        assert_eq!(store.take("k"), None);
    }

    #[test]
    fn rejected_redeem_keeps_entry() {
        let store = store();
        store.insert_new("k".to_string(), "a".to_string()).unwrap();

        let rejected: Result<(), _> = store.redeem_with("k", |_| Err("nope"));
        assert_eq!(rejected, Err(RedeemError::Rejected("nope")));

        let accepted: Result<String, RedeemError<&str>> =
            store.redeem_with("k", |v| Ok(v.to_uppercase()));
        assert_eq!(accepted.unwrap(), "A");

        let again: Result<(), RedeemError<&str>> = store.redeem_with("k", |_| Ok(()));
        assert_eq!(again, Err(RedeemError::Missing));
    }

    #[test]
    fn expired_redeem_evicts() {
        let store: FlowStore<String> = FlowStore::new(Duration::ZERO);
        store.insert_new("k".to_string(), "a".to_string()).unwrap();
        let result: Result<(), RedeemError<()>> = store.redeem_with("k", |_| Ok(()));
        assert_eq!(result, Err(RedeemError::Expired));
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_redeem_succeeds_once() {
        let store = Arc::new(store());
        store.insert_new("code".to_string(), "grant".to_string()).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .redeem_with::<_, (), _>("code", |v| Ok(v.clone()))
                        .is_ok()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
