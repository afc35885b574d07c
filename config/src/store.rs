// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A keyed register store with change notification.
//!
//! Components whose behaviour is derived from register fields keep the raw
//! values in a [`ConfigStore`] and register listeners that invalidate their
//! derived (cached) state whenever a field is written with a new value.

use hashbrown::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::trace;

/// Callback invoked with the key and the new value of a changed field.
pub type FieldListener<K> = Box<dyn Fn(K, u64) + Send + Sync>;

pub struct ConfigStore<K> {
    fields: HashMap<K, u64>,
    listeners: Vec<(Option<K>, FieldListener<K>)>,
}

impl<K> Default for ConfigStore<K> {
    fn default() -> Self {
        Self {
            fields: HashMap::new(),
            listeners: Vec::new(),
        }
    }
}

impl<K: Copy + Eq + Hash + Debug> ConfigStore<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a field. Fields never written read as zero.
    #[must_use]
    pub fn get_field(&self, key: K) -> u64 {
        self.fields.get(&key).copied().unwrap_or(0)
    }

    /// Write a field. Listeners run only if the value actually changed.
    /// Returns true if it did.
    pub fn set_field(&mut self, key: K, value: u64) -> bool {
        let old = self.fields.insert(key, value).unwrap_or(0);
        if old == value {
            return false;
        }
        trace!("field {key:?}: {old:#x} -> {value:#x}");
        for (filter, listener) in &self.listeners {
            if filter.is_none_or(|k| k == key) {
                listener(key, value);
            }
        }
        true
    }

    /// Register a listener for one field.
    pub fn subscribe(&mut self, key: K, listener: FieldListener<K>) {
        self.listeners.push((Some(key), listener));
    }

    /// Register a listener for every field.
    pub fn subscribe_all(&mut self, listener: FieldListener<K>) {
        self.listeners.push((None, listener));
    }

    /// Iterate over all fields with a non-default value.
    pub fn iter(&self) -> impl Iterator<Item = (K, u64)> + '_ {
        self.fields
            .iter()
            .filter(|(_, v)| **v != 0)
            .map(|(k, v)| (*k, *v))
    }
}

impl<K: Debug> Debug for ConfigStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("fields", &self.fields)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Reg {
        A(u8),
        B,
    }

    #[test]
    fn unwritten_fields_read_zero() {
        let store: ConfigStore<Reg> = ConfigStore::new();
        assert_eq!(store.get_field(Reg::A(3)), 0);
        assert_eq!(store.iter().count(), 0);
    }

    #[test]
    fn listeners_fire_on_change_only() {
        let mut store = ConfigStore::new();
        let hits_a = Arc::new(AtomicU64::new(0));
        let hits_all = Arc::new(AtomicU64::new(0));
        let h = hits_a.clone();
        store.subscribe(
            Reg::A(1),
            Box::new(move |_, v| {
                h.fetch_add(v, Ordering::Relaxed);
            }),
        );
        let h = hits_all.clone();
        store.subscribe_all(Box::new(move |_, _| {
            h.fetch_add(1, Ordering::Relaxed);
        }));

        assert!(store.set_field(Reg::A(1), 5));
        assert!(!store.set_field(Reg::A(1), 5));
        assert!(store.set_field(Reg::A(2), 7));
        assert!(store.set_field(Reg::B, 1));
        assert!(!store.set_field(Reg::A(9), 0));

        assert_eq!(hits_a.load(Ordering::Relaxed), 5);
        assert_eq!(hits_all.load(Ordering::Relaxed), 3);
        assert_eq!(store.get_field(Reg::A(2)), 7);
    }
}
