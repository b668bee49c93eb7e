//! Weak identity maps backing the membrane's two-way cache.

use std::collections::HashMap;
use std::rc::Weak;

use crate::realm::{ObjectCell, ObjectRef};

const MIN_SWEEP_THRESHOLD: usize = 64;

struct Entry {
    key: Weak<ObjectCell>,
    value: Weak<ObjectCell>,
}

/// Object-identity map holding both sides weakly.
///
/// An entry is live while both its key and its value are reachable from
/// elsewhere. Once either side is dropped the entry reads as absent and is
/// swept on a later insert, so abandoned cross-realm pairs do not pin memory.
/// Identity is only observable while a stand-in is alive, which is exactly
/// while its entry is live.
pub(crate) struct IdentityMap {
    entries: HashMap<usize, Entry>,
    sweep_at: usize,
}

impl IdentityMap {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            sweep_at: MIN_SWEEP_THRESHOLD,
        }
    }

    pub(crate) fn get(&self, key: &ObjectRef) -> Option<ObjectRef> {
        let entry = self.entries.get(&key.addr())?;
        // A dead key whose address was reused must not match.
        let live_key = ObjectRef::upgrade(&entry.key)?;
        if live_key != *key {
            return None;
        }
        ObjectRef::upgrade(&entry.value)
    }

    pub(crate) fn insert(&mut self, key: &ObjectRef, value: &ObjectRef) {
        self.entries.insert(
            key.addr(),
            Entry {
                key: key.downgrade(),
                value: value.downgrade(),
            },
        );
        if self.entries.len() >= self.sweep_at {
            self.sweep();
        }
    }

    fn sweep(&mut self) {
        self.entries
            .retain(|_, e| e.key.strong_count() > 0 && e.value.strong_count() > 0);
        self.sweep_at = (self.entries.len() * 2).max(MIN_SWEEP_THRESHOLD);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.key.strong_count() > 0 && e.value.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::realm::Realm;

    #[test]
    fn test_lookup_by_identity() {
        let realm = Realm::new("r");
        let mut map = IdentityMap::new();
        let a = realm.object();
        let b = realm.object();
        map.insert(&a, &b);
        assert_eq!(map.get(&a), Some(b.clone()));
        assert_eq!(map.get(&b), None);
    }

    #[test]
    fn test_entries_die_with_their_objects() {
        let realm = Realm::new("r");
        let mut map = IdentityMap::new();
        let key = realm.object();
        {
            let value = realm.object();
            map.insert(&key, &value);
            assert_eq!(map.len(), 1);
        }
        assert_eq!(map.get(&key), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_sweep_reclaims_dead_entries() {
        let realm = Realm::new("r");
        let mut map = IdentityMap::new();
        let keep = realm.object();
        for _ in 0..(MIN_SWEEP_THRESHOLD * 2) {
            let k = realm.object();
            map.insert(&k, &keep);
        }
        map.insert(&keep, &keep);
        assert!(map.entries.len() < MIN_SWEEP_THRESHOLD);
        assert_eq!(map.get(&keep), Some(keep.clone()));
    }
}
