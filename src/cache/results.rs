//! Solve results keyed by cache key
//!
//! Maps a cache-key digest (structural or content-refined) to the output
//! references a vertex produced. The cache holds its own handles and
//! hands out fresh shared clones on lookup.

use crate::cache::ImmutableRef;
use crate::digest::Digest;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<Digest, Vec<ImmutableRef>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh handles on the outputs stored under `key`.
    ///
    /// The caller owns (and must release) the returned handles.
    pub fn get(&self, key: &Digest) -> Option<Vec<ImmutableRef>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .map(|outputs| outputs.iter().map(ImmutableRef::clone_ref).collect())
    }

    pub fn contains(&self, key: &Digest) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Register `outputs` under `key`, keeping clones of the handles.
    ///
    /// An existing entry wins; the first result for a key is authoritative.
    pub fn insert(&self, key: Digest, outputs: &[ImmutableRef]) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&key) {
            return;
        }
        debug!("registering {} output(s) under {}", outputs.len(), key);
        entries.insert(key, outputs.iter().map(ImmutableRef::clone_ref).collect());
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every handle the cache holds
    pub fn clear(&self) {
        let drained: Vec<ImmutableRef> = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.drain().flat_map(|(_, outputs)| outputs).collect()
        };
        for output in &drained {
            output.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheManager, Snapshot};

    #[test]
    fn lookup_hands_out_owned_clones() {
        let cm = CacheManager::new();
        let results = ResultCache::new();
        let output = cm.import(Snapshot::new(), "out");
        let key = Digest::from_bytes(b"key");

        results.insert(key.clone(), std::slice::from_ref(&output));
        output.release();
        assert!(cm.is_live(output.id()));

        let found = results.get(&key).unwrap();
        assert_eq!(found[0].id(), output.id());
        found[0].release();

        results.clear();
        assert!(!cm.is_live(output.id()));
        assert!(results.is_empty());
    }

    #[test]
    fn first_insert_wins() {
        let cm = CacheManager::new();
        let results = ResultCache::new();
        let first = cm.import(Snapshot::new(), "first");
        let second = cm.import(Snapshot::new(), "second");
        let key = Digest::from_bytes(b"key");

        results.insert(key.clone(), std::slice::from_ref(&first));
        results.insert(key.clone(), std::slice::from_ref(&second));

        let found = results.get(&key).unwrap();
        assert_eq!(found[0].id(), first.id());
        assert_eq!(results.len(), 1);
        assert!(results.get(&Digest::from_bytes(b"other")).is_none());
    }
}
