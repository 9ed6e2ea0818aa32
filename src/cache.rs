use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::types::PortResult;

/// Process-lifetime cache of finished scan results, keyed by target and port set.
///
/// Entries are never evicted. Once a key has a value it keeps it: a second
/// insert for the same key is ignored and the stored results are returned.
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    entries: Arc<DashMap<String, Arc<Vec<PortResult>>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `"target|p1,p2,..."` with ports sorted ascending.
    pub fn key(target: &str, ports: &[u16]) -> String {
        let mut sorted = ports.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let joined = sorted
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("{target}|{joined}")
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<PortResult>>> {
        self.entries.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Store a complete result set unless the key is already populated.
    pub fn insert(&self, key: String, results: Vec<PortResult>) -> Arc<Vec<PortResult>> {
        match self.entries.entry(key) {
            Entry::Occupied(e) => Arc::clone(e.get()),
            Entry::Vacant(e) => Arc::clone(e.insert(Arc::new(results)).value()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
