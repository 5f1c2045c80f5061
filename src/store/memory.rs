//! In-memory datastore, used for tests and throwaway repositories

use crate::store::Datastore;
use crate::Result;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryDatastore {
    entries: RwLock<HashMap<Vec<u8>, Bytes>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Datastore for MemoryDatastore {
    fn put_batch(&self, entries: Vec<(Vec<u8>, Bytes)>) -> Result<()> {
        let mut map = self.entries.write();
        for (key, value) in entries {
            map.insert(key, value);
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn disk_usage(&self) -> Result<u64> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum())
    }
}
