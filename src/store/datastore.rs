//! The key-value contract a block store backend has to satisfy

use crate::Result;
use bytes::Bytes;

/// A persistent key-value store.
///
/// Implementations must be safe for concurrent callers; the block store
/// shares one instance between importer, exporter and block operations.
pub trait Datastore: Send + Sync {
    /// Write all entries. Entries written before a failure may remain.
    fn put_batch(&self, entries: Vec<(Vec<u8>, Bytes)>) -> Result<()>;

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    fn has(&self, key: &[u8]) -> Result<bool>;

    /// Remove a key; removing a missing key is not an error
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Enumerate every key
    fn keys(&self) -> Result<Vec<Vec<u8>>>;

    /// Approximate on-disk footprint in bytes
    fn disk_usage(&self) -> Result<u64>;

    /// Flush buffered state to durable storage
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Reclaim space held by deleted entries
    fn compact(&self) -> Result<()> {
        Ok(())
    }
}
