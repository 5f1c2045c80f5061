//! Block store: content-addressed blocks on top of a [`Datastore`]

use crate::cancel::CancelToken;
use crate::model::{Address, Block};
use crate::store::{Datastore, PresenceCache};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stores blocks keyed by the binary form of their address
#[derive(Clone)]
pub struct BlockStore {
    ds: Arc<dyn Datastore>,
    /// Write every block even when its address is already present
    write_through: bool,
    cache: Option<Arc<Mutex<PresenceCache>>>,
}

impl BlockStore {
    pub fn new(ds: Arc<dyn Datastore>) -> Self {
        BlockStore {
            ds,
            write_through: false,
            cache: None,
        }
    }

    pub fn with_write_through(mut self, write_through: bool) -> Self {
        self.write_through = write_through;
        self
    }

    /// Remember presence of up to `capacity` addresses. Zero disables it.
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = (capacity > 0).then(|| Arc::new(Mutex::new(PresenceCache::new(capacity))));
        self
    }

    fn remember(&self, address: &Address, present: bool) {
        if let Some(cache) = &self.cache {
            cache.lock().insert(*address, present);
        }
    }

    /// Write a batch of blocks
    pub fn put_many(&self, blocks: &[Block]) -> Result<()> {
        let mut entries = Vec::with_capacity(blocks.len());
        for block in blocks {
            if !self.write_through && self.has(block.address())? {
                continue;
            }
            entries.push((block.address().to_bytes().to_vec(), block.data().clone()));
        }
        if entries.is_empty() {
            return Ok(());
        }

        let count = entries.len();
        self.ds.put_batch(entries)?;
        for block in blocks {
            self.remember(block.address(), true);
        }
        debug!(count, skipped = blocks.len() - count, "stored blocks");
        Ok(())
    }

    pub fn put(&self, block: &Block) -> Result<()> {
        self.put_many(std::slice::from_ref(block))
    }

    /// Fetch a block, verifying its bytes against the address
    pub fn get(&self, address: &Address) -> Result<Block> {
        let data = self
            .ds
            .get(&address.to_bytes())?
            .ok_or_else(|| Error::NotFound(format!("block {}", address)))?;
        Block::verified(*address, data)
    }

    pub fn has(&self, address: &Address) -> Result<bool> {
        if let Some(present) = self.cache.as_ref().and_then(|c| c.lock().get(address)) {
            return Ok(present);
        }
        let present = self.ds.has(&address.to_bytes())?;
        self.remember(address, present);
        Ok(present)
    }

    /// True only if every address is present.
    ///
    /// Fail-closed: a backend error or a cancellation also yields `false`.
    pub fn has_all(&self, addresses: &[Address], cancel: &CancelToken) -> bool {
        for address in addresses {
            if cancel.is_cancelled() {
                return false;
            }
            match self.has(address) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    warn!(%address, error = %e, "block existence check failed");
                    return false;
                }
            }
        }
        true
    }

    pub fn delete(&self, address: &Address) -> Result<()> {
        if let Some(cache) = &self.cache {
            // Forget first so a failed delete is re-checked against the backend
            cache.lock().remove(address);
        }
        self.ds.delete(&address.to_bytes())?;
        self.remember(address, false);
        Ok(())
    }

    /// Delete every block.
    ///
    /// Keeps going past per-block failures and returns the first one once the
    /// keyspace has been walked. Cancellation stops the walk immediately.
    pub fn delete_all(&self, cancel: &CancelToken) -> Result<()> {
        let keys = self.ds.keys()?;
        let total = keys.len();
        let mut first_error = None;
        let mut deleted = 0usize;

        for key in keys {
            cancel.check()?;
            if let (Some(cache), Ok(address)) = (&self.cache, Address::from_bytes(&key)) {
                cache.lock().remove(&address);
            }
            match self.ds.delete(&key) {
                Ok(()) => deleted += 1,
                Err(e) => {
                    warn!(key = %hex::encode(&key), error = %e, "failed to delete block");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        info!(deleted, total, "deleted all blocks");
        if let Err(e) = self.ds.compact() {
            warn!(error = %e, "compaction after delete-all failed");
            if first_error.is_none() {
                first_error = Some(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Addresses of every stored block; foreign keys are skipped
    pub fn keys(&self) -> Result<Vec<Address>> {
        Ok(self
            .ds
            .keys()?
            .into_iter()
            .filter_map(|key| Address::from_bytes(&key).ok())
            .collect())
    }

    /// Number of stored blocks
    pub fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    pub fn disk_usage(&self) -> Result<u64> {
        self.ds.disk_usage()
    }

    pub fn sync(&self) -> Result<()> {
        self.ds.sync()
    }
}
