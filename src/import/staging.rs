//! Bounded in-memory working tree for one import
//!
//! The staging tree owns two things while an import runs:
//! - sealed blocks that have not been written yet, flushed to the block
//!   store in batches
//! - the chain of directories currently being walked, each holding the
//!   links of its finished children
//!
//! Flushing releases block bytes and keeps only their addresses, so memory
//! use depends on fan-out and depth rather than on how much is imported.

use crate::config::StagingConfig;
use crate::model::{validate_entry_name, Block, DirEntry, DirNode, Link};
use crate::store::BlockStore;
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::debug;

/// Counters describing what the staging tree did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StagingStats {
    pub blocks_staged: u64,
    pub bytes_staged: u64,
    pub flushes: u64,
    pub watermark_flushes: u64,
}

struct OpenDir {
    name: String,
    entries: Vec<DirEntry>,
    names: HashSet<String>,
}

impl OpenDir {
    fn new(name: String) -> Self {
        OpenDir {
            name,
            entries: Vec::new(),
            names: HashSet::new(),
        }
    }

    fn reserve(&mut self, name: &str) -> Result<()> {
        validate_entry_name(name).map_err(|_| {
            Error::InvalidInput(format!("invalid entry name {:?}", name))
        })?;
        if !self.names.insert(name.to_string()) {
            return Err(Error::InvalidInput(format!(
                "duplicate entry {:?} in directory {:?}",
                name, self.name
            )));
        }
        Ok(())
    }
}

pub struct StagingTree<'a> {
    store: &'a BlockStore,
    config: StagingConfig,
    pending: Vec<Block>,
    pending_bytes: usize,
    dirs: Vec<OpenDir>,
    /// Links held by open directories
    held_links: usize,
    stats: StagingStats,
}

impl<'a> StagingTree<'a> {
    pub fn new(store: &'a BlockStore, config: StagingConfig) -> Self {
        StagingTree {
            store,
            config,
            pending: Vec::new(),
            pending_bytes: 0,
            dirs: Vec::new(),
            held_links: 0,
            stats: StagingStats::default(),
        }
    }

    /// Nodes currently held in memory
    pub fn live_nodes(&self) -> usize {
        self.pending.len() + self.held_links
    }

    /// Number of open directories
    pub fn depth(&self) -> usize {
        self.dirs.len()
    }

    pub fn stats(&self) -> StagingStats {
        self.stats
    }

    /// Queue a sealed block for writing
    pub fn stage(&mut self, block: Block) -> Result<()> {
        self.stats.blocks_staged += 1;
        self.stats.bytes_staged += block.size() as u64;
        self.pending_bytes += block.size();
        self.pending.push(block);
        self.maybe_flush()
    }

    fn maybe_flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.live_nodes() >= self.config.live_node_watermark {
            self.stats.watermark_flushes += 1;
            debug!(
                live = self.live_nodes(),
                watermark = self.config.live_node_watermark,
                "staging watermark reached"
            );
            return self.flush();
        }
        if self.pending.len() >= self.config.batch_max_nodes
            || self.pending_bytes >= self.config.batch_max_bytes
        {
            return self.flush();
        }
        Ok(())
    }

    /// Write every pending block to the store
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.store.put_many(&self.pending)?;
        debug!(
            blocks = self.pending.len(),
            bytes = self.pending_bytes,
            "flushed staged blocks"
        );
        self.pending.clear();
        self.pending_bytes = 0;
        self.stats.flushes += 1;
        Ok(())
    }

    /// Start a directory below the current one (or the root directory)
    pub fn open_dir(&mut self, name: &str) -> Result<()> {
        if let Some(parent) = self.dirs.last_mut() {
            parent.reserve(name)?;
        }
        self.dirs.push(OpenDir::new(name.to_string()));
        Ok(())
    }

    /// Add a finished file or subtree to the current directory
    pub fn add_entry(&mut self, name: &str, link: Link) -> Result<()> {
        let dir = self
            .dirs
            .last_mut()
            .ok_or_else(|| Error::InvalidInput(format!("no open directory for {:?}", name)))?;
        dir.reserve(name)?;
        dir.entries.push(DirEntry {
            name: name.to_string(),
            link,
        });
        self.held_links += 1;
        self.maybe_flush()
    }

    /// Seal the current directory and link it into its parent
    pub fn close_dir(&mut self) -> Result<Link> {
        let dir = self
            .dirs
            .pop()
            .ok_or_else(|| Error::InvalidInput("no open directory to close".to_string()))?;
        self.held_links -= dir.entries.len();

        let node = DirNode::new(dir.entries);
        let block = node.to_block()?;
        let link = Link::new(*block.address(), node.total_size());
        self.stage(block)?;

        if let Some(parent) = self.dirs.last_mut() {
            parent.entries.push(DirEntry {
                name: dir.name,
                link,
            });
            self.held_links += 1;
        }
        Ok(link)
    }

    /// Flush the remainder. Every opened directory must have been closed.
    pub fn finish(mut self) -> Result<StagingStats> {
        if let Some(dir) = self.dirs.last() {
            return Err(Error::InvalidInput(format!(
                "directory {:?} still open at end of import",
                dir.name
            )));
        }
        self.flush()?;
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, Codec, Node};
    use crate::store::MemoryDatastore;
    use std::sync::Arc;

    fn store() -> BlockStore {
        BlockStore::new(Arc::new(MemoryDatastore::new()))
    }

    fn small_config() -> StagingConfig {
        StagingConfig {
            live_node_watermark: 1000,
            batch_max_nodes: 3,
            batch_max_bytes: 1 << 20,
        }
    }

    #[test]
    fn test_batches_flush_on_node_count() {
        let store = store();
        let mut staging = StagingTree::new(&store, small_config());

        staging.stage(Block::raw(&b"a"[..])).unwrap();
        staging.stage(Block::raw(&b"b"[..])).unwrap();
        assert_eq!(store.len().unwrap(), 0);

        staging.stage(Block::raw(&b"c"[..])).unwrap();
        assert_eq!(store.len().unwrap(), 3);
        assert_eq!(staging.live_nodes(), 0);

        staging.stage(Block::raw(&b"d"[..])).unwrap();
        let stats = staging.finish().unwrap();
        assert_eq!(store.len().unwrap(), 4);
        assert_eq!(stats.flushes, 2);
    }

    #[test]
    fn test_watermark_counts_held_links() {
        let store = store();
        let config = StagingConfig {
            live_node_watermark: 4,
            batch_max_nodes: 100,
            batch_max_bytes: 1 << 20,
        };
        let mut staging = StagingTree::new(&store, config);
        staging.open_dir("root").unwrap();

        for i in 0..3u8 {
            let block = Block::raw(vec![i]);
            let link = Link::new(*block.address(), 1);
            staging.stage(block).unwrap();
            staging.add_entry(&format!("f{}", i), link).unwrap();
        }

        assert!(staging.stats().watermark_flushes >= 1);
        assert!(store.len().unwrap() >= 2);
    }

    #[test]
    fn test_held_links_alone_do_not_flush() {
        let store = store();
        let config = StagingConfig {
            live_node_watermark: 2,
            batch_max_nodes: 100,
            batch_max_bytes: 1 << 20,
        };
        let mut staging = StagingTree::new(&store, config);
        staging.open_dir("").unwrap();

        for i in 0..5u8 {
            let link = Link::new(Address::compute(Codec::Raw, &[i]), 1);
            staging.add_entry(&format!("f{}", i), link).unwrap();
        }

        assert_eq!(staging.live_nodes(), 5);
        assert_eq!(staging.stats().watermark_flushes, 0);
        assert_eq!(staging.stats().flushes, 0);
    }

    #[test]
    fn test_nested_directories() {
        let store = store();
        let mut staging = StagingTree::new(&store, small_config());
        let leaf = Block::raw(&b"hello"[..]);
        let leaf_link = Link::new(*leaf.address(), 5);
        staging.stage(leaf).unwrap();

        staging.open_dir("").unwrap();
        staging.open_dir("sub").unwrap();
        staging.add_entry("hello.txt", leaf_link).unwrap();
        let sub = staging.close_dir().unwrap();
        let root = staging.close_dir().unwrap();
        staging.finish().unwrap();

        assert_eq!(sub.size, 5);
        assert_eq!(root.size, 5);
        assert_eq!(root.address.codec(), Codec::Directory);

        match Node::decode(&store.get(&root.address).unwrap()).unwrap() {
            Node::Directory(dir) => {
                assert_eq!(dir.entries.len(), 1);
                assert_eq!(dir.entries[0].name, "sub");
                assert_eq!(dir.entries[0].link, sub);
            }
            other => panic!("expected directory, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let store = store();
        let mut staging = StagingTree::new(&store, small_config());
        let link = Link::new(Address::compute(Codec::Raw, b"x"), 1);

        staging.open_dir("").unwrap();
        staging.add_entry("same", link).unwrap();
        assert!(matches!(
            staging.add_entry("same", link),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            staging.open_dir("same"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_finish_with_open_directory_fails() {
        let store = store();
        let mut staging = StagingTree::new(&store, small_config());
        staging.open_dir("").unwrap();
        assert!(staging.finish().is_err());
    }
}
