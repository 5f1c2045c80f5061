//! Single-flight importer

use crate::cancel::CancelToken;
use crate::config::{validate_chunk_size, ImportConfig};
use crate::import::balanced::build_file;
use crate::import::progress::{
    spawn_consumer, ProgressAggregator, ProgressEvent, ProgressReader, ProgressSnapshot,
    SharedProgress, PROGRESS_CHANNEL_CAPACITY,
};
use crate::import::staging::StagingTree;
use crate::import::walk::{self, EntryKind};
use crate::model::{Address, Codec, Link, Node};
use crate::store::BlockStore;
use crate::units::human_bytes;
use crate::{Error, Result};
use crossbeam_channel::Sender;
use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Outcome of one successful import
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportResult {
    pub root_address: Address,
    pub file_name: String,
    pub size_bytes: u64,
    pub human_size: String,
    pub chunk_size_label: String,
    /// Every unique block reachable from the root, breadth-first
    pub block_addresses: Vec<Address>,
}

/// Running flag and progress of the importer
#[derive(Default)]
pub struct ImportSession {
    running: AtomicBool,
    progress: SharedProgress,
}

impl ImportSession {
    /// Claim the session, failing with `AlreadyRunning` if it is taken
    pub fn try_begin(&self, path_name: &str) -> Result<SessionGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::AlreadyRunning)?;
        *self.progress.write() = ProgressSnapshot {
            path_name: path_name.to_string(),
            percent: 0.0,
        };
        Ok(SessionGuard { session: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> f64 {
        self.progress.read().percent
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.read().clone()
    }
}

/// Releases the session and clears its progress when dropped
pub struct SessionGuard<'a> {
    session: &'a ImportSession,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        *self.session.progress.write() = ProgressSnapshot::default();
        self.session.running.store(false, Ordering::Release);
    }
}

/// Imports files and directories into a block store
pub struct Importer {
    store: BlockStore,
    config: ImportConfig,
    session: ImportSession,
}

impl Importer {
    pub fn new(store: BlockStore, config: ImportConfig) -> Self {
        Importer {
            store,
            config,
            session: ImportSession::default(),
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn session(&self) -> &ImportSession {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Percentage of the running import, 0 when idle
    pub fn progress(&self) -> f64 {
        self.session.progress()
    }

    pub fn progress_info(&self) -> ProgressSnapshot {
        self.session.snapshot()
    }

    /// Import with the configured chunk size
    pub fn import(&self, path: &Path, cancel: &CancelToken) -> Result<ImportResult> {
        self.import_with_chunk_size(path, self.config.chunk_size, cancel)
    }

    pub fn import_with_chunk_size(
        &self,
        path: &Path,
        chunk_size: usize,
        cancel: &CancelToken,
    ) -> Result<ImportResult> {
        validate_chunk_size(chunk_size)?;
        let path = expand_home(path)?;
        let meta = std::fs::metadata(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::NotFound(format!("path {}", path.display())),
            _ => Error::Io(e),
        })?;
        if !meta.is_file() && !meta.is_dir() {
            return Err(Error::InvalidInput(format!(
                "not a regular file or directory: {}",
                path.display()
            )));
        }
        let file_name = base_name(&path)?;

        let _guard = self.session.try_begin(&file_name)?;
        let started = Instant::now();
        info!(path = %path.display(), chunk_size, "import started");

        let size_bytes = walk::total_size(&path)?;
        let mut aggregator = ProgressAggregator::new();
        aggregator.declare_total(size_bytes);
        let (tx, rx) = crossbeam_channel::bounded(PROGRESS_CHANNEL_CAPACITY);
        let consumer = spawn_consumer(aggregator, rx, self.session.progress.clone())?;

        let mut staging = StagingTree::new(&self.store, self.config.staging);
        let built = self.build(&path, meta.is_file(), &file_name, chunk_size, tx, &mut staging, cancel);
        if consumer.join().is_err() {
            return Err(Error::Store("progress consumer panicked".to_string()));
        }
        let root = built?;
        let stats = staging.finish()?;
        debug!(
            blocks = stats.blocks_staged,
            flushes = stats.flushes,
            watermark_flushes = stats.watermark_flushes,
            "staging finished"
        );

        let block_addresses = collect_blocks(&self.store, root.address, cancel)?;
        info!(
            root = %root.address,
            blocks = block_addresses.len(),
            size = size_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "import finished"
        );

        Ok(ImportResult {
            root_address: root.address,
            file_name,
            size_bytes,
            human_size: human_bytes(size_bytes),
            chunk_size_label: human_bytes(chunk_size as u64),
            block_addresses,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        path: &Path,
        is_file: bool,
        name: &str,
        chunk_size: usize,
        events: Sender<ProgressEvent>,
        staging: &mut StagingTree<'_>,
        cancel: &CancelToken,
    ) -> Result<Link> {
        let max_links = self.config.max_links_per_node;
        if is_file {
            return import_file(path, name, chunk_size, max_links, &events, staging, cancel);
        }

        staging.open_dir("")?;
        for entry in walk::walk_tree(path) {
            cancel.check()?;
            let entry = entry?;
            while staging.depth() > entry.depth {
                staging.close_dir()?;
            }
            match entry.kind {
                EntryKind::Dir => staging.open_dir(&entry.name)?,
                EntryKind::File { .. } => {
                    let link = import_file(
                        &entry.path,
                        &entry.name,
                        chunk_size,
                        max_links,
                        &events,
                        staging,
                        cancel,
                    )?;
                    staging.add_entry(&entry.name, link)?;
                }
            }
        }
        while staging.depth() > 1 {
            staging.close_dir()?;
        }
        staging.close_dir()
    }
}

fn import_file(
    path: &Path,
    name: &str,
    chunk_size: usize,
    max_links: usize,
    events: &Sender<ProgressEvent>,
    staging: &mut StagingTree<'_>,
    cancel: &CancelToken,
) -> Result<Link> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let reader = ProgressReader::new(BufReader::new(file), name, size, events.clone());
    build_file(reader, chunk_size, max_links, staging, cancel)
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::Config("cannot determine home directory".to_string()))?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

fn base_name(path: &Path) -> Result<String> {
    let canonical = path.canonicalize()?;
    Ok(canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| canonical.display().to_string()))
}

/// Breadth-first walk collecting every unique block below `root`
fn collect_blocks(store: &BlockStore, root: Address, cancel: &CancelToken) -> Result<Vec<Address>> {
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut order = Vec::new();

    while let Some(address) = queue.pop_front() {
        cancel.check()?;
        order.push(address);
        if address.codec() == Codec::Raw {
            continue;
        }
        let node = Node::decode(&store.get(&address)?)?;
        for child in node.child_addresses() {
            if seen.insert(child) {
                queue.push_back(child);
            }
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StagingConfig;
    use crate::store::MemoryDatastore;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn importer() -> Importer {
        let store = BlockStore::new(Arc::new(MemoryDatastore::new()));
        Importer::new(store, ImportConfig::default())
    }

    #[test]
    fn test_single_flight() {
        let importer = importer();
        let guard = importer.session().try_begin("first").unwrap();
        assert!(importer.is_running());
        assert_eq!(importer.progress_info().path_name, "first");

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, b"data").unwrap();
        assert!(matches!(
            importer.import(&file, &CancelToken::new()),
            Err(Error::AlreadyRunning)
        ));

        drop(guard);
        assert!(!importer.is_running());
        assert_eq!(importer.progress_info(), ProgressSnapshot::default());
        importer.import(&file, &CancelToken::new()).unwrap();
    }

    #[test]
    fn test_import_small_file() {
        let importer = importer();
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("hello.txt");
        fs::write(&file, b"hello world").unwrap();

        let result = importer.import(&file, &CancelToken::new()).unwrap();
        assert_eq!(result.file_name, "hello.txt");
        assert_eq!(result.size_bytes, 11);
        assert_eq!(result.chunk_size_label, "1.0 MB");
        assert_eq!(result.root_address, Address::compute(Codec::Raw, b"hello world"));
        assert_eq!(result.block_addresses, vec![result.root_address]);
        assert!(!importer.is_running());
    }

    #[test]
    fn test_import_directory_lists_blocks_breadth_first() {
        let importer = importer();
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("sub/b.txt"), b"beta").unwrap();

        let result = importer.import(&root, &CancelToken::new()).unwrap();
        assert_eq!(result.file_name, "tree");
        assert_eq!(result.size_bytes, 9);
        assert_eq!(result.root_address.codec(), Codec::Directory);
        // root, a.txt, sub, b.txt
        assert_eq!(result.block_addresses.len(), 4);
        assert_eq!(result.block_addresses[0], result.root_address);
        assert_eq!(
            result.block_addresses[1],
            Address::compute(Codec::Raw, b"alpha")
        );
    }

    #[test]
    fn test_duplicate_content_listed_once() {
        let importer = importer();
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one"), b"same").unwrap();
        fs::write(dir.path().join("two"), b"same").unwrap();

        let result = importer.import(dir.path(), &CancelToken::new()).unwrap();
        assert_eq!(result.block_addresses.len(), 2);
    }

    #[test]
    fn test_missing_path_and_bad_chunk_size() {
        let importer = importer();
        let dir = TempDir::new().unwrap();
        let cancel = CancelToken::new();

        assert!(matches!(
            importer.import(&dir.path().join("nope"), &cancel),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            importer.import_with_chunk_size(dir.path(), 0, &cancel),
            Err(Error::InvalidInput(_))
        ));
        assert!(!importer.is_running());
    }

    #[test]
    fn test_cancelled_import_resets_session() {
        let importer = importer();
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f"), vec![0u8; 4096]).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        assert!(matches!(
            importer.import(dir.path(), &cancel),
            Err(Error::Cancelled)
        ));
        assert!(!importer.is_running());
        assert_eq!(importer.progress(), 0.0);
    }

    #[test]
    fn test_small_watermark_still_round_trips_structure() {
        let store = BlockStore::new(Arc::new(MemoryDatastore::new()));
        let config = ImportConfig {
            chunk_size: 4,
            max_links_per_node: 2,
            staging: StagingConfig {
                live_node_watermark: 2,
                batch_max_nodes: 2,
                batch_max_bytes: 16,
            },
        };
        let importer = Importer::new(store.clone(), config);
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("f{}", i)), format!("content {}", i)).unwrap();
        }

        let result = importer.import(dir.path(), &CancelToken::new()).unwrap();
        for address in &result.block_addresses {
            assert!(store.has(address).unwrap());
        }
    }

    #[test]
    fn test_expand_home() {
        let plain = Path::new("/tmp/x");
        assert_eq!(expand_home(plain).unwrap(), plain);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/docs")).unwrap(), home.join("docs"));
        }
    }
}
