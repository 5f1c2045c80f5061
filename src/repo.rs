//! Repository: a directory holding one block store
//!
//! Layout:
//! - `datastore_spec`: canonical JSON descriptor of the backend
//! - `repo.lock`: held exclusively while the repository is open
//! - backend files (`blocks.log` or `blocks/`)

use crate::cancel::CancelToken;
use crate::config::RepoConfig;
use crate::export::Exporter;
use crate::import::{expand_home, ImportResult, Importer, ProgressSnapshot};
use crate::model::{Address, Block};
use crate::store::{BackendRegistry, BlockStore, DiskSpec, SPEC_FILE};
use crate::usage::StorageUsage;
use crate::{Error, Result};
use bytes::Bytes;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Name of the lock file inside a repository root
pub const LOCK_FILE: &str = "repo.lock";

pub struct Repo {
    root: PathBuf,
    config: RepoConfig,
    disk_spec: DiskSpec,
    blocks: BlockStore,
    importer: Importer,
    exporter: Exporter,
    usage: StorageUsage,
    lock: Option<File>,
}

impl Repo {
    /// Open (initializing if needed) with the built-in backends
    pub fn open(path: impl AsRef<Path>, config: RepoConfig) -> Result<Self> {
        Self::open_with_registry(path, config, &BackendRegistry::builtin())
    }

    pub fn open_with_registry(
        path: impl AsRef<Path>,
        config: RepoConfig,
        registry: &BackendRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let root = expand_home(path.as_ref())?;
        fs::create_dir_all(&root)?;
        let lock = acquire_lock(&root)?;

        let disk_spec = registry.disk_spec(&config.disk_spec)?;
        let spec_path = root.join(SPEC_FILE);
        if spec_path.exists() {
            let on_disk = DiskSpec::parse(&fs::read_to_string(&spec_path)?)?;
            if on_disk != disk_spec {
                return Err(Error::Config(format!(
                    "datastore configuration mismatch: repository has {}, config wants {}",
                    on_disk, disk_spec
                )));
            }
        } else {
            fs::write(&spec_path, disk_spec.to_string())?;
            info!(root = %root.display(), spec = %disk_spec, "initialized repository");
        }

        let ds = registry.open(&config.disk_spec, &root)?;
        let blocks = BlockStore::new(ds)
            .with_write_through(config.write_through)
            .with_cache(config.block_cache_size);
        let importer = Importer::new(blocks.clone(), config.import);
        let exporter = Exporter::new(blocks.clone());
        let usage = StorageUsage::start(&root, config.max_storage, config.usage)?;

        info!(
            root = %root.display(),
            backend = disk_spec.type_name(),
            uuid = %config.uuid,
            "opened repository"
        );

        Ok(Repo {
            root,
            config,
            disk_spec,
            blocks,
            importer,
            exporter,
            usage,
            lock: Some(lock),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn disk_spec(&self) -> &DiskSpec {
        &self.disk_spec
    }

    pub fn uuid(&self) -> &str {
        &self.config.uuid
    }

    pub fn max_storage(&self) -> u64 {
        self.config.max_storage
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn importer(&self) -> &Importer {
        &self.importer
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    pub fn usage(&self) -> &StorageUsage {
        &self.usage
    }

    /// Store raw byte strings as blocks, returning their addresses in order
    pub fn save_blocks<I, B>(&self, data: I) -> Result<Vec<Address>>
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let blocks: Vec<Block> = data.into_iter().map(Block::raw).collect();
        self.blocks.put_many(&blocks)?;
        Ok(blocks.iter().map(|b| *b.address()).collect())
    }

    /// True if every text address parses and is present
    pub fn has_blocks<S: AsRef<str>>(&self, addresses: &[S], cancel: &CancelToken) -> bool {
        let mut parsed = Vec::with_capacity(addresses.len());
        for text in addresses {
            match text.as_ref().parse::<Address>() {
                Ok(address) => parsed.push(address),
                Err(_) => return false,
            }
        }
        self.blocks.has_all(&parsed, cancel)
    }

    /// Delete blocks by text address. Every address is parsed first.
    pub fn delete_blocks<S: AsRef<str>>(&self, addresses: &[S], cancel: &CancelToken) -> Result<()> {
        let parsed = addresses
            .iter()
            .map(|text| text.as_ref().parse::<Address>())
            .collect::<Result<Vec<_>>>()?;
        for address in &parsed {
            cancel.check()?;
            self.blocks.delete(address)?;
        }
        Ok(())
    }

    pub fn delete_all_blocks(&self, cancel: &CancelToken) -> Result<()> {
        self.blocks.delete_all(cancel)
    }

    pub fn import(&self, path: impl AsRef<Path>, cancel: &CancelToken) -> Result<ImportResult> {
        self.importer.import(path.as_ref(), cancel)
    }

    pub fn import_with_chunk_size(
        &self,
        path: impl AsRef<Path>,
        chunk_size: usize,
        cancel: &CancelToken,
    ) -> Result<ImportResult> {
        self.importer
            .import_with_chunk_size(path.as_ref(), chunk_size, cancel)
    }

    /// Export the tree at a text root address into `dest`
    pub fn export(&self, root: &str, dest: impl AsRef<Path>, cancel: &CancelToken) -> Result<()> {
        let root: Address = root.parse()?;
        let dest = expand_home(dest.as_ref())?;
        self.exporter.export(&root, &dest, cancel)
    }

    pub fn progress(&self) -> f64 {
        self.importer.progress()
    }

    pub fn progress_info(&self) -> ProgressSnapshot {
        self.importer.progress_info()
    }

    /// Stop the usage monitor, sync the store and release the lock
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(lock) = self.lock.take() else {
            return Ok(());
        };
        self.usage.stop();
        let synced = self.blocks.sync();
        if let Err(e) = lock.unlock() {
            warn!(error = %e, "failed to release repository lock");
        }
        info!(root = %self.root.display(), "closed repository");
        synced
    }
}

impl Drop for Repo {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "error while closing repository");
        }
    }
}

fn acquire_lock(root: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(root.join(LOCK_FILE))?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            Err(Error::Locked)
        }
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_config(spec: DiskSpec) -> RepoConfig {
        let mut config = RepoConfig {
            uuid: "test-device".to_string(),
            max_storage: 1 << 30,
            disk_spec: spec,
            ..RepoConfig::default()
        };
        config.usage.scan_interval = Duration::from_secs(60);
        config
    }

    #[test]
    fn test_open_writes_descriptor_and_lock() {
        let dir = tempdir().unwrap();
        let repo = Repo::open(dir.path(), test_config(DiskSpec::log(false))).unwrap();
        assert_eq!(repo.uuid(), "test-device");

        let text = fs::read_to_string(dir.path().join(SPEC_FILE)).unwrap();
        assert_eq!(DiskSpec::parse(&text).unwrap(), DiskSpec::log(false));
        assert!(dir.path().join(LOCK_FILE).exists());
        repo.close().unwrap();
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let repo = Repo::open(dir.path(), test_config(DiskSpec::log(false))).unwrap();
        assert!(matches!(
            Repo::open(dir.path(), test_config(DiskSpec::log(false))),
            Err(Error::Locked)
        ));
        drop(repo);
        Repo::open(dir.path(), test_config(DiskSpec::log(false))).unwrap();
    }

    #[test]
    fn test_descriptor_mismatch() {
        let dir = tempdir().unwrap();
        Repo::open(dir.path(), test_config(DiskSpec::log(false)))
            .unwrap()
            .close()
            .unwrap();

        assert!(matches!(
            Repo::open(dir.path(), test_config(DiskSpec::flatfs(true))),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Repo::open(dir.path(), test_config(DiskSpec::log(true))),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_flatfs_sync_flag_is_not_part_of_descriptor() {
        let dir = tempdir().unwrap();
        Repo::open(dir.path(), test_config(DiskSpec::flatfs(true)))
            .unwrap()
            .close()
            .unwrap();
        Repo::open(dir.path(), test_config(DiskSpec::flatfs(false))).unwrap();
    }

    #[test]
    fn test_block_operations() {
        let dir = tempdir().unwrap();
        let repo = Repo::open(dir.path(), test_config(DiskSpec::flatfs(false))).unwrap();
        let cancel = CancelToken::new();

        let saved = repo
            .save_blocks(vec![&b"one"[..], &b"two"[..]])
            .unwrap();
        let texts: Vec<String> = saved.iter().map(Address::to_hex).collect();
        assert!(repo.has_blocks(&texts[..], &cancel));

        let unknown = Address::compute(crate::model::Codec::Raw, b"three").to_hex();
        assert!(!repo.has_blocks(&[texts[0].clone(), unknown], &cancel));
        assert!(!repo.has_blocks(&["not an address"], &cancel));

        assert!(matches!(
            repo.delete_blocks(&["zz"], &cancel),
            Err(Error::InvalidAddress(_))
        ));
        repo.delete_blocks(&texts[..1], &cancel).unwrap();
        assert!(!repo.has_blocks(&texts[..1], &cancel));
        assert!(repo.has_blocks(&texts[1..], &cancel));

        repo.delete_all_blocks(&cancel).unwrap();
        assert_eq!(repo.blocks().len().unwrap(), 0);
    }

    #[test]
    fn test_cached_block_store_survives_wipe() {
        let dir = tempdir().unwrap();
        let mut config = test_config(DiskSpec::log(false));
        config.block_cache_size = 64;
        config.write_through = false;
        let repo = Repo::open(dir.path().join("repo"), config).unwrap();
        let cancel = CancelToken::new();

        let src = dir.path().join("data.bin");
        fs::write(&src, vec![9u8; 5000]).unwrap();
        let first = repo.import_with_chunk_size(&src, 1000, &cancel).unwrap();
        repo.delete_all_blocks(&cancel).unwrap();

        let second = repo.import_with_chunk_size(&src, 1000, &cancel).unwrap();
        assert_eq!(first.root_address, second.root_address);
        let dest = dir.path().join("out.bin");
        repo.export(&second.root_address.to_hex(), &dest, &cancel)
            .unwrap();
        assert_eq!(fs::read(&dest).unwrap(), vec![9u8; 5000]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let mut config = test_config(DiskSpec::memory());
        config.max_storage = 0;
        assert!(Repo::open(dir.path(), config).is_err());
    }
}
