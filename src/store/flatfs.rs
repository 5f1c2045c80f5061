//! Sharded one-file-per-key datastore
//!
//! Keys are hex encoded; each value lives in `<root>/<shard>/<hex>.data`
//! where the shard is the two hex characters before the last one. Writes go
//! to a temporary file that is renamed into place, so readers never see a
//! partially written value.

use crate::store::Datastore;
use crate::{Error, Result};
use bytes::Bytes;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const EXTENSION: &str = "data";
const TEMP_PREFIX: &str = ".put-";

pub struct FlatFs {
    root: PathBuf,
    sync_writes: bool,
    temp_counter: AtomicU64,
}

impl FlatFs {
    /// Open the directory at `root`, creating it if missing
    pub fn create_or_open(root: impl AsRef<Path>, sync_writes: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!(root = %root.display(), sync_writes, "opened flatfs datastore");
        Ok(FlatFs {
            root,
            sync_writes,
            temp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard(hex_key: &str) -> &str {
        let len = hex_key.len();
        if len < 3 {
            "__"
        } else {
            &hex_key[len - 3..len - 1]
        }
    }

    fn value_path(&self, key: &[u8]) -> PathBuf {
        let hex_key = hex::encode(key);
        self.root
            .join(Self::shard(&hex_key))
            .join(format!("{}.{}", hex_key, EXTENSION))
    }

    fn put_one(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let path = self.value_path(key);
        if path.exists() {
            return Ok(());
        }
        let dir = path
            .parent()
            .ok_or_else(|| Error::Store(format!("no shard directory for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let temp = dir.join(format!(
            "{}{}-{}",
            TEMP_PREFIX,
            std::process::id(),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        let result = (|| -> Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(value)?;
            if self.sync_writes {
                file.sync_all()?;
            }
            fs::rename(&temp, &path)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }

    /// Every regular data file under the root
    fn data_files(&self) -> Result<Vec<(PathBuf, u64)>> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            files.push((path.to_path_buf(), entry.metadata()?.len()));
        }
        Ok(files)
    }
}

impl Datastore for FlatFs {
    fn put_batch(&self, entries: Vec<(Vec<u8>, Bytes)>) -> Result<()> {
        let count = entries.len();
        for (key, value) in entries {
            self.put_one(&key, &value)?;
        }
        debug!(count, "flatfs batch written");
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        match fs::read(self.value_path(key)) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.value_path(key).is_file())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for (path, _) in self.data_files()? {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match hex::decode(stem) {
                Ok(key) => keys.push(key),
                Err(_) => debug!(path = %path.display(), "ignoring foreign file"),
            }
        }
        Ok(keys)
    }

    fn disk_usage(&self) -> Result<u64> {
        Ok(self.data_files()?.iter().map(|(_, size)| size).sum())
    }
}
