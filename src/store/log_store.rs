//! Single-file, append-only datastore
//!
//! File format:
//! ```text
//! [HEADER: 16 bytes]
//!   - magic: 8 bytes ("BLOCKREP")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes (bit 0: values are zstd-compressed)
//!
//! [RECORDS: variable]
//!   - op: 1 byte (1 = put, 2 = delete)
//!   - key_len: 2 bytes (u16 LE)
//!   - value_len: 4 bytes (u32 LE, 0 for deletes)
//!   - key, then value
//! ```
//!
//! The in-memory index is rebuilt by replaying the log on open. A torn
//! record at the tail (crash mid-append) is truncated away.

use crate::store::Datastore;
use crate::{Error, Result, MAGIC, VERSION};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const HEADER_SIZE: u64 = 16;
const RECORD_HEADER_SIZE: u64 = 7;
const FLAG_ZSTD: u32 = 1;
const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;
const ZSTD_LEVEL: i32 = 3;

/// Location of a stored value
#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

/// Options for creating a log store
#[derive(Clone, Copy, Debug, Default)]
pub struct LogStoreOptions {
    /// Compress values with zstd (fixed at creation time)
    pub compress: bool,
    /// fsync after every batch
    pub sync_writes: bool,
}

/// A datastore backed by one append-only log file
pub struct LogStore {
    path: PathBuf,
    file: RwLock<File>,
    index: RwLock<HashMap<Vec<u8>, IndexEntry>>,
    /// Current append position
    write_offset: RwLock<u64>,
    compressed: bool,
    sync_writes: bool,
}

impl LogStore {
    /// Create a new, empty log file
    pub fn create(path: impl AsRef<Path>, options: LogStoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let flags = if options.compress { FLAG_ZSTD } else { 0 };
        file.write_all(&header(flags))?;
        file.sync_all()?;

        info!(path = %path.display(), compress = options.compress, "created log store");

        Ok(LogStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(HashMap::new()),
            write_offset: RwLock::new(HEADER_SIZE),
            compressed: options.compress,
            sync_writes: options.sync_writes,
        })
    }

    /// Open an existing log file and replay it
    pub fn open(path: impl AsRef<Path>, options: LogStoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..8] != MAGIC {
            return Err(Error::Corruption("Invalid magic bytes".into()));
        }

        let version = read_u32(&header[8..12]);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }
        let flags = read_u32(&header[12..16]);

        let (index, end) = replay(&file)?;
        let len = file.metadata()?.len();
        if end < len {
            warn!(
                path = %path.display(),
                dropped = len - end,
                "truncating torn record at end of log"
            );
            file.set_len(end)?;
        }

        debug!(path = %path.display(), keys = index.len(), "opened log store");

        Ok(LogStore {
            path,
            file: RwLock::new(file),
            index: RwLock::new(index),
            write_offset: RwLock::new(end),
            compressed: flags & FLAG_ZSTD != 0,
            sync_writes: options.sync_writes,
        })
    }

    /// Open or create a log file
    pub fn open_or_create(path: impl AsRef<Path>, options: LogStoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path, options)
        } else {
            Self::create(path, options)
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode_value(&self, value: &[u8]) -> Result<Vec<u8>> {
        if self.compressed {
            Ok(zstd::encode_all(value, ZSTD_LEVEL)?)
        } else {
            Ok(value.to_vec())
        }
    }

    fn decode_value(&self, stored: Vec<u8>) -> Result<Bytes> {
        if self.compressed {
            Ok(Bytes::from(zstd::decode_all(stored.as_slice())?))
        } else {
            Ok(Bytes::from(stored))
        }
    }

    /// Append records, returning the value offset of each in order.
    ///
    /// Callers hold the index write lock.
    fn append(&self, records: &[(u8, &[u8], &[u8])]) -> Result<Vec<u64>> {
        let mut write_offset = self.write_offset.write();
        let mut offset = *write_offset;

        let mut buf = Vec::new();
        let mut value_offsets = Vec::with_capacity(records.len());
        for (op, key, value) in records {
            if key.len() > u16::MAX as usize || value.len() > u32::MAX as usize {
                return Err(Error::InvalidInput(format!(
                    "record too large: key {} bytes, value {} bytes",
                    key.len(),
                    value.len()
                )));
            }
            buf.push(*op);
            buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(key);
            buf.extend_from_slice(value);

            let value_offset = offset + RECORD_HEADER_SIZE + key.len() as u64;
            value_offsets.push(value_offset);
            offset = value_offset + value.len() as u64;
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(*write_offset))?;
        file.write_all(&buf)?;
        if self.sync_writes {
            file.sync_data()?;
        }

        *write_offset = offset;
        Ok(value_offsets)
    }
}

impl Datastore for LogStore {
    fn put_batch(&self, entries: Vec<(Vec<u8>, Bytes)>) -> Result<()> {
        // Skip keys already present, values are immutable per key
        let fresh: Vec<_> = {
            let index = self.index.read();
            entries
                .into_iter()
                .filter(|(key, _)| !index.contains_key(key))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(());
        }

        let encoded = fresh
            .iter()
            .map(|(_, value)| self.encode_value(value))
            .collect::<Result<Vec<_>>>()?;

        // The index stays locked from the re-check until the new offsets are
        // recorded, so concurrent writers and compaction see a consistent log
        let mut index = self.index.write();
        let mut seen = HashSet::new();
        let (keys, values): (Vec<_>, Vec<_>) = fresh
            .into_iter()
            .zip(encoded)
            .filter(|((key, _), _)| !index.contains_key(key) && seen.insert(key.clone()))
            .map(|((key, _), value)| (key, value))
            .unzip();
        if keys.is_empty() {
            return Ok(());
        }

        let records: Vec<_> = keys
            .iter()
            .zip(&values)
            .map(|(key, value)| (OP_PUT, key.as_slice(), value.as_slice()))
            .collect();
        let offsets = self.append(&records)?;

        for ((key, value), offset) in keys.into_iter().zip(&values).zip(offsets) {
            index.insert(
                key,
                IndexEntry {
                    offset,
                    size: value.len() as u32,
                },
            );
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        // Hold the index across the read; compaction rewrites every offset
        let index = self.index.read();
        let Some(entry) = index.get(key).copied() else {
            return Ok(None);
        };

        let mut data = vec![0u8; entry.size as usize];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut data)?;
        }
        drop(index);

        self.decode_value(data).map(Some)
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.index.read().contains_key(key))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut index = self.index.write();
        if !index.contains_key(key) {
            return Ok(());
        }
        let tombstone: &[u8] = &[];
        self.append(&[(OP_DELETE, key, tombstone)])?;
        index.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.index.read().keys().cloned().collect())
    }

    fn disk_usage(&self) -> Result<u64> {
        Ok(*self.write_offset.read())
    }

    fn sync(&self) -> Result<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    /// Rewrite the log with only live records
    fn compact(&self) -> Result<()> {
        let mut index = self.index.write();
        let mut write_offset = self.write_offset.write();
        let mut file = self.file.write();

        let tmp_path = self.path.with_extension("compact");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        let flags = if self.compressed { FLAG_ZSTD } else { 0 };
        tmp.write_all(&header(flags))?;

        // Sort by key so compaction output is deterministic
        let mut live: Vec<_> = index.iter().map(|(k, e)| (k.clone(), *e)).collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));

        let mut offset = HEADER_SIZE;
        let mut new_index = HashMap::with_capacity(live.len());
        for (key, entry) in live {
            let mut value = vec![0u8; entry.size as usize];
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut value)?;

            tmp.write_all(&[OP_PUT])?;
            tmp.write_all(&(key.len() as u16).to_le_bytes())?;
            tmp.write_all(&entry.size.to_le_bytes())?;
            tmp.write_all(&key)?;
            tmp.write_all(&value)?;

            let value_offset = offset + RECORD_HEADER_SIZE + key.len() as u64;
            offset = value_offset + entry.size as u64;
            new_index.insert(
                key,
                IndexEntry {
                    offset: value_offset,
                    size: entry.size,
                },
            );
        }
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        *file = OpenOptions::new().read(true).write(true).open(&self.path)?;

        let before = *write_offset;
        *index = new_index;
        *write_offset = offset;

        info!(before, after = offset, "compacted log store");
        Ok(())
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

fn header(flags: u32) -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..8].copy_from_slice(MAGIC);
    header[8..12].copy_from_slice(&VERSION.to_le_bytes());
    header[12..16].copy_from_slice(&flags.to_le_bytes());
    header
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

/// Rebuild the index, returning it with the offset just past the last whole record
fn replay(file: &File) -> Result<(HashMap<Vec<u8>, IndexEntry>, u64)> {
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(HEADER_SIZE))?;

    let mut index = HashMap::new();
    let mut offset = HEADER_SIZE;
    loop {
        let mut record_header = [0u8; RECORD_HEADER_SIZE as usize];
        match reader.read_exact(&mut record_header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let op = record_header[0];
        let key_len = u16::from_le_bytes([record_header[1], record_header[2]]) as usize;
        let value_len = read_u32(&record_header[3..7]);

        let mut key = vec![0u8; key_len];
        match reader.read_exact(&mut key) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }

        let value_offset = offset + RECORD_HEADER_SIZE + key_len as u64;
        let end = value_offset + value_len as u64;
        if end > file_len {
            break;
        }
        // Skip the value without reading it
        reader.seek_relative(value_len as i64)?;

        match op {
            OP_PUT => {
                index.insert(
                    key,
                    IndexEntry {
                        offset: value_offset,
                        size: value_len,
                    },
                );
            }
            OP_DELETE => {
                index.remove(&key);
            }
            other => {
                return Err(Error::Corruption(format!(
                    "unknown record op {} at offset {}",
                    other, offset
                )))
            }
        }
        offset = end;
    }

    Ok((index, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(key: &str, value: &str) -> (Vec<u8>, Bytes) {
        (key.as_bytes().to_vec(), Bytes::from(value.to_string()))
    }

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.log");

        {
            let store = LogStore::create(&path, LogStoreOptions::default()).unwrap();
            assert_eq!(store.len(), 0);
        }

        {
            let store = LogStore::open(&path, LogStoreOptions::default()).unwrap();
            assert_eq!(store.len(), 0);
            assert_eq!(store.disk_usage().unwrap(), HEADER_SIZE);
        }
    }

    #[test]
    fn test_persistence_with_deletes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.log");
        let options = LogStoreOptions {
            compress: true,
            sync_writes: false,
        };

        {
            let store = LogStore::create(&path, options).unwrap();
            store
                .put_batch(vec![entry("k1", "first value"), entry("k2", "second")])
                .unwrap();
            store.delete(b"k1").unwrap();
        }

        {
            let store = LogStore::open(&path, options).unwrap();
            assert!(!store.has(b"k1").unwrap());
            assert_eq!(
                store.get(b"k2").unwrap(),
                Some(Bytes::from_static(b"second"))
            );
            assert_eq!(store.keys().unwrap(), vec![b"k2".to_vec()]);
        }
    }

    #[test]
    fn test_deduplication() {
        let dir = tempdir().unwrap();
        let store =
            LogStore::create(dir.path().join("blocks.log"), LogStoreOptions::default()).unwrap();

        store.put_batch(vec![entry("k", "same")]).unwrap();
        let size = store.disk_usage().unwrap();
        store.put_batch(vec![entry("k", "same")]).unwrap();

        assert_eq!(store.disk_usage().unwrap(), size);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.log");

        {
            let store = LogStore::create(&path, LogStoreOptions::default()).unwrap();
            store.put_batch(vec![entry("whole", "record")]).unwrap();
        }
        let good_len = fs::metadata(&path).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[OP_PUT, 5, 0, 100, 0, 0, 0, b'p', b'a']).unwrap();
        }

        let store = LogStore::open(&path, LogStoreOptions::default()).unwrap();
        assert_eq!(
            store.get(b"whole").unwrap(),
            Some(Bytes::from_static(b"record"))
        );
        assert_eq!(store.disk_usage().unwrap(), good_len);
    }

    #[test]
    fn test_compact_reclaims_deleted_space() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blocks.log");
        let store = LogStore::create(&path, LogStoreOptions::default()).unwrap();

        store
            .put_batch(vec![entry("keep", "kept value"), entry("drop", "x".repeat(4096).as_str())])
            .unwrap();
        store.delete(b"drop").unwrap();
        let before = store.disk_usage().unwrap();

        store.compact().unwrap();

        assert!(store.disk_usage().unwrap() < before);
        assert_eq!(fs::metadata(&path).unwrap().len(), store.disk_usage().unwrap());
        assert_eq!(
            store.get(b"keep").unwrap(),
            Some(Bytes::from_static(b"kept value"))
        );
        drop(store);

        let reopened = LogStore::open(&path, LogStoreOptions::default()).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn test_concurrent_puts_of_same_key_append_once() {
        let dir = tempdir().unwrap();
        let store =
            LogStore::create(dir.path().join("blocks.log"), LogStoreOptions::default()).unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    store
                        .put_batch(vec![entry("shared", "value"), entry("shared", "value")])
                        .unwrap();
                });
            }
        });

        let record = RECORD_HEADER_SIZE + "shared".len() as u64 + "value".len() as u64;
        assert_eq!(store.disk_usage().unwrap(), HEADER_SIZE + record);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reads_stay_valid_across_compaction() {
        let dir = tempdir().unwrap();
        let store =
            LogStore::create(dir.path().join("blocks.log"), LogStoreOptions::default()).unwrap();
        let kept: Vec<_> = (0..32)
            .map(|i| entry(&format!("keep-{:02}", i), &format!("value-{}", i)))
            .collect();
        store.put_batch(kept.clone()).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                for round in 0..100 {
                    let key = format!("churn-{}", round);
                    store.put_batch(vec![entry(&key, "x")]).unwrap();
                    store.delete(key.as_bytes()).unwrap();
                    store.compact().unwrap();
                }
            });
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..50 {
                        for (key, value) in &kept {
                            assert_eq!(store.get(key).unwrap().as_ref(), Some(value));
                        }
                    }
                });
            }
        });
    }
}
