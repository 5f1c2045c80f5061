//! Datastore descriptors and the backend registry
//!
//! A repository records which backend produced it in a small JSON file
//! (`datastore_spec`). The descriptor contains only what determines the
//! on-disk format; runtime knobs such as fsync behaviour are left out so
//! they can change between runs.

use crate::store::{Datastore, FlatFs, LogStore, LogStoreOptions, MemoryDatastore};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// File name of the descriptor inside a repository root
pub const SPEC_FILE: &str = "datastore_spec";

/// A backend configuration: a JSON object with a `type` field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiskSpec(Value);

impl DiskSpec {
    pub fn new(value: Value) -> Result<Self> {
        match value.get("type") {
            Some(Value::String(_)) => Ok(DiskSpec(value)),
            _ => Err(Error::Config(
                "'type' field missing or not a string".to_string(),
            )),
        }
    }

    /// Log-structured single-file backend
    pub fn log(compress: bool) -> Self {
        DiskSpec(serde_json::json!({
            "type": "log",
            "path": "blocks.log",
            "compression": if compress { "zstd" } else { "none" },
        }))
    }

    /// One file per block, sharded into subdirectories
    pub fn flatfs(sync: bool) -> Self {
        DiskSpec(serde_json::json!({
            "type": "flatfs",
            "path": "blocks",
            "sync": sync,
        }))
    }

    pub fn memory() -> Self {
        DiskSpec(serde_json::json!({ "type": "memory" }))
    }

    pub fn type_name(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn params(&self) -> &Value {
        &self.0
    }

    /// Parse a descriptor from its JSON text
    pub fn parse(text: &str) -> Result<Self> {
        Self::new(serde_json::from_str(text.trim())?)
    }
}

impl Default for DiskSpec {
    fn default() -> Self {
        DiskSpec::flatfs(true)
    }
}

impl fmt::Display for DiskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // serde_json maps are sorted, so this rendering is canonical
        write!(f, "{}", self.0)
    }
}

/// Knows how to describe and instantiate one kind of backend
pub trait BackendFactory: Send + Sync {
    /// The minimal descriptor of what ends up on disk
    fn disk_spec(&self, spec: &DiskSpec) -> Result<DiskSpec>;

    /// Instantiate the backend under the repository root
    fn open(&self, spec: &DiskSpec, root: &Path) -> Result<Arc<dyn Datastore>>;
}

fn parse_params<T: for<'de> Deserialize<'de>>(spec: &DiskSpec) -> Result<T> {
    serde_json::from_value(spec.params().clone()).map_err(|e| {
        Error::Config(format!(
            "invalid '{}' datastore config: {}",
            spec.type_name(),
            e
        ))
    })
}

struct MemoryBackend;

impl BackendFactory for MemoryBackend {
    fn disk_spec(&self, _spec: &DiskSpec) -> Result<DiskSpec> {
        Ok(DiskSpec::memory())
    }

    fn open(&self, _spec: &DiskSpec, _root: &Path) -> Result<Arc<dyn Datastore>> {
        Ok(Arc::new(MemoryDatastore::new()))
    }
}

#[derive(Deserialize)]
struct LogParams {
    path: String,
    #[serde(default)]
    compression: Option<String>,
    #[serde(default)]
    sync: bool,
}

impl LogParams {
    fn compress(&self) -> Result<bool> {
        match self.compression.as_deref() {
            None | Some("none") => Ok(false),
            Some("zstd") => Ok(true),
            Some(other) => Err(Error::Config(format!(
                "unrecognized value for compression: {}",
                other
            ))),
        }
    }
}

struct LogBackend;

impl BackendFactory for LogBackend {
    fn disk_spec(&self, spec: &DiskSpec) -> Result<DiskSpec> {
        let params: LogParams = parse_params(spec)?;
        let compress = params.compress()?;
        Ok(DiskSpec(serde_json::json!({
            "type": "log",
            "path": params.path,
            "compression": if compress { "zstd" } else { "none" },
        })))
    }

    fn open(&self, spec: &DiskSpec, root: &Path) -> Result<Arc<dyn Datastore>> {
        let params: LogParams = parse_params(spec)?;
        let options = LogStoreOptions {
            compress: params.compress()?,
            sync_writes: params.sync,
        };
        let store = LogStore::open_or_create(root.join(&params.path), options)?;
        Ok(Arc::new(store))
    }
}

#[derive(Deserialize)]
struct FlatFsParams {
    path: String,
    #[serde(default)]
    sync: bool,
}

struct FlatFsBackend;

impl BackendFactory for FlatFsBackend {
    fn disk_spec(&self, spec: &DiskSpec) -> Result<DiskSpec> {
        let params: FlatFsParams = parse_params(spec)?;
        Ok(DiskSpec(serde_json::json!({
            "type": "flatfs",
            "path": params.path,
        })))
    }

    fn open(&self, spec: &DiskSpec, root: &Path) -> Result<Arc<dyn Datastore>> {
        let params: FlatFsParams = parse_params(spec)?;
        let store = FlatFs::create_or_open(root.join(&params.path), params.sync)?;
        Ok(Arc::new(store))
    }
}

/// Maps backend type names to factories.
///
/// Built once at startup and handed to the repository by reference.
pub struct BackendRegistry {
    factories: HashMap<String, Box<dyn BackendFactory>>,
}

impl BackendRegistry {
    /// The built-in `memory`, `log` and `flatfs` backends
    pub fn builtin() -> Self {
        let mut factories: HashMap<String, Box<dyn BackendFactory>> = HashMap::new();
        factories.insert("memory".to_string(), Box::new(MemoryBackend));
        factories.insert("log".to_string(), Box::new(LogBackend));
        factories.insert("flatfs".to_string(), Box::new(FlatFsBackend));
        BackendRegistry { factories }
    }

    /// Register a factory under `name`
    pub fn with(mut self, name: &str, factory: impl BackendFactory + 'static) -> Result<Self> {
        if self.factories.contains_key(name) {
            return Err(Error::Config(format!(
                "already have a datastore named {:?}",
                name
            )));
        }
        self.factories.insert(name.to_string(), Box::new(factory));
        Ok(self)
    }

    fn factory(&self, spec: &DiskSpec) -> Result<&dyn BackendFactory> {
        self.factories
            .get(spec.type_name())
            .map(|f| f.as_ref())
            .ok_or_else(|| Error::Config(format!("unknown datastore type: {}", spec.type_name())))
    }

    pub fn disk_spec(&self, spec: &DiskSpec) -> Result<DiskSpec> {
        self.factory(spec)?.disk_spec(spec)
    }

    pub fn open(&self, spec: &DiskSpec, root: &Path) -> Result<Arc<dyn Datastore>> {
        self.factory(spec)?.open(spec, root)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        BackendRegistry::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_names() {
        assert_eq!(
            BackendRegistry::builtin().names(),
            vec!["flatfs", "log", "memory"]
        );
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = BackendRegistry::builtin().with("log", LogBackend);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_disk_spec_drops_runtime_fields() {
        let registry = BackendRegistry::builtin();
        let synced = registry.disk_spec(&DiskSpec::flatfs(true)).unwrap();
        let unsynced = registry.disk_spec(&DiskSpec::flatfs(false)).unwrap();

        assert_eq!(synced, unsynced);
        assert_eq!(synced.to_string(), r#"{"path":"blocks","type":"flatfs"}"#);
    }

    #[test]
    fn test_unknown_type_and_bad_params() {
        let registry = BackendRegistry::builtin();
        let dir = tempdir().unwrap();

        let unknown = DiskSpec::new(serde_json::json!({ "type": "leveldb" })).unwrap();
        assert!(matches!(
            registry.open(&unknown, dir.path()),
            Err(Error::Config(_))
        ));

        let bad = DiskSpec::new(serde_json::json!({
            "type": "log",
            "path": "blocks.log",
            "compression": "snappy",
        }))
        .unwrap();
        assert!(matches!(
            registry.open(&bad, dir.path()),
            Err(Error::Config(_))
        ));

        assert!(DiskSpec::new(serde_json::json!({ "path": "x" })).is_err());
    }

    #[test]
    fn test_parse_roundtrips_display() {
        let spec = DiskSpec::log(true);
        assert_eq!(DiskSpec::parse(&spec.to_string()).unwrap(), spec);
    }
}
