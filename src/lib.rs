//! # blockrepo
//!
//! A content-addressed, deduplicating block repository.
//!
//! Files and directories are split into fixed-size chunks, arranged into a
//! balanced Merkle DAG and stored as immutable blocks keyed by their
//! content address. A single root address is enough to rebuild the
//! original bytes later.
//!
//! ## Core Concepts
//!
//! - **Blocks**: immutable `(address, bytes)` pairs
//! - **Addresses**: BLAKE3 digests tagged with a codec (raw, file, directory)
//! - **Repositories**: a directory holding one datastore plus its descriptor
//! - **Usage monitor**: background check of disk usage against a budget
//!
//! ## Example
//!
//! ```ignore
//! use blockrepo::{CancelToken, Repo, RepoConfig};
//!
//! let repo = Repo::open("~/.blockrepo", RepoConfig::default())?;
//! let result = repo.import("photos/", &CancelToken::new())?;
//! repo.export(&result.root_address.to_hex(), "restored/", &CancelToken::new())?;
//! ```

pub mod cancel;
pub mod config;
pub mod export;
pub mod import;
pub mod model;
pub mod repo;
pub mod store;
pub mod units;
pub mod usage;

mod error;

pub use cancel::CancelToken;
pub use config::{ImportConfig, RepoConfig, StagingConfig, UsageConfig};
pub use error::{Error, Result};
pub use export::Exporter;
pub use import::{ImportResult, Importer, ProgressSnapshot};
pub use model::{Address, Block, Codec, Link, Node};
pub use repo::Repo;
pub use store::{BackendRegistry, BlockStore, Datastore, DiskSpec};
pub use usage::StorageUsage;

/// On-disk format version of the log datastore
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"BLOCKREP";
