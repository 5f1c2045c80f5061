//! Block storage
//!
//! [`BlockStore`] stores content-addressed blocks on top of any
//! [`Datastore`] backend. Three backends ship with the crate: in-memory,
//! a single append-only log file, and a sharded file-per-block directory.
//! Lookups can go through an optional [`PresenceCache`].
//! [`BackendRegistry`] maps the `type` of a [`DiskSpec`] to the backend
//! that opens it.

mod blockstore;
mod cache;
mod datastore;
mod flatfs;
mod log_store;
mod memory;
mod spec;

pub use blockstore::BlockStore;
pub use cache::PresenceCache;
pub use datastore::Datastore;
pub use flatfs::FlatFs;
pub use log_store::{LogStore, LogStoreOptions};
pub use memory::MemoryDatastore;
pub use spec::{BackendFactory, BackendRegistry, DiskSpec, SPEC_FILE};
