//! Import pipeline
//!
//! Files are split by the [`Chunker`], arranged into a balanced DAG by
//! [`BalancedBuilder`] and staged in a [`StagingTree`] that writes blocks to
//! the store in bounded batches. [`Importer`] drives the whole thing for
//! one file or directory at a time.

pub mod balanced;
pub mod chunker;
pub mod importer;
pub mod progress;
pub mod staging;
pub mod walk;

pub use balanced::{build_file, BalancedBuilder};
pub use chunker::Chunker;
pub use importer::{expand_home, ImportResult, ImportSession, Importer, SessionGuard};
pub use progress::{ProgressAggregator, ProgressEvent, ProgressReader, ProgressSnapshot};
pub use staging::{StagingStats, StagingTree};
