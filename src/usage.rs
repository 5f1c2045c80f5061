//! Storage usage monitor
//!
//! Periodically sums the size of every regular file under the repository
//! root and compares it against the capacity budget. The monitor is
//! advisory: callers check [`StorageUsage::is_full`] before importing.

use crate::config::UsageConfig;
use crate::units::human_bytes;
use crate::{Error, Result};
use crossbeam_channel::{select, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub struct StorageUsage {
    root: PathBuf,
    max_capacity: u64,
    config: UsageConfig,
    usage: Arc<AtomicU64>,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StorageUsage {
    /// Scan once, then keep rescanning every `config.scan_interval` on a
    /// background thread until stopped
    pub fn start(root: impl Into<PathBuf>, max_capacity: u64, config: UsageConfig) -> Result<Self> {
        if max_capacity == 0 {
            return Err(Error::InvalidInput(
                "max capacity must be positive".to_string(),
            ));
        }
        config.validate()?;

        let root = root.into();
        let usage = Arc::new(AtomicU64::new(scan_usage(&root)?));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_root = root.clone();
        let thread_usage = Arc::clone(&usage);
        let interval = config.scan_interval;
        let handle = thread::Builder::new()
            .name("usage-monitor".to_string())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => match scan_usage(&thread_root) {
                            Ok(bytes) => {
                                thread_usage.store(bytes, Ordering::Release);
                                debug!(bytes, "storage usage scanned");
                            }
                            Err(e) => warn!(error = %e, "storage usage scan failed"),
                        },
                    }
                }
                debug!("usage monitor stopped");
            })?;

        info!(
            root = %root.display(),
            max_capacity,
            interval_secs = interval.as_secs_f64(),
            "usage monitor started"
        );

        Ok(StorageUsage {
            root,
            max_capacity,
            config,
            usage,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bytes used as of the last scan
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Acquire)
    }

    pub fn max_capacity(&self) -> u64 {
        self.max_capacity
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    pub fn usage_percentage(&self) -> f64 {
        self.usage() as f64 / self.max_capacity as f64 * 100.0
    }

    pub fn is_full(&self) -> bool {
        self.usage_percentage() >= self.config.threshold
    }

    pub fn usage_human(&self) -> String {
        human_bytes(self.usage())
    }

    pub fn max_capacity_human(&self) -> String {
        human_bytes(self.max_capacity)
    }

    /// Rescan now instead of waiting for the next tick
    pub fn refresh(&self) -> Result<u64> {
        let bytes = scan_usage(&self.root)?;
        self.usage.store(bytes, Ordering::Release);
        Ok(bytes)
    }

    /// Stop the background thread. Idempotent.
    pub fn stop(&mut self) {
        // dropping the sender disconnects the shutdown channel
        if self.shutdown.take().is_some() {
            if let Some(handle) = self.handle.take() {
                if handle.join().is_err() {
                    warn!("usage monitor thread panicked");
                }
            }
            info!(root = %self.root.display(), "usage monitor stopped");
        }
    }
}

impl Drop for StorageUsage {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Total size of regular files under `root`
pub fn scan_usage(root: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}
