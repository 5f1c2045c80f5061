//! Import progress
//!
//! Readers wrapped in [`ProgressReader`] report how far they got through a
//! bounded channel. A consumer thread folds those events into a
//! [`ProgressAggregator`] and publishes the latest [`ProgressSnapshot`] for
//! non-blocking readers.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::io::Read;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Report after at least this many bytes
pub const PROGRESS_INCREMENT: u64 = 1024 * 1024;

/// Capacity of the event channel
pub const PROGRESS_CHANNEL_CAPACITY: usize = 128;

/// Bytes read so far from one file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressEvent {
    pub name: String,
    pub bytes: u64,
    pub size: u64,
}

/// Latest published progress of the running import
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Base name of the path being imported
    pub path_name: String,
    /// Percentage in `[0, 100]`
    pub percent: f64,
}

/// Folds per-file progress events into one overall percentage.
///
/// Finished files are locked into an accumulator; the in-flight file adds
/// its partial count on top. The percentage never goes down.
#[derive(Clone, Debug, Default)]
pub struct ProgressAggregator {
    total: u64,
    locked: u64,
    processed: u64,
    percent: f64,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the grand total by `bytes`
    pub fn declare_total(&mut self, bytes: u64) {
        self.total += bytes;
        self.refresh();
    }

    pub fn record(&mut self, event: &ProgressEvent) {
        if event.bytes >= event.size {
            self.locked += event.size;
            self.processed = self.locked;
        } else {
            self.processed = self.locked + event.bytes;
        }
        self.refresh();
    }

    fn refresh(&mut self) {
        if self.total == 0 {
            return;
        }
        let percent = (self.processed as f64 / self.total as f64 * 100.0).clamp(0.0, 100.0);
        if percent > self.percent {
            self.percent = percent;
        }
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Wraps a file reader and emits a [`ProgressEvent`] every
/// [`PROGRESS_INCREMENT`] bytes and at end of file
pub struct ProgressReader<R> {
    inner: R,
    name: String,
    size: u64,
    bytes: u64,
    last_reported: u64,
    finished: bool,
    events: Sender<ProgressEvent>,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, name: impl Into<String>, size: u64, events: Sender<ProgressEvent>) -> Self {
        ProgressReader {
            inner,
            name: name.into(),
            size,
            bytes: 0,
            last_reported: 0,
            finished: false,
            events,
        }
    }

    fn emit(&mut self) {
        self.last_reported = self.bytes;
        // A gone consumer only means nobody is watching
        let _ = self.events.send(ProgressEvent {
            name: self.name.clone(),
            bytes: self.bytes,
            size: self.size,
        });
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes += n as u64;

        if n == 0 {
            if !self.finished {
                self.finished = true;
                self.emit();
            }
        } else if self.bytes < self.size
            && self.bytes - self.last_reported >= PROGRESS_INCREMENT
        {
            // The terminal event is left to end of file so a finished file
            // is locked in exactly once
            self.emit();
        }
        Ok(n)
    }
}

/// Shared, lock-protected snapshot written by the consumer thread
pub type SharedProgress = Arc<RwLock<ProgressSnapshot>>;

/// Spawn the consumer thread for one import.
///
/// The thread exits once every sender is dropped.
pub fn spawn_consumer(
    aggregator: ProgressAggregator,
    events: Receiver<ProgressEvent>,
    shared: SharedProgress,
) -> std::io::Result<JoinHandle<ProgressAggregator>> {
    thread::Builder::new()
        .name("import-progress".to_string())
        .spawn(move || {
            let mut aggregator = aggregator;
            shared.write().percent = aggregator.percent();
            for event in events {
                aggregator.record(&event);
                shared.write().percent = aggregator.percent();
            }
            debug!(
                processed = aggregator.processed(),
                total = aggregator.total(),
                "progress consumer finished"
            );
            aggregator
        })
}
