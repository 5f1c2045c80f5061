//! Deterministic directory traversal for imports

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File { size: u64 },
    Dir,
}

/// One entry below the import root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub name: String,
    /// 1 for direct children of the root
    pub depth: usize,
    pub kind: EntryKind,
}

/// Walk everything below `root` in pre-order, siblings sorted by name.
///
/// Symlinks are not followed; they and other special files are skipped with
/// a warning.
pub fn walk_tree(root: &Path) -> impl Iterator<Item = Result<WalkEntry>> {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.map_err(Error::from).and_then(classify).transpose())
}

fn classify(entry: walkdir::DirEntry) -> Result<Option<WalkEntry>> {
    let file_type = entry.file_type();
    let kind = if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_file() {
        EntryKind::File {
            size: entry.metadata()?.len(),
        }
    } else {
        warn!(path = %entry.path().display(), "skipping special file or symlink");
        return Ok(None);
    };

    let name = entry
        .file_name()
        .to_str()
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "file name is not valid UTF-8: {}",
                entry.path().display()
            ))
        })?
        .to_string();

    Ok(Some(WalkEntry {
        depth: entry.depth(),
        path: entry.into_path(),
        name,
        kind,
    }))
}

/// Sum of regular file sizes below `root` (or its size if it is a file)
pub fn total_size(root: &Path) -> Result<u64> {
    let meta = std::fs::metadata(root)?;
    if meta.is_file() {
        return Ok(meta.len());
    }
    let mut total = 0u64;
    for entry in walk_tree(root) {
        if let EntryKind::File { size } = entry?.kind {
            total += size;
        }
    }
    Ok(total)
}
