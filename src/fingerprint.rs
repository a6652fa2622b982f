//! Content fingerprint over every record file under a projects root.
//!
//! The digest covers `(path, mtime)` pairs, sorted by path, so it changes when
//! a file is added, removed or touched and is stable otherwise. Only files one
//! level inside a project directory count, the same files ingestion reads.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;
use walkdir::WalkDir;

use crate::ingest::LOG_EXTENSION;

/// `<root>/<project>/*.jsonl` with their modification time in nanoseconds.
fn collect_stamps(root: &Path) -> Vec<(PathBuf, u128)> {
    let mut stamps: Vec<(PathBuf, u128)> = WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(LOG_EXTENSION))
        .map(|e| {
            let mtime = e
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            (e.into_path(), mtime)
        })
        .collect();
    stamps.sort();
    stamps
}

/// Hex SHA-256 of the sorted `(path, mtime)` list. A missing root hashes the
/// empty list.
pub fn fingerprint(root: &Path) -> String {
    let stamps = collect_stamps(root);
    let mut hasher = Sha256::new();
    for (path, mtime) in &stamps {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(mtime.to_le_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    debug!(root = %root.display(), files = stamps.len(), "Computed fingerprint");
    digest
}

/// Blocking walk moved off the async runtime.
pub async fn fingerprint_async(root: PathBuf) -> String {
    match tokio::task::spawn_blocking(move || fingerprint(&root)).await {
        Ok(fp) => fp,
        // join error only on panic; an empty digest never matches a stored one
        Err(_) => String::new(),
    }
}
