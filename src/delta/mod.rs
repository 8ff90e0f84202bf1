//! static deltas: precomputed object-level updates between two commits
//!
//! a delta is a self-contained directory artifact under deltas/, named
//! `<to>` for a from-scratch delta or `<from>-<to>` for an incremental
//! one. the directory holds a superblock (the operation stream), numbered
//! chunk files carrying literal and patch payloads, and an optional
//! fallback file with whole large objects. artifacts can be shipped out
//! of band and applied to another repository without contacting the
//! producer.

mod apply;
mod bsdiff;
mod format;
mod generate;

pub use apply::apply_offline;
pub use format::{
    read_superblock, ChunkInfo, DeltaOp, FallbackEntry, Superblock, DELTA_MAGIC, DELTA_VERSION,
    FALLBACK_FILE, SUPERBLOCK_FILE,
};
pub use generate::{generate, DeltaConfig, DeltaReport};

pub(crate) use generate::collect_closure;

use std::path::PathBuf;

use crate::error::{IoResultExt, Result};
use crate::hash::Checksum;
use crate::repo::Repo;

/// canonical name of the delta between two endpoints
pub fn delta_name(from: Option<&Checksum>, to: &Checksum) -> String {
    match from {
        Some(from) => format!("{}-{}", from, to),
        None => to.to_hex(),
    }
}

/// directory of the named delta artifact
pub fn delta_path(repo: &Repo, name: &str) -> PathBuf {
    repo.deltas_path().join(name)
}

/// list delta artifacts in this repository, sorted by name
///
/// only directories containing a superblock count; partially written or
/// foreign entries under deltas/ are ignored.
pub fn list_deltas(repo: &Repo) -> Result<Vec<String>> {
    let dir = repo.deltas_path();
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&dir).with_path(&dir)? {
        let entry = entry.with_path(&dir)?;
        if !entry.path().join(SUPERBLOCK_FILE).is_file() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
