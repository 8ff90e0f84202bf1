//! offline application of a static delta
//!
//! replays the superblock's operation stream into a transaction: fallback
//! objects are resolved up front, then each op copies, materializes or
//! patches one object into staging. nothing touches the store until every
//! declared checksum has been verified and the target commit exists in
//! staging, so a failed apply leaves the repository exactly as it was.

use std::path::Path;

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::object::{self, ObjectKind};
use crate::repo::Repo;
use crate::txn::Transaction;

use super::bsdiff;
use super::format::{self, DeltaOp, FallbackEntry, Superblock, SUPERBLOCK_FILE};

/// apply a static delta artifact to this repository
///
/// `path` may be the delta directory or its superblock file. with
/// `allow_fallback_fetch` disabled, fallback objects must already exist in
/// the store. returns the TO commit checksum.
pub fn apply_offline(repo: &Repo, path: &Path, allow_fallback_fetch: bool) -> Result<Checksum> {
    repo.ensure_writable()?;

    let (dir, superblock_path) = if path.is_dir() {
        (path.to_path_buf(), path.join(SUPERBLOCK_FILE))
    } else {
        (
            path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf(),
            path.to_path_buf(),
        )
    };
    let sb = format::read_superblock(&superblock_path)?;

    // an incremental delta needs its FROM commit before any op can run
    if let Some(from) = &sb.from {
        if !object::object_exists(repo, ObjectKind::Commit, from) {
            return Err(Error::IncompatibleRoots {
                kind: ObjectKind::Commit,
                checksum: *from,
            });
        }
    }

    let mut txn = Transaction::begin(repo)?;

    stage_fallbacks(&dir, &sb, allow_fallback_fetch, &mut txn)?;

    let mut chunk_cache: Vec<Option<Vec<u8>>> = vec![None; sb.chunks.len()];
    for (index, op) in sb.ops.iter().enumerate() {
        apply_op(&dir, &sb, index, op, &mut chunk_cache, &mut txn)?;
    }

    if !txn.has_object(ObjectKind::Commit, &sb.to) {
        return Err(Error::InvalidSuperblock(format!(
            "operations do not produce target commit {}",
            sb.to
        )));
    }

    if let Some(ref_name) = &sb.target_ref {
        txn.set_ref(ref_name, sb.to)?;
    }

    let stats = txn.commit()?;
    tracing::debug!(
        to = %sb.to,
        published = stats.objects_published,
        deduplicated = stats.objects_deduplicated,
        "applied static delta"
    );
    Ok(sb.to)
}

/// resolve every fallback entry before op replay
///
/// entries already in the store are re-read so a corrupt copy is caught
/// now rather than when an op depends on it.
fn stage_fallbacks(
    dir: &Path,
    sb: &Superblock,
    allow_fallback_fetch: bool,
    txn: &mut Transaction<'_>,
) -> Result<()> {
    let mut payload: Option<Vec<u8>> = None;

    for (index, entry) in sb.fallbacks.iter().enumerate() {
        if txn.has_object(entry.kind, &entry.checksum) {
            txn.read_object_bytes(entry.kind, &entry.checksum)?;
            continue;
        }
        if !allow_fallback_fetch {
            return Err(Error::ObjectNotFound {
                kind: entry.kind,
                checksum: entry.checksum,
            });
        }
        if payload.is_none() {
            payload = Some(format::read_fallback_payload(dir)?);
        }
        let bytes = fallback_slice(payload.as_deref().unwrap_or(&[]), index, entry)?;
        let staged = txn.stage_object_bytes(entry.kind, bytes)?;
        if staged != entry.checksum {
            return Err(Error::ChecksumMismatch {
                context: format!("fallback {} ({} {})", index, entry.kind, entry.checksum),
                expected: entry.checksum,
                actual: staged,
            });
        }
    }
    Ok(())
}

fn fallback_slice<'a>(payload: &'a [u8], index: usize, entry: &FallbackEntry) -> Result<&'a [u8]> {
    let start = entry.offset as usize;
    match start.checked_add(entry.size as usize) {
        Some(end) if end <= payload.len() => Ok(&payload[start..end]),
        _ => Err(Error::CorruptFallback(format!(
            "descriptor {} out of range",
            index
        ))),
    }
}

fn apply_op(
    dir: &Path,
    sb: &Superblock,
    index: usize,
    op: &DeltaOp,
    chunk_cache: &mut Vec<Option<Vec<u8>>>,
    txn: &mut Transaction<'_>,
) -> Result<()> {
    match op {
        DeltaOp::Copy { kind, checksum } => {
            if !txn.has_object(*kind, checksum) {
                return Err(Error::IncompatibleRoots {
                    kind: *kind,
                    checksum: *checksum,
                });
            }
        }
        DeltaOp::Literal {
            kind,
            target,
            chunk,
            offset,
            length,
        } => {
            let bytes = chunk_bytes(dir, sb, index, *chunk, *offset, *length, chunk_cache)?;
            let staged = txn.stage_object_bytes(*kind, &bytes)?;
            if staged != *target {
                return Err(mismatch(index, *kind, *target, staged, "literal"));
            }
        }
        DeltaOp::Patch {
            kind,
            base,
            target,
            chunk,
            offset,
            length,
        } => {
            let patch = chunk_bytes(dir, sb, index, *chunk, *offset, *length, chunk_cache)?;
            let base_bytes = txn.read_object_bytes(*kind, base).map_err(|e| match e {
                Error::ObjectNotFound { kind, checksum } => {
                    Error::IncompatibleRoots { kind, checksum }
                }
                other => other,
            })?;
            let bytes = bsdiff::patch(&base_bytes, &patch)?;
            let staged = txn.stage_object_bytes(*kind, &bytes)?;
            if staged != *target {
                return Err(mismatch(index, *kind, *target, staged, "patch"));
            }
        }
        DeltaOp::UseFallback { index: fb } => {
            let entry = sb.fallbacks.get(*fb as usize).ok_or_else(|| {
                Error::InvalidSuperblock(format!(
                    "op {} references missing fallback {}",
                    index, fb
                ))
            })?;
            // staged or stored by stage_fallbacks already
            if !txn.has_object(entry.kind, &entry.checksum) {
                return Err(Error::ObjectNotFound {
                    kind: entry.kind,
                    checksum: entry.checksum,
                });
            }
        }
    }
    Ok(())
}

fn mismatch(
    index: usize,
    kind: ObjectKind,
    expected: Checksum,
    actual: Checksum,
    what: &str,
) -> Error {
    Error::ChecksumMismatch {
        context: format!("delta op {} ({} {})", index, what, kind),
        expected,
        actual,
    }
}

/// slice one op payload out of a chunk, loading the chunk on first use
fn chunk_bytes(
    dir: &Path,
    sb: &Superblock,
    op_index: usize,
    chunk: u32,
    offset: u64,
    length: u64,
    cache: &mut Vec<Option<Vec<u8>>>,
) -> Result<Vec<u8>> {
    let idx = chunk as usize;
    let info = sb.chunks.get(idx).ok_or_else(|| {
        Error::InvalidSuperblock(format!(
            "op {} references missing chunk {}",
            op_index, chunk
        ))
    })?;
    if cache[idx].is_none() {
        cache[idx] = Some(format::read_chunk(dir, idx, info)?);
    }
    let payload = cache[idx].as_deref().unwrap_or(&[]);

    let start = offset as usize;
    match start.checked_add(length as usize) {
        Some(end) if end <= payload.len() => Ok(payload[start..end].to_vec()),
        _ => Err(Error::InvalidSuperblock(format!(
            "op {} payload range out of chunk {}",
            op_index, chunk
        ))),
    }
}
