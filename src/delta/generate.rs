//! static delta generation
//!
//! walks the TO commit closure in dependency order (leaves first, commit
//! last) and chooses one operation per object: copy for objects shared
//! with FROM, fallback for objects above the size ceiling, a binary patch
//! against the same-path FROM object when that wins, and a literal
//! otherwise. payloads are packed into size-bounded chunks, the whole
//! artifact is staged under tmp/ and published with one rename.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use crate::config::DeltaTuning;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::{is_checksum_hex, Checksum};
use crate::object::{self, ObjectKind};
use crate::refs;
use crate::repo::Repo;

use super::bsdiff;
use super::format::{self, DeltaOp, FallbackEntry, Superblock, SUPERBLOCK_FILE};

const MIB: u64 = 1024 * 1024;

/// tuning knobs for delta generation, all sizes in bytes
#[derive(Debug, Clone)]
pub struct DeltaConfig {
    /// objects at or above this size travel whole in the fallback payload
    pub min_fallback_size: u64,
    /// objects at or above this size are never considered for patching
    pub max_bsdiff_size: u64,
    /// a chunk is closed once its payload would exceed this size
    pub max_chunk_size: u64,
    /// when false, changed objects become literals instead of patches
    pub bsdiff_enabled: bool,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            min_fallback_size: 4 * MIB,
            max_bsdiff_size: 128 * MIB,
            max_chunk_size: 32 * MIB,
            bsdiff_enabled: true,
        }
    }
}

impl DeltaConfig {
    /// build from the repository config section (sizes there are megabytes)
    pub fn from_tuning(tuning: &DeltaTuning) -> Self {
        Self {
            min_fallback_size: tuning.min_fallback_size * MIB,
            max_bsdiff_size: tuning.max_bsdiff_size * MIB,
            max_chunk_size: tuning.max_chunk_size * MIB,
            bsdiff_enabled: tuning.bsdiff_enabled,
        }
    }

    /// build from key=value parameters (sizes in megabytes)
    ///
    /// unrecognized keys are ignored so newer producers can pass options
    /// older code does not know about.
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in params {
            match key.as_str() {
                "min-fallback-size" => config.min_fallback_size = parse_size_mb(key, value)?,
                "max-bsdiff-size" => config.max_bsdiff_size = parse_size_mb(key, value)?,
                "max-chunk-size" => config.max_chunk_size = parse_size_mb(key, value)?,
                "bsdiff-enabled" => config.bsdiff_enabled = parse_bool(key, value)?,
                // accepted for compatibility, has no effect here
                "verbose" => {
                    parse_bool(key, value)?;
                }
                _ => {}
            }
        }
        Ok(config)
    }
}

fn parse_size_mb(key: &str, value: &str) -> Result<u64> {
    let mb: u64 = value.parse().map_err(|_| Error::InvalidParam {
        key: key.to_string(),
        value: value.to_string(),
    })?;
    Ok(mb * MIB)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::InvalidParam {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// summary of one generated delta
#[derive(Debug, Clone)]
pub struct DeltaReport {
    pub name: String,
    pub path: PathBuf,
    pub from: Option<Checksum>,
    pub to: Checksum,
    pub copy_ops: usize,
    pub literal_ops: usize,
    pub patch_ops: usize,
    pub fallback_ops: usize,
    pub chunks: usize,
    /// compressed bytes across all chunk files
    pub payload_bytes: u64,
    /// compressed size of the fallback file
    pub fallback_bytes: u64,
}

/// generate a static delta between two commits
///
/// `from` is None for a from-scratch delta. both revisions may be refs or
/// full checksums; when `to` is a ref its name is recorded in the
/// superblock so an offline apply can repoint it.
pub fn generate(
    repo: &Repo,
    from: Option<&str>,
    to: &str,
    config: &DeltaConfig,
) -> Result<DeltaReport> {
    repo.ensure_writable()?;

    let to_commit = refs::resolve(repo, to)?;
    let from_commit = from.map(|rev| refs::resolve(repo, rev)).transpose()?;
    let target_ref = (!is_checksum_hex(to)).then(|| to.to_string());

    let to_closure = collect_closure(repo, &to_commit)?;
    let from_set: HashSet<(ObjectKind, Checksum)> = match &from_commit {
        Some(commit) => collect_closure(repo, commit)?.into_iter().collect(),
        None => HashSet::new(),
    };
    let patch_pairs = match &from_commit {
        Some(commit) if config.bsdiff_enabled => collect_patch_pairs(repo, commit, &to_commit)?,
        _ => HashMap::new(),
    };

    let mut ops = Vec::with_capacity(to_closure.len());
    let mut chunk_builder = ChunkBuilder::new(config.max_chunk_size);
    let mut fallbacks: Vec<FallbackEntry> = Vec::new();
    let mut fallback_payload: Vec<u8> = Vec::new();

    let mut copy_ops = 0usize;
    let mut literal_ops = 0usize;
    let mut patch_ops = 0usize;
    let mut fallback_ops = 0usize;

    for (kind, checksum) in &to_closure {
        if from_set.contains(&(*kind, *checksum)) {
            ops.push(DeltaOp::Copy {
                kind: *kind,
                checksum: *checksum,
            });
            copy_ops += 1;
            continue;
        }

        let canonical = object::read_object_bytes(repo, *kind, checksum)?;
        let size = canonical.len() as u64;

        if size >= config.min_fallback_size {
            let index = fallbacks.len() as u32;
            fallbacks.push(FallbackEntry {
                kind: *kind,
                checksum: *checksum,
                size,
                offset: fallback_payload.len() as u64,
            });
            fallback_payload.extend_from_slice(&canonical);
            ops.push(DeltaOp::UseFallback { index });
            fallback_ops += 1;
            continue;
        }

        if config.bsdiff_enabled && size < config.max_bsdiff_size {
            if let Some(base) = patch_pairs.get(&(*kind, *checksum)) {
                let base_bytes = object::read_object_bytes(repo, *kind, base)?;
                if (base_bytes.len() as u64) < config.max_bsdiff_size {
                    let patch = bsdiff::diff(&base_bytes, &canonical);
                    // a patch only pays off when strictly smaller
                    if (patch.len() as u64) < size {
                        let (chunk, offset) = chunk_builder.push(&patch);
                        ops.push(DeltaOp::Patch {
                            kind: *kind,
                            base: *base,
                            target: *checksum,
                            chunk,
                            offset,
                            length: patch.len() as u64,
                        });
                        patch_ops += 1;
                        continue;
                    }
                }
            }
        }

        let (chunk, offset) = chunk_builder.push(&canonical);
        ops.push(DeltaOp::Literal {
            kind: *kind,
            target: *checksum,
            chunk,
            offset,
            length: size,
        });
        literal_ops += 1;
    }

    let chunk_payloads = chunk_builder.finish();

    let name = super::delta_name(from_commit.as_ref(), &to_commit);
    let staging = repo
        .tmp_path()
        .join(format!("delta-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&staging).with_path(&staging)?;

    let mut chunks = Vec::with_capacity(chunk_payloads.len());
    let mut payload_bytes = 0u64;
    for (index, payload) in chunk_payloads.iter().enumerate() {
        let info = format::write_chunk(&staging, index, payload)?;
        payload_bytes += info.compressed_size;
        chunks.push(info);
    }

    let mut fallback_bytes = 0u64;
    if !fallback_payload.is_empty() {
        fallback_bytes = format::write_fallback_payload(&staging, &fallback_payload)?;
    }

    let superblock = Superblock {
        from: from_commit,
        to: to_commit,
        target_ref,
        ops,
        chunks,
        fallbacks,
    };
    format::write_superblock(&staging.join(SUPERBLOCK_FILE), &superblock)?;

    // publish atomically, replacing any previous delta for these endpoints
    let dest = super::delta_path(repo, &name);
    if dest.exists() {
        std::fs::remove_dir_all(&dest).with_path(&dest)?;
    }
    std::fs::rename(&staging, &dest).with_path(&dest)?;

    tracing::debug!(
        name = %name,
        ops = superblock.ops.len(),
        chunks = superblock.chunks.len(),
        fallbacks = superblock.fallbacks.len(),
        "generated static delta"
    );

    Ok(DeltaReport {
        name,
        path: dest,
        from: superblock.from,
        to: superblock.to,
        copy_ops,
        literal_ops,
        patch_ops,
        fallback_ops,
        chunks: superblock.chunks.len(),
        payload_bytes,
        fallback_bytes,
    })
}

/// enumerate a commit's full closure in dependency order
///
/// every object appears after the objects it references: files and metas
/// before their tree, subtrees before their parent, the commit last. a
/// missing object means the closure is incomplete in this store.
pub(crate) fn collect_closure(
    repo: &Repo,
    commit: &Checksum,
) -> Result<Vec<(ObjectKind, Checksum)>> {
    let c = object::read_commit(repo, commit).map_err(closure_missing)?;

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    walk_tree(repo, &c.tree, &mut seen, &mut out)?;
    push_leaf(repo, ObjectKind::DirMeta, &c.meta, &mut seen, &mut out)?;
    out.push((ObjectKind::Commit, *commit));
    Ok(out)
}

fn walk_tree(
    repo: &Repo,
    tree: &Checksum,
    seen: &mut HashSet<(ObjectKind, Checksum)>,
    out: &mut Vec<(ObjectKind, Checksum)>,
) -> Result<()> {
    if !seen.insert((ObjectKind::DirTree, *tree)) {
        return Ok(());
    }
    let dir = object::read_tree(repo, tree).map_err(closure_missing)?;
    for entry in dir.files() {
        push_leaf(repo, ObjectKind::File, &entry.checksum, seen, out)?;
    }
    for entry in dir.dirs() {
        walk_tree(repo, &entry.tree, seen, out)?;
        push_leaf(repo, ObjectKind::DirMeta, &entry.meta, seen, out)?;
    }
    out.push((ObjectKind::DirTree, *tree));
    Ok(())
}

fn push_leaf(
    repo: &Repo,
    kind: ObjectKind,
    checksum: &Checksum,
    seen: &mut HashSet<(ObjectKind, Checksum)>,
    out: &mut Vec<(ObjectKind, Checksum)>,
) -> Result<()> {
    if !seen.insert((kind, *checksum)) {
        return Ok(());
    }
    if !object::object_exists(repo, kind, checksum) {
        return Err(Error::IncompatibleRoots {
            kind,
            checksum: *checksum,
        });
    }
    out.push((kind, *checksum));
    Ok(())
}

fn closure_missing(err: Error) -> Error {
    match err {
        Error::ObjectNotFound { kind, checksum } => Error::IncompatibleRoots { kind, checksum },
        other => other,
    }
}

/// pair changed TO objects with their same-path FROM counterparts
///
/// the pairing follows entry names through both trees simultaneously, so a
/// modified file is patched against the previous version at the same path.
fn collect_patch_pairs(
    repo: &Repo,
    from: &Checksum,
    to: &Checksum,
) -> Result<HashMap<(ObjectKind, Checksum), Checksum>> {
    let from_commit = object::read_commit(repo, from)?;
    let to_commit = object::read_commit(repo, to)?;

    let mut pairs = HashMap::new();
    if from_commit.meta != to_commit.meta {
        pairs.insert((ObjectKind::DirMeta, to_commit.meta), from_commit.meta);
    }
    pair_trees(repo, &from_commit.tree, &to_commit.tree, &mut pairs)?;
    Ok(pairs)
}

fn pair_trees(
    repo: &Repo,
    from: &Checksum,
    to: &Checksum,
    pairs: &mut HashMap<(ObjectKind, Checksum), Checksum>,
) -> Result<()> {
    if from == to {
        return Ok(());
    }
    pairs.entry((ObjectKind::DirTree, *to)).or_insert(*from);

    let from_tree = object::read_tree(repo, from)?;
    let to_tree = object::read_tree(repo, to)?;

    for entry in to_tree.files() {
        if let Some(base) = from_tree.get_file(&entry.name) {
            if base.checksum != entry.checksum {
                pairs
                    .entry((ObjectKind::File, entry.checksum))
                    .or_insert(base.checksum);
            }
        }
    }
    for entry in to_tree.dirs() {
        if let Some(base) = from_tree.get_dir(&entry.name) {
            if base.meta != entry.meta {
                pairs
                    .entry((ObjectKind::DirMeta, entry.meta))
                    .or_insert(base.meta);
            }
            pair_trees(repo, &base.tree, &entry.tree, pairs)?;
        }
    }
    Ok(())
}

/// packs op payloads into size-bounded chunks
struct ChunkBuilder {
    limit: u64,
    current: Vec<u8>,
    done: Vec<Vec<u8>>,
}

impl ChunkBuilder {
    fn new(limit: u64) -> Self {
        Self {
            limit,
            current: Vec::new(),
            done: Vec::new(),
        }
    }

    /// append a payload, returning its (chunk index, offset)
    fn push(&mut self, payload: &[u8]) -> (u32, u64) {
        if !self.current.is_empty()
            && self.current.len() as u64 + payload.len() as u64 > self.limit
        {
            self.done.push(std::mem::take(&mut self.current));
        }
        let index = self.done.len() as u32;
        let offset = self.current.len() as u64;
        self.current.extend_from_slice(payload);
        (index, offset)
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        if !self.current.is_empty() {
            self.done.push(self.current);
        }
        self.done
    }
}
