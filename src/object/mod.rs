//! content-addressed object storage
//!
//! objects live under objects/<kind>/<xx>/<62 hex chars>, where the key is
//! the SHA-256 of the object's canonical CBOR bytes. files are
//! zstd-compressed at rest; reads decompress and re-hash, so a corrupt
//! object can never be returned as valid.

use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{compute_checksum, Checksum};
use crate::repo::Repo;
use crate::types::{Commit, DirMeta, DirTree, FileObject};

/// compression level for objects at rest
pub(crate) const ZSTD_LEVEL: i32 = 3;

/// the four object kinds, each stored in its own directory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    File,
    DirTree,
    DirMeta,
    Commit,
}

impl ObjectKind {
    /// store directory name under objects/
    pub fn dir_name(&self) -> &'static str {
        match self {
            ObjectKind::File => "file",
            ObjectKind::DirTree => "dirtree",
            ObjectKind::DirMeta => "dirmeta",
            ObjectKind::Commit => "commit",
        }
    }

    /// all kinds, in store sweep order
    pub fn all() -> [ObjectKind; 4] {
        [
            ObjectKind::File,
            ObjectKind::DirTree,
            ObjectKind::DirMeta,
            ObjectKind::Commit,
        ]
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// serialize a value to its canonical byte form
///
/// an object's checksum is computed over these bytes; compression applies
/// only at rest.
pub fn canonical_encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

/// deserialize a value from canonical bytes
pub fn canonical_decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(ciborium::from_reader(bytes)?)
}

/// filesystem path of an object in the store
pub fn object_path(repo: &Repo, kind: ObjectKind, checksum: &Checksum) -> PathBuf {
    let (dir, file) = checksum.to_path_components();
    repo.objects_path().join(kind.dir_name()).join(dir).join(file)
}

/// check whether an object exists without reading it
pub fn object_exists(repo: &Repo, kind: ObjectKind, checksum: &Checksum) -> bool {
    object_path(repo, kind, checksum).exists()
}

/// read an object's canonical bytes, verifying the checksum
pub fn read_object_bytes(repo: &Repo, kind: ObjectKind, checksum: &Checksum) -> Result<Vec<u8>> {
    read_bytes_under(&repo.objects_path(), kind, checksum)
}

/// write canonical bytes as an object, returning the checksum
///
/// writing the same content twice is a no-op. the same checksum with
/// different stored bytes is a fatal integrity violation, never silently
/// accepted.
pub fn write_object_bytes(repo: &Repo, kind: ObjectKind, canonical: &[u8]) -> Result<Checksum> {
    write_bytes_under(&repo.objects_path(), &repo.tmp_path(), kind, canonical)
}

/// read rooted at an arbitrary objects directory (also used for staging areas)
pub(crate) fn read_bytes_under(
    objects_root: &Path,
    kind: ObjectKind,
    checksum: &Checksum,
) -> Result<Vec<u8>> {
    let (dir, file) = checksum.to_path_components();
    let path = objects_root.join(kind.dir_name()).join(dir).join(file);

    let compressed = fs::read(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ObjectNotFound {
                kind,
                checksum: *checksum,
            }
        } else {
            Error::Io {
                path: path.clone(),
                source: e,
            }
        }
    })?;

    // a stored stream that fails to decompress can never hash correctly
    let canonical = zstd::decode_all(&compressed[..]).map_err(|_| Error::CorruptObject {
        kind,
        checksum: *checksum,
    })?;

    if compute_checksum(&canonical) != *checksum {
        return Err(Error::CorruptObject {
            kind,
            checksum: *checksum,
        });
    }

    Ok(canonical)
}

/// write rooted at an arbitrary objects directory (also used for staging areas)
pub(crate) fn write_bytes_under(
    objects_root: &Path,
    tmp_dir: &Path,
    kind: ObjectKind,
    canonical: &[u8],
) -> Result<Checksum> {
    let checksum = compute_checksum(canonical);

    let (dir, file) = checksum.to_path_components();
    let obj_dir = objects_root.join(kind.dir_name()).join(dir);
    let obj_path = obj_dir.join(file);

    // dedup hit: re-read the stored copy and insist it matches
    if obj_path.exists() {
        let existing = read_bytes_under(objects_root, kind, &checksum)?;
        if existing != canonical {
            return Err(Error::ChecksumCollision { kind, checksum });
        }
        return Ok(checksum);
    }

    fs::create_dir_all(&obj_dir).with_path(&obj_dir)?;

    let compressed = zstd::encode_all(canonical, ZSTD_LEVEL).map_err(|e| Error::Io {
        path: obj_path.clone(),
        source: e,
    })?;

    // atomic write: temp file -> fsync -> rename -> fsync dir
    let tmp_path = tmp_dir.join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(&compressed).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    fs::rename(&tmp_path, &obj_path).with_path(&obj_path)?;

    let dir_file = File::open(&obj_dir).with_path(&obj_dir)?;
    dir_file.sync_all().with_path(&obj_dir)?;

    Ok(checksum)
}

/// write a file object
pub fn write_file(repo: &Repo, file: &FileObject) -> Result<Checksum> {
    let bytes = canonical_encode(file)?;
    write_object_bytes(repo, ObjectKind::File, &bytes)
}

/// read a file object
pub fn read_file(repo: &Repo, checksum: &Checksum) -> Result<FileObject> {
    let bytes = read_object_bytes(repo, ObjectKind::File, checksum)?;
    canonical_decode(&bytes)
}

/// write a dirtree object
pub fn write_tree(repo: &Repo, tree: &DirTree) -> Result<Checksum> {
    let bytes = canonical_encode(tree)?;
    write_object_bytes(repo, ObjectKind::DirTree, &bytes)
}

/// read a dirtree object
pub fn read_tree(repo: &Repo, checksum: &Checksum) -> Result<DirTree> {
    let bytes = read_object_bytes(repo, ObjectKind::DirTree, checksum)?;
    canonical_decode(&bytes)
}

/// write a dirmeta object
pub fn write_meta(repo: &Repo, meta: &DirMeta) -> Result<Checksum> {
    let bytes = canonical_encode(meta)?;
    write_object_bytes(repo, ObjectKind::DirMeta, &bytes)
}

/// read a dirmeta object
pub fn read_meta(repo: &Repo, checksum: &Checksum) -> Result<DirMeta> {
    let bytes = read_object_bytes(repo, ObjectKind::DirMeta, checksum)?;
    canonical_decode(&bytes)
}

/// write a commit object
pub fn write_commit(repo: &Repo, commit: &Commit) -> Result<Checksum> {
    let bytes = canonical_encode(commit)?;
    write_object_bytes(repo, ObjectKind::Commit, &bytes)
}

/// read a commit object
pub fn read_commit(repo: &Repo, checksum: &Checksum) -> Result<Commit> {
    let bytes = read_object_bytes(repo, ObjectKind::Commit, checksum)?;
    canonical_decode(&bytes)
}
