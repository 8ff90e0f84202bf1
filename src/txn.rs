//! atomic multi-object transactions
//!
//! a transaction stages objects into a private tmp/ directory shaped like
//! the store and publishes them with per-file renames under the repository
//! lock, then repoints refs. readers never observe a half-written object
//! or a ref naming an incomplete closure. dropping an uncommitted
//! transaction discards the staging area, so errors and cancellation
//! unwind without partial state.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{compute_checksum, Checksum};
use crate::object::{self, ObjectKind};
use crate::refs;
use crate::repo::Repo;

/// summary of a committed transaction
#[derive(Debug, Default, Clone, Copy)]
pub struct TxnStats {
    /// objects renamed into the store
    pub objects_published: usize,
    /// staged writes that matched an existing object
    pub objects_deduplicated: usize,
    /// refs repointed
    pub refs_updated: usize,
}

/// an atomic unit of object writes and ref updates
pub struct Transaction<'a> {
    repo: &'a Repo,
    staging: PathBuf,
    refs: BTreeMap<String, Checksum>,
    deduplicated: usize,
    poisoned: bool,
    finished: bool,
}

impl<'a> Transaction<'a> {
    /// open a transaction against a writable repository
    pub fn begin(repo: &'a Repo) -> Result<Self> {
        repo.ensure_writable()?;

        let staging = repo.tmp_path().join(format!("txn-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&staging).with_path(&staging)?;

        Ok(Self {
            repo,
            staging,
            refs: BTreeMap::new(),
            deduplicated: 0,
            poisoned: false,
            finished: false,
        })
    }

    /// stage canonical object bytes, returning the checksum
    ///
    /// content already in the store or the staging area is not written
    /// again. a failed write poisons the transaction and commit will then
    /// refuse.
    pub fn stage_object_bytes(&mut self, kind: ObjectKind, canonical: &[u8]) -> Result<Checksum> {
        let checksum = compute_checksum(canonical);

        if object::object_exists(self.repo, kind, &checksum) {
            self.deduplicated += 1;
            return Ok(checksum);
        }

        match object::write_bytes_under(&self.staging, &self.repo.tmp_path(), kind, canonical) {
            Ok(staged) => Ok(staged),
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }

    /// check object visibility across store and staging
    pub fn has_object(&self, kind: ObjectKind, checksum: &Checksum) -> bool {
        object::object_exists(self.repo, kind, checksum)
            || self.staging_object_path(kind, checksum).exists()
    }

    /// read canonical bytes from staging or the store, verifying the checksum
    pub fn read_object_bytes(&self, kind: ObjectKind, checksum: &Checksum) -> Result<Vec<u8>> {
        if self.staging_object_path(kind, checksum).exists() {
            object::read_bytes_under(&self.staging, kind, checksum)
        } else {
            object::read_object_bytes(self.repo, kind, checksum)
        }
    }

    /// stage a ref repoint; at most one target per ref, last call wins
    pub fn set_ref(&mut self, ref_name: &str, checksum: Checksum) -> Result<()> {
        refs::validate_ref_name(ref_name)?;
        self.refs.insert(ref_name.to_string(), checksum);
        Ok(())
    }

    /// publish all staged objects, then repoint refs
    ///
    /// takes the repository lock, so concurrent transactions serialize at
    /// the publish step instead of interleaving ref updates.
    pub fn commit(mut self) -> Result<TxnStats> {
        if self.poisoned {
            self.cleanup();
            self.finished = true;
            return Err(Error::TransactionPoisoned);
        }

        let _lock = self.repo.lock_blocking()?;

        let mut stats = TxnStats {
            objects_deduplicated: self.deduplicated,
            ..Default::default()
        };

        // objects first: a failure partway leaves only unreferenced
        // objects behind, since no ref has moved yet
        for kind in ObjectKind::all() {
            let kind_dir = self.staging.join(kind.dir_name());
            if !kind_dir.exists() {
                continue;
            }

            for entry in WalkDir::new(&kind_dir).min_depth(2).max_depth(2) {
                let entry = entry.map_err(|e| Error::Io {
                    path: kind_dir.clone(),
                    source: e.into_io_error().unwrap_or_else(|| {
                        std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")
                    }),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&self.staging) else {
                    continue;
                };

                let dst = self.repo.objects_path().join(rel);
                if dst.exists() {
                    // a concurrent writer published the same content
                    stats.objects_deduplicated += 1;
                    continue;
                }

                let Some(parent) = dst.parent() else {
                    continue;
                };
                fs::create_dir_all(parent).with_path(parent)?;
                fs::rename(entry.path(), &dst).with_path(&dst)?;
                let dir_file = File::open(parent).with_path(parent)?;
                dir_file.sync_all().with_path(parent)?;

                stats.objects_published += 1;
            }
        }

        for (ref_name, checksum) in &self.refs {
            refs::write_ref(self.repo, ref_name, checksum)?;
            stats.refs_updated += 1;
        }

        self.cleanup();
        self.finished = true;

        tracing::debug!(
            published = stats.objects_published,
            deduplicated = stats.objects_deduplicated,
            refs = stats.refs_updated,
            "transaction committed"
        );

        Ok(stats)
    }

    /// discard all staged writes
    pub fn abort(mut self) {
        self.cleanup();
        self.finished = true;
    }

    fn staging_object_path(&self, kind: ObjectKind, checksum: &Checksum) -> PathBuf {
        let (dir, file) = checksum.to_path_components();
        self.staging.join(kind.dir_name()).join(dir).join(file)
    }

    fn cleanup(&self) {
        let _ = fs::remove_dir_all(&self.staging);
    }

    #[cfg(test)]
    pub(crate) fn staging_dir(&self) -> &Path {
        &self.staging
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cleanup();
        }
    }
}
