//! repository integrity checking
//!
//! two passes: walk every ref's closure to find missing or corrupt
//! referenced objects, then sweep the whole store re-verifying each
//! object's checksum and flagging objects no ref reaches.

use std::collections::HashSet;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::object::{self, ObjectKind};
use crate::refs::{self, list_refs};
use crate::repo::Repo;

#[derive(Debug, Default)]
pub struct FsckReport {
    /// objects verified during the store sweep
    pub objects_checked: usize,
    /// objects whose stored bytes fail verification
    pub corrupt_objects: Vec<BadObject>,
    /// referenced objects that are not in the store
    pub missing_objects: Vec<MissingObject>,
    /// objects not reachable from any ref
    pub dangling_objects: Vec<(ObjectKind, Checksum)>,
}

impl FsckReport {
    /// dangling objects are unreferenced but harmless
    pub fn is_ok(&self) -> bool {
        self.corrupt_objects.is_empty() && self.missing_objects.is_empty()
    }
}

#[derive(Debug)]
pub struct BadObject {
    pub kind: ObjectKind,
    pub checksum: Checksum,
    pub message: String,
}

#[derive(Debug)]
pub struct MissingObject {
    pub kind: ObjectKind,
    pub checksum: Checksum,
    pub referenced_by: String,
}

/// verify repository integrity
pub fn fsck(repo: &Repo) -> Result<FsckReport> {
    let mut report = FsckReport::default();
    let mut reachable: HashSet<(ObjectKind, Checksum)> = HashSet::new();

    for ref_name in list_refs(repo)? {
        let head = refs::read_ref(repo, &ref_name)?;
        check_commit(
            repo,
            &head,
            &format!("ref {}", ref_name),
            &mut reachable,
            &mut report,
        )?;
    }

    for kind in ObjectKind::all() {
        for checksum in list_objects(&repo.objects_path().join(kind.dir_name()))? {
            report.objects_checked += 1;
            match object::read_object_bytes(repo, kind, &checksum) {
                Ok(_) => {}
                Err(Error::CorruptObject { .. }) => {
                    // the ref walk may have reported this object already
                    let seen = report
                        .corrupt_objects
                        .iter()
                        .any(|bad| bad.kind == kind && bad.checksum == checksum);
                    if !seen {
                        report.corrupt_objects.push(BadObject {
                            kind,
                            checksum,
                            message: "stored bytes do not match checksum".to_string(),
                        });
                    }
                }
                Err(e) => return Err(e),
            }
            if !reachable.contains(&(kind, checksum)) {
                report.dangling_objects.push((kind, checksum));
            }
        }
    }

    Ok(report)
}

fn check_commit(
    repo: &Repo,
    checksum: &Checksum,
    referenced_by: &str,
    reachable: &mut HashSet<(ObjectKind, Checksum)>,
    report: &mut FsckReport,
) -> Result<()> {
    if !reachable.insert((ObjectKind::Commit, *checksum)) {
        return Ok(());
    }

    match object::read_commit(repo, checksum) {
        Ok(commit) => {
            let origin = format!("commit {}", checksum);
            check_tree(repo, &commit.tree, &origin, reachable, report)?;
            check_leaf(repo, ObjectKind::DirMeta, &commit.meta, &origin, reachable, report);
            if let Some(parent) = &commit.parent {
                check_commit(repo, parent, &origin, reachable, report)?;
            }
        }
        Err(Error::ObjectNotFound { .. }) => report.missing_objects.push(MissingObject {
            kind: ObjectKind::Commit,
            checksum: *checksum,
            referenced_by: referenced_by.to_string(),
        }),
        Err(Error::CorruptObject { .. }) => report.corrupt_objects.push(BadObject {
            kind: ObjectKind::Commit,
            checksum: *checksum,
            message: "stored bytes do not match checksum".to_string(),
        }),
        Err(Error::CborDecode(e)) => report.corrupt_objects.push(BadObject {
            kind: ObjectKind::Commit,
            checksum: *checksum,
            message: format!("undecodable object body: {}", e),
        }),
        Err(e) => return Err(e),
    }

    Ok(())
}

fn check_tree(
    repo: &Repo,
    checksum: &Checksum,
    referenced_by: &str,
    reachable: &mut HashSet<(ObjectKind, Checksum)>,
    report: &mut FsckReport,
) -> Result<()> {
    if !reachable.insert((ObjectKind::DirTree, *checksum)) {
        return Ok(());
    }

    match object::read_tree(repo, checksum) {
        Ok(tree) => {
            for entry in tree.files() {
                let origin = format!("dirtree {} entry {}", checksum, entry.name);
                check_leaf(repo, ObjectKind::File, &entry.checksum, &origin, reachable, report);
            }
            for entry in tree.dirs() {
                let origin = format!("dirtree {} entry {}", checksum, entry.name);
                check_tree(repo, &entry.tree, &origin, reachable, report)?;
                check_leaf(repo, ObjectKind::DirMeta, &entry.meta, &origin, reachable, report);
            }
        }
        Err(Error::ObjectNotFound { .. }) => report.missing_objects.push(MissingObject {
            kind: ObjectKind::DirTree,
            checksum: *checksum,
            referenced_by: referenced_by.to_string(),
        }),
        Err(Error::CorruptObject { .. }) => report.corrupt_objects.push(BadObject {
            kind: ObjectKind::DirTree,
            checksum: *checksum,
            message: "stored bytes do not match checksum".to_string(),
        }),
        Err(Error::CborDecode(e)) => report.corrupt_objects.push(BadObject {
            kind: ObjectKind::DirTree,
            checksum: *checksum,
            message: format!("undecodable object body: {}", e),
        }),
        Err(e) => return Err(e),
    }

    Ok(())
}

/// mark a file or dirmeta object reachable, reporting it if absent
///
/// content verification happens in the sweep; the walk only needs
/// presence.
fn check_leaf(
    repo: &Repo,
    kind: ObjectKind,
    checksum: &Checksum,
    referenced_by: &str,
    reachable: &mut HashSet<(ObjectKind, Checksum)>,
    report: &mut FsckReport,
) {
    if !reachable.insert((kind, *checksum)) {
        return;
    }
    if !object::object_exists(repo, kind, checksum) {
        report.missing_objects.push(MissingObject {
            kind,
            checksum: *checksum,
            referenced_by: referenced_by.to_string(),
        });
    }
}

fn list_objects(dir: &Path) -> Result<Vec<Checksum>> {
    let mut checksums = Vec::new();

    if !dir.exists() {
        return Ok(checksums);
    }

    for entry in WalkDir::new(dir).min_depth(2).max_depth(2) {
        let entry = entry.map_err(|e| Error::Io {
            path: dir.to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walkdir error")),
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let parent_name = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("");

        let hex = format!("{}{}", parent_name, file_name);
        if let Ok(checksum) = Checksum::from_hex(&hex) {
            checksums.push(checksum);
        }
    }

    Ok(checksums)
}
