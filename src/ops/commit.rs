//! committing a directory tree into the store

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::libc;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Checksum;
use crate::object::{canonical_encode, ObjectKind};
use crate::refs;
use crate::repo::Repo;
use crate::txn::Transaction;
use crate::types::{Commit, DirEntry, DirMeta, DirTree, FileEntry, FileMeta, FileObject, Xattr};

/// commit a directory tree to a ref
pub fn commit(
    repo: &Repo,
    source: &Path,
    ref_name: &str,
    subject: Option<&str>,
    body: Option<&str>,
) -> Result<Checksum> {
    commit_with_metadata(repo, source, ref_name, subject, body, &[])
}

/// commit a directory tree to a ref with custom commit metadata
///
/// the whole snapshot is staged in a transaction; either every object and
/// the ref update land, or nothing does.
pub fn commit_with_metadata(
    repo: &Repo,
    source: &Path,
    ref_name: &str,
    subject: Option<&str>,
    body: Option<&str>,
    metadata: &[(&str, &str)],
) -> Result<Checksum> {
    let mut txn = Transaction::begin(repo)?;
    let (tree, meta) = commit_tree(source, &mut txn)?;

    let parent = match refs::read_ref(repo, ref_name) {
        Ok(parent) => Some(parent),
        Err(Error::RefNotFound(_)) => None,
        Err(e) => return Err(e),
    };

    let mut commit = Commit::new(tree, meta, parent, subject.unwrap_or(""));
    if let Some(body) = body {
        commit = commit.with_body(body);
    }
    for (key, value) in metadata {
        commit = commit.with_metadata(*key, *value);
    }

    let checksum = txn.stage_object_bytes(ObjectKind::Commit, &canonical_encode(&commit)?)?;
    txn.set_ref(ref_name, checksum)?;
    let stats = txn.commit()?;

    tracing::debug!(
        %checksum,
        ref_name,
        published = stats.objects_published,
        deduplicated = stats.objects_deduplicated,
        "committed tree"
    );
    Ok(checksum)
}

/// stage one directory, returning its (tree, dirmeta) checksums
fn commit_tree(source: &Path, txn: &mut Transaction<'_>) -> Result<(Checksum, Checksum)> {
    let dir_meta = read_dir_meta(source)?;

    let mut dir_entries: Vec<_> = fs::read_dir(source)
        .with_path(source)?
        .collect::<std::io::Result<Vec<_>>>()
        .with_path(source)?;
    dir_entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for entry in dir_entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let meta = fs::symlink_metadata(&path).with_path(&path)?;
        let file_type = meta.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(&path).with_path(&path)?;
            let xattrs = read_xattrs(&path)?;
            let file_obj =
                FileObject::symlink(meta.uid(), meta.gid(), xattrs, &target.to_string_lossy());
            let checksum =
                txn.stage_object_bytes(ObjectKind::File, &canonical_encode(&file_obj)?)?;
            files.push(FileEntry::new(name, checksum));
        } else if file_type.is_file() {
            let xattrs = read_xattrs(&path)?;
            let content = fs::read(&path).with_path(&path)?;
            let file_obj = FileObject::new(
                FileMeta::with_xattrs(meta.uid(), meta.gid(), meta.mode(), xattrs),
                content,
            );
            let checksum =
                txn.stage_object_bytes(ObjectKind::File, &canonical_encode(&file_obj)?)?;
            files.push(FileEntry::new(name, checksum));
        } else if file_type.is_dir() {
            let (tree, sub_meta) = commit_tree(&path, txn)?;
            dirs.push(DirEntry::new(name, tree, sub_meta));
        } else {
            // devices, fifos and sockets have no object representation
            return Err(Error::UnsupportedFileType(path));
        }
    }

    let tree = DirTree::new(files, dirs)?;
    let tree_checksum = txn.stage_object_bytes(ObjectKind::DirTree, &canonical_encode(&tree)?)?;
    let meta_checksum =
        txn.stage_object_bytes(ObjectKind::DirMeta, &canonical_encode(&dir_meta)?)?;
    Ok((tree_checksum, meta_checksum))
}

fn read_dir_meta(path: &Path) -> Result<DirMeta> {
    let meta = fs::symlink_metadata(path).with_path(path)?;
    let xattrs = read_xattrs(path)?;
    Ok(FileMeta::with_xattrs(
        meta.uid(),
        meta.gid(),
        meta.mode(),
        xattrs,
    ))
}

/// read all extended attributes from a path
fn read_xattrs(path: &Path) -> Result<Vec<Xattr>> {
    let names: Vec<String> = match xattr::list(path) {
        Ok(iter) => iter.map(|n| n.to_string_lossy().into_owned()).collect(),
        Err(e) => {
            // ENOTSUP/ENODATA means no xattr support or no xattrs, not an error
            if e.raw_os_error() == Some(libc::ENOTSUP)
                || e.raw_os_error() == Some(libc::ENODATA)
                || e.raw_os_error() == Some(libc::EOPNOTSUPP)
            {
                return Ok(vec![]);
            }
            return Err(Error::Xattr {
                path: path.to_path_buf(),
                message: format!("failed to list: {}", e),
            });
        }
    };

    let mut xattrs = Vec::new();
    for name in names {
        match xattr::get(path, &name) {
            Ok(Some(value)) => xattrs.push(Xattr::new(name, value)),
            Ok(None) => {
                // removed between list and get, skip it
            }
            Err(e) => {
                // skip xattrs we cannot read (permission issues, etc.)
                if e.raw_os_error() != Some(libc::ENODATA) {
                    tracing::warn!(path = %path.display(), name, error = %e, "skipping unreadable xattr");
                }
            }
        }
    }
    Ok(xattrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{read_commit, read_file, read_meta, read_tree};
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::tempdir;

    fn test_repo() -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("repo")).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_commit_single_file() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("hello.txt"), "world").unwrap();

        let checksum = commit(&repo, &source, "test/ref", Some("first"), None).unwrap();

        let resolved = refs::resolve(&repo, "test/ref").unwrap();
        assert_eq!(checksum, resolved);

        let commit_obj = read_commit(&repo, &checksum).unwrap();
        assert_eq!(commit_obj.subject, "first");
        let tree = read_tree(&repo, &commit_obj.tree).unwrap();
        assert_eq!(tree.len(), 1);

        let entry = tree.get_file("hello.txt").unwrap();
        let file = read_file(&repo, &entry.checksum).unwrap();
        assert_eq!(file.content, b"world");
        assert!(!file.is_symlink());
    }

    #[test]
    fn test_commit_nested_directories() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir_all(source.join("a/b/c")).unwrap();
        fs::write(source.join("a/b/c/file.txt"), "deep").unwrap();
        fs::write(source.join("top.txt"), "top").unwrap();

        let checksum = commit(&repo, &source, "nested", None, None).unwrap();

        let commit_obj = read_commit(&repo, &checksum).unwrap();
        let tree = read_tree(&repo, &commit_obj.tree).unwrap();
        assert_eq!(tree.len(), 2);
        assert!(tree.get_file("top.txt").is_some());

        let a = tree.get_dir("a").unwrap();
        // the subdirectory's metadata object is stored and readable
        read_meta(&repo, &a.meta).unwrap();
        let subtree = read_tree(&repo, &a.tree).unwrap();
        assert!(subtree.get_dir("b").is_some());

        let b = subtree.get_dir("b").unwrap();
        let c = read_tree(&repo, &b.tree).unwrap().get_dir("c").cloned().unwrap();
        let leaf_tree = read_tree(&repo, &c.tree).unwrap();
        let leaf = leaf_tree.get_file("file.txt").unwrap();
        assert_eq!(read_file(&repo, &leaf.checksum).unwrap().content, b"deep");
    }

    #[test]
    fn test_commit_empty_directory() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();

        let checksum = commit(&repo, &source, "empty", None, None).unwrap();

        let commit_obj = read_commit(&repo, &checksum).unwrap();
        let tree = read_tree(&repo, &commit_obj.tree).unwrap();
        assert!(tree.is_empty());
        // the root dirmeta still exists
        read_meta(&repo, &commit_obj.meta).unwrap();
    }

    #[test]
    fn test_commit_symlink() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        symlink("/target/path", source.join("link")).unwrap();

        let checksum = commit(&repo, &source, "symlink-test", None, None).unwrap();

        let commit_obj = read_commit(&repo, &checksum).unwrap();
        let tree = read_tree(&repo, &commit_obj.tree).unwrap();
        let entry = tree.get_file("link").unwrap();
        let file = read_file(&repo, &entry.checksum).unwrap();
        assert!(file.is_symlink());
        assert_eq!(file.symlink_target().as_deref(), Some("/target/path"));
    }

    #[test]
    fn test_commit_updates_parent() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("file.txt"), "v1").unwrap();

        let first = commit(&repo, &source, "versioned", Some("v1"), None).unwrap();

        fs::write(source.join("file.txt"), "v2").unwrap();
        let second = commit(&repo, &source, "versioned", Some("v2"), None).unwrap();

        let commit1 = read_commit(&repo, &first).unwrap();
        assert!(commit1.is_root());
        let commit2 = read_commit(&repo, &second).unwrap();
        assert_eq!(commit2.parent, Some(first));
        assert_eq!(refs::read_ref(&repo, "versioned").unwrap(), second);
    }

    #[test]
    fn test_commit_dedups_identical_content() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("one.txt"), "same bytes").unwrap();
        fs::write(source.join("two.txt"), "same bytes").unwrap();

        let checksum = commit(&repo, &source, "dedup", None, None).unwrap();

        let commit_obj = read_commit(&repo, &checksum).unwrap();
        let tree = read_tree(&repo, &commit_obj.tree).unwrap();
        let one = tree.get_file("one.txt").unwrap();
        let two = tree.get_file("two.txt").unwrap();
        assert_eq!(one.checksum, two.checksum);
    }

    #[test]
    fn test_commit_captures_mode() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        let file_path = source.join("secret");
        fs::write(&file_path, "hidden").unwrap();
        fs::set_permissions(&file_path, fs::Permissions::from_mode(0o600)).unwrap();

        let checksum = commit(&repo, &source, "modes", None, None).unwrap();

        let commit_obj = read_commit(&repo, &checksum).unwrap();
        let tree = read_tree(&repo, &commit_obj.tree).unwrap();
        let entry = tree.get_file("secret").unwrap();
        let file = read_file(&repo, &entry.checksum).unwrap();
        assert_eq!(file.meta.permissions(), 0o600);
    }

    #[test]
    fn test_commit_rejects_fifo() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        nix::unistd::mkfifo(&source.join("pipe"), nix::sys::stat::Mode::from_bits_truncate(0o644))
            .unwrap();

        assert!(matches!(
            commit(&repo, &source, "fifo", None, None),
            Err(Error::UnsupportedFileType(_))
        ));
        // nothing was published
        assert!(!refs::ref_exists(&repo, "fifo"));
    }

    #[test]
    fn test_commit_body_and_metadata() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("file"), "x").unwrap();

        let checksum = commit_with_metadata(
            &repo,
            &source,
            "annotated",
            Some("subject line"),
            Some("longer body text"),
            &[("build-id", "1234"), ("channel", "stable")],
        )
        .unwrap();

        let commit_obj = read_commit(&repo, &checksum).unwrap();
        assert_eq!(commit_obj.subject, "subject line");
        assert_eq!(commit_obj.body, "longer body text");
        assert_eq!(commit_obj.metadata.get("build-id").map(String::as_str), Some("1234"));
        assert_eq!(commit_obj.metadata.get("channel").map(String::as_str), Some("stable"));
    }

    #[test]
    fn test_commit_identical_tree_twice() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("stable"), "unchanging").unwrap();

        let first = commit(&repo, &source, "twice", Some("a"), None).unwrap();
        let second = commit(&repo, &source, "twice", Some("a"), None).unwrap();

        // same tree, but the second commit chains onto the first
        assert_ne!(first, second);
        let c1 = read_commit(&repo, &first).unwrap();
        let c2 = read_commit(&repo, &second).unwrap();
        assert_eq!(c1.tree, c2.tree);
        assert_eq!(c2.parent, Some(first));
    }

    #[test]
    fn test_commit_readonly_repo() {
        let (dir, mut repo) = test_repo();
        repo.config_mut().readonly = true;

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();

        assert!(matches!(
            commit(&repo, &source, "ro", None, None),
            Err(Error::ReadOnly(_))
        ));
    }
}
