use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Checksum;

/// a directory tree object - file and subdirectory entries sorted by name
///
/// sorting happens at construction and is part of the serialized form, so
/// two trees with the same contents always produce the same canonical
/// bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirTree {
    files: Vec<FileEntry>,
    dirs: Vec<DirEntry>,
}

impl DirTree {
    /// create a new tree, validating and sorting entries
    pub fn new(mut files: Vec<FileEntry>, mut dirs: Vec<DirEntry>) -> Result<Self> {
        // validate entry names
        for entry in &files {
            validate_entry_name(&entry.name)?;
        }
        for entry in &dirs {
            validate_entry_name(&entry.name)?;
        }

        // sort by name (byte-wise)
        files.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        dirs.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        // check for duplicates, including across the two lists
        let mut names: Vec<&str> = files
            .iter()
            .map(|e| e.name.as_str())
            .chain(dirs.iter().map(|e| e.name.as_str()))
            .collect();
        names.sort_unstable();
        for window in names.windows(2) {
            if window[0] == window[1] {
                return Err(Error::DuplicateEntryName(window[0].to_string()));
            }
        }

        Ok(Self { files, dirs })
    }

    /// create an empty tree
    pub fn empty() -> Self {
        Self {
            files: vec![],
            dirs: vec![],
        }
    }

    /// file entries, sorted by name
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    /// subdirectory entries, sorted by name
    pub fn dirs(&self) -> &[DirEntry] {
        &self.dirs
    }

    /// look up a file entry by name
    pub fn get_file(&self, name: &str) -> Option<&FileEntry> {
        self.files
            .binary_search_by(|e| e.name.as_bytes().cmp(name.as_bytes()))
            .ok()
            .map(|i| &self.files[i])
    }

    /// look up a subdirectory entry by name
    pub fn get_dir(&self, name: &str) -> Option<&DirEntry> {
        self.dirs
            .binary_search_by(|e| e.name.as_bytes().cmp(name.as_bytes()))
            .ok()
            .map(|i| &self.dirs[i])
    }

    /// total number of entries
    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    /// is tree empty
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }
}

/// validate an entry name
fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidEntryName("empty name".to_string()));
    }
    if name.contains('/') {
        return Err(Error::InvalidEntryName(format!(
            "name contains '/': {}",
            name
        )));
    }
    if name.contains('\0') {
        return Err(Error::InvalidEntryName(format!(
            "name contains null byte: {}",
            name
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidEntryName(format!("reserved name: {}", name)));
    }
    Ok(())
}

/// a file (or symlink) entry in a tree, pointing at a file object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub checksum: Checksum,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            name: name.into(),
            checksum,
        }
    }
}

/// a subdirectory entry: child tree plus its metadata object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub tree: Checksum,
    pub meta: Checksum,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, tree: Checksum, meta: Checksum) -> Self {
        Self {
            name: name.into(),
            tree,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_empty() {
        let t = DirTree::empty();
        assert!(t.is_empty());
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn test_tree_sorting() {
        let files = vec![
            FileEntry::new("zebra", Checksum::ZERO),
            FileEntry::new("alpha", Checksum::ZERO),
        ];
        let dirs = vec![
            DirEntry::new("var", Checksum::ZERO, Checksum::ZERO),
            DirEntry::new("etc", Checksum::ZERO, Checksum::ZERO),
        ];
        let tree = DirTree::new(files, dirs).unwrap();

        let file_names: Vec<_> = tree.files().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(file_names, vec!["alpha", "zebra"]);
        let dir_names: Vec<_> = tree.dirs().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(dir_names, vec!["etc", "var"]);
    }

    #[test]
    fn test_tree_get() {
        let files = vec![
            FileEntry::new("alpha", Checksum::ZERO),
            FileEntry::new("beta", Checksum::ZERO),
        ];
        let dirs = vec![DirEntry::new("sub", Checksum::ZERO, Checksum::ZERO)];
        let tree = DirTree::new(files, dirs).unwrap();

        assert!(tree.get_file("alpha").is_some());
        assert!(tree.get_file("beta").is_some());
        assert!(tree.get_file("gamma").is_none());
        assert!(tree.get_dir("sub").is_some());
        assert!(tree.get_dir("alpha").is_none());
    }

    #[test]
    fn test_tree_rejects_empty_name() {
        let files = vec![FileEntry::new("", Checksum::ZERO)];
        assert!(DirTree::new(files, vec![]).is_err());
    }

    #[test]
    fn test_tree_rejects_slash_in_name() {
        let files = vec![FileEntry::new("foo/bar", Checksum::ZERO)];
        assert!(DirTree::new(files, vec![]).is_err());
    }

    #[test]
    fn test_tree_rejects_null_in_name() {
        let files = vec![FileEntry::new("foo\0bar", Checksum::ZERO)];
        assert!(DirTree::new(files, vec![]).is_err());
    }

    #[test]
    fn test_tree_rejects_dot() {
        let dirs = vec![DirEntry::new(".", Checksum::ZERO, Checksum::ZERO)];
        assert!(DirTree::new(vec![], dirs).is_err());
    }

    #[test]
    fn test_tree_rejects_dotdot() {
        let dirs = vec![DirEntry::new("..", Checksum::ZERO, Checksum::ZERO)];
        assert!(DirTree::new(vec![], dirs).is_err());
    }

    #[test]
    fn test_tree_rejects_duplicates() {
        let files = vec![
            FileEntry::new("same", Checksum::ZERO),
            FileEntry::new("same", Checksum::ZERO),
        ];
        assert!(DirTree::new(files, vec![]).is_err());
    }

    #[test]
    fn test_tree_rejects_duplicate_across_kinds() {
        let files = vec![FileEntry::new("same", Checksum::ZERO)];
        let dirs = vec![DirEntry::new("same", Checksum::ZERO, Checksum::ZERO)];
        assert!(DirTree::new(files, dirs).is_err());
    }

    #[test]
    fn test_tree_cbor_roundtrip() {
        let files = vec![
            FileEntry::new("file.txt", Checksum::ZERO),
            FileEntry::new("link", Checksum::ZERO),
        ];
        let dirs = vec![DirEntry::new("dir", Checksum::ZERO, Checksum::ZERO)];
        let tree = DirTree::new(files, dirs).unwrap();

        let mut cbor_bytes = Vec::new();
        ciborium::into_writer(&tree, &mut cbor_bytes).unwrap();
        let parsed: DirTree = ciborium::from_reader(&cbor_bytes[..]).unwrap();

        assert_eq!(tree, parsed);
    }

    #[test]
    fn test_tree_cbor_determinism() {
        // same entries in different input order produce identical bytes
        let tree1 = DirTree::new(
            vec![
                FileEntry::new("b", Checksum::ZERO),
                FileEntry::new("a", Checksum::ZERO),
            ],
            vec![],
        )
        .unwrap();
        let tree2 = DirTree::new(
            vec![
                FileEntry::new("a", Checksum::ZERO),
                FileEntry::new("b", Checksum::ZERO),
            ],
            vec![],
        )
        .unwrap();

        let mut bytes1 = Vec::new();
        let mut bytes2 = Vec::new();
        ciborium::into_writer(&tree1, &mut bytes1).unwrap();
        ciborium::into_writer(&tree2, &mut bytes2).unwrap();

        assert_eq!(bytes1, bytes2);
    }
}
