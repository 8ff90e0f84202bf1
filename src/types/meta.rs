use serde::{Deserialize, Serialize};

/// symlink st_mode value, fixed for deterministic hashing
pub const SYMLINK_MODE: u32 = 0o120777;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// extended attribute (name + value)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Xattr {
    pub name: String,
    pub value: Vec<u8>,
}

impl Xattr {
    pub fn new(name: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// ownership, permissions and extended attributes
///
/// embedded in file objects and stored standalone as dirmeta objects.
/// xattrs are sorted by name at construction so identical metadata always
/// serializes to identical bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xattrs: Vec<Xattr>,
}

impl FileMeta {
    pub fn new(uid: u32, gid: u32, mode: u32) -> Self {
        Self {
            uid,
            gid,
            mode,
            xattrs: vec![],
        }
    }

    pub fn with_xattrs(uid: u32, gid: u32, mode: u32, mut xattrs: Vec<Xattr>) -> Self {
        xattrs.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        Self {
            uid,
            gid,
            mode,
            xattrs,
        }
    }

    /// file type bits indicate a symlink
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// permission bits without the file type
    pub fn permissions(&self) -> u32 {
        self.mode & !S_IFMT
    }
}

/// directory metadata object payload
pub type DirMeta = FileMeta;

/// a file object: metadata plus content bytes
///
/// for symlinks the content is the target path and the mode carries the
/// symlink file type bits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileObject {
    pub meta: FileMeta,
    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,
}

impl FileObject {
    pub fn new(meta: FileMeta, content: Vec<u8>) -> Self {
        Self { meta, content }
    }

    pub fn symlink(uid: u32, gid: u32, xattrs: Vec<Xattr>, target: &str) -> Self {
        Self {
            meta: FileMeta::with_xattrs(uid, gid, SYMLINK_MODE, xattrs),
            content: target.as_bytes().to_vec(),
        }
    }

    pub fn is_symlink(&self) -> bool {
        self.meta.is_symlink()
    }

    /// symlink target when this object is a symlink
    pub fn symlink_target(&self) -> Option<String> {
        if self.is_symlink() {
            Some(String::from_utf8_lossy(&self.content).into_owned())
        } else {
            None
        }
    }
}
