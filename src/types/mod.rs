mod commit;
mod meta;
mod tree;

pub use commit::Commit;
pub use meta::{DirMeta, FileMeta, FileObject, Xattr, SYMLINK_MODE};
pub use tree::{DirEntry, DirTree, FileEntry};
