//! high-level repository operations

mod commit;
mod fsck;

pub use commit::{commit, commit_with_metadata};
pub use fsck::{fsck, BadObject, FsckReport, MissingObject};
