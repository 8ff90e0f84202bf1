//! drift - content-addressed snapshot store with static deltas
//!
//! a repository of immutable filesystem snapshots, addressed by the
//! SHA-256 of each object's canonical CBOR bytes and updated atomically
//! through staged transactions. precomputed static deltas carry one
//! snapshot to another offline, without contacting the producer.
//!
//! # Core concepts
//!
//! - **File**: metadata plus content bytes (symlinks store their target)
//! - **DirTree**: sorted directory listing naming file and subtree checksums
//! - **DirMeta**: ownership, permissions and xattrs of a directory
//! - **Commit**: a snapshot root with subject, timestamp and optional parent
//! - **Ref**: a named pointer to a commit (hierarchical, like git branches)
//! - **Static delta**: a shippable artifact of copy/literal/patch
//!   operations transforming one commit's closure into another's
//!
//! object identity is computed over uncompressed canonical bytes; zstd
//! applies only at rest, so recompression can never change a checksum.
//!
//! # Example usage
//!
//! ```no_run
//! use drift::{delta, ops, Repo};
//! use std::path::Path;
//!
//! // initialize a repository and commit a directory
//! let repo = Repo::init(Path::new("/path/to/repo")).unwrap();
//! ops::commit(&repo, Path::new("/source"), "my/ref", Some("initial"), None).unwrap();
//!
//! // generate a from-scratch delta for the new head
//! let config = delta::DeltaConfig::from_tuning(&repo.config().delta);
//! let report = delta::generate(&repo, None, "my/ref", &config).unwrap();
//! println!("wrote {}", report.name);
//! ```

mod config;
mod error;
mod hash;
mod object;
mod refs;
mod repo;
mod txn;

pub mod delta;
pub mod ops;
pub mod types;

pub use config::{Config, DeltaTuning};
pub use error::{Error, Result};
pub use hash::{compute_checksum, is_checksum_hex, Checksum};
pub use object::{
    canonical_decode, canonical_encode, object_exists, object_path, read_commit, read_file,
    read_meta, read_object_bytes, read_tree, write_commit, write_file, write_meta,
    write_object_bytes, write_tree, ObjectKind,
};
pub use refs::{
    delete_ref, list_refs, list_refs_matching, read_ref, ref_exists, resolve, write_ref,
};
pub use repo::{Repo, RepoLock};
pub use txn::{Transaction, TxnStats};
pub use types::{Commit, DirEntry, DirMeta, DirTree, FileEntry, FileMeta, FileObject, Xattr};
