use std::path::PathBuf;

use crate::object::ObjectKind;
use crate::Checksum;

/// error type for drift operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("repository already exists at {0}")]
    RepoExists(PathBuf),

    #[error("repository is read-only: {0}")]
    ReadOnly(PathBuf),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("invalid ref name: {0}")]
    InvalidRef(String),

    #[error("commit not found: {0}")]
    CommitNotFound(Checksum),

    #[error("commit {0} has no parent")]
    CommitHasNoParent(Checksum),

    #[error("{kind} object not found: {checksum}")]
    ObjectNotFound { kind: ObjectKind, checksum: Checksum },

    #[error("corrupt {kind} object: stored bytes do not hash to {checksum}")]
    CorruptObject { kind: ObjectKind, checksum: Checksum },

    #[error("checksum collision on {kind} object {checksum}: different content under one key")]
    ChecksumCollision { kind: ObjectKind, checksum: Checksum },

    #[error("checksum mismatch in {context}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        context: String,
        expected: Checksum,
        actual: Checksum,
    },

    #[error("incompatible delta: required {kind} object {checksum} is not in the store")]
    IncompatibleRoots { kind: ObjectKind, checksum: Checksum },

    #[error("invalid delta superblock: {0}")]
    InvalidSuperblock(String),

    #[error("corrupt delta chunk {index}: {message}")]
    CorruptChunk { index: usize, message: String },

    #[error("corrupt delta fallback payload: {0}")]
    CorruptFallback(String),

    #[error("invalid binary patch: {0}")]
    InvalidPatch(String),

    #[error("invalid delta parameter {key}: {value}")]
    InvalidParam { key: String, value: String },

    #[error("TO revision must be specified")]
    MissingToRevision,

    #[error("invalid tree entry name: {0}")]
    InvalidEntryName(String),

    #[error("duplicate tree entry name: {0}")]
    DuplicateEntryName(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(PathBuf),

    #[error("transaction poisoned by an earlier failed write")]
    TransactionPoisoned,

    #[error("lock contention on repository")]
    LockContention,

    #[error("corrupt repository: {0}")]
    CorruptRepository(String),

    #[error("invalid object kind: {0}")]
    InvalidObjectKind(String),

    #[error("invalid checksum hex: {0}")]
    InvalidChecksum(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("xattr error on {path}: {message}")]
    Xattr { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
