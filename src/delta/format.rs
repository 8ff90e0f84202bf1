//! on-disk layout of a static delta artifact
//!
//! a delta is a directory holding a `superblock` file, zero or more
//! numbered chunk files ("0", "1", ...) and an optional `fallback` file.
//! the superblock is a framed, compressed CBOR document describing the
//! operation stream; chunks carry concatenated literal and patch payloads,
//! each chunk compressed as a single zstd stream; the fallback file is one
//! zstd stream of whole canonical objects for entries too large to patch.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{compute_checksum, Checksum, CHECKSUM_ALGO};
use crate::object::{ObjectKind, ZSTD_LEVEL};

/// magic bytes at the start of a superblock file
pub const DELTA_MAGIC: &[u8; 8] = b"DRIFTDL1";

/// current superblock format version
pub const DELTA_VERSION: u32 = 1;

/// name of the superblock file inside a delta directory
pub const SUPERBLOCK_FILE: &str = "superblock";

/// name of the fallback payload file inside a delta directory
pub const FALLBACK_FILE: &str = "fallback";

/// one instruction in the delta operation stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeltaOp {
    /// object already present in the target repository (shared with FROM)
    Copy { kind: ObjectKind, checksum: Checksum },
    /// object materialized verbatim from a chunk payload slice
    Literal {
        kind: ObjectKind,
        target: Checksum,
        chunk: u32,
        offset: u64,
        length: u64,
    },
    /// object produced by patching an existing base object
    Patch {
        kind: ObjectKind,
        base: Checksum,
        target: Checksum,
        chunk: u32,
        offset: u64,
        length: u64,
    },
    /// object carried whole in the fallback payload
    UseFallback { index: u32 },
}

/// descriptor for one chunk file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// checksum of the decompressed payload
    pub checksum: Checksum,
    /// size of the chunk file on disk
    pub compressed_size: u64,
    /// size of the decompressed payload
    pub payload_size: u64,
}

/// descriptor for one object in the fallback payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub kind: ObjectKind,
    pub checksum: Checksum,
    /// canonical object size
    pub size: u64,
    /// offset into the decompressed fallback stream
    pub offset: u64,
}

/// the delta manifest: endpoints, operation stream and payload descriptors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Superblock {
    /// FROM commit, absent for a from-scratch delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Checksum>,
    /// TO commit the operations produce
    pub to: Checksum,
    /// ref to point at TO after a successful apply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<String>,
    pub ops: Vec<DeltaOp>,
    pub chunks: Vec<ChunkInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<FallbackEntry>,
}

/// serialize and write a superblock file
pub fn write_superblock(path: &Path, superblock: &Superblock) -> Result<()> {
    let mut body = Vec::new();
    ciborium::into_writer(superblock, &mut body)?;
    let compressed = zstd::encode_all(body.as_slice(), ZSTD_LEVEL).with_path(path)?;

    let mut framed = Vec::with_capacity(16 + CHECKSUM_ALGO.len() + compressed.len());
    framed.extend_from_slice(DELTA_MAGIC);
    framed.extend_from_slice(&DELTA_VERSION.to_le_bytes());
    framed.extend_from_slice(&(CHECKSUM_ALGO.len() as u32).to_le_bytes());
    framed.extend_from_slice(CHECKSUM_ALGO.as_bytes());
    framed.extend_from_slice(&compressed);

    let mut file = File::create(path).with_path(path)?;
    file.write_all(&framed).with_path(path)?;
    file.sync_all().with_path(path)?;
    Ok(())
}

/// read and validate a superblock file
pub fn read_superblock(path: &Path) -> Result<Superblock> {
    let bytes = std::fs::read(path).with_path(path)?;
    if bytes.len() < 16 || &bytes[..8] != DELTA_MAGIC {
        return Err(Error::InvalidSuperblock("bad magic".to_string()));
    }

    let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if version != DELTA_VERSION {
        return Err(Error::InvalidSuperblock(format!(
            "unsupported version {}",
            version
        )));
    }

    let algo_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    let body_start = 16usize
        .checked_add(algo_len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| Error::InvalidSuperblock("truncated header".to_string()))?;
    let algo = &bytes[16..body_start];
    if algo != CHECKSUM_ALGO.as_bytes() {
        return Err(Error::InvalidSuperblock(format!(
            "unsupported checksum algorithm {}",
            String::from_utf8_lossy(algo)
        )));
    }

    let body = zstd::decode_all(&bytes[body_start..])
        .map_err(|_| Error::InvalidSuperblock("corrupt superblock body".to_string()))?;
    ciborium::from_reader(body.as_slice())
        .map_err(|_| Error::InvalidSuperblock("malformed superblock body".to_string()))
}

/// file name of the chunk at the given index
pub fn chunk_file_name(index: usize) -> String {
    index.to_string()
}

/// compress and write one chunk payload, returning its descriptor
pub fn write_chunk(dir: &Path, index: usize, payload: &[u8]) -> Result<ChunkInfo> {
    let path = dir.join(chunk_file_name(index));
    let compressed = zstd::encode_all(payload, ZSTD_LEVEL).with_path(&path)?;

    let mut file = File::create(&path).with_path(&path)?;
    file.write_all(&compressed).with_path(&path)?;
    file.sync_all().with_path(&path)?;

    Ok(ChunkInfo {
        checksum: compute_checksum(payload),
        compressed_size: compressed.len() as u64,
        payload_size: payload.len() as u64,
    })
}

/// read one chunk payload and verify it against its descriptor
pub fn read_chunk(dir: &Path, index: usize, info: &ChunkInfo) -> Result<Vec<u8>> {
    let path = dir.join(chunk_file_name(index));
    let compressed = std::fs::read(&path).with_path(&path)?;

    if compressed.len() as u64 != info.compressed_size {
        return Err(Error::CorruptChunk {
            index,
            message: format!(
                "compressed size {} does not match descriptor {}",
                compressed.len(),
                info.compressed_size
            ),
        });
    }

    let payload = zstd::decode_all(compressed.as_slice()).map_err(|e| Error::CorruptChunk {
        index,
        message: format!("decompression failed: {}", e),
    })?;

    if payload.len() as u64 != info.payload_size {
        return Err(Error::CorruptChunk {
            index,
            message: format!(
                "payload size {} does not match descriptor {}",
                payload.len(),
                info.payload_size
            ),
        });
    }
    let actual = compute_checksum(&payload);
    if actual != info.checksum {
        return Err(Error::CorruptChunk {
            index,
            message: format!(
                "payload checksum {} does not match descriptor {}",
                actual, info.checksum
            ),
        });
    }

    Ok(payload)
}

/// compress and write the fallback payload file
pub fn write_fallback_payload(dir: &Path, payload: &[u8]) -> Result<u64> {
    let path = dir.join(FALLBACK_FILE);
    let compressed = zstd::encode_all(payload, ZSTD_LEVEL).with_path(&path)?;

    let mut file = File::create(&path).with_path(&path)?;
    file.write_all(&compressed).with_path(&path)?;
    file.sync_all().with_path(&path)?;
    Ok(compressed.len() as u64)
}

/// read and decompress the fallback payload file
pub fn read_fallback_payload(dir: &Path) -> Result<Vec<u8>> {
    let path = dir.join(FALLBACK_FILE);
    let compressed = std::fs::read(&path).with_path(&path)?;
    zstd::decode_all(compressed.as_slice())
        .map_err(|e| Error::CorruptFallback(format!("decompression failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_superblock() -> Superblock {
        let base = compute_checksum(b"base");
        let target = compute_checksum(b"target");
        let to = compute_checksum(b"to commit");
        Superblock {
            from: Some(compute_checksum(b"from commit")),
            to,
            target_ref: Some("main".to_string()),
            ops: vec![
                DeltaOp::Copy {
                    kind: ObjectKind::File,
                    checksum: base,
                },
                DeltaOp::Literal {
                    kind: ObjectKind::DirTree,
                    target,
                    chunk: 0,
                    offset: 0,
                    length: 42,
                },
                DeltaOp::Patch {
                    kind: ObjectKind::File,
                    base,
                    target,
                    chunk: 0,
                    offset: 42,
                    length: 7,
                },
                DeltaOp::UseFallback { index: 0 },
                DeltaOp::Copy {
                    kind: ObjectKind::Commit,
                    checksum: to,
                },
            ],
            chunks: vec![ChunkInfo {
                checksum: compute_checksum(b"payload"),
                compressed_size: 10,
                payload_size: 49,
            }],
            fallbacks: vec![FallbackEntry {
                kind: ObjectKind::File,
                checksum: compute_checksum(b"big"),
                size: 1024,
                offset: 0,
            }],
        }
    }

    #[test]
    fn test_superblock_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SUPERBLOCK_FILE);

        let original = sample_superblock();
        write_superblock(&path, &original).unwrap();
        let loaded = read_superblock(&path).unwrap();

        assert_eq!(loaded.from, original.from);
        assert_eq!(loaded.to, original.to);
        assert_eq!(loaded.target_ref, original.target_ref);
        assert_eq!(loaded.ops, original.ops);
        assert_eq!(loaded.chunks, original.chunks);
        assert_eq!(loaded.fallbacks, original.fallbacks);
    }

    #[test]
    fn test_superblock_minimal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SUPERBLOCK_FILE);

        let original = Superblock {
            from: None,
            to: compute_checksum(b"to"),
            target_ref: None,
            ops: vec![],
            chunks: vec![],
            fallbacks: vec![],
        };
        write_superblock(&path, &original).unwrap();
        let loaded = read_superblock(&path).unwrap();

        assert_eq!(loaded.from, None);
        assert_eq!(loaded.target_ref, None);
        assert!(loaded.ops.is_empty());
        assert!(loaded.fallbacks.is_empty());
    }

    #[test]
    fn test_superblock_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SUPERBLOCK_FILE);
        std::fs::write(&path, b"NOTDELTAxxxxxxxxxxxxxxxx").unwrap();
        assert!(matches!(
            read_superblock(&path),
            Err(Error::InvalidSuperblock(_))
        ));
    }

    #[test]
    fn test_superblock_bad_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SUPERBLOCK_FILE);

        write_superblock(&path, &sample_superblock()).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        match read_superblock(&path) {
            Err(Error::InvalidSuperblock(msg)) => assert!(msg.contains("version")),
            other => panic!("expected InvalidSuperblock, got {:?}", other),
        }
    }

    #[test]
    fn test_superblock_bad_algorithm() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SUPERBLOCK_FILE);

        write_superblock(&path, &sample_superblock()).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        // "sha256" -> "sha512"
        bytes[19] = b'5';
        bytes[20] = b'1';
        bytes[21] = b'2';
        std::fs::write(&path, &bytes).unwrap();

        match read_superblock(&path) {
            Err(Error::InvalidSuperblock(msg)) => assert!(msg.contains("algorithm")),
            other => panic!("expected InvalidSuperblock, got {:?}", other),
        }
    }

    #[test]
    fn test_superblock_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SUPERBLOCK_FILE);

        write_superblock(&path, &sample_superblock()).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..10]).unwrap();

        assert!(matches!(
            read_superblock(&path),
            Err(Error::InvalidSuperblock(_))
        ));
    }

    #[test]
    fn test_superblock_corrupt_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SUPERBLOCK_FILE);

        write_superblock(&path, &sample_superblock()).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            read_superblock(&path),
            Err(Error::InvalidSuperblock(_))
        ));
    }

    #[test]
    fn test_chunk_roundtrip() {
        let dir = TempDir::new().unwrap();
        let payload = b"chunk payload with some redundancy redundancy redundancy";

        let info = write_chunk(dir.path(), 0, payload).unwrap();
        assert_eq!(info.payload_size, payload.len() as u64);
        assert_eq!(info.checksum, compute_checksum(payload));

        let loaded = read_chunk(dir.path(), 0, &info).unwrap();
        assert_eq!(loaded, payload);
    }

    #[test]
    fn test_chunk_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let payload = b"chunk payload that will be tampered with after writing";
        let info = write_chunk(dir.path(), 3, payload).unwrap();

        let path = dir.path().join(chunk_file_name(3));
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        match read_chunk(dir.path(), 3, &info) {
            Err(Error::CorruptChunk { index, .. }) => assert_eq!(index, 3),
            other => panic!("expected CorruptChunk, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_detects_truncation() {
        let dir = TempDir::new().unwrap();
        let payload = vec![7u8; 4096];
        let info = write_chunk(dir.path(), 0, &payload).unwrap();

        let path = dir.path().join(chunk_file_name(0));
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(matches!(
            read_chunk(dir.path(), 0, &info),
            Err(Error::CorruptChunk { .. })
        ));
    }

    #[test]
    fn test_fallback_roundtrip() {
        let dir = TempDir::new().unwrap();
        let payload = b"first object bytes\x00second object bytes";

        write_fallback_payload(dir.path(), payload).unwrap();
        let loaded = read_fallback_payload(dir.path()).unwrap();
        assert_eq!(loaded, payload);
    }

    #[test]
    fn test_fallback_detects_corruption() {
        let dir = TempDir::new().unwrap();
        write_fallback_payload(dir.path(), &vec![42u8; 8192]).unwrap();

        let path = dir.path().join(FALLBACK_FILE);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(
            read_fallback_payload(dir.path()),
            Err(Error::CorruptFallback(_))
        ));
    }

    #[test]
    fn test_op_serde_shape() {
        // the operation tag travels as a snake_case "op" field
        let op = DeltaOp::UseFallback { index: 2 };
        let mut buf = Vec::new();
        ciborium::into_writer(&op, &mut buf).unwrap();
        let value: ciborium::Value = ciborium::from_reader(buf.as_slice()).unwrap();
        let map = value.into_map().unwrap();
        let tag = map
            .iter()
            .find(|(k, _)| k.as_text() == Some("op"))
            .map(|(_, v)| v.as_text().unwrap().to_string())
            .unwrap();
        assert_eq!(tag, "use_fallback");
    }
}
