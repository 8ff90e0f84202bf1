//! binary diff between byte buffers
//!
//! the patch format is a varint header (old size, new size) followed by an
//! instruction stream: copy records (offset + length into the old buffer)
//! and insert records (length + raw bytes). matching uses a rolling
//! checksum over fixed-size blocks of the old buffer, with every candidate
//! verified byte-for-byte before use, so a weak-hash collision can never
//! produce a wrong patch.
//!
//! application bounds-checks every record and re-validates both declared
//! sizes; malformed input yields an error, never a panic.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// block granularity for matching against the old buffer
const BLOCK_SIZE: usize = 16;

const OP_COPY: u8 = 0;
const OP_INSERT: u8 = 1;

/// compute a patch that transforms old into new
pub fn diff(old: &[u8], new: &[u8]) -> Vec<u8> {
    let mut patch = Vec::new();
    encode_varint(&mut patch, old.len() as u64);
    encode_varint(&mut patch, new.len() as u64);

    if new.is_empty() {
        return patch;
    }
    if old.len() < BLOCK_SIZE || new.len() < BLOCK_SIZE {
        // nothing to match against
        emit_insert(&mut patch, new);
        return patch;
    }

    let index = BlockIndex::build(old);

    let mut pos = 0usize;
    let mut insert_start = 0usize;
    let mut hash = RollingHash::new(&new[..BLOCK_SIZE]);

    while pos + BLOCK_SIZE <= new.len() {
        let mut matched = None;
        if let Some(candidates) = index.lookup(hash.value()) {
            for &off in candidates {
                if old[off..off + BLOCK_SIZE] == new[pos..pos + BLOCK_SIZE] {
                    // verified; extend the match forward as far as it goes
                    let mut len = BLOCK_SIZE;
                    while off + len < old.len()
                        && pos + len < new.len()
                        && old[off + len] == new[pos + len]
                    {
                        len += 1;
                    }
                    matched = Some((off, len));
                    break;
                }
            }
        }

        match matched {
            Some((off, len)) => {
                if insert_start < pos {
                    emit_insert(&mut patch, &new[insert_start..pos]);
                }
                patch.push(OP_COPY);
                encode_varint(&mut patch, off as u64);
                encode_varint(&mut patch, len as u64);
                pos += len;
                insert_start = pos;
                if pos + BLOCK_SIZE <= new.len() {
                    hash = RollingHash::new(&new[pos..pos + BLOCK_SIZE]);
                }
            }
            None => {
                if pos + BLOCK_SIZE < new.len() {
                    hash.roll(new[pos], new[pos + BLOCK_SIZE]);
                }
                pos += 1;
            }
        }
    }

    if insert_start < new.len() {
        emit_insert(&mut patch, &new[insert_start..]);
    }

    patch
}

/// apply a patch produced by [`diff`] against the same old buffer
pub fn patch(old: &[u8], patch_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut cursor = 0usize;
    let old_len = decode_varint(patch_bytes, &mut cursor)? as usize;
    let new_len = decode_varint(patch_bytes, &mut cursor)? as usize;

    if old_len != old.len() {
        return Err(Error::InvalidPatch(format!(
            "base length mismatch: patch expects {}, got {}",
            old_len,
            old.len()
        )));
    }

    let mut out = Vec::with_capacity(new_len);
    while cursor < patch_bytes.len() {
        let tag = patch_bytes[cursor];
        cursor += 1;
        match tag {
            OP_COPY => {
                let off = decode_varint(patch_bytes, &mut cursor)? as usize;
                let len = decode_varint(patch_bytes, &mut cursor)? as usize;
                let end = off
                    .checked_add(len)
                    .ok_or_else(|| Error::InvalidPatch("copy range overflow".to_string()))?;
                if end > old.len() {
                    return Err(Error::InvalidPatch(format!(
                        "copy past end of base: {}..{}",
                        off, end
                    )));
                }
                out.extend_from_slice(&old[off..end]);
            }
            OP_INSERT => {
                let len = decode_varint(patch_bytes, &mut cursor)? as usize;
                let end = cursor
                    .checked_add(len)
                    .ok_or_else(|| Error::InvalidPatch("insert length overflow".to_string()))?;
                if end > patch_bytes.len() {
                    return Err(Error::InvalidPatch(
                        "insert past end of patch".to_string(),
                    ));
                }
                out.extend_from_slice(&patch_bytes[cursor..end]);
                cursor = end;
            }
            other => {
                return Err(Error::InvalidPatch(format!(
                    "unknown instruction tag {}",
                    other
                )))
            }
        }
        if out.len() > new_len {
            return Err(Error::InvalidPatch(
                "output exceeds declared size".to_string(),
            ));
        }
    }

    if out.len() != new_len {
        return Err(Error::InvalidPatch(format!(
            "output size {} does not match declared {}",
            out.len(),
            new_len
        )));
    }

    Ok(out)
}

fn emit_insert(patch: &mut Vec<u8>, bytes: &[u8]) {
    patch.push(OP_INSERT);
    encode_varint(patch, bytes.len() as u64);
    patch.extend_from_slice(bytes);
}

fn encode_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_varint(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *bytes
            .get(*cursor)
            .ok_or_else(|| Error::InvalidPatch("truncated varint".to_string()))?;
        *cursor += 1;
        if shift >= 64 {
            return Err(Error::InvalidPatch("varint too long".to_string()));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(value)
}

/// weak rolling checksum over a fixed window (adler-style a/b sums)
struct RollingHash {
    a: u32,
    b: u32,
}

impl RollingHash {
    fn new(window: &[u8]) -> Self {
        let mut a = 0u32;
        let mut b = 0u32;
        let len = window.len() as u32;
        for (i, &byte) in window.iter().enumerate() {
            a = a.wrapping_add(byte as u32);
            b = b.wrapping_add((len - i as u32).wrapping_mul(byte as u32));
        }
        Self { a, b }
    }

    /// slide the window one byte: drop outgoing, add incoming
    fn roll(&mut self, outgoing: u8, incoming: u8) {
        self.a = self
            .a
            .wrapping_sub(outgoing as u32)
            .wrapping_add(incoming as u32);
        self.b = self
            .b
            .wrapping_sub((BLOCK_SIZE as u32).wrapping_mul(outgoing as u32))
            .wrapping_add(self.a);
    }

    fn value(&self) -> u32 {
        (self.b << 16) | (self.a & 0xffff)
    }
}

/// index of non-overlapping blocks of the old buffer by weak hash
struct BlockIndex {
    map: HashMap<u32, Vec<usize>>,
}

impl BlockIndex {
    fn build(old: &[u8]) -> Self {
        let mut map: HashMap<u32, Vec<usize>> = HashMap::new();
        let mut off = 0;
        while off + BLOCK_SIZE <= old.len() {
            let hash = RollingHash::new(&old[off..off + BLOCK_SIZE]).value();
            map.entry(hash).or_default().push(off);
            off += BLOCK_SIZE;
        }
        Self { map }
    }

    fn lookup(&self, hash: u32) -> Option<&Vec<usize>> {
        self.map.get(&hash)
    }
}
