//! Binary snapshot format for [`VectorIndex`](super::VectorIndex).
//!
//! A snapshot is two artifacts that always travel together:
//!
//! - vectors: magic `CIVX`, u32 version, u32 dimension, u64 count, then
//!   `count * dimension` f32 values
//! - ids: magic `CIID`, u32 version, u64 count, then `count` i64 ids
//!
//! All integers and floats are little-endian. Decoding checks every header field and
//! the exact payload length, so a truncated upload is reported instead of loaded.

use crate::error::{Error, Result};

pub const SNAPSHOT_VERSION: u32 = 1;

const VECTORS_MAGIC: &[u8; 4] = b"CIVX";
const IDS_MAGIC: &[u8; 4] = b"CIID";
const VECTORS_HEADER: usize = 4 + 4 + 4 + 8;
const IDS_HEADER: usize = 4 + 4 + 8;

pub fn encode_vectors(dimension: usize, data: &[f32]) -> Vec<u8> {
    let count = if dimension == 0 { 0 } else { data.len() / dimension };
    let mut out = Vec::with_capacity(VECTORS_HEADER + data.len() * 4);
    out.extend_from_slice(VECTORS_MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&(dimension as u32).to_le_bytes());
    out.extend_from_slice(&(count as u64).to_le_bytes());
    for x in data {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

pub fn encode_ids(ids: &[i64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(IDS_HEADER + ids.len() * 8);
    out.extend_from_slice(IDS_MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&(ids.len() as u64).to_le_bytes());
    for id in ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    out
}

/// Decode the vectors artifact, returning `(dimension, flat data)`.
pub fn decode_vectors(bytes: &[u8]) -> Result<(usize, Vec<f32>)> {
    if bytes.len() < VECTORS_HEADER {
        return Err(Error::CorruptSnapshot(format!(
            "vectors artifact too short ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[0..4] != VECTORS_MAGIC {
        return Err(Error::CorruptSnapshot("bad vectors magic".into()));
    }
    check_version(read_u32(bytes, 4))?;
    let dimension = read_u32(bytes, 8) as usize;
    let count = read_u64(bytes, 12) as usize;

    let expected = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| Error::CorruptSnapshot("vector count overflows".into()))?;
    let payload = &bytes[VECTORS_HEADER..];
    if payload.len() != expected {
        return Err(Error::CorruptSnapshot(format!(
            "vectors payload is {} bytes, header promises {expected}",
            payload.len()
        )));
    }

    let data = payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((dimension, data))
}

pub fn decode_ids(bytes: &[u8]) -> Result<Vec<i64>> {
    if bytes.len() < IDS_HEADER {
        return Err(Error::CorruptSnapshot(format!(
            "ids artifact too short ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[0..4] != IDS_MAGIC {
        return Err(Error::CorruptSnapshot("bad ids magic".into()));
    }
    check_version(read_u32(bytes, 4))?;
    let count = read_u64(bytes, 8) as usize;

    let payload = &bytes[IDS_HEADER..];
    if Some(payload.len()) != count.checked_mul(8) {
        return Err(Error::CorruptSnapshot(format!(
            "ids payload is {} bytes for {count} ids",
            payload.len()
        )));
    }

    Ok(payload
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect())
}

fn check_version(version: u32) -> Result<()> {
    if version != SNAPSHOT_VERSION {
        return Err(Error::CorruptSnapshot(format!(
            "unsupported snapshot version {version} (expected {SNAPSHOT_VERSION})"
        )));
    }
    Ok(())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}
