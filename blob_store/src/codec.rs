//! Payload fingerprints: content hash plus head/tail byte samples.
//!
//! Fingerprints are computed once at store time and travel with the blob as
//! metadata. At retrieval time they are used to prove that candidate bytes
//! are the bytes that were stored, and to undo a narrow class of corruption
//! where an intermediate encoding layer damaged the boundary bytes of an
//! otherwise intact buffer.

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::metadata::{BlobMetadata, HASH_KEY, HEAD_HEX_KEY, SIZE_BYTES_KEY, TAIL_HEX_KEY};

/// Number of bytes sampled from each end of the payload.
pub const FINGERPRINT_SAMPLE_BYTES: usize = 512;

/// Bytes shown in hex previews of mismatching candidates.
const PREVIEW_BYTES: usize = 16;

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Computes the fingerprint fragment for `payload`.
pub fn fingerprint(payload: &[u8]) -> BlobMetadata {
    let sample = FINGERPRINT_SAMPLE_BYTES.min(payload.len());
    BlobMetadata::new()
        .with(SIZE_BYTES_KEY, payload.len().to_string())
        .with(HASH_KEY, sha256_hex(payload))
        .with(HEAD_HEX_KEY, hex::encode(&payload[..sample]))
        .with(TAIL_HEX_KEY, hex::encode(&payload[payload.len() - sample..]))
}

/// Checks `candidate` against the hash recorded in `metadata`.
///
/// Metadata without a hash has nothing to check against and is accepted.
pub fn validate(candidate: &[u8], metadata: &BlobMetadata) -> bool {
    let Some(expected) = metadata.hash() else {
        debug!(size = candidate.len(), "no recorded hash, accepting candidate");
        return true;
    };
    let actual = sha256_hex(candidate);
    if actual.eq_ignore_ascii_case(expected) {
        return true;
    }
    warn!(
        expected_hash = expected,
        actual_hash = %actual,
        expected_size = ?metadata.size_bytes(),
        actual_size = candidate.len(),
        head_preview = %preview(candidate, Boundary::Head),
        tail_preview = %preview(candidate, Boundary::Tail),
        "candidate failed hash validation"
    );
    false
}

/// Overwrites the head and tail of `candidate` with the fingerprinted bytes
/// when they differ.
///
/// Returns `None` when nothing was changed: no samples recorded, samples
/// unreadable, the candidate length disagrees with the recorded size, or the
/// boundaries already match. Only bytes decoded from the recorded samples are
/// ever written.
pub fn repair(candidate: &[u8], metadata: &BlobMetadata) -> Option<Vec<u8>> {
    if let Some(size) = metadata.size_bytes() {
        if size != candidate.len() as u64 {
            debug!(
                expected_size = size,
                actual_size = candidate.len(),
                "size mismatch, boundary repair not applicable"
            );
            return None;
        }
    }
    let head = decode_sample(metadata, HEAD_HEX_KEY);
    let tail = decode_sample(metadata, TAIL_HEX_KEY);
    if head.is_none() && tail.is_none() {
        return None;
    }

    let mut repaired = candidate.to_vec();
    let mut changed = false;

    if let Some(head) = head.filter(|h| h.len() <= repaired.len()) {
        if repaired[..head.len()] != head[..] {
            repaired[..head.len()].copy_from_slice(&head);
            changed = true;
        }
    }
    if let Some(tail) = tail.filter(|t| t.len() <= repaired.len()) {
        let start = repaired.len() - tail.len();
        if repaired[start..] != tail[..] {
            repaired[start..].copy_from_slice(&tail);
            changed = true;
        }
    }

    if changed {
        debug!(size = repaired.len(), "rewrote candidate boundary bytes from fingerprint");
        Some(repaired)
    } else {
        None
    }
}

fn decode_sample(metadata: &BlobMetadata, key: &str) -> Option<Vec<u8>> {
    let encoded = metadata.get(key)?;
    match hex::decode(encoded) {
        Ok(bytes) if bytes.len() <= FINGERPRINT_SAMPLE_BYTES => Some(bytes),
        Ok(_) => None,
        Err(err) => {
            debug!(key, %err, "ignoring unreadable fingerprint sample");
            None
        }
    }
}

enum Boundary {
    Head,
    Tail,
}

fn preview(data: &[u8], boundary: Boundary) -> String {
    let n = PREVIEW_BYTES.min(data.len());
    match boundary {
        Boundary::Head => hex::encode(&data[..n]),
        Boundary::Tail => hex::encode(&data[data.len() - n..]),
    }
}
