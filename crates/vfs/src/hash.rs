//! Opaque identifiers for volumes and logical paths.
//!
//! The client protocol links entries by hash only. A path hash is the volume
//! id followed by a SHA-256 digest of the volume id and the normalized path,
//! so the client can route a hash to its volume but never read the path back
//! out of it.

use sha2::{Digest, Sha256};

use crate::path;

/// Separator between the volume id and the path digest.
const HASH_SEPARATOR: char = '_';

/// Derive a volume id from the user and the connection address.
pub fn volume_id(username: &str, addr: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{username}@{addr}").as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Hash a logical path within a volume.
pub fn hash_path(volume_id: &str, logical: &str) -> String {
    let normalized = path::normalize(logical);
    let mut hasher = Sha256::new();
    hasher.update(volume_id.as_bytes());
    // NUL cannot occur in either input, so the pair encodes unambiguously.
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    format!("{volume_id}{HASH_SEPARATOR}{}", hex::encode(hasher.finalize()))
}

/// Hash of a path together with the hash of its parent directory.
///
/// A path that is its own parent (the volume root) gets an empty parent
/// hash so clients treat it as top level.
pub fn hash_pair(volume_id: &str, logical: &str) -> (String, String) {
    let hash = hash_path(volume_id, logical);
    let parent_hash = hash_path(volume_id, &path::parent(logical));
    if parent_hash == hash {
        (hash, String::new())
    } else {
        (hash, parent_hash)
    }
}

/// Volume id a path hash belongs to.
pub fn volume_of(hash: &str) -> Option<&str> {
    hash.split_once(HASH_SEPARATOR).map(|(volume, _)| volume)
}
