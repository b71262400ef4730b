//! UUID utility functions

use sha2::{Digest, Sha256};
use uuid::Uuid;

fn uuid_from_digest(hash: &[u8]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[0..16]);

    // Set version to 4 and variant to RFC4122
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Create a deterministic UUID from a string
///
/// Used to turn session keys such as `voice:discord:<guild>:<channel>:<user>`
/// into stable room and entity ids.
pub fn string_to_uuid(input: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    uuid_from_digest(&hasher.finalize())
}
