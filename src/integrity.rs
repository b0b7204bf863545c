use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of a byte buffer.
///
/// Used by both ends of a transfer to verify byte-for-byte fidelity: the
/// sender declares the digest up front and repeats it in the completion
/// frame, and the receiver recomputes it over everything it accumulated.
pub fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
