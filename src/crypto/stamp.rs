//! Password verification stamp.
//!
//! The stamp is eight bytes sampled from the SHA-256 digest of the derived
//! key. It confirms a password without storing the key or the full digest,
//! and a mismatch fails fast before any decryption is attempted.

use sha2::{Digest, Sha256};

/// Stamp length in bytes
pub const STAMP_LENGTH: usize = 8;

/// Digest byte positions sampled into the stamp.
const STAMP_OFFSETS: [usize; STAMP_LENGTH] = [0, 2, 4, 5, 7, 9, 10, 12];

/// Compute the verification stamp for a derived key.
pub fn verification_stamp(key: &[u8]) -> [u8; STAMP_LENGTH] {
    let digest = Sha256::digest(key);
    let mut stamp = [0u8; STAMP_LENGTH];
    for (i, &offset) in STAMP_OFFSETS.iter().enumerate() {
        stamp[i] = digest[offset];
    }
    stamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_is_deterministic() {
        let key = [0x42u8; 32];
        assert_eq!(verification_stamp(&key), verification_stamp(&key));
    }

    #[test]
    fn test_stamp_samples_fixed_offsets() {
        let key = b"0123456789abcdef0123456789abcdef";
        let digest = Sha256::digest(key);
        let stamp = verification_stamp(key);
        assert_eq!(stamp[0], digest[0]);
        assert_eq!(stamp[1], digest[2]);
        assert_eq!(stamp[7], digest[12]);
    }

    #[test]
    fn test_different_keys_differ() {
        assert_ne!(verification_stamp(&[1u8; 32]), verification_stamp(&[2u8; 32]));
    }
}
