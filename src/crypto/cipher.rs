//! AES-256-CFB streaming encryption.
//!
//! Every encryption call draws a fresh random IV, so encrypting the same
//! plaintext twice never yields the same ciphertext. CFB is a stream
//! construction: ciphertext length equals plaintext length with no padding,
//! which keeps the plaintext size recoverable from the stored blob size.

use crate::error::{CofferError, Result};
use crate::progress::ProgressTracker;
use aes::Aes256;
use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{BufDecryptor, BufEncryptor};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::{Read, Write};

/// Streaming buffer size in bytes
pub const BUFFER_SIZE: usize = 4096;

/// IV length in bytes (AES block size)
pub const IV_LENGTH: usize = 16;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

type Encryptor = BufEncryptor<Aes256>;
type Decryptor = BufDecryptor<Aes256>;

fn fresh_iv() -> [u8; IV_LENGTH] {
    let mut iv = [0u8; IV_LENGTH];
    OsRng.fill_bytes(&mut iv);
    iv
}

fn new_encryptor(key: &[u8], iv: &[u8]) -> Result<Encryptor> {
    Encryptor::new_from_slices(key, iv)
        .map_err(|e| CofferError::Crypto(format!("invalid key or IV length: {}", e)))
}

fn new_decryptor(key: &[u8], iv: &[u8]) -> Result<Decryptor> {
    Decryptor::new_from_slices(key, iv)
        .map_err(|e| CofferError::Crypto(format!("invalid key or IV length: {}", e)))
}

/// Encrypt `input` to `output` under a fresh IV, which is returned.
///
/// Cancellation is polled before each buffer; on abort the output is left
/// truncated mid-stream and [`CofferError::Aborted`] is returned.
pub fn encrypt_stream<R: Read, W: Write>(
    key: &[u8],
    input: &mut R,
    output: &mut W,
    tracker: &mut ProgressTracker,
) -> Result<[u8; IV_LENGTH]> {
    let iv = fresh_iv();
    let mut encryptor = new_encryptor(key, &iv)?;

    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        if tracker.poll_abort() {
            return Err(CofferError::Aborted);
        }
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        encryptor.encrypt(&mut buf[..n]);
        output.write_all(&buf[..n])?;
        tracker.advance(n as u64);
    }
    output.flush()?;
    Ok(iv)
}

/// Decrypt `input` to `output` under a recorded IV.
pub fn decrypt_stream<R: Read, W: Write>(
    key: &[u8],
    iv: &[u8; IV_LENGTH],
    input: &mut R,
    output: &mut W,
    tracker: &mut ProgressTracker,
) -> Result<()> {
    let mut decryptor = new_decryptor(key, iv)?;

    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        if tracker.poll_abort() {
            return Err(CofferError::Aborted);
        }
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        decryptor.decrypt(&mut buf[..n]);
        output.write_all(&buf[..n])?;
        tracker.advance(n as u64);
    }
    output.flush()?;
    Ok(())
}

/// Encrypt an in-memory buffer under a fresh IV. Used for metadata records
/// small enough to hold in memory.
pub fn encrypt_bytes(key: &[u8], plaintext: &[u8]) -> Result<([u8; IV_LENGTH], Vec<u8>)> {
    let iv = fresh_iv();
    let mut encryptor = new_encryptor(key, &iv)?;
    let mut data = plaintext.to_vec();
    encryptor.encrypt(&mut data);
    Ok((iv, data))
}

/// Decrypt an in-memory buffer.
pub fn decrypt_bytes(key: &[u8], iv: &[u8; IV_LENGTH], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut decryptor = new_decryptor(key, iv)?;
    let mut data = ciphertext.to_vec();
    decryptor.decrypt(&mut data);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const KEY: [u8; 32] = [0x5a; 32];

    #[test]
    fn test_stream_roundtrip() {
        let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut tracker = ProgressTracker::new();
        tracker.reset(plaintext.len() as u64 * 2);

        let mut ciphertext = Vec::new();
        let iv = encrypt_stream(
            &KEY,
            &mut Cursor::new(&plaintext),
            &mut ciphertext,
            &mut tracker,
        )
        .unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_ne!(ciphertext, plaintext);

        let mut recovered = Vec::new();
        decrypt_stream(
            &KEY,
            &iv,
            &mut Cursor::new(&ciphertext),
            &mut recovered,
            &mut tracker,
        )
        .unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let plaintext = b"same plaintext, different ciphertext";
        let (iv_a, ct_a) = encrypt_bytes(&KEY, plaintext).unwrap();
        let (iv_b, ct_b) = encrypt_bytes(&KEY, plaintext).unwrap();
        assert_ne!(iv_a, iv_b);
        assert_ne!(ct_a, ct_b);
    }

    #[test]
    fn test_bytes_roundtrip_preserves_length() {
        // CFB never pads, so odd lengths survive untouched.
        let plaintext = b"seventeen bytes!!";
        let (iv, ciphertext) = encrypt_bytes(&KEY, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        assert_eq!(decrypt_bytes(&KEY, &iv, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_iv_garbles() {
        let (mut iv, ciphertext) = encrypt_bytes(&KEY, b"some secret data here").unwrap();
        iv[0] ^= 0xff;
        let garbled = decrypt_bytes(&KEY, &iv, &ciphertext).unwrap();
        assert_ne!(garbled, b"some secret data here");
    }

    struct AbortNow;

    impl crate::progress::ProgressListener for AbortNow {
        fn poll_abort(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_abort_stops_encryption() {
        let mut tracker = ProgressTracker::new();
        tracker.add_listener(std::sync::Arc::new(AbortNow));
        tracker.reset(100);

        let mut output = Vec::new();
        let result = encrypt_stream(
            &KEY,
            &mut Cursor::new(vec![0u8; 100]),
            &mut output,
            &mut tracker,
        );
        assert!(matches!(result, Err(CofferError::Aborted)));
        assert!(output.is_empty());
    }
}
