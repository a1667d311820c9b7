//! Key derivation, password verification, and streaming encryption.

pub mod cipher;
pub mod kdf;
pub mod stamp;

pub use cipher::{BLOCK_SIZE, BUFFER_SIZE, IV_LENGTH};
pub use kdf::{Argon2Params, KEY_LENGTH, SALT_LENGTH};
pub use stamp::STAMP_LENGTH;
