//! # coffer-rs
//!
//! A password-protected archive engine. Files live fully encrypted inside a
//! ZIP-structured envelope: content is AES-256-CFB ciphertext under opaque
//! slot names, and all structure (paths, names, sizes, timestamps) sits in
//! an encrypted file table. The password is stretched with Argon2id and
//! verified through an eight-byte stamp, so a wrong password fails fast
//! without touching any ciphertext.
//!
//! The crate also ships a multi-pass secure erase engine (DoD, VSITR,
//! Schneier, Gutmann) with filename shredding, used both directly and to
//! destroy plaintext sources and scratch files after archiving.
//!
//! ## Example
//!
//! ```no_run
//! use coffer_rs::{Argon2Params, Container, SessionEnv};
//!
//! # fn main() -> coffer_rs::Result<()> {
//! let env = SessionEnv::create("/tmp/coffer")?;
//! let mut archive = Container::create(
//!     "vault.bar",
//!     "correct horse battery staple",
//!     Argon2Params::default(),
//!     None,
//!     env,
//! )?;
//!
//! archive.add_files_and_folders(&["notes.txt"], false)?;
//! archive.extract_all_files("/tmp/out")?;
//! archive.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod crypto;
pub mod env;
pub mod envelope;
pub mod error;
pub mod progress;
pub mod wipe;

pub use config::{ConfigStore, JsonConfigStore};
pub use container::{Container, FileEntry, FORMAT_VERSION};
pub use crypto::Argon2Params;
pub use env::SessionEnv;
pub use envelope::Envelope;
pub use error::{CofferError, Result};
pub use progress::{Operation, ProgressListener, ProgressTracker};
pub use wipe::{Eraser, SessionGuard, WipeMethod};
