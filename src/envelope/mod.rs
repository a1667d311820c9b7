//! ZIP-structured envelope: the unencrypted outer container.

pub mod format;
pub mod store;

pub use store::{BlobRecord, Envelope};
