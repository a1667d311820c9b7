//! The archive engine: encrypted file table over the envelope.

pub mod container;
pub mod entry;
pub mod paths;

pub use container::{Container, FORMAT_VERSION};
pub use entry::{EntryMeta, FileEntry, FOLDER_MARKER};
