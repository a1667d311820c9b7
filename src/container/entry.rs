//! Metadata entries of the virtual file tree.
//!
//! The file table is a JSON list of [`EntryMeta`] records, encrypted as a
//! whole before it is written to the envelope. Each record links one virtual
//! path to a storage slot and the IV its ciphertext was produced under.

use crate::crypto::IV_LENGTH;
use serde::{Deserialize, Serialize};

/// Sentinel file name that marks its parent folder as existing even when the
/// folder holds no real files.
pub const FOLDER_MARKER: &str = "[EMPTY_FOLDER]";

/// One record of the encrypted file table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Absolute virtual path, forward slashes, leading "/"
    pub path: String,
    /// Envelope slot holding the ciphertext; None for folder markers
    pub slot: Option<String>,
    /// IV the ciphertext was produced under; None for folder markers
    #[serde(with = "iv_hex")]
    pub iv: Option<[u8; IV_LENGTH]>,
    /// Plaintext size in bytes
    pub size: u64,
    /// Creation time, milliseconds since the Unix epoch
    pub created_ms: i64,
    /// Last modification time, milliseconds since the Unix epoch
    pub modified_ms: i64,
}

impl EntryMeta {
    /// Build the marker record that keeps an empty folder alive.
    pub fn folder_marker(folder: &str, now_ms: i64) -> Self {
        let path = if folder.ends_with('/') {
            format!("{}{}", folder, FOLDER_MARKER)
        } else {
            format!("{}/{}", folder, FOLDER_MARKER)
        };
        Self {
            path,
            slot: None,
            iv: None,
            size: 0,
            created_ms: now_ms,
            modified_ms: now_ms,
        }
    }

    pub fn is_folder_marker(&self) -> bool {
        self.path.rsplit('/').next() == Some(FOLDER_MARKER)
    }
}

/// One row of a directory listing handed to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute virtual path
    pub path: String,
    /// Final path component
    pub name: String,
    /// Plaintext size in bytes; zero for folders
    pub size: u64,
    pub created_ms: i64,
    pub modified_ms: i64,
    pub is_folder: bool,
}

/// IVs travel through the JSON table as lowercase hex strings.
mod iv_hex {
    use crate::crypto::IV_LENGTH;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        iv: &Option<[u8; IV_LENGTH]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match iv {
            Some(iv) => serializer.serialize_some(&hex::encode(iv)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[u8; IV_LENGTH]>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            None => Ok(None),
            Some(encoded) => {
                let bytes = hex::decode(&encoded).map_err(serde::de::Error::custom)?;
                let iv: [u8; IV_LENGTH] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("IV has the wrong length"))?;
                Ok(Some(iv))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_json_roundtrip() {
        let entries = vec![
            EntryMeta {
                path: "/docs/notes.txt".to_string(),
                slot: Some("File0000001".to_string()),
                iv: Some([0xab; IV_LENGTH]),
                size: 11,
                created_ms: 1_700_000_000_000,
                modified_ms: 1_700_000_000_500,
            },
            EntryMeta::folder_marker("/docs/empty", 1_700_000_000_000),
        ];

        let json = serde_json::to_vec(&entries).unwrap();
        let parsed: Vec<EntryMeta> = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].iv, Some([0xab; IV_LENGTH]));
        assert_eq!(parsed[0].slot.as_deref(), Some("File0000001"));
        assert!(parsed[1].is_folder_marker());
        assert_eq!(parsed[1].path, "/docs/empty/[EMPTY_FOLDER]");
    }

    #[test]
    fn test_iv_serializes_as_hex() {
        let entry = EntryMeta {
            path: "/a".to_string(),
            slot: Some("File0000001".to_string()),
            iv: Some([0x0f; IV_LENGTH]),
            size: 0,
            created_ms: 0,
            modified_ms: 0,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(&"0f".repeat(IV_LENGTH)));
    }

    #[test]
    fn test_marker_detection() {
        let marker = EntryMeta::folder_marker("/x/", 0);
        assert_eq!(marker.path, "/x/[EMPTY_FOLDER]");
        assert!(marker.is_folder_marker());

        let plain = EntryMeta {
            path: "/x/file.bin".to_string(),
            slot: Some("File0000002".to_string()),
            iv: None,
            size: 1,
            created_ms: 0,
            modified_ms: 0,
        };
        assert!(!plain.is_folder_marker());
    }
}
