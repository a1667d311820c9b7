//! Append-oriented blob store over the ZIP-structured envelope.
//!
//! Blobs are stored uncompressed under flat slot names. Insertion appends a
//! local header plus payload where the central directory used to start, then
//! rewrites the central directory and end record behind it. Removal only
//! de-indexes the blob; its bytes remain in the file until the slot offset is
//! reused by a later rewrite.

use crate::envelope::format::{
    CentralEntry, EndRecord, LocalHeader, END_RECORD_SIZE, LOCAL_HEADER_CRC_OFFSET,
};
use crate::error::{CofferError, Result};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Largest tail slice scanned for the end record: fixed record plus the
/// maximum comment length.
const END_RECORD_SCAN: u64 = END_RECORD_SIZE + u16::MAX as u64;

/// Location and integrity data for one stored blob.
#[derive(Debug, Clone)]
pub struct BlobRecord {
    pub header_offset: u64,
    pub data_offset: u64,
    pub size: u32,
    pub crc32: u32,
}

/// An exclusive handle on one envelope file.
///
/// The handle holds an OS-level exclusive lock for its whole lifetime, so a
/// second process opening the same file gets [`CofferError::ArchiveLocked`].
pub struct Envelope {
    path: PathBuf,
    file: File,
    entries: BTreeMap<String, BlobRecord>,
    cd_offset: u64,
    comment: Vec<u8>,
}

impl Envelope {
    /// Create a new, empty envelope at `path`, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        lock_exclusive(&file, &path)?;

        let mut envelope = Self {
            path,
            file,
            entries: BTreeMap::new(),
            cd_offset: 0,
            comment: Vec::new(),
        };
        envelope.rewrite_tail()?;
        Ok(envelope)
    }

    /// Open an existing envelope and index its central directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        lock_exclusive(&file, &path)?;

        let mut envelope = Self {
            path,
            file,
            entries: BTreeMap::new(),
            cd_offset: 0,
            comment: Vec::new(),
        };
        envelope.read_tail()?;
        Ok(envelope)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn blob_count(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn record(&self, name: &str) -> Option<&BlobRecord> {
        self.entries.get(name)
    }

    /// Raw comment bytes from the end record.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// Replace the comment and rewrite the end record.
    pub fn set_comment(&mut self, comment: Vec<u8>) -> Result<()> {
        if comment.len() > u16::MAX as usize {
            return Err(CofferError::InvalidOperation(
                "comment exceeds the maximum envelope comment length".to_string(),
            ));
        }
        self.comment = comment;
        self.rewrite_tail()
    }

    /// Stream `len` bytes from `reader` into a new blob. An existing blob of
    /// the same name is de-indexed first.
    pub fn add_blob<R: Read>(&mut self, name: &str, reader: &mut R, len: u64) -> Result<()> {
        if name.len() > u16::MAX as usize {
            return Err(CofferError::InvalidOperation(
                "blob name exceeds the maximum length".to_string(),
            ));
        }
        let size = u32::try_from(len).map_err(|_| {
            CofferError::InvalidOperation("blob exceeds the 4 GiB envelope limit".to_string())
        })?;
        self.entries.remove(name);

        let header_offset = self.cd_offset;
        self.file.seek(SeekFrom::Start(header_offset))?;
        let header = LocalHeader::new(name, size, 0);
        header.write_to(&mut self.file)?;
        let data_offset = header_offset + header.byte_len();

        // Stream payload while hashing, then patch the CRC into the header.
        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = len;
        let mut buf = [0u8; 8192];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = reader.read(&mut buf[..want])?;
            if n == 0 {
                return Err(CofferError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "blob source ended early",
                )));
            }
            hasher.update(&buf[..n]);
            self.file.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        let crc32 = hasher.finalize();
        self.file
            .seek(SeekFrom::Start(header_offset + LOCAL_HEADER_CRC_OFFSET))?;
        self.file.write_all(&crc32.to_le_bytes())?;

        self.entries.insert(
            name.to_string(),
            BlobRecord {
                header_offset,
                data_offset,
                size,
                crc32,
            },
        );
        self.cd_offset = data_offset + len;
        self.rewrite_tail()
    }

    /// Store an in-memory blob.
    pub fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut cursor = io::Cursor::new(data);
        self.add_blob(name, &mut cursor, data.len() as u64)
    }

    /// De-index a blob. The payload bytes stay in the file.
    pub fn remove_blob(&mut self, name: &str) -> Result<()> {
        if self.entries.remove(name).is_none() {
            return Err(CofferError::NotFound(name.to_string()));
        }
        self.rewrite_tail()
    }

    /// Read an entire blob into memory, verifying its checksum.
    pub fn read_blob(&mut self, name: &str) -> Result<Vec<u8>> {
        let record = self
            .entries
            .get(name)
            .ok_or_else(|| CofferError::NotFound(name.to_string()))?
            .clone();
        self.file.seek(SeekFrom::Start(record.data_offset))?;
        let mut data = vec![0u8; record.size as usize];
        self.file.read_exact(&mut data)?;

        let computed = crc32fast::hash(&data);
        if computed != record.crc32 {
            return Err(CofferError::CorruptArchive(format!(
                "checksum mismatch for blob {}",
                name
            )));
        }
        Ok(data)
    }

    /// Positioned reader over one blob's payload, for streaming consumers.
    pub fn blob_reader(&self, name: &str) -> Result<io::Take<File>> {
        let record = self
            .entries
            .get(name)
            .ok_or_else(|| CofferError::NotFound(name.to_string()))?;
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(record.data_offset))?;
        Ok(file.take(record.size as u64))
    }

    /// Rewrite the central directory and end record at the current
    /// `cd_offset` and truncate the file behind them.
    fn rewrite_tail(&mut self) -> Result<()> {
        let cd_offset = u32::try_from(self.cd_offset).map_err(|_| {
            CofferError::InvalidOperation("envelope exceeds the 4 GiB limit".to_string())
        })?;

        // Central directory entries go out in physical blob order.
        let mut records: Vec<(&String, &BlobRecord)> = self.entries.iter().collect();
        records.sort_by_key(|(_, r)| r.header_offset);

        self.file.seek(SeekFrom::Start(self.cd_offset))?;
        let mut cd_size = 0u64;
        for (name, record) in records {
            let entry = CentralEntry {
                crc32: record.crc32,
                size: record.size,
                name: name.clone(),
                header_offset: record.header_offset as u32,
            };
            entry.write_to(&mut self.file)?;
            cd_size += entry.byte_len();
        }

        let end = EndRecord {
            entry_count: self.entries.len() as u16,
            central_directory_size: cd_size as u32,
            central_directory_offset: cd_offset,
            comment: self.comment.clone(),
        };
        end.write_to(&mut self.file)?;

        let tail = self.cd_offset + cd_size + END_RECORD_SIZE + self.comment.len() as u64;
        self.file.set_len(tail)?;
        self.file.flush()?;
        Ok(())
    }

    /// Locate the end record, then index the central directory.
    fn read_tail(&mut self) -> Result<()> {
        let file_len = self.file.metadata()?.len();
        if file_len < END_RECORD_SIZE {
            return Err(CofferError::InvalidFormat(
                "file is too short to be an envelope".to_string(),
            ));
        }

        let scan_len = file_len.min(END_RECORD_SCAN);
        let scan_start = file_len - scan_len;
        self.file.seek(SeekFrom::Start(scan_start))?;
        let mut tail = vec![0u8; scan_len as usize];
        self.file.read_exact(&mut tail)?;

        let signature = super::format::END_RECORD_SIGNATURE.to_le_bytes();
        let end_pos = tail
            .windows(4)
            .rposition(|w| w == signature)
            .ok_or_else(|| CofferError::InvalidFormat("end record not found".to_string()))?;
        let end = EndRecord::read_from(&mut io::Cursor::new(&tail[end_pos..]))?;

        self.cd_offset = end.central_directory_offset as u64;
        self.comment = end.comment;

        self.file.seek(SeekFrom::Start(self.cd_offset))?;
        let mut entries = BTreeMap::new();
        for _ in 0..end.entry_count {
            let entry = CentralEntry::read_from(&mut self.file)?;
            let header_offset = entry.header_offset as u64;
            // Recover the data offset from the local header, which is
            // authoritative about the name length actually written.
            let data_offset =
                header_offset + super::format::LOCAL_HEADER_SIZE + entry.name.len() as u64;
            entries.insert(
                entry.name.clone(),
                BlobRecord {
                    header_offset,
                    data_offset,
                    size: entry.size,
                    crc32: entry.crc32,
                },
            );
        }
        self.entries = entries;
        Ok(())
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn lock_exclusive(file: &File, path: &Path) -> Result<()> {
    file.try_lock_exclusive()
        .map_err(|_| CofferError::ArchiveLocked(path.display().to_string()))
}
