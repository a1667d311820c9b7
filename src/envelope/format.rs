//! On-disk record layout for the envelope.
//!
//! The envelope is a ZIP-structured blob store written with method 0 (STORE):
//! a sequence of local headers with payloads, followed by a central directory
//! and an end record. Every multi-byte field is little-endian, as the format
//! requires. Only the subset needed for a flat, uncompressed store is
//! implemented; there is no zip64 support, so offsets and sizes are capped at
//! u32 range.

use crate::error::{CofferError, Result};
use std::io::{Read, Write};

/// Local file header signature ("PK\x03\x04")
pub const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;

/// Central directory entry signature ("PK\x01\x02")
pub const CENTRAL_ENTRY_SIGNATURE: u32 = 0x0201_4b50;

/// End of central directory signature ("PK\x05\x06")
pub const END_RECORD_SIGNATURE: u32 = 0x0605_4b50;

/// Minimum feature version for STORE-only archives
pub const VERSION_NEEDED: u16 = 20;

/// Version-made-by: format 2.0, host 0 (MS-DOS attribute semantics)
pub const VERSION_MADE_BY: u16 = 20;

/// Fixed local header size, excluding the name
pub const LOCAL_HEADER_SIZE: u64 = 30;

/// Byte offset of the CRC field inside a local header
pub const LOCAL_HEADER_CRC_OFFSET: u64 = 14;

/// Fixed central directory entry size, excluding the name
pub const CENTRAL_ENTRY_SIZE: u64 = 46;

/// Fixed end record size, excluding the comment
pub const END_RECORD_SIZE: u64 = 22;

// Constant DOS timestamp (1980-01-01 00:00:00) so blob insertion times
// never leak through the unencrypted envelope.
pub const DOS_TIME: u16 = 0;
pub const DOS_DATE: u16 = 0x0021;

fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_u16<W: Write>(writer: &mut W, value: u16) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn read_name<R: Read>(reader: &mut R, len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|_| CofferError::InvalidFormat("blob name is not valid UTF-8".to_string()))
}

/// Local file header preceding each stored blob.
#[derive(Debug, Clone)]
pub struct LocalHeader {
    pub crc32: u32,
    pub size: u32,
    pub name: String,
}

impl LocalHeader {
    pub fn new(name: &str, size: u32, crc32: u32) -> Self {
        Self {
            crc32,
            size,
            name: name.to_string(),
        }
    }

    /// Total serialized length including the name.
    pub fn byte_len(&self) -> u64 {
        LOCAL_HEADER_SIZE + self.name.len() as u64
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_u32(writer, LOCAL_HEADER_SIGNATURE)?;
        write_u16(writer, VERSION_NEEDED)?;
        write_u16(writer, 0)?; // general purpose flags
        write_u16(writer, 0)?; // method: STORE
        write_u16(writer, DOS_TIME)?;
        write_u16(writer, DOS_DATE)?;
        write_u32(writer, self.crc32)?;
        write_u32(writer, self.size)?; // compressed size
        write_u32(writer, self.size)?; // uncompressed size
        write_u16(writer, self.name.len() as u16)?;
        write_u16(writer, 0)?; // extra field length
        writer.write_all(self.name.as_bytes())?;
        Ok(())
    }

    /// Read a local header. The signature must already be consumed and
    /// verified by the caller, or present at the current position.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let signature = read_u32(reader)?;
        if signature != LOCAL_HEADER_SIGNATURE {
            return Err(CofferError::InvalidFormat(format!(
                "bad local header signature: {:#010x}",
                signature
            )));
        }
        let _version_needed = read_u16(reader)?;
        let flags = read_u16(reader)?;
        if flags & 0x0008 != 0 {
            return Err(CofferError::InvalidFormat(
                "streamed data descriptors are not supported".to_string(),
            ));
        }
        let method = read_u16(reader)?;
        if method != 0 {
            return Err(CofferError::InvalidFormat(format!(
                "unsupported compression method {}",
                method
            )));
        }
        let _time = read_u16(reader)?;
        let _date = read_u16(reader)?;
        let crc32 = read_u32(reader)?;
        let compressed_size = read_u32(reader)?;
        let uncompressed_size = read_u32(reader)?;
        if compressed_size != uncompressed_size {
            return Err(CofferError::InvalidFormat(
                "stored blob sizes disagree".to_string(),
            ));
        }
        let name_len = read_u16(reader)? as usize;
        let extra_len = read_u16(reader)? as usize;
        let name = read_name(reader, name_len)?;
        if extra_len > 0 {
            let mut extra = vec![0u8; extra_len];
            reader.read_exact(&mut extra)?;
        }
        Ok(Self {
            crc32,
            size: compressed_size,
            name,
        })
    }
}

/// Central directory entry describing one stored blob.
#[derive(Debug, Clone)]
pub struct CentralEntry {
    pub crc32: u32,
    pub size: u32,
    pub name: String,
    pub header_offset: u32,
}

impl CentralEntry {
    /// Total serialized length including the name.
    pub fn byte_len(&self) -> u64 {
        CENTRAL_ENTRY_SIZE + self.name.len() as u64
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_u32(writer, CENTRAL_ENTRY_SIGNATURE)?;
        write_u16(writer, VERSION_MADE_BY)?;
        write_u16(writer, VERSION_NEEDED)?;
        write_u16(writer, 0)?; // general purpose flags
        write_u16(writer, 0)?; // method: STORE
        write_u16(writer, DOS_TIME)?;
        write_u16(writer, DOS_DATE)?;
        write_u32(writer, self.crc32)?;
        write_u32(writer, self.size)?; // compressed size
        write_u32(writer, self.size)?; // uncompressed size
        write_u16(writer, self.name.len() as u16)?;
        write_u16(writer, 0)?; // extra field length
        write_u16(writer, 0)?; // comment length
        write_u16(writer, 0)?; // disk number start
        write_u16(writer, 0)?; // internal attributes
        write_u32(writer, 0)?; // external attributes
        write_u32(writer, self.header_offset)?;
        writer.write_all(self.name.as_bytes())?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let signature = read_u32(reader)?;
        if signature != CENTRAL_ENTRY_SIGNATURE {
            return Err(CofferError::InvalidFormat(format!(
                "bad central directory signature: {:#010x}",
                signature
            )));
        }
        let _version_made_by = read_u16(reader)?;
        let _version_needed = read_u16(reader)?;
        let _flags = read_u16(reader)?;
        let method = read_u16(reader)?;
        if method != 0 {
            return Err(CofferError::InvalidFormat(format!(
                "unsupported compression method {}",
                method
            )));
        }
        let _time = read_u16(reader)?;
        let _date = read_u16(reader)?;
        let crc32 = read_u32(reader)?;
        let compressed_size = read_u32(reader)?;
        let _uncompressed_size = read_u32(reader)?;
        let name_len = read_u16(reader)? as usize;
        let extra_len = read_u16(reader)? as usize;
        let comment_len = read_u16(reader)? as usize;
        let _disk_start = read_u16(reader)?;
        let _internal_attrs = read_u16(reader)?;
        let _external_attrs = read_u32(reader)?;
        let header_offset = read_u32(reader)?;
        let name = read_name(reader, name_len)?;
        if extra_len + comment_len > 0 {
            let mut skip = vec![0u8; extra_len + comment_len];
            reader.read_exact(&mut skip)?;
        }
        Ok(Self {
            crc32,
            size: compressed_size,
            name,
            header_offset,
        })
    }
}

/// End of central directory record, carrying the envelope comment.
#[derive(Debug, Clone)]
pub struct EndRecord {
    pub entry_count: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment: Vec<u8>,
}

impl EndRecord {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_u32(writer, END_RECORD_SIGNATURE)?;
        write_u16(writer, 0)?; // this disk
        write_u16(writer, 0)?; // disk with central directory
        write_u16(writer, self.entry_count)?;
        write_u16(writer, self.entry_count)?;
        write_u32(writer, self.central_directory_size)?;
        write_u32(writer, self.central_directory_offset)?;
        write_u16(writer, self.comment.len() as u16)?;
        writer.write_all(&self.comment)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let signature = read_u32(reader)?;
        if signature != END_RECORD_SIGNATURE {
            return Err(CofferError::InvalidFormat(format!(
                "bad end record signature: {:#010x}",
                signature
            )));
        }
        let _this_disk = read_u16(reader)?;
        let _cd_disk = read_u16(reader)?;
        let entries_this_disk = read_u16(reader)?;
        let entry_count = read_u16(reader)?;
        if entries_this_disk != entry_count {
            return Err(CofferError::InvalidFormat(
                "multi-disk archives are not supported".to_string(),
            ));
        }
        let central_directory_size = read_u32(reader)?;
        let central_directory_offset = read_u32(reader)?;
        let comment_len = read_u16(reader)? as usize;
        let mut comment = vec![0u8; comment_len];
        reader.read_exact(&mut comment)?;
        Ok(Self {
            entry_count,
            central_directory_size,
            central_directory_offset,
            comment,
        })
    }
}
