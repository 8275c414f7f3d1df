//! Decoding of `FSCTL_READ_USN_JOURNAL` output buffers.
//!
//! A buffer starts with the next cursor (u64 LE) followed by packed
//! `USN_RECORD_V2` entries:
//!
//! | offset | size | field                     |
//! |--------|------|---------------------------|
//! | 0      | 4    | RecordLength              |
//! | 4      | 2    | MajorVersion              |
//! | 6      | 2    | MinorVersion              |
//! | 8      | 8    | FileReferenceNumber       |
//! | 16     | 8    | ParentFileReferenceNumber |
//! | 24     | 8    | Usn                       |
//! | 32     | 8    | TimeStamp (FILETIME)      |
//! | 40     | 4    | Reason                    |
//! | 44     | 4    | SourceInfo                |
//! | 48     | 4    | SecurityId                |
//! | 52     | 4    | FileAttributes            |
//! | 56     | 2    | FileNameLength (bytes)    |
//! | 58     | 2    | FileNameOffset            |
//! | 60     | ..   | FileName (UTF-16LE)       |

use std::path::PathBuf;
use tracing::trace;

use super::record::{filetime_to_utc, ChangeRecord, FileAttributes, ReasonFlags};
use crate::error::{Error, Result};

pub const CURSOR_BYTES: usize = 8;
pub const MIN_RECORD_BYTES: usize = 60;
const SUPPORTED_MAJOR_VERSION: u16 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBuffer {
    /// Cursor reported by the journal for the next read.
    pub next_cursor: u64,
    pub records: Vec<ChangeRecord>,
    /// Records skipped because they were malformed or of an unsupported version.
    pub dropped: usize,
}

pub fn parse_buffer(buffer: &[u8]) -> Result<ParsedBuffer> {
    if buffer.len() < CURSOR_BYTES {
        return Err(Error::Journal(format!(
            "read buffer holds {} bytes, need at least {} for the cursor",
            buffer.len(),
            CURSOR_BYTES
        )));
    }

    let next_cursor = read_u64(buffer, 0);
    let mut records = Vec::new();
    let mut dropped = 0usize;
    let mut offset = CURSOR_BYTES;

    while offset + 4 <= buffer.len() {
        let record_length = read_u32(buffer, offset) as usize;
        if record_length == 0 {
            trace!("zero-length record at offset {}, stopping", offset);
            break;
        }
        let record_end = match offset.checked_add(record_length) {
            Some(end) if end <= buffer.len() => end,
            _ => {
                trace!(
                    "record at offset {} claims {} bytes past the buffer end, stopping",
                    offset,
                    record_length
                );
                break;
            }
        };

        match parse_record(&buffer[offset..record_end]) {
            Some(record) => records.push(record),
            None => dropped += 1,
        }
        offset = record_end;
    }

    Ok(ParsedBuffer {
        next_cursor,
        records,
        dropped,
    })
}

/// Decode one record slice; `None` when it has to be skipped.
fn parse_record(record: &[u8]) -> Option<ChangeRecord> {
    if record.len() < MIN_RECORD_BYTES {
        return None;
    }
    if read_u16(record, 4) != SUPPORTED_MAJOR_VERSION {
        return None;
    }

    let name_length = read_u16(record, 56) as usize;
    let name_offset = read_u16(record, 58) as usize;
    if name_length == 0 || name_length % 2 != 0 {
        return None;
    }
    let name_end = name_offset.checked_add(name_length)?;
    if name_offset < MIN_RECORD_BYTES || name_end > record.len() {
        return None;
    }

    let units: Vec<u16> = record[name_offset..name_end]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let file_name = String::from_utf16_lossy(&units);

    Some(ChangeRecord {
        usn: read_u64(record, 24),
        file_reference: read_u64(record, 8),
        parent_reference: read_u64(record, 16),
        full_path: PathBuf::from(&file_name),
        file_name,
        reason: ReasonFlags(read_u32(record, 40)),
        file_size_bytes: 0,
        timestamp: filetime_to_utc(read_u64(record, 32) as i64),
        attributes: FileAttributes(read_u32(record, 52)),
    })
}

// Callers guarantee the ranges below are in bounds.
fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Builders for synthetic journal buffers, shared by unit and integration tests.
pub mod testing {
    use super::{CURSOR_BYTES, MIN_RECORD_BYTES};

    #[derive(Debug, Clone)]
    pub struct RawRecord {
        pub usn: u64,
        pub file_reference: u64,
        pub parent_reference: u64,
        pub filetime: u64,
        pub reason: u32,
        pub attributes: u32,
        pub name: String,
    }

    impl RawRecord {
        pub fn new(usn: u64, name: &str, reason: u32) -> Self {
            Self {
                usn,
                file_reference: usn + 1_000,
                parent_reference: 5,
                filetime: 132_223_104_000_000_000,
                reason,
                attributes: 0x20,
                name: name.to_string(),
            }
        }

        pub fn with_parent(mut self, parent_reference: u64) -> Self {
            self.parent_reference = parent_reference;
            self
        }

        /// Encode as a `USN_RECORD_V2`, padded to an 8-byte boundary.
        pub fn encode(&self) -> Vec<u8> {
            let name: Vec<u8> = self
                .name
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect();
            let unpadded = MIN_RECORD_BYTES + name.len();
            let length = unpadded.div_ceil(8) * 8;

            let mut out = vec![0u8; length];
            out[0..4].copy_from_slice(&(length as u32).to_le_bytes());
            out[4..6].copy_from_slice(&2u16.to_le_bytes());
            out[8..16].copy_from_slice(&self.file_reference.to_le_bytes());
            out[16..24].copy_from_slice(&self.parent_reference.to_le_bytes());
            out[24..32].copy_from_slice(&self.usn.to_le_bytes());
            out[32..40].copy_from_slice(&self.filetime.to_le_bytes());
            out[40..44].copy_from_slice(&self.reason.to_le_bytes());
            out[52..56].copy_from_slice(&self.attributes.to_le_bytes());
            out[56..58].copy_from_slice(&(name.len() as u16).to_le_bytes());
            out[58..60].copy_from_slice(&(MIN_RECORD_BYTES as u16).to_le_bytes());
            out[MIN_RECORD_BYTES..MIN_RECORD_BYTES + name.len()].copy_from_slice(&name);
            out
        }
    }

    pub fn build_buffer(next_cursor: u64, records: &[RawRecord]) -> Vec<u8> {
        let mut out = Vec::with_capacity(CURSOR_BYTES + records.len() * 96);
        out.extend_from_slice(&next_cursor.to_le_bytes());
        for record in records {
            out.extend_from_slice(&record.encode());
        }
        out
    }
}
