use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// `USN_REASON_*` bits carried by a change record.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasonFlags(pub u32);

impl ReasonFlags {
    pub const DATA_OVERWRITE: Self = Self(0x0000_0001);
    pub const DATA_EXTEND: Self = Self(0x0000_0002);
    pub const DATA_TRUNCATION: Self = Self(0x0000_0004);
    pub const NAMED_DATA_OVERWRITE: Self = Self(0x0000_0010);
    pub const NAMED_DATA_EXTEND: Self = Self(0x0000_0020);
    pub const NAMED_DATA_TRUNCATION: Self = Self(0x0000_0040);
    pub const FILE_CREATE: Self = Self(0x0000_0100);
    pub const FILE_DELETE: Self = Self(0x0000_0200);
    pub const EA_CHANGE: Self = Self(0x0000_0400);
    pub const SECURITY_CHANGE: Self = Self(0x0000_0800);
    pub const RENAME_OLD_NAME: Self = Self(0x0000_1000);
    pub const RENAME_NEW_NAME: Self = Self(0x0000_2000);
    pub const INDEXABLE_CHANGE: Self = Self(0x0000_4000);
    pub const BASIC_INFO_CHANGE: Self = Self(0x0000_8000);
    pub const HARD_LINK_CHANGE: Self = Self(0x0001_0000);
    pub const COMPRESSION_CHANGE: Self = Self(0x0002_0000);
    pub const ENCRYPTION_CHANGE: Self = Self(0x0004_0000);
    pub const OBJECT_ID_CHANGE: Self = Self(0x0008_0000);
    pub const REPARSE_POINT_CHANGE: Self = Self(0x0010_0000);
    pub const STREAM_CHANGE: Self = Self(0x0020_0000);
    pub const CLOSE: Self = Self(0x8000_0000);

    /// Every reason; used as the read mask.
    pub const ALL: Self = Self(0xFFFF_FFFF);

    const NAMES: [(ReasonFlags, &'static str); 21] = [
        (Self::DATA_OVERWRITE, "DataOverwrite"),
        (Self::DATA_EXTEND, "DataExtend"),
        (Self::DATA_TRUNCATION, "DataTruncation"),
        (Self::NAMED_DATA_OVERWRITE, "NamedDataOverwrite"),
        (Self::NAMED_DATA_EXTEND, "NamedDataExtend"),
        (Self::NAMED_DATA_TRUNCATION, "NamedDataTruncation"),
        (Self::FILE_CREATE, "FileCreate"),
        (Self::FILE_DELETE, "FileDelete"),
        (Self::EA_CHANGE, "EaChange"),
        (Self::SECURITY_CHANGE, "SecurityChange"),
        (Self::RENAME_OLD_NAME, "RenameOldName"),
        (Self::RENAME_NEW_NAME, "RenameNewName"),
        (Self::INDEXABLE_CHANGE, "IndexableChange"),
        (Self::BASIC_INFO_CHANGE, "BasicInfoChange"),
        (Self::HARD_LINK_CHANGE, "HardLinkChange"),
        (Self::COMPRESSION_CHANGE, "CompressionChange"),
        (Self::ENCRYPTION_CHANGE, "EncryptionChange"),
        (Self::OBJECT_ID_CHANGE, "ObjectIdChange"),
        (Self::REPARSE_POINT_CHANGE, "ReparsePointChange"),
        (Self::STREAM_CHANGE, "StreamChange"),
        (Self::CLOSE, "Close"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for ReasonFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ReasonFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReasonFlags({})", self)
    }
}

impl fmt::Display for ReasonFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "None");
        }
        let mut first = true;
        let mut known = 0u32;
        for (flag, name) in Self::NAMES.iter() {
            if self.contains(*flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
                known |= flag.0;
            }
        }
        let unknown = self.0 & !known;
        if unknown != 0 {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{:#x}", unknown)?;
        }
        Ok(())
    }
}

/// `FILE_ATTRIBUTE_*` bits carried by a change record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileAttributes(pub u32);

impl FileAttributes {
    pub const READONLY: Self = Self(0x0000_0001);
    pub const HIDDEN: Self = Self(0x0000_0002);
    pub const SYSTEM: Self = Self(0x0000_0004);
    pub const DIRECTORY: Self = Self(0x0000_0010);
    pub const ARCHIVE: Self = Self(0x0000_0020);
    pub const TEMPORARY: Self = Self(0x0000_0100);
    pub const REPARSE_POINT: Self = Self(0x0000_0400);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_directory(self) -> bool {
        self.contains(Self::DIRECTORY)
    }
}

/// One parsed change-journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub usn: u64,
    pub file_reference: u64,
    pub parent_reference: u64,
    pub file_name: String,
    /// Filled in by the reader once the parent directory is resolved; until then
    /// (and when resolution fails) it holds only the file name.
    pub full_path: PathBuf,
    pub reason: ReasonFlags,
    pub file_size_bytes: u64,
    pub timestamp: DateTime<Utc>,
    pub attributes: FileAttributes,
}

impl ChangeRecord {
    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    /// Path as a lower-cased, forward-slash string for marker matching.
    pub fn normalized_path(&self) -> String {
        normalize_for_matching(&self.full_path.to_string_lossy())
    }
}

pub(crate) fn normalize_for_matching(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

/// Convert a Windows FILETIME (100ns ticks since 1601-01-01) to UTC.
pub fn filetime_to_utc(filetime: i64) -> DateTime<Utc> {
    const TICKS_PER_SECOND: i64 = 10_000_000;
    const EPOCH_DIFFERENCE_SECS: i64 = 11_644_473_600;

    let secs = filetime.div_euclid(TICKS_PER_SECOND) - EPOCH_DIFFERENCE_SECS;
    let nanos = (filetime.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
