//! NTFS change-journal reading: binary record parsing, the polling loop and
//! the native volume source.

pub mod parse;
pub mod reader;
pub mod record;
#[cfg(target_os = "windows")]
pub mod windows;

pub use parse::{parse_buffer, ParsedBuffer};
pub use reader::{JournalInfo, JournalReader, JournalSource, ReaderHandle, ReaderStats};
pub use record::{ChangeRecord, FileAttributes, ReasonFlags};

use crate::config::JournalConfig;
use crate::error::{Error, Result};
use crate::platform;

/// Open the change journal of a local volume ("C", "C:" or "C:\").
#[cfg(target_os = "windows")]
pub fn open_volume(volume: &str, config: &JournalConfig) -> Result<windows::VolumeJournal> {
    let letter = platform::normalize_volume(volume)
        .ok_or_else(|| Error::Other(format!("Invalid volume '{}'", volume)))?;
    windows::VolumeJournal::open(letter, config.read_buffer_bytes)
}

#[cfg(not(target_os = "windows"))]
pub fn open_volume(volume: &str, _config: &JournalConfig) -> Result<UnsupportedVolume> {
    let letter = platform::normalize_volume(volume)
        .ok_or_else(|| Error::Other(format!("Invalid volume '{}'", volume)))?;
    Err(Error::Unsupported(format!(
        "change journal of {} requires Windows",
        platform::volume_device_path(letter)
    )))
}

/// Placeholder source type for hosts without a change journal; never constructed.
#[cfg(not(target_os = "windows"))]
#[derive(Debug)]
pub enum UnsupportedVolume {}

#[cfg(not(target_os = "windows"))]
impl JournalSource for UnsupportedVolume {
    fn query_journal(&mut self) -> Result<JournalInfo> {
        match *self {}
    }

    fn read_journal(&mut self, _: u64, _: ReasonFlags, _: u64) -> Result<Vec<u8>> {
        match *self {}
    }
}

#[cfg(all(test, not(target_os = "windows")))]
mod tests {
    use super::*;

    #[test]
    fn test_open_volume_is_unsupported_off_windows() {
        let err = open_volume("C", &JournalConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_open_volume_rejects_bad_letter() {
        let err = open_volume("??", &JournalConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }
}
