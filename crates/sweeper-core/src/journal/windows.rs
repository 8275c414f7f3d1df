extern crate winapi;

use std::ffi::OsString;
use std::io;
use std::mem;
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;
use std::ptr;

use tracing::{debug, trace};
use winapi::shared::minwindef::{DWORD, LPVOID};
use winapi::um::fileapi::{CreateFileW, GetFinalPathNameByHandleW, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::DeviceIoControl;
use winapi::um::winbase::FILE_FLAG_BACKUP_SEMANTICS;
use winapi::um::winnt::{FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, GENERIC_READ, HANDLE};

use super::reader::{JournalInfo, JournalSource};
use super::record::ReasonFlags;
use crate::error::{Error, Result};
use crate::platform;

const FSCTL_QUERY_USN_JOURNAL: DWORD = 0x0009_00F4;
const FSCTL_READ_USN_JOURNAL: DWORD = 0x0009_00BB;
const FILE_ID_TYPE: DWORD = 0;

#[repr(C)]
#[derive(Default)]
struct UsnJournalDataV0 {
    usn_journal_id: u64,
    first_usn: i64,
    next_usn: i64,
    lowest_valid_usn: i64,
    max_usn: i64,
    maximum_size: u64,
    allocation_delta: u64,
}

#[repr(C)]
struct ReadUsnJournalDataV0 {
    start_usn: i64,
    reason_mask: DWORD,
    return_only_on_close: DWORD,
    timeout: u64,
    bytes_to_wait_for: u64,
    usn_journal_id: u64,
}

/// `FILE_ID_DESCRIPTOR` with the 64-bit file id arm of its union; the trailing
/// padding keeps the size equal to the 128-bit arm.
#[repr(C)]
struct FileIdDescriptor {
    dw_size: DWORD,
    id_type: DWORD,
    file_id: u64,
    _pad: u64,
}

#[link(name = "kernel32")]
extern "system" {
    fn OpenFileById(
        volume_hint: HANDLE,
        file_id: *const FileIdDescriptor,
        desired_access: DWORD,
        share_mode: DWORD,
        security_attributes: LPVOID,
        flags_and_attributes: DWORD,
    ) -> HANDLE;
}

/// Owned Win32 handle, closed on drop.
struct OwnedHandle(HANDLE);

// The handle is only ever used from the reader thread that owns the source.
unsafe impl Send for OwnedHandle {}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// Change journal of one NTFS volume, read through `DeviceIoControl`.
pub struct VolumeJournal {
    volume: OwnedHandle,
    device_path: String,
    buffer: Vec<u8>,
}

impl VolumeJournal {
    /// Open `\\.\X:` for reading. Requires administrator rights.
    pub fn open(letter: char, buffer_bytes: usize) -> Result<Self> {
        let device_path = platform::volume_device_path(letter);
        let wide: Vec<u16> = std::ffi::OsStr::new(&device_path)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null_mut(),
                OPEN_EXISTING,
                0,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE || handle.is_null() {
            return Err(Error::VolumeOpen {
                volume: device_path,
                source: io::Error::last_os_error(),
            });
        }
        debug!("Opened volume handle for {}", device_path);

        Ok(Self {
            volume: OwnedHandle(handle),
            device_path,
            buffer: vec![0u8; buffer_bytes.max(4096)],
        })
    }
}

impl JournalSource for VolumeJournal {
    fn query_journal(&mut self) -> Result<JournalInfo> {
        let mut data = UsnJournalDataV0::default();
        let mut returned: DWORD = 0;
        let ok = unsafe {
            DeviceIoControl(
                self.volume.0,
                FSCTL_QUERY_USN_JOURNAL,
                ptr::null_mut(),
                0,
                &mut data as *mut UsnJournalDataV0 as LPVOID,
                mem::size_of::<UsnJournalDataV0>() as DWORD,
                &mut returned,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(Error::VolumeOpen {
                volume: self.device_path.clone(),
                source: io::Error::last_os_error(),
            });
        }
        trace!(
            "Journal lowest valid usn {}, max usn {}, size {}",
            data.lowest_valid_usn,
            data.max_usn,
            data.maximum_size
        );
        Ok(JournalInfo {
            journal_id: data.usn_journal_id,
            first_usn: data.first_usn.max(0) as u64,
            next_usn: data.next_usn.max(0) as u64,
        })
    }

    fn read_journal(
        &mut self,
        start_cursor: u64,
        reason_mask: ReasonFlags,
        journal_id: u64,
    ) -> Result<Vec<u8>> {
        let mut request = ReadUsnJournalDataV0 {
            start_usn: start_cursor as i64,
            reason_mask: reason_mask.bits(),
            return_only_on_close: 0,
            timeout: 0,
            bytes_to_wait_for: 0,
            usn_journal_id: journal_id,
        };
        let mut returned: DWORD = 0;
        let ok = unsafe {
            DeviceIoControl(
                self.volume.0,
                FSCTL_READ_USN_JOURNAL,
                &mut request as *mut ReadUsnJournalDataV0 as LPVOID,
                mem::size_of::<ReadUsnJournalDataV0>() as DWORD,
                self.buffer.as_mut_ptr() as LPVOID,
                self.buffer.len() as DWORD,
                &mut returned,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(self.buffer[..returned as usize].to_vec())
    }

    fn resolve_directory(&mut self, reference: u64) -> Option<PathBuf> {
        let descriptor = FileIdDescriptor {
            dw_size: mem::size_of::<FileIdDescriptor>() as DWORD,
            id_type: FILE_ID_TYPE,
            file_id: reference,
            _pad: 0,
        };
        let handle = unsafe {
            OpenFileById(
                self.volume.0,
                &descriptor,
                0,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                ptr::null_mut(),
                FILE_FLAG_BACKUP_SEMANTICS,
            )
        };
        if handle == INVALID_HANDLE_VALUE || handle.is_null() {
            trace!("Could not open file id {:#x}", reference);
            return None;
        }
        let handle = OwnedHandle(handle);

        let mut wide = vec![0u16; 1024];
        loop {
            let len = unsafe {
                GetFinalPathNameByHandleW(handle.0, wide.as_mut_ptr(), wide.len() as DWORD, 0)
            } as usize;
            if len == 0 {
                return None;
            }
            if len < wide.len() {
                let path = PathBuf::from(OsString::from_wide(&wide[..len]));
                return Some(platform::strip_verbatim_prefix(&path));
            }
            // Too small; `len` is the required size including the terminator.
            wide.resize(len + 1, 0);
        }
    }
}
