/*!
Production [`NativeApi`] backed by ntdll and the documented OS surface.

The undocumented entry points are resolved exactly once when the context
is constructed; a missing export fails construction instead of surfacing
mid-operation. Every handle is wrapped in [`OwnedHandle`] and released on
drop, error paths included.
*/

use std::ffi::c_void;
use std::mem;
use std::ptr;

use log::warn;

use widestring::U16Str;

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE, LUID, MAX_PATH};
use windows_sys::Win32::Security::{
    AdjustTokenPrivileges, LookupPrivilegeValueW, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED,
    TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
};
use windows_sys::Win32::Storage::FileSystem::{GetLogicalDriveStringsW, QueryDosDeviceW};
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows_sys::Win32::System::Threading::{
    GetCurrentProcess, GetPriorityClass, GetThreadPriority, OpenProcess, OpenProcessToken,
    OpenThread, ResumeThread, SuspendThread, TerminateProcess,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SUSPEND_RESUME, PROCESS_TERMINATE,
    THREAD_QUERY_INFORMATION, THREAD_QUERY_LIMITED_INFORMATION, THREAD_SUSPEND_RESUME,
};

use crate::error::{Error, Result};
use crate::kernel::api::{NativeApi, QueryOutcome};
use crate::kernel::status::{NtStatus, STATUS_INFO_LENGTH_MISMATCH};
use crate::kernel::{
    SYSTEM_PROCESS_ID_INFORMATION_CLASS, SYSTEM_PROCESS_INFORMATION_CLASS,
    THREAD_QUERY_SET_WIN32_START_ADDRESS,
};
use crate::path::DriveMapping;
use crate::types::{Address, Pid, Tid};

/// `GetThreadPriority` failure marker.
const THREAD_PRIORITY_ERROR: i32 = 0x7fff_ffff;

type NtQuerySystemInformationFn =
    unsafe extern "system" fn(u32, *mut c_void, u32, *mut u32) -> i32;
type NtQueryInformationThreadFn =
    unsafe extern "system" fn(HANDLE, u32, *mut c_void, u32, *mut u32) -> i32;
type NtProcessControlFn = unsafe extern "system" fn(HANDLE) -> i32;

/// Native counted-string descriptor as passed to the live kernel.
#[repr(C)]
struct NativeUnicodeString {
    length: u16,
    maximum_length: u16,
    buffer: *mut u16,
}

/// In/out parameter block of the per-PID image path query.
#[repr(C)]
struct SystemProcessIdInformation {
    process_id: HANDLE,
    image_name: NativeUnicodeString,
}

/// A process, thread or token handle released on every exit path.
pub(crate) struct OwnedHandle(HANDLE);

impl OwnedHandle {
    pub fn open_process(access: u32, pid: Pid) -> Result<Self> {
        let handle = unsafe { OpenProcess(access, 0, pid) };
        if handle == 0 {
            Err(Error::Os(unsafe { GetLastError() }))
        } else {
            Ok(Self(handle))
        }
    }

    pub fn open_thread(access: u32, tid: Tid) -> Result<Self> {
        let handle = unsafe { OpenThread(access, 0, tid) };
        if handle == 0 {
            Err(Error::Os(unsafe { GetLastError() }))
        } else {
            Ok(Self(handle))
        }
    }

    pub fn from_raw(handle: HANDLE) -> Self {
        Self(handle)
    }

    pub fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

/// The resolved native entry points, constructed once at startup and
/// passed by reference into everything that queries the system.
pub struct NtdllApi {
    nt_query_system_information: NtQuerySystemInformationFn,
    nt_query_information_thread: NtQueryInformationThreadFn,
    nt_suspend_process: NtProcessControlFn,
    nt_resume_process: NtProcessControlFn,
}

fn resolve(
    module: windows_sys::Win32::Foundation::HMODULE,
    name: &'static [u8],
    display: &'static str,
) -> Result<unsafe extern "system" fn() -> isize> {
    unsafe { GetProcAddress(module, name.as_ptr()) }.ok_or(Error::Resolution(display))
}

impl NtdllApi {
    /// Resolves every required entry point, failing fast on the first
    /// missing one.
    pub fn new() -> Result<Self> {
        let wide: Vec<u16> = "ntdll.dll\0".encode_utf16().collect();
        let ntdll = unsafe { GetModuleHandleW(wide.as_ptr()) };
        if ntdll == 0 {
            return Err(Error::Resolution("ntdll.dll"));
        }

        unsafe {
            Ok(Self {
                nt_query_system_information: mem::transmute(resolve(
                    ntdll,
                    b"NtQuerySystemInformation\0",
                    "NtQuerySystemInformation",
                )?),
                nt_query_information_thread: mem::transmute(resolve(
                    ntdll,
                    b"NtQueryInformationThread\0",
                    "NtQueryInformationThread",
                )?),
                nt_suspend_process: mem::transmute(resolve(
                    ntdll,
                    b"NtSuspendProcess\0",
                    "NtSuspendProcess",
                )?),
                nt_resume_process: mem::transmute(resolve(
                    ntdll,
                    b"NtResumeProcess\0",
                    "NtResumeProcess",
                )?),
            })
        }
    }
}

impl NativeApi for NtdllApi {
    fn query_process_snapshot(&self, buf: &mut [u8]) -> QueryOutcome {
        let mut return_length = 0u32;
        let status = NtStatus(unsafe {
            (self.nt_query_system_information)(
                SYSTEM_PROCESS_INFORMATION_CLASS,
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as u32,
                &mut return_length,
            )
        });

        if status == STATUS_INFO_LENGTH_MISMATCH {
            QueryOutcome::TooSmall(return_length as usize)
        } else if status.is_success() {
            let used = if return_length == 0 {
                buf.len()
            } else {
                return_length as usize
            };
            QueryOutcome::Complete(used.min(buf.len()))
        } else {
            QueryOutcome::Failed(status)
        }
    }

    fn query_image_path(&self, pid: Pid, buf: &mut [u16]) -> Result<usize> {
        let max_bytes = (buf.len() * 2).min(u16::MAX as usize) as u16;
        let mut info = SystemProcessIdInformation {
            process_id: pid as HANDLE,
            image_name: NativeUnicodeString {
                length: 0,
                maximum_length: max_bytes,
                buffer: buf.as_mut_ptr(),
            },
        };

        let status = NtStatus(unsafe {
            (self.nt_query_system_information)(
                SYSTEM_PROCESS_ID_INFORMATION_CLASS,
                &mut info as *mut _ as *mut c_void,
                mem::size_of::<SystemProcessIdInformation>() as u32,
                ptr::null_mut(),
            )
        });
        if !status.is_success() {
            return Err(Error::Query(status));
        }

        // length is in bytes; the kernel truncates to maximum_length itself
        let units = (info.image_name.length / 2) as usize;
        if units == 0 {
            return Err(Error::NotFound);
        }
        Ok(units.min(buf.len()))
    }

    fn query_thread_start_address(&self, tid: Tid) -> Option<Address> {
        let thread = OwnedHandle::open_thread(THREAD_QUERY_INFORMATION, tid).ok()?;

        let mut addr: usize = 0;
        let status = NtStatus(unsafe {
            (self.nt_query_information_thread)(
                thread.raw(),
                THREAD_QUERY_SET_WIN32_START_ADDRESS,
                &mut addr as *mut usize as *mut c_void,
                mem::size_of::<usize>() as u32,
                ptr::null_mut(),
            )
        });

        if status.is_success() && addr != 0 {
            Some(Address::from(addr as u64))
        } else {
            None
        }
    }

    fn drive_mappings(&self) -> Vec<DriveMapping> {
        let mut drives = [0u16; 512];
        let len = unsafe { GetLogicalDriveStringsW(drives.len() as u32, drives.as_mut_ptr()) };
        let len = len as usize;
        if len == 0 || len > drives.len() {
            warn!("unable to enumerate logical drives, error {}", unsafe {
                GetLastError()
            });
            return Vec::new();
        }

        let mut mappings = Vec::new();
        for root in drives[..len].split(|&c| c == 0) {
            if root.is_empty() {
                continue;
            }
            // entries look like "C:\"; the device query wants "C:"
            let letter = U16Str::from_slice(root)
                .to_string_lossy()
                .trim_end_matches('\\')
                .to_string();
            let query: Vec<u16> = letter.encode_utf16().chain(Some(0)).collect();

            let mut target = [0u16; MAX_PATH as usize];
            let written =
                unsafe { QueryDosDeviceW(query.as_ptr(), target.as_mut_ptr(), target.len() as u32) };
            if written == 0 {
                continue;
            }
            let end = target.iter().position(|&c| c == 0).unwrap_or(target.len());
            mappings.push(DriveMapping {
                letter,
                device: U16Str::from_slice(&target[..end]).to_string_lossy(),
            });
        }
        mappings
    }

    fn suspend_process(&self, pid: Pid) -> Result<()> {
        let process = OwnedHandle::open_process(PROCESS_SUSPEND_RESUME, pid)?;
        let status = NtStatus(unsafe { (self.nt_suspend_process)(process.raw()) });
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Query(status))
        }
    }

    fn resume_process(&self, pid: Pid) -> Result<()> {
        let process = OwnedHandle::open_process(PROCESS_SUSPEND_RESUME, pid)?;
        let status = NtStatus(unsafe { (self.nt_resume_process)(process.raw()) });
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Query(status))
        }
    }

    fn terminate_process(&self, pid: Pid, exit_code: u32) -> Result<()> {
        let process = OwnedHandle::open_process(PROCESS_TERMINATE, pid)?;
        if unsafe { TerminateProcess(process.raw(), exit_code) } == 0 {
            Err(Error::Os(unsafe { GetLastError() }))
        } else {
            Ok(())
        }
    }

    fn suspend_thread(&self, tid: Tid) -> Result<u32> {
        let thread = OwnedHandle::open_thread(THREAD_SUSPEND_RESUME, tid)?;
        let previous = unsafe { SuspendThread(thread.raw()) };
        if previous == u32::MAX {
            Err(Error::Os(unsafe { GetLastError() }))
        } else {
            Ok(previous)
        }
    }

    fn resume_thread(&self, tid: Tid) -> Result<u32> {
        let thread = OwnedHandle::open_thread(THREAD_SUSPEND_RESUME, tid)?;
        let previous = unsafe { ResumeThread(thread.raw()) };
        if previous == u32::MAX {
            Err(Error::Os(unsafe { GetLastError() }))
        } else {
            Ok(previous)
        }
    }

    fn process_priority(&self, pid: Pid) -> Result<u32> {
        let process = OwnedHandle::open_process(PROCESS_QUERY_LIMITED_INFORMATION, pid)?;
        let priority = unsafe { GetPriorityClass(process.raw()) };
        if priority == 0 {
            Err(Error::Os(unsafe { GetLastError() }))
        } else {
            Ok(priority)
        }
    }

    fn thread_priority(&self, tid: Tid) -> Result<i32> {
        let thread = OwnedHandle::open_thread(THREAD_QUERY_LIMITED_INFORMATION, tid)?;
        let priority = unsafe { GetThreadPriority(thread.raw()) };
        if priority == THREAD_PRIORITY_ERROR {
            Err(Error::Os(unsafe { GetLastError() }))
        } else {
            Ok(priority)
        }
    }

    fn enable_debug_privilege(&self) -> Result<()> {
        let mut raw: HANDLE = 0;
        if unsafe {
            OpenProcessToken(
                GetCurrentProcess(),
                TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
                &mut raw,
            )
        } == 0
        {
            return Err(Error::Os(unsafe { GetLastError() }));
        }
        let token = OwnedHandle::from_raw(raw);

        let name: Vec<u16> = "SeDebugPrivilege\0".encode_utf16().collect();
        let mut luid: LUID = unsafe { mem::zeroed() };
        if unsafe { LookupPrivilegeValueW(ptr::null(), name.as_ptr(), &mut luid) } == 0 {
            return Err(Error::Os(unsafe { GetLastError() }));
        }

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };
        if unsafe {
            AdjustTokenPrivileges(
                token.raw(),
                0,
                &privileges,
                mem::size_of::<TOKEN_PRIVILEGES>() as u32,
                ptr::null_mut(),
                ptr::null_mut(),
            )
        } == 0
        {
            return Err(Error::Os(unsafe { GetLastError() }));
        }
        Ok(())
    }
}
