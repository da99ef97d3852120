/*!
DbgHelp-backed symbolication.

One engine session per target process, initialized with deferred module
loading so opening stays cheap, torn down again when the session drops.
*/

use std::env;
use std::mem;
use std::ptr;
use std::slice;

use log::debug;

use widestring::U16Str;

use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::Diagnostics::Debug::{
    SymCleanup, SymFromAddrW, SymGetModuleInfoW64, SymInitializeW, SymSetOptions,
    IMAGEHLP_MODULEW64, SYMBOL_INFOW, SYMOPT_DEFERRED_LOADS, SYMOPT_UNDNAME,
};
use windows_sys::Win32::System::Threading::{PROCESS_QUERY_INFORMATION, PROCESS_VM_READ};

use crate::error::{Error, Result};
use crate::kernel::ntdll::OwnedHandle;
use crate::symbol::{image_base_name, ModuleAt, SymbolAt, SymbolBackend, SymbolSession};
use crate::types::{Address, Pid};

const MAX_SYM_NAME: usize = 2000;

const DEFAULT_SYMBOL_PATH: &str = r"srv*C:\Symbols*https://msdl.microsoft.com/download/symbols";

/// Symbol backend over the platform debug-help engine.
pub struct DbgHelp {
    symbol_path: Option<String>,
}

impl DbgHelp {
    pub fn new() -> Self {
        Self { symbol_path: None }
    }

    /// Uses a fixed symbol search path instead of the environment.
    pub fn with_symbol_path(path: &str) -> Self {
        Self {
            symbol_path: Some(path.to_string()),
        }
    }

    fn effective_symbol_path(&self) -> Option<String> {
        if let Some(path) = &self.symbol_path {
            return Some(path.clone());
        }
        // honor an operator-provided search path; otherwise point the
        // engine at the public symbol server
        if env::var_os("_NT_SYMBOL_PATH").is_some() {
            None
        } else {
            Some(DEFAULT_SYMBOL_PATH.to_string())
        }
    }
}

impl Default for DbgHelp {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolBackend for DbgHelp {
    type Session = DbgHelpSession;

    fn open_session(&self, pid: Pid) -> Result<DbgHelpSession> {
        let process = OwnedHandle::open_process(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, pid)?;

        unsafe { SymSetOptions(SYMOPT_UNDNAME | SYMOPT_DEFERRED_LOADS) };

        let path = self
            .effective_symbol_path()
            .map(|p| p.encode_utf16().chain(Some(0)).collect::<Vec<u16>>());
        let path_ptr = path.as_ref().map(|p| p.as_ptr()).unwrap_or(ptr::null());

        if unsafe { SymInitializeW(process.raw(), path_ptr, 1) } == 0 {
            return Err(Error::Os(unsafe { GetLastError() }));
        }
        debug!("opened symbol session for process {}", pid);
        Ok(DbgHelpSession { process })
    }
}

/// An initialized engine session scoped to one process handle.
pub struct DbgHelpSession {
    process: OwnedHandle,
}

impl SymbolSession for DbgHelpSession {
    fn module_at(&mut self, addr: Address) -> Option<ModuleAt> {
        let mut info: IMAGEHLP_MODULEW64 = unsafe { mem::zeroed() };
        info.SizeOfStruct = mem::size_of::<IMAGEHLP_MODULEW64>() as u32;

        if unsafe { SymGetModuleInfoW64(self.process.raw(), addr.as_u64(), &mut info) } == 0 {
            return None;
        }

        let image = wide_field(&info.ImageName);
        let name = if image.is_empty() {
            wide_field(&info.ModuleName)
        } else {
            image_base_name(&image).to_string()
        };
        if name.is_empty() {
            return None;
        }
        Some(ModuleAt {
            name,
            base: Address::from(info.BaseOfImage),
        })
    }

    fn symbol_at(&mut self, addr: Address) -> Option<SymbolAt> {
        // variable-length SYMBOL_INFOW with its trailing name buffer; u64
        // backing keeps the struct aligned
        let words = (mem::size_of::<SYMBOL_INFOW>() + MAX_SYM_NAME * 2 + 7) / 8;
        let mut buf = vec![0u64; words];
        let symbol = buf.as_mut_ptr() as *mut SYMBOL_INFOW;
        let mut displacement = 0u64;

        unsafe {
            (*symbol).SizeOfStruct = mem::size_of::<SYMBOL_INFOW>() as u32;
            (*symbol).MaxNameLen = MAX_SYM_NAME as u32;

            if SymFromAddrW(self.process.raw(), addr.as_u64(), &mut displacement, symbol) == 0 {
                return None;
            }

            let len = ((*symbol).NameLen as usize).min(MAX_SYM_NAME);
            let name_ptr = ptr::addr_of!((*symbol).Name) as *const u16;
            let name = U16Str::from_slice(slice::from_raw_parts(name_ptr, len)).to_string_lossy();
            if name.is_empty() {
                None
            } else {
                Some(SymbolAt { name, displacement })
            }
        }
    }
}

impl Drop for DbgHelpSession {
    fn drop(&mut self) {
        // engine state first; the process handle closes when the field drops
        unsafe {
            SymCleanup(self.process.raw());
        }
    }
}

fn wide_field(field: &[u16]) -> String {
    let len = field.iter().position(|&c| c == 0).unwrap_or(field.len());
    U16Str::from_slice(&field[..len]).to_string_lossy()
}
