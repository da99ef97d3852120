/*!
Address symbolication.

A [`SymbolBackend`] opens one [`SymbolSession`] per target process; the
session maps addresses to module and symbol information and releases its
resources when dropped. Formatting degrades gracefully: every resolution
failure falls through to a less specific rendering instead of erroring.
*/

#[cfg(windows)]
pub mod dbghelp;

#[cfg(windows)]
pub use dbghelp::DbgHelp;

use crate::error::Result;
use crate::types::{Address, Pid};

/// The module containing a resolved address.
#[derive(Clone, Debug)]
pub struct ModuleAt {
    /// Base file name of the module image.
    pub name: String,
    /// Load address of the module.
    pub base: Address,
}

/// A symbol containing a resolved address.
#[derive(Clone, Debug)]
pub struct SymbolAt {
    pub name: String,
    /// Byte distance from the symbol start to the queried address.
    pub displacement: u64,
}

/// A per-process resolution context.
///
/// Implementations release the underlying engine state on drop.
pub trait SymbolSession {
    /// Resolves the module covering `addr`, if any is known.
    fn module_at(&mut self, addr: Address) -> Option<ModuleAt>;

    /// Resolves the nearest symbol at or below `addr`, if any is known.
    fn symbol_at(&mut self, addr: Address) -> Option<SymbolAt>;
}

/// Factory for per-process symbol sessions.
pub trait SymbolBackend {
    type Session: SymbolSession;

    /// Opens a resolution session against a live process.
    ///
    /// Configured for on-demand module loading so that opening stays cheap
    /// for processes whose addresses all fail to resolve anyway.
    fn open_session(&self, pid: Pid) -> Result<Self::Session>;
}

/// Renders an address as the most specific available display string:
///
/// 1. `module!symbol+0xOFF` / `module!symbol`
/// 2. `symbol+0xOFF` / `symbol`
/// 3. `module+0xOFF`
/// 4. `0xADDRESS`
///
/// A null address renders as the empty string.
pub fn format_address<S: SymbolSession>(session: &mut S, addr: Address) -> String {
    if addr.is_null() {
        return String::new();
    }

    let module = session.module_at(addr);
    match session.symbol_at(addr) {
        Some(sym) => match module {
            Some(m) if sym.displacement > 0 => {
                format!("{}!{}+0x{:x}", m.name, sym.name, sym.displacement)
            }
            Some(m) => format!("{}!{}", m.name, sym.name),
            None if sym.displacement > 0 => format!("{}+0x{:x}", sym.name, sym.displacement),
            None => sym.name,
        },
        None => match module {
            Some(m) => format!("{}+0x{:x}", m.name, addr.displacement_from(m.base)),
            None => format!("0x{:x}", addr),
        },
    }
}

/// Renders an address without any resolution context (ladder step 4).
pub fn format_address_raw(addr: Address) -> String {
    if addr.is_null() {
        String::new()
    } else {
        format!("0x{:x}", addr)
    }
}

/// Strips the directory part off a module image path.
pub(crate) fn image_base_name(path: &str) -> &str {
    path.rsplit(|c| c == '\\' || c == '/').next().unwrap_or(path)
}
