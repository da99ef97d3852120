/*!
Thread-level operations: enumeration, start-address symbolication,
selection and control.
*/

use log::{debug, warn};

use regex::Regex;

use crate::error::{Error, Result};
use crate::kernel::NativeApi;
use crate::snapshot::Snapshot;
use crate::symbol::{self, SymbolBackend};
use crate::types::{Address, Pid, Tid};

/// Decoded view of one thread record.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct ThreadInfo {
    pub tid: Tid,
    /// Kernel-reported start address; always present in the snapshot.
    pub native_start_address: Address,
    /// User-mode ("Win32") start address from the live per-thread query;
    /// absent when the thread cannot be queried.
    pub win32_start_address: Option<Address>,
}

/// A thread id together with its formatted start address.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct ThreadAddrInfo {
    pub tid: Tid,
    /// Display string per the symbolication fallback ladder; empty for a
    /// null start address.
    pub start_address: String,
}

/// Enumerates the threads of the target process.
///
/// Native start addresses come from a fresh snapshot; the user-mode start
/// address is attempted per thread against the live system and missing
/// ones simply stay absent.
pub fn process_threads<A: NativeApi>(api: &A, pid: Pid) -> Result<Vec<ThreadInfo>> {
    let snapshot = Snapshot::capture(api)?;
    let entry = snapshot.find(pid)?;

    let threads = entry
        .threads()?
        .iter()
        .map(|t| {
            let tid = t.client_id.unique_thread as Tid;
            ThreadInfo {
                tid,
                native_start_address: Address::from(t.start_address),
                win32_start_address: api.query_thread_start_address(tid),
            }
        })
        .collect::<Vec<_>>();
    debug!("process {} has {} threads", pid, threads.len());
    Ok(threads)
}

enum SessionState<S> {
    Unopened,
    Open(S),
    Degraded,
}

/// Formats the start address of every thread of the target process.
///
/// The user-mode address is preferred over the native one when present
/// since it usually points at code a symbol engine recognizes. The symbol
/// session is opened lazily on the first non-null address and torn down
/// when this call returns; failing to open one degrades the rendering to
/// raw hex instead of failing the operation.
pub fn thread_start_addresses<A, B>(api: &A, symbols: &B, pid: Pid) -> Result<Vec<ThreadAddrInfo>>
where
    A: NativeApi,
    B: SymbolBackend,
{
    let threads = process_threads(api, pid)?;

    let mut session = SessionState::Unopened;
    let mut list = Vec::with_capacity(threads.len());
    for thread in threads {
        let preferred = thread
            .win32_start_address
            .unwrap_or(thread.native_start_address);

        let start_address = if preferred.is_null() {
            String::new()
        } else {
            if let SessionState::Unopened = session {
                session = match symbols.open_session(pid) {
                    Ok(opened) => SessionState::Open(opened),
                    Err(err) => {
                        warn!("unable to open symbol session for process {}: {}", pid, err);
                        SessionState::Degraded
                    }
                };
            }
            match &mut session {
                SessionState::Open(opened) => symbol::format_address(opened, preferred),
                _ => symbol::format_address_raw(preferred),
            }
        };

        list.push(ThreadAddrInfo {
            tid: thread.tid,
            start_address,
        });
    }

    Ok(list)
}

/// A parsed thread target: an exact tid or a pattern over formatted start
/// addresses.
///
/// The tagged parse replaces numeric-vs-pattern guessing; no failure mode
/// exists since any non-numeric input is a pattern.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ThreadSelector {
    Tid(Tid),
    Pattern(String),
}

impl ThreadSelector {
    pub fn parse(input: &str) -> Self {
        match input.parse::<Tid>() {
            Ok(tid) => ThreadSelector::Tid(tid),
            Err(_) => ThreadSelector::Pattern(input.to_string()),
        }
    }
}

/// Returns every tid whose formatted start address matches the pattern.
pub fn matching_threads(addrs: &[ThreadAddrInfo], pattern: &str) -> Result<Vec<Tid>> {
    let re = Regex::new(pattern).map_err(|err| {
        warn!("invalid thread pattern '{}': {}", pattern, err);
        Error::Other("invalid thread pattern")
    })?;

    Ok(addrs
        .iter()
        .filter(|a| re.is_match(&a.start_address))
        .map(|a| a.tid)
        .collect())
}

/// Suspends a single thread, returning the previous suspend count.
pub fn suspend<A: NativeApi>(api: &A, tid: Tid) -> Result<u32> {
    debug!("suspending thread {}", tid);
    api.suspend_thread(tid)
}

/// Resumes a single thread, returning the previous suspend count.
pub fn resume<A: NativeApi>(api: &A, tid: Tid) -> Result<u32> {
    debug!("resuming thread {}", tid);
    api.resume_thread(tid)
}

/// Queries the priority level of the target thread.
pub fn priority<A: NativeApi>(api: &A, tid: Tid) -> Result<i32> {
    api.thread_priority(tid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyProcess, DummySymbols, DummySystem, DummyThread};

    fn system() -> DummySystem {
        let mut system = DummySystem::new();
        system.processes.push(
            DummyProcess::new(500, "worker.exe")
                .thread(DummyThread::running(1, 0x7f10_0040).win32_start(0x7f20_0010))
                .thread(DummyThread::running(2, 0x7f10_0080))
                .thread(DummyThread::running(3, 0)),
        );
        system
    }

    fn symbols() -> DummySymbols {
        let mut symbols = DummySymbols::new();
        symbols.add_module("worker.exe", 0x7f10_0000, 0x7f1f_ffff);
        symbols.add_module("helper.dll", 0x7f20_0000, 0x7f2f_ffff);
        symbols.add_symbol(0x7f10_0080, "main");
        symbols.add_symbol(0x7f20_0000, "worker_entry");
        symbols
    }

    #[test]
    fn test_win32_address_preferred() {
        let threads = process_threads(&system(), 500).unwrap();
        assert_eq!(threads.len(), 3);
        assert_eq!(threads[0].win32_start_address, Some(Address::from(0x7f20_0010u64)));
        assert_eq!(threads[1].win32_start_address, None);

        let addrs = thread_start_addresses(&system(), &symbols(), 500).unwrap();
        // thread 1 formats its user-mode address, not the native one
        assert_eq!(addrs[0].start_address, "helper.dll!worker_entry+0x10");
        // thread 2 falls back to the native address
        assert_eq!(addrs[1].start_address, "worker.exe!main");
    }

    #[test]
    fn test_null_address_formats_empty() {
        let addrs = thread_start_addresses(&system(), &symbols(), 500).unwrap();
        assert_eq!(addrs[2].start_address, "");
    }

    #[test]
    fn test_session_opened_lazily() {
        let mut custom_system = DummySystem::new();
        custom_system
            .processes
            .push(DummyProcess::new(600, "null.exe").thread(DummyThread::running(1, 0)));

        let symbols = symbols();
        let addrs = thread_start_addresses(&custom_system, &symbols, 600).unwrap();
        assert_eq!(addrs[0].start_address, "");
        // every address was null, so no session was ever opened
        assert_eq!(symbols.open_count(), 0);

        let addrs = thread_start_addresses(&system(), &symbols, 500).unwrap();
        assert_eq!(addrs.len(), 3);
        assert_eq!(symbols.open_count(), 1);
    }

    #[test]
    fn test_degrades_to_raw_hex_without_session() {
        let mut symbols = symbols();
        symbols.fail_open = true;

        let addrs = thread_start_addresses(&system(), &symbols, 500).unwrap();
        assert_eq!(addrs[0].start_address, "0x7f200010");
        assert_eq!(addrs[1].start_address, "0x7f100080");
        assert_eq!(addrs[2].start_address, "");
    }

    #[test]
    fn test_missing_process() {
        assert_eq!(
            process_threads(&system(), 9999).unwrap_err(),
            Error::NotFound
        );
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(ThreadSelector::parse("42"), ThreadSelector::Tid(42));
        assert_eq!(
            ThreadSelector::parse("ntdll.*"),
            ThreadSelector::Pattern("ntdll.*".to_string())
        );
        assert_eq!(
            ThreadSelector::parse("12abc"),
            ThreadSelector::Pattern("12abc".to_string())
        );
    }

    #[test]
    fn test_matching_threads() {
        let addrs = thread_start_addresses(&system(), &symbols(), 500).unwrap();

        let tids = matching_threads(&addrs, r"worker\.exe!main").unwrap();
        assert_eq!(tids, vec![2]);

        let tids = matching_threads(&addrs, "worker").unwrap();
        assert_eq!(tids, vec![1, 2]);

        assert!(matching_threads(&addrs, "no_such_symbol").unwrap().is_empty());
        assert_eq!(
            matching_threads(&addrs, "(").unwrap_err(),
            Error::Other("invalid thread pattern")
        );
    }

    #[test]
    fn test_thread_control_reaches_api() {
        let system = system();
        assert_eq!(suspend(&system, 1).unwrap(), 0);
        assert_eq!(resume(&system, 1).unwrap(), 1);
        assert_eq!(
            system.control_log(),
            vec!["suspend thread 1".to_string(), "resume thread 1".to_string()]
        );
    }
}
