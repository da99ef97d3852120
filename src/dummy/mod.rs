/*!
Deterministic fakes of the OS seams.

[`DummySystem`] stands in for [`NativeApi`] and [`DummySymbols`] for
[`SymbolBackend`]; both are driven entirely by data set up in tests or doc
examples. The snapshot encoder lays records out exactly the way the kernel
does, including the absolute name pointers into the caller's buffer, so
the walker exercises the same translation logic against fakes and the live
system.
*/

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use dataview::PodMethods;

use crate::error::{Error, Result};
use crate::kernel::{NativeApi, NtStatus, QueryOutcome};
use crate::path::DriveMapping;
use crate::snapshot::{SystemProcessInfo, SystemThreadInfo, PROCESS_INFO_SIZE, THREAD_INFO_SIZE};
use crate::symbol::{ModuleAt, SymbolAt, SymbolBackend, SymbolSession};
use crate::types::{size, Address, Pid, Tid};

/// One synthetic thread.
#[derive(Clone, Debug)]
pub struct DummyThread {
    pub tid: Tid,
    pub start_address: u64,
    pub thread_state: u32,
    pub wait_reason: u32,
    /// User-mode start address reported by the live per-thread query.
    pub win32_start_address: Option<u64>,
}

impl DummyThread {
    /// A runnable thread.
    pub fn running(tid: Tid, start_address: u64) -> Self {
        Self {
            tid,
            start_address,
            thread_state: 2,
            wait_reason: 0,
            win32_start_address: None,
        }
    }

    /// A thread waiting on an explicit suspend request.
    pub fn suspended(tid: Tid, start_address: u64) -> Self {
        Self {
            tid,
            start_address,
            thread_state: crate::kernel::THREAD_STATE_WAIT,
            wait_reason: crate::kernel::WAIT_REASON_SUSPENDED,
            win32_start_address: None,
        }
    }

    /// Sets the user-mode start address.
    pub fn win32_start(mut self, addr: u64) -> Self {
        self.win32_start_address = Some(addr);
        self
    }
}

/// One synthetic process.
#[derive(Clone, Debug)]
pub struct DummyProcess {
    pub pid: Pid,
    /// `None` renders a record without a kernel-supplied name.
    pub name: Option<String>,
    pub threads: Vec<DummyThread>,
    pub image_device_path: Option<String>,
}

impl DummyProcess {
    pub fn new(pid: Pid, name: &str) -> Self {
        Self {
            pid,
            name: Some(name.to_string()),
            threads: Vec::new(),
            image_device_path: None,
        }
    }

    /// The pid-0 idle record, which carries no name.
    pub fn idle() -> Self {
        Self {
            pid: 0,
            name: None,
            threads: Vec::new(),
            image_device_path: None,
        }
    }

    /// A nameless record other than pid 0.
    pub fn unnamed(pid: Pid) -> Self {
        Self {
            pid,
            name: None,
            threads: Vec::new(),
            image_device_path: None,
        }
    }

    /// Appends a thread.
    pub fn thread(mut self, thread: DummyThread) -> Self {
        self.threads.push(thread);
        self
    }

    /// Sets the kernel-namespace image path.
    pub fn image_path(mut self, path: &str) -> Self {
        self.image_device_path = Some(path.to_string());
        self
    }
}

/// Scriptable fake of the native OS surface.
pub struct DummySystem {
    pub processes: Vec<DummyProcess>,
    pub drives: Vec<DriveMapping>,
    /// Fails the snapshot query outright with this status.
    pub fail_status: Option<NtStatus>,
    /// Reports every snapshot buffer as too small, regardless of size.
    pub force_too_small: bool,
    /// Minimum snapshot buffer accepted, to force the regrow path.
    pub min_snapshot_buffer: usize,
    control: RefCell<Vec<String>>,
    suspend_counts: RefCell<HashMap<Tid, u32>>,
}

impl DummySystem {
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            drives: Vec::new(),
            fail_status: None,
            force_too_small: false,
            min_snapshot_buffer: 0,
            control: RefCell::new(Vec::new()),
            suspend_counts: RefCell::new(HashMap::new()),
        }
    }

    /// Control operations received so far, in order.
    pub fn control_log(&self) -> Vec<String> {
        self.control.borrow().clone()
    }

    fn find_process(&self, pid: Pid) -> Result<&DummyProcess> {
        self.processes
            .iter()
            .find(|p| p.pid == pid)
            .ok_or(Error::NotFound)
    }

    fn find_thread(&self, tid: Tid) -> Result<&DummyThread> {
        self.processes
            .iter()
            .flat_map(|p| p.threads.iter())
            .find(|t| t.tid == tid)
            .ok_or(Error::NotFound)
    }

    fn record_sizes(&self) -> (Vec<(usize, usize, usize)>, usize) {
        let align8 = |len: usize| (len + 7) & !7;

        let mut offsets = Vec::new();
        let mut total = 0usize;
        for (i, p) in self.processes.iter().enumerate() {
            let name_len = p
                .name
                .as_ref()
                .map(|n| n.encode_utf16().count() * 2)
                .unwrap_or(0);
            let body = PROCESS_INFO_SIZE + p.threads.len() * THREAD_INFO_SIZE;
            let record = if i + 1 == self.processes.len() {
                body + name_len
            } else {
                align8(body + name_len)
            };
            offsets.push((total, body, name_len));
            total += record;
        }
        (offsets, total)
    }
}

impl Default for DummySystem {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeApi for DummySystem {
    fn query_process_snapshot(&self, buf: &mut [u8]) -> QueryOutcome {
        if let Some(status) = self.fail_status {
            return QueryOutcome::Failed(status);
        }
        if self.force_too_small {
            return QueryOutcome::TooSmall(buf.len() + size::kb(64));
        }

        let (offsets, total) = self.record_sizes();
        let needed = total.max(self.min_snapshot_buffer);
        if buf.len() < needed {
            return QueryOutcome::TooSmall(needed);
        }

        let base = buf.as_ptr() as u64;
        for (i, p) in self.processes.iter().enumerate() {
            let (record_off, body, name_len) = offsets[i];

            let mut header = SystemProcessInfo::default();
            header.unique_process_id = p.pid as u64;
            header.number_of_threads = p.threads.len() as u32;
            header.next_entry_offset = if i + 1 == self.processes.len() {
                0
            } else {
                (offsets[i + 1].0 - record_off) as u32
            };
            if p.name.is_some() {
                header.image_name.length = name_len as u16;
                header.image_name.maximum_length = name_len as u16;
                header.image_name.buffer = base + (record_off + body) as u64;
            }
            buf[record_off..record_off + PROCESS_INFO_SIZE].copy_from_slice(header.as_bytes());

            for (j, t) in p.threads.iter().enumerate() {
                let mut info = SystemThreadInfo::default();
                info.client_id.unique_process = p.pid as u64;
                info.client_id.unique_thread = t.tid as u64;
                info.start_address = t.start_address;
                info.thread_state = t.thread_state;
                info.wait_reason = t.wait_reason;
                let off = record_off + PROCESS_INFO_SIZE + j * THREAD_INFO_SIZE;
                buf[off..off + THREAD_INFO_SIZE].copy_from_slice(info.as_bytes());
            }

            if let Some(name) = &p.name {
                let mut off = record_off + body;
                for unit in name.encode_utf16() {
                    buf[off..off + 2].copy_from_slice(&unit.to_le_bytes());
                    off += 2;
                }
            }
        }

        QueryOutcome::Complete(total)
    }

    fn query_image_path(&self, pid: Pid, buf: &mut [u16]) -> Result<usize> {
        let process = self.find_process(pid)?;
        let path = process.image_device_path.as_ref().ok_or(Error::NotFound)?;

        let mut written = 0;
        for unit in path.encode_utf16().take(buf.len()) {
            buf[written] = unit;
            written += 1;
        }
        Ok(written)
    }

    fn query_thread_start_address(&self, tid: Tid) -> Option<Address> {
        self.find_thread(tid)
            .ok()
            .and_then(|t| t.win32_start_address)
            .filter(|addr| *addr != 0)
            .map(Address::from)
    }

    fn drive_mappings(&self) -> Vec<DriveMapping> {
        self.drives.clone()
    }

    fn suspend_process(&self, pid: Pid) -> Result<()> {
        self.find_process(pid)?;
        self.control.borrow_mut().push(format!("suspend {}", pid));
        Ok(())
    }

    fn resume_process(&self, pid: Pid) -> Result<()> {
        self.find_process(pid)?;
        self.control.borrow_mut().push(format!("resume {}", pid));
        Ok(())
    }

    fn terminate_process(&self, pid: Pid, exit_code: u32) -> Result<()> {
        self.find_process(pid)?;
        self.control
            .borrow_mut()
            .push(format!("terminate {} code {}", pid, exit_code));
        Ok(())
    }

    fn suspend_thread(&self, tid: Tid) -> Result<u32> {
        self.find_thread(tid)?;
        self.control
            .borrow_mut()
            .push(format!("suspend thread {}", tid));
        let mut counts = self.suspend_counts.borrow_mut();
        let count = counts.entry(tid).or_insert(0);
        let previous = *count;
        *count += 1;
        Ok(previous)
    }

    fn resume_thread(&self, tid: Tid) -> Result<u32> {
        self.find_thread(tid)?;
        self.control
            .borrow_mut()
            .push(format!("resume thread {}", tid));
        let mut counts = self.suspend_counts.borrow_mut();
        let count = counts.entry(tid).or_insert(0);
        let previous = *count;
        if *count > 0 {
            *count -= 1;
        }
        Ok(previous)
    }

    fn process_priority(&self, pid: Pid) -> Result<u32> {
        self.find_process(pid)?;
        Ok(0x20)
    }

    fn thread_priority(&self, tid: Tid) -> Result<i32> {
        self.find_thread(tid)?;
        Ok(0)
    }

    fn enable_debug_privilege(&self) -> Result<()> {
        self.control
            .borrow_mut()
            .push("enable debug privilege".to_string());
        Ok(())
    }
}

/// Scriptable fake symbol backend.
pub struct DummySymbols {
    modules: Vec<(String, u64, u64)>,
    symbols: Vec<(u64, String)>,
    /// Makes every session open fail, exercising degraded formatting.
    pub fail_open: bool,
    opens: Cell<usize>,
}

impl DummySymbols {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            symbols: Vec::new(),
            fail_open: false,
            opens: Cell::new(0),
        }
    }

    /// Registers a module covering `[start, end]`.
    pub fn add_module(&mut self, name: &str, start: u64, end: u64) {
        self.modules.push((name.to_string(), start, end));
    }

    /// Registers a symbol starting at `addr`.
    pub fn add_symbol(&mut self, addr: u64, name: &str) {
        self.symbols.push((addr, name.to_string()));
    }

    /// Number of sessions opened so far.
    pub fn open_count(&self) -> usize {
        self.opens.get()
    }
}

impl Default for DummySymbols {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolBackend for DummySymbols {
    type Session = DummySymbolSession;

    fn open_session(&self, _pid: Pid) -> Result<Self::Session> {
        if self.fail_open {
            return Err(Error::Other("symbol session unavailable"));
        }
        self.opens.set(self.opens.get() + 1);
        Ok(DummySymbolSession {
            modules: self.modules.clone(),
            symbols: self.symbols.clone(),
        })
    }
}

pub struct DummySymbolSession {
    modules: Vec<(String, u64, u64)>,
    symbols: Vec<(u64, String)>,
}

impl SymbolSession for DummySymbolSession {
    fn module_at(&mut self, addr: Address) -> Option<ModuleAt> {
        let addr = addr.as_u64();
        self.modules
            .iter()
            .find(|(_, start, end)| addr >= *start && addr <= *end)
            .map(|(name, start, _)| ModuleAt {
                name: name.clone(),
                base: Address::from(*start),
            })
    }

    fn symbol_at(&mut self, addr: Address) -> Option<SymbolAt> {
        let addr = addr.as_u64();
        self.symbols
            .iter()
            .filter(|(start, _)| *start <= addr)
            .max_by_key(|(start, _)| *start)
            .map(|(start, name)| SymbolAt {
                name: name.clone(),
                displacement: addr - start,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;

    #[test]
    fn test_capture_regrows_once() {
        let mut system = DummySystem::new();
        system.processes.push(DummyProcess::new(10, "a.exe"));
        // larger than the initial snapshot guess, forcing one regrow
        system.min_snapshot_buffer = crate::snapshot::SNAPSHOT_INITIAL_SIZE * 2;

        let snapshot = Snapshot::capture(&system).unwrap();
        let entry = snapshot.find(10).unwrap();
        assert_eq!(entry.name().unwrap(), "a.exe");
    }

    #[test]
    fn test_capture_failure_propagates() {
        let mut system = DummySystem::new();
        system.fail_status = Some(NtStatus(0xC000_0022u32 as i32));
        assert_eq!(
            Snapshot::capture(&system).unwrap_err(),
            Error::Query(NtStatus(0xC000_0022u32 as i32))
        );
    }

    #[test]
    fn test_capture_double_too_small_fails() {
        let mut system = DummySystem::new();
        system.force_too_small = true;
        assert!(matches!(
            Snapshot::capture(&system).unwrap_err(),
            Error::Query(_)
        ));
    }

    #[test]
    fn test_unnamed_record_synthesizes_system() {
        let mut system = DummySystem::new();
        system.processes.push(DummyProcess::unnamed(4));

        let snapshot = Snapshot::capture(&system).unwrap();
        assert_eq!(snapshot.find(4).unwrap().name().unwrap(), "System");
    }
}
