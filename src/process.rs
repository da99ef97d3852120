/*!
Process-level operations: enumeration, target resolution and control.

Every operation captures a fresh snapshot or issues a fresh targeted
query. There is no cross-call cache, so state observed here can be stale
by the time a caller acts on it; pid reuse between resolution and action
is an accepted risk of best-effort process tooling.
*/

use std::fmt;

use log::debug;

use crate::error::{Error, Result};
use crate::kernel::NativeApi;
use crate::snapshot::{ProcessEntry, Snapshot};
use crate::types::Pid;

/// Decoded view of one process record.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct ProcessInfo {
    pub pid: Pid,
    /// Image name; `"Idle"`/`"System"` synthesized when the kernel
    /// supplies none.
    pub name: String,
    /// Whether every thread waits on an explicit suspend request.
    pub suspended: bool,
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (pid {})", self.name, self.pid)
    }
}

fn decode_entry(entry: &ProcessEntry<'_>) -> Result<ProcessInfo> {
    Ok(ProcessInfo {
        pid: entry.pid(),
        name: entry.name()?,
        suspended: entry.is_suspended()?,
    })
}

/// Returns all processes of a fresh snapshot.
pub fn process_list<A: NativeApi>(api: &A) -> Result<Vec<ProcessInfo>> {
    let snapshot = Snapshot::capture(api)?;
    let mut list = Vec::new();
    for entry in snapshot.processes() {
        list.push(decode_entry(&entry?)?);
    }
    debug!("decoded {} process records", list.len());
    Ok(list)
}

/// Checks whether the target process is suspended.
///
/// Uses the early-exit record lookup; records past the match are never
/// decoded.
pub fn is_suspended<A: NativeApi>(api: &A, pid: Pid) -> Result<bool> {
    let snapshot = Snapshot::capture(api)?;
    snapshot.find(pid)?.is_suspended()
}

/// A parsed process target: an exact pid or a process name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProcessSelector {
    Pid(Pid),
    /// Case-insensitive exact name; held lowercased.
    Name(String),
}

impl ProcessSelector {
    /// Parses a user-supplied target string.
    ///
    /// Input consisting solely of decimal digits is a pid; anything else,
    /// including digit strings too large for a pid, matches by name.
    /// Empty input resolves to nothing and fails accordingly.
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(Error::NotFound);
        }
        if input.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(pid) = input.parse::<Pid>() {
                return Ok(ProcessSelector::Pid(pid));
            }
        }
        Ok(ProcessSelector::Name(input.to_lowercase()))
    }

    fn matches(&self, info: &ProcessInfo) -> bool {
        match self {
            ProcessSelector::Pid(pid) => info.pid == *pid,
            ProcessSelector::Name(name) => info.name.to_lowercase() == *name,
        }
    }
}

/// Resolves a target string to every matching process of a fresh snapshot.
///
/// Process names are not unique system-wide; name targets return all
/// instances so that bulk operations affect every running copy.
pub fn resolve_targets<A: NativeApi>(api: &A, input: &str) -> Result<Vec<ProcessInfo>> {
    let selector = ProcessSelector::parse(input)?;

    let targets = process_list(api)?
        .into_iter()
        .filter(|info| selector.matches(info))
        .collect::<Vec<_>>();

    if targets.is_empty() {
        debug!("no process matched target '{}'", input);
        return Err(Error::NotFound);
    }
    Ok(targets)
}

/// Suspends every thread of the target process.
pub fn suspend<A: NativeApi>(api: &A, pid: Pid) -> Result<()> {
    debug!("suspending process {}", pid);
    api.suspend_process(pid)
}

/// Resumes every thread of the target process.
pub fn resume<A: NativeApi>(api: &A, pid: Pid) -> Result<()> {
    debug!("resuming process {}", pid);
    api.resume_process(pid)
}

/// Terminates the target process.
pub fn terminate<A: NativeApi>(api: &A, pid: Pid, exit_code: u32) -> Result<()> {
    debug!("terminating process {} with exit code {}", pid, exit_code);
    api.terminate_process(pid, exit_code)
}

/// Queries the priority class of the target process.
pub fn priority<A: NativeApi>(api: &A, pid: Pid) -> Result<u32> {
    api.process_priority(pid)
}

/// Enables the debug privilege on the current process token, raising
/// access to processes of other sessions and users.
pub fn enable_debug_privilege<A: NativeApi>(api: &A) -> Result<()> {
    api.enable_debug_privilege()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyProcess, DummySystem, DummyThread};

    fn system() -> DummySystem {
        let mut system = DummySystem::new();
        system.processes.push(DummyProcess::idle());
        system.processes.push(
            DummyProcess::new(1234, "notepad.exe").thread(DummyThread::running(1, 0x1000)),
        );
        system.processes.push(
            DummyProcess::new(2000, "NOTEPAD.EXE").thread(DummyThread::running(9, 0x1000)),
        );
        system.processes.push(
            DummyProcess::new(3000, "frozen.exe")
                .thread(DummyThread::suspended(31, 0x1000))
                .thread(DummyThread::suspended(32, 0x1000)),
        );
        system
            .processes
            .push(DummyProcess::new(4000, "1234").thread(DummyThread::running(41, 0x1000)));
        system
    }

    #[test]
    fn test_process_list() {
        let _ = simple_logger::SimpleLogger::new().init();

        let list = process_list(&system()).unwrap();
        assert_eq!(list.len(), 5);
        assert_eq!(list[0].pid, 0);
        assert_eq!(list[0].name, "Idle");
        assert!(!list[0].suspended);
        assert_eq!(list[1].name, "notepad.exe");
        assert!(list[3].suspended);
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(
            ProcessSelector::parse("1234").unwrap(),
            ProcessSelector::Pid(1234)
        );
        assert_eq!(
            ProcessSelector::parse("notepad.exe").unwrap(),
            ProcessSelector::Name("notepad.exe".to_string())
        );
        // digits that overflow a pid fall back to name matching
        assert_eq!(
            ProcessSelector::parse("99999999999999999999").unwrap(),
            ProcessSelector::Name("99999999999999999999".to_string())
        );
        assert_eq!(ProcessSelector::parse("").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn test_resolve_by_pid_ignores_names() {
        // a process is literally named "1234"; digits must match pid only
        let targets = resolve_targets(&system(), "1234").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].pid, 1234);
        assert_eq!(targets[0].name, "notepad.exe");
    }

    #[test]
    fn test_resolve_by_name_all_instances() {
        let targets = resolve_targets(&system(), "notepad.exe").unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].pid, 1234);
        assert_eq!(targets[1].pid, 2000);

        // and the match is case-insensitive both ways
        let targets = resolve_targets(&system(), "Notepad.EXE").unwrap();
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_resolve_not_found() {
        assert_eq!(
            resolve_targets(&system(), "missing.exe").unwrap_err(),
            Error::NotFound
        );
        assert_eq!(resolve_targets(&system(), "99999").unwrap_err(), Error::NotFound);
        assert_eq!(resolve_targets(&system(), "").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn test_is_suspended() {
        let system = system();
        assert!(!is_suspended(&system, 1234).unwrap());
        assert!(is_suspended(&system, 3000).unwrap());
        assert_eq!(is_suspended(&system, 99999).unwrap_err(), Error::NotFound);
    }

    #[test]
    fn test_control_ops_reach_api() {
        let system = system();
        enable_debug_privilege(&system).unwrap();
        suspend(&system, 1234).unwrap();
        resume(&system, 1234).unwrap();
        terminate(&system, 1234, 1).unwrap();
        assert_eq!(priority(&system, 1234).unwrap(), 0x20);
        assert_eq!(
            system.control_log(),
            vec![
                "enable debug privilege".to_string(),
                "suspend 1234".to_string(),
                "resume 1234".to_string(),
                "terminate 1234 code 1".to_string(),
            ]
        );
    }
}
