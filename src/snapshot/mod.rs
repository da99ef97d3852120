/*!
Decoding of the chained process-record snapshot.

A [`Snapshot`] owns the raw byte arena returned by the all-process query.
Records are read through a bounds-checked view instead of pointer
arithmetic; the only embedded pointer (the image-name buffer) is
translated into an arena offset and validated before use.
*/

pub mod layout;

pub use layout::{SystemProcessInfo, SystemThreadInfo, PROCESS_INFO_SIZE, THREAD_INFO_SIZE};

use log::trace;

use dataview::DataView;
use widestring::U16Str;

use crate::error::{Error, Result};
use crate::kernel::{NativeApi, THREAD_STATE_WAIT, WAIT_REASON_SUSPENDED};
use crate::types::{size, Pid};

/// Initial buffer guess for the all-process query.
///
/// Generous enough that the regrow path stays the exception; a latency
/// tuning knob, not a correctness requirement.
pub const SNAPSHOT_INITIAL_SIZE: usize = size::mb(1);

/// Checks whether a thread array classifies its process as suspended.
///
/// True iff the array is non-empty and every thread waits due to an
/// explicit suspend request. A process with zero threads is never
/// suspended; that is policy, not an omission.
pub fn all_threads_suspended(threads: &[SystemThreadInfo]) -> bool {
    !threads.is_empty()
        && threads
            .iter()
            .all(|t| t.thread_state == THREAD_STATE_WAIT && t.wait_reason == WAIT_REASON_SUSPENDED)
}

/// One point-in-time view of all processes and threads.
///
/// Valid only for the duration of the call that captured it; every public
/// operation re-queries instead of sharing snapshots.
#[derive(Debug)]
pub struct Snapshot {
    data: Vec<u8>,
}

impl Snapshot {
    /// Captures a fresh snapshot through the given api.
    pub fn capture<A: NativeApi>(api: &A) -> Result<Self> {
        let data = crate::kernel::read_to_grown_buffer(SNAPSHOT_INITIAL_SIZE, |buf| {
            api.query_process_snapshot(buf)
        })?;
        trace!("captured snapshot of {} bytes", data.len());
        Ok(Self::from_raw(data))
    }

    /// Wraps an already-filled arena.
    ///
    /// The embedded name pointers must reference the arena's own
    /// allocation, which is where the kernel places them.
    pub fn from_raw(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Base address of the arena, used to translate embedded pointers.
    fn base(&self) -> u64 {
        self.data.as_ptr() as u64
    }

    /// Iterates over the process records of the snapshot.
    pub fn processes(&self) -> ProcessIter<'_> {
        ProcessIter {
            snapshot: self,
            offset: 0,
            done: self.data.is_empty(),
        }
    }

    /// Early-exit lookup of a single record by pid.
    ///
    /// Decodes no record past the match, so targeted queries do not pay
    /// for the rest of the chain.
    pub fn find(&self, pid: Pid) -> Result<ProcessEntry<'_>> {
        for entry in self.processes() {
            let entry = entry?;
            if entry.pid() == pid {
                return Ok(entry);
            }
        }
        Err(Error::NotFound)
    }
}

/// One process record inside a snapshot: the fixed header plus its inline
/// thread array.
#[derive(Debug)]
pub struct ProcessEntry<'a> {
    snapshot: &'a Snapshot,
    offset: usize,
    header: SystemProcessInfo,
}

impl<'a> ProcessEntry<'a> {
    /// The raw record header.
    pub fn header(&self) -> &SystemProcessInfo {
        &self.header
    }

    /// The process id, truncated from its pointer-width representation.
    pub fn pid(&self) -> Pid {
        self.header.unique_process_id as Pid
    }

    /// The image name.
    ///
    /// When the kernel supplies no name this synthesizes `"Idle"` for
    /// pid 0 and `"System"` otherwise.
    pub fn name(&self) -> Result<String> {
        let desc = &self.header.image_name;
        if desc.buffer == 0 || desc.length == 0 {
            return Ok(if self.pid() == 0 {
                "Idle".to_string()
            } else {
                "System".to_string()
            });
        }
        if desc.length % 2 != 0 {
            return Err(Error::Encoding);
        }

        let start = desc.buffer.wrapping_sub(self.snapshot.base());
        let end = start.checked_add(desc.length as u64).ok_or(Error::Bounds)?;
        if end > self.snapshot.data.len() as u64 {
            return Err(Error::Bounds);
        }

        let bytes = &self.snapshot.data[start as usize..end as usize];
        let units = bytes
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect::<Vec<_>>();
        Ok(U16Str::from_slice(&units).to_string_lossy())
    }

    /// The inline thread array of the record.
    ///
    /// Length always equals the header's declared thread count; an array
    /// that would run past the arena fails with `Bounds`.
    pub fn threads(&self) -> Result<Vec<SystemThreadInfo>> {
        let count = self.header.number_of_threads as usize;
        let start = self.offset.checked_add(PROCESS_INFO_SIZE).ok_or(Error::Bounds)?;
        let bytes = count.checked_mul(THREAD_INFO_SIZE).ok_or(Error::Bounds)?;
        let end = start.checked_add(bytes).ok_or(Error::Bounds)?;
        if end > self.snapshot.data.len() {
            return Err(Error::Bounds);
        }

        let view = DataView::from(&self.snapshot.data[..]);
        Ok((0..count)
            .map(|i| view.read::<SystemThreadInfo>(start + i * THREAD_INFO_SIZE))
            .collect())
    }

    /// Whether every thread of the record waits on an explicit suspend.
    pub fn is_suspended(&self) -> Result<bool> {
        Ok(all_threads_suspended(&self.threads()?))
    }
}

/// Iterator over the record chain of a snapshot.
///
/// Offsets advance strictly forward, so traversal is finite and bounded by
/// the arena length even for malformed chains; a record that does not fit
/// the remaining arena yields `Bounds` and ends the iteration.
pub struct ProcessIter<'a> {
    snapshot: &'a Snapshot,
    offset: usize,
    done: bool,
}

impl<'a> Iterator for ProcessIter<'a> {
    type Item = Result<ProcessEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let data = &self.snapshot.data;
        match self.offset.checked_add(PROCESS_INFO_SIZE) {
            Some(end) if end <= data.len() => {}
            _ => {
                self.done = true;
                return Some(Err(Error::Bounds));
            }
        }

        let header = DataView::from(&data[..]).read::<SystemProcessInfo>(self.offset);
        let entry = ProcessEntry {
            snapshot: self.snapshot,
            offset: self.offset,
            header,
        };

        if header.next_entry_offset == 0 {
            self.done = true;
        } else {
            // strictly forward; a lying offset is caught by the bounds
            // check on the next call
            self.offset = self.offset.saturating_add(header.next_entry_offset as usize);
        }

        Some(Ok(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dataview::PodMethods;

    pub(crate) struct RawThread {
        pub tid: u64,
        pub start_address: u64,
        pub thread_state: u32,
        pub wait_reason: u32,
    }

    pub(crate) struct RawProcess {
        pub pid: u64,
        pub name: Option<&'static str>,
        pub threads: Vec<RawThread>,
    }

    fn align8(len: usize) -> usize {
        (len + 7) & !7
    }

    /// Encodes records the way the kernel lays them out: header, inline
    /// thread array, name characters in the gap before the next record.
    pub(crate) fn build_snapshot(procs: &[RawProcess]) -> Snapshot {
        let mut offsets = Vec::new();
        let mut total = 0usize;
        for (i, p) in procs.iter().enumerate() {
            let name_len = p.name.map(|n| n.encode_utf16().count() * 2).unwrap_or(0);
            let body = PROCESS_INFO_SIZE + p.threads.len() * THREAD_INFO_SIZE;
            let record = if i + 1 == procs.len() {
                body + name_len
            } else {
                align8(body + name_len)
            };
            offsets.push((total, body, name_len));
            total += record;
        }

        let mut data = vec![0u8; total];
        let base = data.as_ptr() as u64;

        for (i, p) in procs.iter().enumerate() {
            let (record_off, body, name_len) = offsets[i];

            let mut header = SystemProcessInfo::default();
            header.unique_process_id = p.pid;
            header.number_of_threads = p.threads.len() as u32;
            header.next_entry_offset = if i + 1 == procs.len() {
                0
            } else {
                (offsets[i + 1].0 - record_off) as u32
            };
            if let Some(name) = p.name {
                header.image_name.length = name_len as u16;
                header.image_name.maximum_length = name_len as u16;
                header.image_name.buffer = base + (record_off + body) as u64;
            }
            data[record_off..record_off + PROCESS_INFO_SIZE].copy_from_slice(header.as_bytes());

            for (j, t) in p.threads.iter().enumerate() {
                let mut info = SystemThreadInfo::default();
                info.client_id.unique_process = p.pid;
                info.client_id.unique_thread = t.tid;
                info.start_address = t.start_address;
                info.thread_state = t.thread_state;
                info.wait_reason = t.wait_reason;
                let off = record_off + PROCESS_INFO_SIZE + j * THREAD_INFO_SIZE;
                data[off..off + THREAD_INFO_SIZE].copy_from_slice(info.as_bytes());
            }

            if let Some(name) = p.name {
                let mut off = record_off + body;
                for unit in name.encode_utf16() {
                    data[off..off + 2].copy_from_slice(&unit.to_le_bytes());
                    off += 2;
                }
            }
        }

        Snapshot::from_raw(data)
    }

    fn running_thread(tid: u64) -> RawThread {
        RawThread {
            tid,
            start_address: 0x1000,
            thread_state: 2,
            wait_reason: 0,
        }
    }

    fn suspended_thread(tid: u64) -> RawThread {
        RawThread {
            tid,
            start_address: 0x1000,
            thread_state: THREAD_STATE_WAIT,
            wait_reason: WAIT_REASON_SUSPENDED,
        }
    }

    #[test]
    fn test_walk_chain() {
        let snapshot = build_snapshot(&[
            RawProcess {
                pid: 0,
                name: None,
                threads: vec![running_thread(1)],
            },
            RawProcess {
                pid: 4,
                name: None,
                threads: vec![running_thread(8), running_thread(12)],
            },
            RawProcess {
                pid: 1234,
                name: Some("notepad.exe"),
                threads: vec![running_thread(4321)],
            },
        ]);

        let entries = snapshot
            .processes()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].pid(), 1234);
        assert_eq!(entries[2].name().unwrap(), "notepad.exe");
    }

    #[test]
    fn test_thread_count_matches_header() {
        let snapshot = build_snapshot(&[RawProcess {
            pid: 42,
            name: Some("a.exe"),
            threads: vec![running_thread(1), running_thread(2), running_thread(3)],
        }]);

        let entry = snapshot.find(42).unwrap();
        let threads = entry.threads().unwrap();
        assert_eq!(threads.len() as u32, entry.header().number_of_threads);
        assert_eq!(threads[1].client_id.unique_thread, 2);
    }

    #[test]
    fn test_name_synthesis() {
        let snapshot = build_snapshot(&[
            RawProcess {
                pid: 0,
                name: None,
                threads: vec![],
            },
            RawProcess {
                pid: 4,
                name: None,
                threads: vec![],
            },
        ]);

        let entries = snapshot
            .processes()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(entries[0].name().unwrap(), "Idle");
        assert_eq!(entries[1].name().unwrap(), "System");
    }

    #[test]
    fn test_zero_threads_never_suspended() {
        let snapshot = build_snapshot(&[RawProcess {
            pid: 7,
            name: Some("empty.exe"),
            threads: vec![],
        }]);
        assert_eq!(snapshot.find(7).unwrap().is_suspended().unwrap(), false);
    }

    #[test]
    fn test_all_suspended_pair() {
        let snapshot = build_snapshot(&[RawProcess {
            pid: 7,
            name: Some("frozen.exe"),
            threads: vec![suspended_thread(1), suspended_thread(2)],
        }]);
        assert_eq!(snapshot.find(7).unwrap().is_suspended().unwrap(), true);
    }

    #[test]
    fn test_classifier_rejects_either_field() {
        let mut threads = vec![SystemThreadInfo::default(); 2];
        for t in threads.iter_mut() {
            t.thread_state = THREAD_STATE_WAIT;
            t.wait_reason = WAIT_REASON_SUSPENDED;
        }
        assert!(all_threads_suspended(&threads));

        threads[1].thread_state = 2;
        assert!(!all_threads_suspended(&threads));

        threads[1].thread_state = THREAD_STATE_WAIT;
        threads[1].wait_reason = 7;
        assert!(!all_threads_suspended(&threads));

        assert!(!all_threads_suspended(&[]));
    }

    #[test]
    fn test_find_missing_pid() {
        let snapshot = build_snapshot(&[RawProcess {
            pid: 1,
            name: Some("a.exe"),
            threads: vec![],
        }]);
        assert_eq!(snapshot.find(999).unwrap_err(), Error::NotFound);
    }

    #[test]
    fn test_malformed_next_offset_terminates() {
        let mut snapshot = build_snapshot(&[RawProcess {
            pid: 1,
            name: None,
            threads: vec![],
        }]);
        // pretend a next record exists far past the arena
        let mut header = DataView::from(&snapshot.data[..]).read::<SystemProcessInfo>(0);
        header.next_entry_offset = 0x7fff_0000;
        snapshot.data[..PROCESS_INFO_SIZE].copy_from_slice(header.as_bytes());

        let mut iter = snapshot.processes();
        assert!(iter.next().unwrap().is_ok());
        assert_eq!(iter.next().unwrap().unwrap_err(), Error::Bounds);
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_thread_array_past_arena() {
        let mut snapshot = build_snapshot(&[RawProcess {
            pid: 1,
            name: None,
            threads: vec![],
        }]);
        let mut header = DataView::from(&snapshot.data[..]).read::<SystemProcessInfo>(0);
        header.number_of_threads = 100;
        snapshot.data[..PROCESS_INFO_SIZE].copy_from_slice(header.as_bytes());

        let entry = snapshot.find(1).unwrap();
        assert_eq!(entry.threads().unwrap_err(), Error::Bounds);
    }

    #[test]
    fn test_name_pointer_outside_arena() {
        let mut snapshot = build_snapshot(&[RawProcess {
            pid: 1,
            name: Some("x.exe"),
            threads: vec![],
        }]);
        let mut header = DataView::from(&snapshot.data[..]).read::<SystemProcessInfo>(0);
        header.image_name.buffer = 0x10;
        snapshot.data[..PROCESS_INFO_SIZE].copy_from_slice(header.as_bytes());

        assert_eq!(snapshot.find(1).unwrap().name().unwrap_err(), Error::Bounds);
    }
}
