use crate::error::Result;
use crate::kernel::NtStatus;
use crate::path::DriveMapping;
use crate::types::{Address, Pid, Tid};

/// Outcome of a single invocation of an opaque kernel query.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueryOutcome {
    /// The query succeeded and the first `n` bytes of the buffer are valid.
    Complete(usize),
    /// The buffer was too small; the kernel expects `n` bytes.
    TooSmall(usize),
    /// The query failed with a status other than the too-small signal.
    Failed(NtStatus),
}

/// The exact set of OS operations this crate requires.
///
/// A production implementation ([`NtdllApi`](crate::kernel::NtdllApi))
/// resolves the undocumented entry points once at construction and fails
/// fast if any is missing. Tests substitute
/// [`DummySystem`](crate::dummy::DummySystem).
///
/// All handles opened by an implementation are scoped to the call that
/// needs them and released on every exit path.
pub trait NativeApi {
    /// Fills `buf` with the chained variable-length process records of a
    /// fresh system snapshot.
    fn query_process_snapshot(&self, buf: &mut [u8]) -> QueryOutcome;

    /// Fills `buf` with the kernel-namespace device path of the process
    /// image and returns the number of UTF-16 units written.
    ///
    /// Paths longer than the buffer are truncated by the kernel; the
    /// truncated result is returned as-is.
    fn query_image_path(&self, pid: Pid, buf: &mut [u16]) -> Result<usize>;

    /// Queries the user-mode ("Win32") start address of a live thread.
    ///
    /// Returns `None` when the thread cannot be opened, the query fails or
    /// the reported address is null.
    fn query_thread_start_address(&self, tid: Tid) -> Option<Address>;

    /// Enumerates the logical drives together with their device targets.
    ///
    /// An empty list is a valid (degraded) result; path translation then
    /// passes device paths through unchanged.
    fn drive_mappings(&self) -> Vec<DriveMapping>;

    /// Suspends every thread of the target process.
    fn suspend_process(&self, pid: Pid) -> Result<()>;

    /// Resumes every thread of the target process.
    fn resume_process(&self, pid: Pid) -> Result<()>;

    /// Terminates the target process with the given exit code.
    fn terminate_process(&self, pid: Pid, exit_code: u32) -> Result<()>;

    /// Suspends a single thread, returning the previous suspend count.
    fn suspend_thread(&self, tid: Tid) -> Result<u32>;

    /// Resumes a single thread, returning the previous suspend count.
    fn resume_thread(&self, tid: Tid) -> Result<u32>;

    /// Queries the scheduling priority class of the target process.
    fn process_priority(&self, pid: Pid) -> Result<u32>;

    /// Queries the scheduling priority level of the target thread.
    fn thread_priority(&self, tid: Tid) -> Result<i32>;

    /// Enables the debug privilege on the current process token.
    fn enable_debug_privilege(&self) -> Result<()>;
}
