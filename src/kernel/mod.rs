/*!
The raw native interface layer.

Everything above this module speaks [`NativeApi`]; everything below it is
the wire-level contract of the kernel information interfaces: operation
codes, status codes and the growing-buffer query discipline.
*/

pub mod api;
pub mod query;
pub mod status;

#[cfg(windows)]
pub mod ntdll;

pub use api::{NativeApi, QueryOutcome};
pub use query::read_to_grown_buffer;
pub use status::NtStatus;

#[cfg(windows)]
pub use ntdll::NtdllApi;

/// Information class selecting the chained all-process record list.
pub const SYSTEM_PROCESS_INFORMATION_CLASS: u32 = 5;

/// Information class selecting the per-PID image path query.
pub const SYSTEM_PROCESS_ID_INFORMATION_CLASS: u32 = 0x58;

/// Thread information class returning the user-mode ("Win32") start address.
pub const THREAD_QUERY_SET_WIN32_START_ADDRESS: u32 = 9;

// The pair classifying a thread as suspended. Undocumented platform values
// with no public enumeration to validate against; preserved verbatim.
pub const THREAD_STATE_WAIT: u32 = 5;
pub const WAIT_REASON_SUSPENDED: u32 = 5;
