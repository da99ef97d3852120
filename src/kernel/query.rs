use log::{debug, trace};

use crate::error::{Error, Result};
use crate::kernel::api::QueryOutcome;
use crate::kernel::status::STATUS_INFO_LENGTH_MISMATCH;

/// Invokes an opaque kernel query with a growing buffer.
///
/// The query is attempted with a buffer of `initial_size` bytes. When the
/// kernel reports the buffer as too small, the buffer is reallocated to
/// exactly the reported size and the query retried once. A second
/// too-small report, or any other non-success status, fails the operation;
/// unbounded regrowth is deliberately not attempted.
///
/// On success the buffer is truncated to the used length.
pub fn read_to_grown_buffer<F>(initial_size: usize, mut query: F) -> Result<Vec<u8>>
where
    F: FnMut(&mut [u8]) -> QueryOutcome,
{
    let mut buf = vec![0u8; initial_size];
    let required = match query(&mut buf) {
        QueryOutcome::Complete(used) => {
            trace!("query complete with {} bytes", used);
            buf.truncate(used);
            return Ok(buf);
        }
        QueryOutcome::TooSmall(required) if required > 0 => required,
        QueryOutcome::TooSmall(_) => return Err(Error::Query(STATUS_INFO_LENGTH_MISMATCH)),
        QueryOutcome::Failed(status) => return Err(Error::Query(status)),
    };

    debug!(
        "buffer of {} bytes too small, retrying with {} bytes",
        initial_size, required
    );

    let mut buf = vec![0u8; required];
    match query(&mut buf) {
        QueryOutcome::Complete(used) => {
            trace!("query complete with {} bytes after regrow", used);
            buf.truncate(used);
            Ok(buf)
        }
        QueryOutcome::TooSmall(_) => Err(Error::Query(STATUS_INFO_LENGTH_MISMATCH)),
        QueryOutcome::Failed(status) => Err(Error::Query(status)),
    }
}
