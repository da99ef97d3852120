/*!
Specialized `Error` and `Result` types for ntproc.
*/

use std::{convert, error, fmt, result};

use crate::kernel::NtStatus;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Error {
    /// Generic error type containing a string
    Other(&'static str),
    /// A required native entry point could not be located.
    ///
    /// Contains the name of the missing export. Always fatal to the
    /// operation attempting to use it.
    Resolution(&'static str),
    /// A kernel query returned a non-success status.
    ///
    /// This also covers a second too-small-buffer status after the single
    /// permitted resize.
    Query(NtStatus),
    /// No process or thread record matched the request.
    NotFound,
    /// Out of bounds.
    ///
    /// An offset or length inside a snapshot buffer failed validation.
    Bounds,
    /// Encoding error.
    ///
    /// Catch-all for malformed string data such as odd-length UTF-16.
    Encoding,
    /// A documented OS call failed.
    ///
    /// Contains the reported OS error code.
    Os(u32),
}

/// Convert from &str to error
impl convert::From<&'static str> for Error {
    fn from(error: &'static str) -> Self {
        Error::Other(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Other(e) => write!(f, "error: {}", e),
            Error::Resolution(name) => write!(f, "unable to resolve native entry point: {}", name),
            Error::Query(status) => write!(f, "kernel query failed with status {}", status),
            Error::NotFound => f.write_str("no matching process or thread"),
            Error::Bounds => f.write_str("offset out of snapshot bounds"),
            Error::Encoding => f.write_str("malformed string data"),
            Error::Os(code) => write!(f, "os call failed with error code {}", code),
        }
    }
}

impl error::Error for Error {}

/// Specialized `Result` type for ntproc errors.
pub type Result<T> = result::Result<T, Error>;
