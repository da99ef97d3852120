use std::fmt;

/// A raw status code returned by a kernel information query.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct NtStatus(pub i32);

pub const STATUS_SUCCESS: NtStatus = NtStatus(0);
pub const STATUS_INFO_LENGTH_MISMATCH: NtStatus = NtStatus(0xC000_0004u32 as i32);

impl NtStatus {
    /// Checks whether the status signals success.
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }
}

impl From<i32> for NtStatus {
    fn from(status: i32) -> Self {
        Self(status)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success() {
        assert!(STATUS_SUCCESS.is_success());
        assert!(!STATUS_INFO_LENGTH_MISMATCH.is_success());
    }

    #[test]
    fn test_format() {
        assert_eq!(format!("{}", STATUS_INFO_LENGTH_MISMATCH), "0xC0000004");
    }
}
