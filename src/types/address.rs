/*!
Abstraction over an address inside a target process.
*/

use std::fmt;

use dataview::Pod;

/// This type represents an address on the target system.
/// It internally holds a `u64` value but can also be used
/// when the target system is running a 32-bit kernel.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct Address(u64);

unsafe impl Pod for Address {}

impl Address {
    /// A address with the value of zero.
    pub const NULL: Address = Address(0);

    /// Returns an address with a value of zero.
    pub const fn null() -> Self {
        Address::NULL
    }

    /// Checks whether the address is zero or not.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Converts the address into a `u64` value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the distance in bytes from the given base address.
    ///
    /// Wraps around when the base lies above `self`.
    pub const fn displacement_from(self, base: Address) -> u64 {
        self.0.wrapping_sub(base.0)
    }
}

/// Returns a address with a value of zero.
impl Default for Address {
    fn default() -> Self {
        Address::NULL
    }
}

/// Converts a `u64` into an address.
impl From<u64> for Address {
    fn from(item: u64) -> Self {
        Self(item)
    }
}

/// Converts an address into a `u64` value.
impl From<Address> for u64 {
    fn from(item: Address) -> Self {
        item.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null() {
        assert_eq!(Address::null().is_null(), true);
        assert_eq!(Address::from(0x1000u64).is_null(), false);
    }

    #[test]
    fn test_displacement() {
        let base = Address::from(0x7ff0_0000u64);
        let addr = Address::from(0x7ff0_0040u64);
        assert_eq!(addr.displacement_from(base), 0x40);
    }

    #[test]
    fn test_format() {
        assert_eq!(format!("{:x}", Address::from(0x41au64)), "41a");
        assert_eq!(format!("{:X}", Address::from(0x41au64)), "41A");
    }
}
