/*!
This crate inspects and controls windows processes and threads through the
native kernel information interfaces rather than the documented
enumeration APIs, which lack per-thread wait state, precise start
addresses and PID-only image paths.

The OS surface is a narrow trait ([`kernel::NativeApi`]) whose production
implementation resolves the required ntdll entry points once at startup;
all decoding, classification and resolution logic runs against the trait
and is exercised by the deterministic fakes in [`dummy`].
*/

pub mod error;

pub mod kernel;

pub mod snapshot;

pub mod types;

pub mod path;

pub mod process;

pub mod symbol;

pub mod thread;

pub mod dummy;

pub mod prelude {
    pub mod v1 {
        pub use crate::error::*;
        pub use crate::kernel::*;
        pub use crate::path::*;
        pub use crate::process::*;
        pub use crate::snapshot::*;
        pub use crate::symbol::*;
        pub use crate::types::*;
    }
    pub use v1::*;
}
