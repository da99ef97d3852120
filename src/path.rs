/*!
Image path resolution.

The per-PID path query yields a kernel-namespace device path such as
`\Device\HarddiskVolume3\Windows\notepad.exe`; translation rewrites it to a
drive-letter path by matching the device targets of the logical drives.
*/

use log::trace;

use widestring::U16Str;

use crate::error::Result;
use crate::kernel::NativeApi;
use crate::types::{size, Pid};

/// Capacity in UTF-16 units of the caller-owned path buffer.
///
/// Paths longer than this are truncated by the kernel and accepted
/// silently; a known limitation, not a failure path.
pub const IMAGE_PATH_CAPACITY: usize = size::kb(1) / 2;

/// A logical drive and the device target backing it.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize))]
pub struct DriveMapping {
    /// Drive designator without trailing separator, e.g. `C:`.
    pub letter: String,
    /// Device target, e.g. `\Device\HarddiskVolume3`.
    pub device: String,
}

/// Resolves the drive-letter image path of a process.
///
/// Issues the per-PID path query (no snapshot required) and translates the
/// device path against the current logical-drive list.
pub fn image_path<A: NativeApi>(api: &A, pid: Pid) -> Result<String> {
    let mut buf = vec![0u16; IMAGE_PATH_CAPACITY];
    let len = api.query_image_path(pid, &mut buf)?;
    let device_path = U16Str::from_slice(&buf[..len]).to_string_lossy();
    Ok(to_drive_path(&api.drive_mappings(), &device_path))
}

/// Rewrites a device-namespace path to a drive-letter path.
///
/// A drive matches when its device target is a case-insensitive prefix of
/// the path ending on a full segment, i.e. followed by a separator:
/// `\Device\HarddiskVolume3` must not claim
/// `\Device\HarddiskVolume30\x.exe`. The first matching drive wins; with
/// no match the path is returned unchanged.
pub fn to_drive_path(drives: &[DriveMapping], device_path: &str) -> String {
    for drive in drives {
        if drive.device.is_empty() {
            continue;
        }
        let prefix = match device_path.get(..drive.device.len()) {
            Some(prefix) => prefix,
            None => continue,
        };
        if !prefix.eq_ignore_ascii_case(&drive.device) {
            continue;
        }
        let rest = &device_path[drive.device.len()..];
        if !rest.starts_with('\\') {
            // partial-segment prefix, e.g. HarddiskVolume3 vs HarddiskVolume30
            trace!("skipping device target {} for {}", drive.device, device_path);
            continue;
        }
        return format!("{}{}", drive.letter, rest);
    }

    device_path.to_string()
}
