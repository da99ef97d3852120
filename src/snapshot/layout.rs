/*!
Bit-exact layouts of the kernel-supplied snapshot records.

These mirror the 64-bit kernel's wire format. Pointer-width fields are
declared as `u64`; the walker never dereferences them directly but
translates the single embedded pointer (the name buffer) into an offset
within the owned snapshot arena.
*/

use std::mem;

use dataview::Pod;

/// Counted UTF-16 string descriptor embedded in a process record.
///
/// `length` and `maximum_length` are in bytes, not UTF-16 units. `buffer`
/// is an absolute address inside the snapshot buffer the kernel filled.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnicodeString {
    pub length: u16,
    pub maximum_length: u16,
    pub _pad0: u32,
    pub buffer: u64,
}

unsafe impl Pod for UnicodeString {}

/// Owning process/thread id pair of a thread record.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct ClientId {
    pub unique_process: u64,
    pub unique_thread: u64,
}

unsafe impl Pod for ClientId {}

/// One entry of the thread array trailing a process record.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemThreadInfo {
    pub kernel_time: i64,
    pub user_time: i64,
    pub create_time: i64,
    pub wait_time: u32,
    pub _pad0: u32,
    pub start_address: u64,
    pub client_id: ClientId,
    pub priority: i32,
    pub base_priority: i32,
    pub context_switches: u32,
    pub thread_state: u32,
    pub wait_reason: u32,
    pub _pad1: u32,
}

unsafe impl Pod for SystemThreadInfo {}

/// Fixed-size header of one process record.
///
/// `next_entry_offset` is the byte distance to the following record, zero
/// terminating the chain. `number_of_threads` [`SystemThreadInfo`] entries
/// follow the header inline; there is no separate length field for the
/// array.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemProcessInfo {
    pub next_entry_offset: u32,
    pub number_of_threads: u32,
    pub working_set_private_size: i64,
    pub hard_fault_count: u32,
    pub number_of_threads_high_watermark: u32,
    pub cycle_time: u64,
    pub create_time: i64,
    pub user_time: i64,
    pub kernel_time: i64,
    pub image_name: UnicodeString,
    pub base_priority: i32,
    pub _pad0: u32,
    pub unique_process_id: u64,
    pub inherited_from_unique_process_id: u64,
    pub handle_count: u32,
    pub session_id: u32,
    pub unique_process_key: u64,
    pub peak_virtual_size: u64,
    pub virtual_size: u64,
    pub page_fault_count: u32,
    pub _pad1: u32,
    pub peak_working_set_size: u64,
    pub working_set_size: u64,
    pub quota_peak_paged_pool_usage: u64,
    pub quota_paged_pool_usage: u64,
    pub quota_peak_non_paged_pool_usage: u64,
    pub quota_non_paged_pool_usage: u64,
    pub pagefile_usage: u64,
    pub peak_pagefile_usage: u64,
    pub private_page_count: u64,
    pub read_operation_count: i64,
    pub write_operation_count: i64,
    pub other_operation_count: i64,
    pub read_transfer_count: i64,
    pub write_transfer_count: i64,
    pub other_transfer_count: i64,
}

unsafe impl Pod for SystemProcessInfo {}

/// Size of [`SystemProcessInfo`] on the wire.
pub const PROCESS_INFO_SIZE: usize = 256;

/// Size of [`SystemThreadInfo`] on the wire.
pub const THREAD_INFO_SIZE: usize = 80;

// The layouts are compatibility contracts; break the build if they drift.
const _: [u8; (mem::size_of::<SystemProcessInfo>() == PROCESS_INFO_SIZE) as usize] = [0; 1];
const _: [u8; (mem::size_of::<SystemThreadInfo>() == THREAD_INFO_SIZE) as usize] = [0; 1];
const _: [u8; (mem::size_of::<UnicodeString>() == 16) as usize] = [0; 1];
