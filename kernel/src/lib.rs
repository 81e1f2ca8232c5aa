//! ferrite-kernel core supervisor
//!
//! The supervisor of a small 32-bit x86 protected-mode kernel: per-process
//! address spaces over an identity-mapped kernel window, kernel heap and
//! virtual arena allocators, a preemptive round-robin scheduler with a
//! fork/exit/wait process lifecycle, POSIX-like signals, and local
//! stream/datagram socket IPC.
//!
//! The crate is a library. Low-level bring-up (GDT/IDT/PIC/PIT programming,
//! ISR stubs) belongs to a platform layer that traps exceptions and hardware
//! interrupts and hands them to [`Kernel::on_trap`] as numbered events with a
//! register-state record. Hardware access flows exclusively through the
//! [`platform::Platform`] trait, which also makes the whole core runnable on
//! a hosted target for testing.

#![no_std]

extern crate alloc;

// On bare-metal targets kernel bookkeeping collections (children lists,
// pending-signal queues) are served by a linked-list allocator over a region
// the platform layer donates at boot. On the host the system allocator is
// used so the test suite runs under the standard harness.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(target_os = "none"))]
extern crate std;

#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

/// Donate a memory region to the bookkeeping allocator.
///
/// # Safety
///
/// `start..start + size` must be unused, writable memory that stays reserved
/// for the allocator for the lifetime of the kernel. Must be called exactly
/// once, before any allocation.
#[cfg(target_os = "none")]
pub unsafe fn init_boot_allocator(start: *mut u8, size: usize) {
    // SAFETY: forwarded caller contract.
    unsafe { ALLOCATOR.lock().init(start, size) };
}

pub mod error;
pub mod ipc;
pub mod logger;
pub mod mm;
pub mod panic;
pub mod platform;
pub mod process;
pub mod sched;
pub mod syscall;
pub mod trap;

mod kernel;

pub use error::KernelError;
pub use kernel::{Kernel, KernelConfig};
pub use mm::{PhysAddr, VirtAddr, PAGE_SIZE};
pub use process::{Pid, ProcessState};
pub use trap::TrapFrame;
