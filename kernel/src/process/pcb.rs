//! Process control block
//!
//! One [`Process`] per table slot: identity, scheduling state, the saved
//! register context, the owning reference to a page directory, the memory
//! layout, the process-graph links and the per-process signal state.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;

use super::signal::Signal;
use super::{Pid, ProcessState, NSIG};
use crate::mm::{PhysAddr, VirtAddr};

/// Kernel code segment selector.
pub const KERNEL_CS: u32 = 0x08;

/// Kernel data segment selector.
pub const KERNEL_DS: u32 = 0x10;

/// Initial EFLAGS for a fresh process: interrupt flag set, reserved bit 1.
pub const EFLAGS_IF: u32 = 0x202;

/// Full register snapshot used for a context switch.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub eip: u32,
    pub eflags: u32,
    pub cs: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub ss: u32,
}

bitflags! {
    /// Protection of a memory region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionFlags: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

/// One region of the per-process layout, as a half-open address range.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub start: VirtAddr,
    pub end: VirtAddr,
    pub flags: RegionFlags,
}

/// Per-process memory layout. The heap grows upward from its break; the
/// user stack grows downward from a fixed top.
#[derive(Debug, Clone, Copy)]
pub struct MemoryLayout {
    pub code: Region,
    pub rodata: Region,
    pub data: Region,
    pub bss: Region,
    /// Bottom of the heap region.
    pub heap_start: VirtAddr,
    /// Current break.
    pub heap_end: VirtAddr,
    /// Top of the user stack (exclusive).
    pub stack_top: VirtAddr,
    /// Mapped stack size in bytes.
    pub stack_size: u32,
}

/// What a process has configured to happen when a signal arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDisposition {
    /// The signal's default action.
    Default,
    /// Discard on delivery.
    Ignore,
    /// Run this handler with the signal number as its argument.
    Handler(fn(u32)),
}

/// Process control block.
#[derive(Clone)]
pub struct Process {
    pub pid: Pid,
    pub uid: u32,
    pub gid: u32,
    pub name: String,
    pub state: ProcessState,

    /// Register snapshot used when this process is not running.
    pub context: Context,

    /// Owning reference to the page directory.
    pub address_space: PhysAddr,
    /// One kernel-window page used as this process's kernel stack.
    pub kernel_stack: PhysAddr,
    pub layout: MemoryLayout,

    /// Parent pid; `None` for init and unadopted orphans.
    pub parent: Option<Pid>,
    /// Children, newest first.
    pub children: Vec<Pid>,

    /// Pending signals, delivery order.
    pub pending: VecDeque<Signal>,
    /// Per-signal dispositions, indexed by signal number.
    pub dispositions: [SignalDisposition; NSIG],

    /// Meaningful only in the `Zombie` state.
    pub exit_code: i32,
    /// Timer ticks charged to this process.
    pub ticks: u64,
}

impl Process {
    /// Parent pid as a raw number, 0 when there is none.
    pub fn ppid(&self) -> u32 {
        self.parent.map_or(0, Pid::as_u32)
    }

    /// Whether this process has exited but has not been reaped.
    pub fn is_zombie(&self) -> bool {
        self.state == ProcessState::Zombie
    }
}
