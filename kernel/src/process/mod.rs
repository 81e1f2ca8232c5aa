//! Process management
//!
//! The process table owns every PCB; the parent/child/sibling graph is held
//! as indices into it (`Option<Pid>` up, `Vec<Pid>` down), which keeps the
//! graph cycle-free without changing semantics. Pids double as table slot
//! numbers: pid 0 is reserved for the idle/kernel pseudo-process and is
//! never allocated.

pub mod fork;
pub mod lifecycle;
pub mod memory;
pub mod pcb;
pub mod signal;
pub mod table;

pub use pcb::{Context, MemoryLayout, Process, Region, RegionFlags, SignalDisposition};
pub use signal::{DefaultAction, Signal};
pub use table::ProcessTable;

/// Maximum number of live processes (table slots).
pub const MAX_PROCESSES: usize = 256;

/// Number of signal slots per process (signals 1..=31 are valid).
pub const NSIG: usize = 32;

/// Process identifier; doubles as the process-table slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// The init process, adoptive parent of orphans.
    pub const INIT: Pid = Pid(1);

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling state of a live process. An unused table slot is the vacant
/// `Option`, so there is no `Unused` variant to keep in sync.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Eligible to run, sitting in the ready queue.
    Ready = 0,
    /// Currently owning the CPU.
    Running = 1,
    /// Waiting for a child, a signal, or a SIGCONT.
    Blocked = 2,
    /// Exited; PCB retained until the parent reaps it.
    Zombie = 3,
}
