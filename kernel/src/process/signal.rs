//! Signals
//!
//! Each PCB carries an ordered pending queue and a disposition array.
//! Raising a signal enqueues it and wakes a blocked target; delivery drains
//! the queue in order at the next safe point, which is either the trap-exit
//! path of the current process or the scheduler's entry into the chosen one.
//!
//! SIGKILL and SIGSTOP keep their default action no matter what; attempts to
//! re-dispose them fail.

use log::debug;

use super::lifecycle;
use super::table::ProcessTable;
use super::{Pid, ProcessState, SignalDisposition, NSIG};
use crate::error::{KernelError, KernelResult};
use crate::mm::MemoryManager;
use crate::platform::Platform;
use crate::sched::queue::ReadyQueue;

/// A signal number in 1..=31.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal(u32);

/// Exit code of a process terminated by a signal's default action.
pub const fn termination_code(signal: Signal) -> i32 {
    128 + signal.0 as i32
}

impl Signal {
    pub const HUP: Signal = Signal(1);
    pub const INT: Signal = Signal(2);
    pub const QUIT: Signal = Signal(3);
    pub const ILL: Signal = Signal(4);
    pub const TRAP: Signal = Signal(5);
    pub const ABRT: Signal = Signal(6);
    pub const BUS: Signal = Signal(7);
    pub const FPE: Signal = Signal(8);
    pub const KILL: Signal = Signal(9);
    pub const USR1: Signal = Signal(10);
    pub const SEGV: Signal = Signal(11);
    pub const USR2: Signal = Signal(12);
    pub const PIPE: Signal = Signal(13);
    pub const ALRM: Signal = Signal(14);
    pub const TERM: Signal = Signal(15);
    pub const STKFLT: Signal = Signal(16);
    pub const CHLD: Signal = Signal(17);
    pub const CONT: Signal = Signal(18);
    pub const STOP: Signal = Signal(19);
    pub const TSTP: Signal = Signal(20);

    /// Validate a raw number.
    pub const fn new(number: u32) -> Option<Signal> {
        if number >= 1 && number < NSIG as u32 {
            Some(Signal(number))
        } else {
            None
        }
    }

    pub const fn number(self) -> u32 {
        self.0
    }

    /// Whether the disposition of this signal is immutable.
    pub const fn is_unblockable(self) -> bool {
        self.0 == Self::KILL.0 || self.0 == Self::STOP.0
    }

    pub fn name(self) -> &'static str {
        const NAMES: [&str; 21] = [
            "SIGNAL0", "SIGHUP", "SIGINT", "SIGQUIT", "SIGILL", "SIGTRAP", "SIGABRT", "SIGBUS",
            "SIGFPE", "SIGKILL", "SIGUSR1", "SIGSEGV", "SIGUSR2", "SIGPIPE", "SIGALRM", "SIGTERM",
            "SIGSTKFLT", "SIGCHLD", "SIGCONT", "SIGSTOP", "SIGTSTP",
        ];
        NAMES.get(self.0 as usize).copied().unwrap_or("UNKNOWN")
    }

    /// The action taken when the disposition is `Default`.
    pub const fn default_action(self) -> DefaultAction {
        match self.0 {
            1..=16 => DefaultAction::Terminate,
            18 => DefaultAction::Continue,
            19 | 20 => DefaultAction::Stop,
            _ => DefaultAction::Ignore,
        }
    }
}

/// Default actions of signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    /// Route into `exit(128 + signal)`.
    Terminate,
    /// Discard.
    Ignore,
    /// Block the process until SIGCONT.
    Stop,
    /// Make a stopped process ready again.
    Continue,
}

/// Outcome of draining a process's pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The process survived delivery and may run.
    Runnable,
    /// A default action removed the process from the CPU (terminated or
    /// stopped); the scheduler must pick someone else.
    Descheduled,
}

/// Replace the disposition of `signal` for `pid`. Fails for SIGKILL and
/// SIGSTOP.
pub fn register_handler(
    table: &mut ProcessTable,
    pid: Pid,
    signal: Signal,
    disposition: SignalDisposition,
) -> KernelResult<()> {
    if signal.is_unblockable() {
        return Err(KernelError::BadSignal { signal: signal.number() });
    }
    let process = table.get_mut(pid).ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;
    process.dispositions[signal.number() as usize] = disposition;
    Ok(())
}

/// Make `signal` pending on `pid` and wake the target if it is blocked.
pub fn send_signal(
    table: &mut ProcessTable,
    ready: &mut ReadyQueue,
    pid: Pid,
    signal: Signal,
) -> KernelResult<()> {
    let process = table.get_mut(pid).ok_or(KernelError::ProcessNotFound { pid: pid.0 })?;
    if process.is_zombie() {
        return Err(KernelError::ProcessNotFound { pid: pid.0 });
    }
    process.pending.push_back(signal);
    debug!(target: "signal", "{} pending on pid {}", signal.name(), pid);

    if process.state == ProcessState::Blocked {
        process.state = ProcessState::Ready;
        ready.enqueue(pid);
    }
    Ok(())
}

/// Drain `pid`'s pending queue in order. Called with `pid`'s address space
/// loaded. Handlers run directly, with the signal number as argument, on the
/// process's stack.
pub fn deliver_pending<P: Platform>(
    pid: Pid,
    table: &mut ProcessTable,
    mm: &mut MemoryManager,
    ready: &mut ReadyQueue,
    platform: &mut P,
) -> KernelResult<Delivery> {
    loop {
        let process = match table.get_mut(pid) {
            Some(process) => process,
            None => return Ok(Delivery::Descheduled),
        };
        let Some(signal) = process.pending.pop_front() else {
            return Ok(Delivery::Runnable);
        };

        let disposition = if signal.is_unblockable() {
            SignalDisposition::Default
        } else {
            process.dispositions[signal.number() as usize]
        };

        match disposition {
            SignalDisposition::Ignore => {}
            SignalDisposition::Handler(handler) => {
                debug!(target: "signal", "pid {} handles {}", pid, signal.name());
                handler(signal.number());
            }
            SignalDisposition::Default => match signal.default_action() {
                DefaultAction::Ignore => {}
                DefaultAction::Continue => {
                    // Already on its way to the CPU; nothing to do.
                }
                DefaultAction::Stop => {
                    debug!(target: "signal", "pid {} stopped by {}", pid, signal.name());
                    process.state = ProcessState::Blocked;
                    ready.remove(pid);
                    return Ok(Delivery::Descheduled);
                }
                DefaultAction::Terminate => {
                    debug!(
                        target: "signal",
                        "pid {} terminated by {} (exit {})",
                        pid,
                        signal.name(),
                        termination_code(signal)
                    );
                    lifecycle::exit_process(pid, termination_code(signal), table, mm, ready, platform)?;
                    return Ok(Delivery::Descheduled);
                }
            },
        }
    }
}

/// Signal corresponding to a CPU exception vector, if the exception is one
/// the kernel surfaces to the faulting process.
pub const fn signal_for_exception(vector: u32) -> Option<Signal> {
    match vector {
        // Divide-by-zero, overflow, device-not-available, x87, SIMD.
        0 | 4 | 7 | 16 | 19 => Some(Signal::FPE),
        // Debug, breakpoint.
        1 | 3 => Some(Signal::TRAP),
        // Invalid opcode.
        6 => Some(Signal::ILL),
        // Bound-range, invalid TSS, segment-not-present, stack fault,
        // general protection, page fault.
        5 | 10 | 11 | 12 | 13 | 14 => Some(Signal::SEGV),
        // Double fault, machine check.
        8 | 18 => Some(Signal::ABRT),
        // Alignment check.
        17 => Some(Signal::BUS),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_validate() {
        assert_eq!(Signal::new(0), None);
        assert_eq!(Signal::new(32), None);
        assert_eq!(Signal::new(9), Some(Signal::KILL));
        assert_eq!(Signal::new(31).map(|s| s.number()), Some(31));
    }

    #[test]
    fn default_actions() {
        assert_eq!(Signal::SEGV.default_action(), DefaultAction::Terminate);
        assert_eq!(Signal::KILL.default_action(), DefaultAction::Terminate);
        assert_eq!(Signal::CHLD.default_action(), DefaultAction::Ignore);
        assert_eq!(Signal::STOP.default_action(), DefaultAction::Stop);
        assert_eq!(Signal::CONT.default_action(), DefaultAction::Continue);
        assert_eq!(Signal::new(25).unwrap().default_action(), DefaultAction::Ignore);
    }

    #[test]
    fn exception_mapping_matches_the_fault_table() {
        assert_eq!(signal_for_exception(0), Some(Signal::FPE));
        assert_eq!(signal_for_exception(3), Some(Signal::TRAP));
        assert_eq!(signal_for_exception(6), Some(Signal::ILL));
        assert_eq!(signal_for_exception(13), Some(Signal::SEGV));
        assert_eq!(signal_for_exception(14), Some(Signal::SEGV));
        assert_eq!(signal_for_exception(8), Some(Signal::ABRT));
        assert_eq!(signal_for_exception(17), Some(Signal::BUS));
        assert_eq!(signal_for_exception(2), None);
        assert_eq!(signal_for_exception(15), None);
    }

    #[test]
    fn termination_codes() {
        assert_eq!(termination_code(Signal::SEGV), 139);
        assert_eq!(termination_code(Signal::KILL), 137);
    }

    #[test]
    fn names() {
        assert_eq!(Signal::SEGV.name(), "SIGSEGV");
        assert_eq!(Signal::new(31).unwrap().name(), "UNKNOWN");
    }
}
