//! Round-robin scheduler
//!
//! A single distinguished `current` reference plus the ready ring. Every
//! scheduling decision goes through [`Scheduler::run`]: requeue the
//! preempted process, pick the head of the ring, load its address space,
//! drain its pending signals, and hand its context to the platform. Signal
//! delivery can deschedule the chosen process (default terminate or stop),
//! in which case selection simply continues with the next head.
//!
//! The timer divider turns the 100 Hz tick into ~10 Hz preemption.

use log::trace;

use super::queue::ReadyQueue;
use crate::error::KernelResult;
use crate::mm::MemoryManager;
use crate::platform::Platform;
use crate::process::signal::{self, Delivery};
use crate::process::table::ProcessTable;
use crate::process::{Pid, ProcessState};

/// `run()` is invoked every this many timer ticks.
pub const SCHEDULE_DIVIDER: u64 = 10;

/// Scheduler state.
pub struct Scheduler {
    /// Processes eligible to run. Never contains `current`.
    pub ready: ReadyQueue,
    current: Option<Pid>,
    ticks: u64,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self { ready: ReadyQueue::new(), current: None, ticks: 0 }
    }

    /// The running process, `None` while the CPU idles in the kernel.
    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    /// Timer ticks observed since boot.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Mark `pid` ready and queue it. A full ring drops the push silently
    /// and reports `false`.
    pub fn add(&mut self, table: &mut ProcessTable, pid: Pid) -> bool {
        let Some(process) = table.get_mut(pid) else {
            return false;
        };
        process.state = ProcessState::Ready;
        self.ready.enqueue(pid)
    }

    /// Drop `pid` from the ready ring (e.g. on exit or stop).
    pub fn remove(&mut self, pid: Pid) -> bool {
        self.ready.remove(pid)
    }

    /// Pick and dispatch the next process; called from trap return or a
    /// voluntary yield. With an empty ring the CPU parks on the kernel
    /// directory until the next interrupt.
    pub fn run<P: Platform>(
        &mut self,
        table: &mut ProcessTable,
        mm: &mut MemoryManager,
        platform: &mut P,
    ) -> KernelResult<()> {
        if let Some(prev) = self.current {
            if let Some(process) = table.get_mut(prev) {
                if process.state == ProcessState::Running {
                    process.state = ProcessState::Ready;
                    self.ready.enqueue(prev);
                }
            }
        }

        loop {
            let Some(next) = self.ready.dequeue() else {
                self.current = None;
                let kernel_dir = mm.paging.kernel_dir();
                if mm.paging.current() != kernel_dir {
                    mm.paging.switch_to(platform, kernel_dir);
                }
                trace!(target: "sched", "ready queue empty, idling");
                platform.wait_for_interrupt();
                return Ok(());
            };

            // Stale entries (reaped or no longer ready) fall out here.
            let Some(process) = table.get_mut(next) else { continue };
            if process.state != ProcessState::Ready {
                continue;
            }

            process.state = ProcessState::Running;
            let dir = process.address_space;
            self.current = Some(next);
            mm.paging.switch_to(platform, dir);

            match signal::deliver_pending(next, table, mm, &mut self.ready, platform)? {
                Delivery::Runnable => {
                    let context = table
                        .get(next)
                        .expect("process vanished during signal delivery")
                        .context;
                    trace!(target: "sched", "dispatch pid {next}");
                    platform.switch_context(&context);
                    return Ok(());
                }
                Delivery::Descheduled => {
                    self.current = None;
                }
            }
        }
    }

    /// Timer interrupt body: account the tick, preempt every
    /// [`SCHEDULE_DIVIDER`] ticks, always acknowledge the interrupt.
    pub fn timer_tick<P: Platform>(
        &mut self,
        table: &mut ProcessTable,
        mm: &mut MemoryManager,
        platform: &mut P,
    ) -> KernelResult<()> {
        self.ticks += 1;
        if let Some(process) = self.current.and_then(|pid| table.get_mut(pid)) {
            process.ticks += 1;
        }

        let result = if self.ticks % SCHEDULE_DIVIDER == 0 {
            self.run(table, mm, platform)
        } else {
            Ok(())
        };

        platform.eoi(0);
        result
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
